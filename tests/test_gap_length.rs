
use gapstone::graph::{Contig, ScaffoldGraph};
use gapstone::position::SeqPos;
use pretty_assertions::assert_eq;
use test_utils::build_scaffold;

#[test]
fn gap_between_forward_contigs() {
    let mut g = ScaffoldGraph::new();
    let (_, ids) = build_scaffold(
        &mut g,
        &[(0.0, 1.0, 100.0, 2.0), (160.0, 4.0, 260.0, 5.0)],
    );
    let gap = g.gap_length(ids[0], ids[1]).unwrap();
    assert_eq!(gap.mean, 60.0);
    assert_eq!(gap.variance, 2.0);
}

#[test]
fn gap_respects_orientation() {
    // Left contig reversed: its A end is the rightmost point.
    let mut g = ScaffoldGraph::new();
    let (_, ids) = build_scaffold(
        &mut g,
        &[(100.0, 3.0, 0.0, 1.0), (160.0, 4.0, 260.0, 5.0)],
    );
    let gap = g.gap_length(ids[0], ids[1]).unwrap();
    assert_eq!(gap.mean, 60.0);
    assert_eq!(gap.variance, 1.0);
}

#[test]
fn both_reversed() {
    let mut g = ScaffoldGraph::new();
    let (_, ids) = build_scaffold(
        &mut g,
        &[(100.0, 3.0, 0.0, 1.0), (260.0, 6.0, 160.0, 4.0)],
    );
    let gap = g.gap_length(ids[0], ids[1]).unwrap();
    assert_eq!(gap.mean, 60.0);
    assert_eq!(gap.variance, 1.0);
}

#[test]
fn negative_gap_mean_is_allowed() {
    // Overlapping contigs produce a negative gap; only negative variance
    // is fatal.
    let mut g = ScaffoldGraph::new();
    let (_, ids) = build_scaffold(
        &mut g,
        &[(0.0, 1.0, 100.0, 2.0), (80.0, 4.0, 180.0, 5.0)],
    );
    let gap = g.gap_length(ids[0], ids[1]).unwrap();
    assert_eq!(gap.mean, -20.0);
    assert!(gap.variance >= 0.0);
}

#[test]
fn negative_gap_variance_halts() {
    let mut g = ScaffoldGraph::new();
    let (_, ids) = build_scaffold(
        &mut g,
        &[(0.0, 1.0, 100.0, 9.0), (160.0, 4.0, 260.0, 5.0)],
    );
    assert!(g.gap_length(ids[0], ids[1]).is_err());
}

#[test]
fn gap_matches_scan() {
    // The fill scan records exactly the gap-length positions.
    let mut g = ScaffoldGraph::new();
    let (_, ids) = build_scaffold(
        &mut g,
        &[(0.0, 1.0, 100.0, 2.0), (160.0, 4.0, 260.0, 5.0)],
    );
    let fill = gapstone::fill::scan_gaps(&g, 1000.0);
    let internal = &fill.scaffolds[0].gaps[1];
    let gap = g.gap_length(ids[0], ids[1]).unwrap();
    assert_eq!(internal.end - internal.start, gap);
    assert_eq!(internal.len, SeqPos::new(60.0, 2.0));
}
