
use gapstone::align::DpAligner;
use gapstone::config::GapstoneConfig;
use gapstone::fill::scan_gaps;
use gapstone::graph::{Contig, ContigTag, EdgeOrient, ScaffoldGraph, ScaffoldId};
use gapstone::insert::assert_fill_invariants;
use gapstone::joins::{check_joins, file_joins, JoinBuffer, ScaffJoin};
use gapstone::pipeline::rocks_pass;
use gapstone::position::SeqPos;
use gapstone::rocks::{select_rocks, GapFillCtx};
use test_utils::{build_scaffold, mate_edge};

fn two_scaffolds(g: &mut ScaffoldGraph) -> (ScaffoldId, Vec<gapstone::graph::ContigId>, ScaffoldId) {
    let (sid_a, ids_a) = build_scaffold(
        g,
        &[
            (0.0, 1.0, 1000.0, 2.0),
            (1500.0, 10.0, 2500.0, 12.0),
            (3000.0, 20.0, 4000.0, 22.0),
        ],
    );
    let (sid_b, _) = build_scaffold(
        g,
        &[
            (0.0, 1.0, 1000.0, 2.0),
            (1500.0, 10.0, 2500.0, 12.0),
            (3000.0, 20.0, 4000.0, 22.0),
        ],
    );
    (sid_a, ids_a, sid_b)
}

#[test]
fn rock_lands_in_nearest_gap() {
    let mut g = ScaffoldGraph::new();
    let (sid_a, ids_a, _) = two_scaffolds(&mut g);

    // Candidate between contigs 0 and 1 of scaffold A, held by three
    // mate links.
    let mut cand = Contig::new(300.0);
    cand.cover_stat = 5.0;
    let cand = g.add_contig(cand);
    // Right of contig 0: leave its B end.
    mate_edge(&mut g, ids_a[0], cand, EdgeOrient::AbAb, 100.0, 400.0, 2);
    mate_edge(&mut g, ids_a[0], cand, EdgeOrient::AbAb, 120.0, 400.0, 2);
    // Left of contig 1: leave its A end.
    mate_edge(&mut g, ids_a[1], cand, EdgeOrient::BaBa, 100.0, 400.0, 2);

    let cfg = GapstoneConfig::default();
    let aligner = DpAligner::new();
    let mut noop = |_, _: &ScaffoldGraph| Ok(());
    let stats = rocks_pass(&mut g, &aligner, &cfg, &mut noop).unwrap();

    assert_eq!(stats.inserted, 1);
    assert_eq!(g.contig(cand).scaffold, Some(sid_a));
    assert_eq!(g.contig(cand).tag, Some(ContigTag::Rock));
    // Placed inside the first gap, between the flanks that vouch for it.
    let min = g.contig(cand).min_offset().mean;
    let max = g.contig(cand).max_offset().mean;
    assert!(min > 1000.0 && max < 1600.0, "placed at {min}..{max}");
    assert!(g.variances_monotonic(sid_a));
    assert_fill_invariants(&g).unwrap();
}

#[test]
fn conflicting_scaffold_evidence_blocks_placement() {
    let mut g = ScaffoldGraph::new();
    let (_, ids_a, sid_b) = two_scaffolds(&mut g);
    let ids_b = g.scaffold(sid_b).contigs.clone();

    let mut cand = Contig::new(300.0);
    cand.cover_stat = 5.0;
    let cand = g.add_contig(cand);
    // Three links to scaffold A plus one conflicting link to scaffold B:
    // one conflict is only tolerated with five or more good links, and B
    // is too weak to count as a join group.
    mate_edge(&mut g, ids_a[0], cand, EdgeOrient::AbAb, 100.0, 400.0, 3);
    mate_edge(&mut g, ids_b[0], cand, EdgeOrient::AbAb, 100.0, 400.0, 1);

    let cfg = GapstoneConfig {
        good_links_if_bad: 5,
        ..GapstoneConfig::default()
    };
    let mut fill = scan_gaps(&g, cfg.max_mate_distance);
    let mut joins = JoinBuffer::new();
    let mut ctx = GapFillCtx::new();
    let filed = select_rocks(&g, &mut fill, &cfg, &mut joins, &mut ctx);

    assert_eq!(filed, 0);
    assert_eq!(joins.joins.len(), 0);
}

#[test]
fn two_scaffold_evidence_becomes_join_claim() {
    let mut g = ScaffoldGraph::new();
    let (_, ids_a, sid_b) = two_scaffolds(&mut g);
    let ids_b = g.scaffold(sid_b).contigs.clone();

    let mut cand = Contig::new(300.0);
    cand.cover_stat = 5.0;
    let cand = g.add_contig(cand);
    // Past the right end of A and before the left end of B.
    mate_edge(&mut g, ids_a[2], cand, EdgeOrient::AbAb, 150.0, 400.0, 2);
    mate_edge(&mut g, ids_b[0], cand, EdgeOrient::BaBa, 150.0, 400.0, 2);

    let cfg = GapstoneConfig::default();
    let mut fill = scan_gaps(&g, cfg.max_mate_distance);
    let mut joins = JoinBuffer::new();
    let mut ctx = GapFillCtx::new();
    let filed = select_rocks(&g, &mut fill, &cfg, &mut joins, &mut ctx);

    assert_eq!(filed, 0, "join candidates are diverted, not placed");
    assert_eq!(joins.joins.len(), 1);
    let j = &joins.joins[0];
    assert_eq!(j.link_ct, 4);
}

#[test]
fn trusted_edge_vetoes_join() {
    let mut g = ScaffoldGraph::new();
    let (sid_a, ids_a, sid_b) = two_scaffolds(&mut g);
    let ids_b = g.scaffold(sid_b).contigs.clone();

    // A trusted inter-scaffold edge that fixes B's frame ~5000 into A.
    mate_edge(&mut g, ids_a[2], ids_b[0], EdgeOrient::AbAb, 500.0, 100.0, 4);

    // A join claim putting B's frame at a wildly different offset.
    let mut buf = JoinBuffer::new();
    buf.push(ScaffJoin {
        cid: gapstone::graph::ContigId(99),
        a_sid: sid_a,
        b_sid: sid_b,
        m: 1,
        b: 12000.0,
        b_variance: 50.0,
        insert_left: SeqPos::new(4200.0, 50.0),
        insert_right: SeqPos::new(4500.0, 60.0),
        flipped: false,
        link_ct: 4,
        violated: false,
        is_bad: false,
    });
    check_joins(&g, &mut buf);
    assert!(buf.joins[0].violated);

    // Nothing files, nothing changes.
    let mut fill = scan_gaps(&g, 100000.0);
    let before_a = g.scaffold(sid_a).contigs.clone();
    let before_b = g.scaffold(sid_b).contigs.clone();
    assert_eq!(file_joins(&mut fill, &buf), 0);
    assert_eq!(g.scaffold(sid_a).contigs, before_a);
    assert_eq!(g.scaffold(sid_b).contigs, before_b);
}

#[test]
fn low_cover_stat_is_not_a_rock() {
    let mut g = ScaffoldGraph::new();
    let (_, ids_a, _) = two_scaffolds(&mut g);
    let mut cand = Contig::new(300.0);
    cand.cover_stat = -3.0; // repeat-looking
    let cand = g.add_contig(cand);
    mate_edge(&mut g, ids_a[0], cand, EdgeOrient::AbAb, 100.0, 400.0, 3);

    let cfg = GapstoneConfig::default();
    let mut fill = scan_gaps(&g, cfg.max_mate_distance);
    let mut joins = JoinBuffer::new();
    let mut ctx = GapFillCtx::new();
    assert_eq!(select_rocks(&g, &mut fill, &cfg, &mut joins, &mut ctx), 0);
}
