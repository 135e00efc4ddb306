
use gapstone::graph::ScaffoldGraph;
use gapstone::position::VAR_EPSILON;
use proptest::prelude::*;
use test_utils::build_scaffold;

fn scaffold_from_vars(vars: &[(f64, f64)]) -> (ScaffoldGraph, gapstone::graph::ScaffoldId) {
    let mut g = ScaffoldGraph::new();
    let ends: Vec<(f64, f64, f64, f64)> = vars
        .iter()
        .enumerate()
        .map(|(i, &(av, bv))| {
            let base = i as f64 * 200.0;
            (base, av, base + 100.0, bv)
        })
        .collect();
    let (sid, _) = build_scaffold(&mut g, &ends);
    (g, sid)
}

proptest! {
    #[test]
    fn repair_establishes_monotonicity(
        vars in prop::collection::vec((0.1f64..1000.0, 0.1f64..1000.0), 1..20)
    ) {
        let (mut g, sid) = scaffold_from_vars(&vars);
        g.force_increasing_variances(sid);
        prop_assert!(g.variances_monotonic(sid));
    }

    #[test]
    fn repair_preserves_means(
        vars in prop::collection::vec((0.1f64..1000.0, 0.1f64..1000.0), 1..20)
    ) {
        let (mut g, sid) = scaffold_from_vars(&vars);
        let means: Vec<(f64, f64)> = g.scaffold(sid).contigs.iter()
            .map(|&c| (g.contig(c).a_end.mean, g.contig(c).b_end.mean))
            .collect();
        g.force_increasing_variances(sid);
        let after: Vec<(f64, f64)> = g.scaffold(sid).contigs.iter()
            .map(|&c| (g.contig(c).a_end.mean, g.contig(c).b_end.mean))
            .collect();
        prop_assert_eq!(means, after);
    }

    #[test]
    fn repair_is_idempotent(
        vars in prop::collection::vec((0.1f64..1000.0, 0.1f64..1000.0), 1..20)
    ) {
        let (mut g, sid) = scaffold_from_vars(&vars);
        g.force_increasing_variances(sid);
        let first: Vec<f64> = g.scaffold(sid).contigs.iter()
            .map(|&c| g.contig(c).a_end.variance)
            .collect();
        g.force_increasing_variances(sid);
        let second: Vec<f64> = g.scaffold(sid).contigs.iter()
            .map(|&c| g.contig(c).a_end.variance)
            .collect();
        for (a, b) in first.iter().zip(second.iter()) {
            prop_assert!((a - b).abs() <= VAR_EPSILON);
        }
    }

    #[test]
    fn repair_never_lowers_a_variance(
        vars in prop::collection::vec((0.1f64..1000.0, 0.1f64..1000.0), 1..20)
    ) {
        let (mut g, sid) = scaffold_from_vars(&vars);
        let before: Vec<f64> = g.scaffold(sid).contigs.iter()
            .map(|&c| g.contig(c).min_variance())
            .collect();
        g.force_increasing_variances(sid);
        let after: Vec<f64> = g.scaffold(sid).contigs.iter()
            .map(|&c| g.contig(c).min_variance())
            .collect();
        for (b, a) in before.iter().zip(after.iter()) {
            prop_assert!(a + 1e-9 >= *b);
        }
    }
}

#[test]
fn already_monotonic_is_untouched() {
    let (mut g, sid) = scaffold_from_vars(&[(1.0, 2.0), (3.0, 4.0), (5.0, 6.0)]);
    assert!(g.variances_monotonic(sid));
    let before: Vec<f64> = g
        .scaffold(sid)
        .contigs
        .iter()
        .map(|&c| g.contig(c).a_end.variance)
        .collect();
    g.force_increasing_variances(sid);
    let after: Vec<f64> = g
        .scaffold(sid)
        .contigs
        .iter()
        .map(|&c| g.contig(c).a_end.variance)
        .collect();
    assert_eq!(before, after);
}
