
use gapstone::graph::{Contig, ContigEnd, Edge, EdgeOrient, ScaffoldGraph};
use gapstone::path::{find_olap_path, PathQuery, PathTarget};
use gapstone::position::SeqPos;
use test_utils::overlap_edge;

fn contigs(g: &mut ScaffoldGraph, n: usize, len: f64) -> Vec<gapstone::graph::ContigId> {
    (0..n).map(|_| g.add_contig(Contig::new(len))).collect()
}

#[test]
fn chain_is_walked_to_destination() {
    let mut g = ScaffoldGraph::new();
    let ids = contigs(&mut g, 5, 1000.0);
    for w in ids.windows(2) {
        overlap_edge(&mut g, w[0], w[1], EdgeOrient::AbAb, -200.0);
    }
    let mut q = PathQuery::new(ids[0], ContigEnd::B);
    q.destination = Some(ids[4]);
    let res = find_olap_path(&mut g, &q, &[]);
    assert!(res.found);
    assert!(res.reached_destination);
    assert!(!res.saturated);
}

#[test]
fn saturation_is_clean_failure() {
    let mut g = ScaffoldGraph::new();
    let ids = contigs(&mut g, 5, 1000.0);
    for w in ids.windows(2) {
        overlap_edge(&mut g, w[0], w[1], EdgeOrient::AbAb, -200.0);
    }
    let mut q = PathQuery::new(ids[0], ContigEnd::B);
    q.destination = Some(ids[4]);
    q.max_calls = 1;
    let res = find_olap_path(&mut g, &q, &[]);
    assert!(!res.found);
    assert!(res.saturated);
    assert!(g.contig(ids[0]).walk_maxed_out);
    assert!(res.calls <= 2);
}

#[test]
fn call_budget_bounds_expansion_in_dense_graph() {
    // A clique keeps offering edges; the counter must still stop it.
    let mut g = ScaffoldGraph::new();
    let ids = contigs(&mut g, 12, 1000.0);
    for i in 0..ids.len() {
        for j in 0..ids.len() {
            if i != j {
                overlap_edge(&mut g, ids[i], ids[j], EdgeOrient::AbAb, -200.0);
            }
        }
    }
    let mut q = PathQuery::new(ids[0], ContigEnd::B);
    q.destination = Some(ids[11]);
    q.max_calls = 50;
    let res = find_olap_path(&mut g, &q, &[]);
    assert!(res.calls <= 51);
}

#[test]
fn branch_with_more_target_hits_wins() {
    // Source fans out to two branches; the lower one holds two targets.
    let mut g = ScaffoldGraph::new();
    let ids = contigs(&mut g, 6, 1000.0);
    // Upper branch: 0 -> 1 -> 2. Lower branch: 0 -> 3 -> 4 -> 5.
    overlap_edge(&mut g, ids[0], ids[1], EdgeOrient::AbAb, -200.0);
    overlap_edge(&mut g, ids[1], ids[2], EdgeOrient::AbAb, -200.0);
    overlap_edge(&mut g, ids[0], ids[3], EdgeOrient::AbAb, -200.0);
    overlap_edge(&mut g, ids[3], ids[4], EdgeOrient::AbAb, -200.0);
    overlap_edge(&mut g, ids[4], ids[5], EdgeOrient::AbAb, -200.0);

    let targets: Vec<PathTarget> = [ids[3], ids[4]]
        .iter()
        .map(|&cid| PathTarget {
            cid,
            lo: -1_000_000.0,
            hi: 1_000_000.0,
            arrival: ContigEnd::A,
        })
        .collect();
    let q = PathQuery::new(ids[0], ContigEnd::B);
    let res = find_olap_path(&mut g, &q, &targets);
    assert!(res.found);
    assert_eq!(res.hits.len(), 2);
    assert_eq!(res.hits[0].cid, ids[3]);
    assert_eq!(res.hits[1].cid, ids[4]);
    // Hits arrive in traversal order with increasing distance.
    assert!(res.hits[0].distance < res.hits[1].distance);
}

#[test]
fn distance_bound_prunes() {
    let mut g = ScaffoldGraph::new();
    let ids = contigs(&mut g, 5, 1000.0);
    for w in ids.windows(2) {
        overlap_edge(&mut g, w[0], w[1], EdgeOrient::AbAb, -200.0);
    }
    let targets = [PathTarget {
        cid: ids[4],
        lo: 0.0,
        hi: 1_000_000.0,
        arrival: ContigEnd::A,
    }];
    let mut q = PathQuery::new(ids[0], ContigEnd::B);
    // The penultimate node enters at 1400 with the bound already blown,
    // so the walk never descends to the target at 2200.
    q.bound = 300.0;
    let res = find_olap_path(&mut g, &q, &targets);
    assert!(!res.found);
}

#[test]
fn out_degree_cap_descends_only_best_ranked_edges() {
    // The source fans out to a heavily-supported dead end and a weakly
    // supported edge that actually reaches the destination; a cap of one
    // spends the whole fan-out on the dead end.
    let mut g = ScaffoldGraph::new();
    let ids = contigs(&mut g, 3, 1000.0);
    let strong = overlap_edge(&mut g, ids[0], ids[1], EdgeOrient::AbAb, -200.0);
    g.edge_mut(strong).edges_contributing = 9;
    overlap_edge(&mut g, ids[0], ids[2], EdgeOrient::AbAb, -200.0);

    let mut q = PathQuery::new(ids[0], ContigEnd::B);
    q.destination = Some(ids[2]);
    q.max_outdegree = 1;
    assert!(!find_olap_path(&mut g, &q, &[]).found);

    q.max_outdegree = 8;
    assert!(find_olap_path(&mut g, &q, &[]).found);
}

#[test]
fn non_overlap_edges_are_ignored() {
    let mut g = ScaffoldGraph::new();
    let ids = contigs(&mut g, 2, 1000.0);
    // A plain mate edge, not an overlap edge.
    let mut e = Edge::new(ids[0], ids[1], EdgeOrient::AbAb, SeqPos::new(-200.0, 10.0));
    e.edges_contributing = 5;
    g.add_edge(e);
    let mut q = PathQuery::new(ids[0], ContigEnd::B);
    q.destination = Some(ids[1]);
    let res = find_olap_path(&mut g, &q, &[]);
    assert!(!res.found);
}

#[test]
fn orientation_gates_traversal() {
    // The edge leaves contig 0's A end; a walk out of the B end cannot
    // use it.
    let mut g = ScaffoldGraph::new();
    let ids = contigs(&mut g, 2, 1000.0);
    overlap_edge(&mut g, ids[0], ids[1], EdgeOrient::BaAb, -200.0);
    let mut q = PathQuery::new(ids[0], ContigEnd::B);
    q.destination = Some(ids[1]);
    assert!(!find_olap_path(&mut g, &q, &[]).found);

    let mut q = PathQuery::new(ids[0], ContigEnd::A);
    q.destination = Some(ids[1]);
    assert!(find_olap_path(&mut g, &q, &[]).found);
}
