/// Benchmarks for the hot paths: the overlap-path walk, the abacus
/// refresh, and one full pairwise overlap alignment.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gapstone::abacus::Abacus;
use gapstone::align::{DpAligner, OverlapAligner};
use gapstone::graph::{Contig, ContigEnd, Edge, EdgeOrient, ScaffoldGraph};
use gapstone::path::{find_olap_path, PathQuery};
use gapstone::position::SeqPos;

fn random_seq(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

fn chain_graph(n: usize) -> (ScaffoldGraph, Vec<gapstone::graph::ContigId>) {
    let mut g = ScaffoldGraph::new();
    let ids: Vec<_> = (0..n).map(|_| g.add_contig(Contig::new(1000.0))).collect();
    for w in ids.windows(2) {
        let mut e = Edge::new(w[0], w[1], EdgeOrient::AbAb, SeqPos::new(-200.0, 10.0));
        e.set(Edge::FLAG_IS_OVERLAP, true);
        g.add_edge(e);
    }
    (g, ids)
}

fn bench_path_walk(c: &mut Criterion) {
    let (graph, ids) = chain_graph(500);
    c.bench_function("path_walk_500_chain", |b| {
        b.iter_batched(
            || graph.clone(),
            |mut g| {
                let mut q = PathQuery::new(ids[0], ContigEnd::B);
                q.destination = Some(ids[499]);
                black_box(find_olap_path(&mut g, &q, &[]))
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_abacus_refresh(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(99);
    let seq = random_seq(&mut rng, 1000);
    let mut ab = Abacus::new();
    let f0 = ab.add_fragment(0, &seq, &vec![b'I'; 1000], false);
    ab.seed_with_fragment(f0);
    let (_, mut bof) = ab.refresh();
    for i in 1..30 {
        let off = (i * 20) as usize;
        let slice = seq[off..].to_vec();
        let fi = ab.add_fragment(i as u32, &slice, &vec![b'I'; slice.len()], false);
        ab.apply_alignment(fi, &[], off as i32, &bof).unwrap();
        let refreshed = ab.refresh();
        bof = refreshed.1;
    }
    c.bench_function("abacus_refresh_30x1000", |b| {
        b.iter(|| black_box(ab.refresh()))
    });
}

fn bench_overlap_alignment(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let a = random_seq(&mut rng, 800);
    let b_seq = a[400..].to_vec();
    let aligner = DpAligner::new();
    c.bench_function("dp_overlap_800x400", |bch| {
        bch.iter(|| black_box(aligner.optimal_overlap(&a, &b_seq, -10, 0.08, 40)))
    });
}

criterion_group!(
    benches,
    bench_path_walk,
    bench_abacus_refresh,
    bench_overlap_alignment
);
criterion_main!(benches);
