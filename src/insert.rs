/// Insertion: commit kept fill candidates into their scaffolds, then
/// repair what the insertions disturbed — contig order, the monotonic
/// variance invariant, and scaffold connectivity.
use anyhow::Result;
use log::warn;

use crate::config::GapstoneConfig;
use crate::fill::{propagate_adjustment, Fill, GapChunk};
use crate::graph::{Contig, ContigTag, Edge, ScaffoldGraph, ScaffoldId};
use crate::position::{fudge_variance, SeqPos};

#[derive(Debug, Default, Clone)]
pub struct InsertStats {
    pub inserted: u64,
    pub scaffolds_split: usize,
    pub checkpoints: u64,
}

/// Insert every kept candidate, scaffold by scaffold in id order, gaps
/// left to right. `checkpoint` is handed the insertion count and the
/// graph as it stands after every `stones_per_checkpoint` insertions.
pub fn insert_fill<F>(
    graph: &mut ScaffoldGraph,
    fill: &mut Fill,
    kind: ContigTag,
    cfg: &GapstoneConfig,
    checkpoint: &mut F,
) -> Result<InsertStats>
where
    F: FnMut(u64, &ScaffoldGraph) -> Result<()>,
{
    let mut stats = InsertStats::default();
    fill.scaffolds.sort_by_key(|s| s.sid);

    for si in 0..fill.scaffolds.len() {
        let sid = fill.scaffolds[si].sid;
        let mut touched = false;

        for gi in 0..fill.scaffolds[si].gaps.len() {
            let chunks: Vec<GapChunk> = fill.scaffolds[si].gaps[gi]
                .chunks
                .iter()
                .filter(|c| c.keep())
                .cloned()
                .collect();

            for chunk in chunks {
                let cid = place_one(graph, sid, &chunk, kind);
                touched = true;
                stats.inserted += 1;
                if stats.inserted % cfg.stones_per_checkpoint == 0 {
                    checkpoint(stats.inserted, graph)?;
                    stats.checkpoints += 1;
                }

                // A path-confirmed insert is held in place by overlaps the
                // mate graph never saw; record them so connectivity
                // reflects the confirmation.
                if chunk.path_confirmed() {
                    let gap = &fill.scaffolds[si].gaps[gi];
                    for flank in [gap.left_cid, gap.right_cid].into_iter().flatten() {
                        let mut e = Edge::new(
                            flank,
                            cid,
                            crate::graph::EdgeOrient::AbAb,
                            SeqPos::new(
                                chunk.start.mean - graph.contig(flank).max_offset().mean,
                                fudge_variance(chunk.len_mean()),
                            ),
                        );
                        e.set(Edge::FLAG_IS_OVERLAP, true);
                        e.set(Edge::FLAG_HAS_CONFIRMING_PATH, true);
                        graph.add_edge(e);
                    }
                }
            }

            // This gap's pending shift lands before the next gap is read.
            propagate_adjustment(graph, &mut fill.scaffolds[si], gi);
        }

        if touched {
            stats.scaffolds_split += settle_scaffold(graph, sid, cfg);
        }
    }
    Ok(stats)
}

/// Put one candidate into the graph, handling prior membership and
/// multi-copy splitting. Returns the contig id actually inserted.
fn place_one(
    graph: &mut ScaffoldGraph,
    sid: ScaffoldId,
    chunk: &GapChunk,
    kind: ContigTag,
) -> crate::graph::ContigId {
    let mut cid = chunk.cid;
    let already_placed = graph.contig(cid).scaffold.is_some();

    if chunk.has(GapChunk::FLAG_SPLIT) && (already_placed || chunk.copy_letter != 'A') {
        cid = graph.clone_contig(cid);
    } else if already_placed {
        graph.remove_contig(cid);
    }

    graph.contig_mut(cid).tag = Some(kind);

    let (a_end, b_end) = if chunk.flipped {
        (chunk.end, chunk.start)
    } else {
        (chunk.start, chunk.end)
    };
    graph.insert_contig(sid, cid, a_end, b_end);
    cid
}

/// Post-insertion repair for one scaffold: re-mark internal edges, restore
/// the variance invariant, and split the scaffold where the insertions
/// left adjacent members neither edge-connected nor within a plausible
/// gap of each other. Returns the number of extra scaffolds produced.
fn settle_scaffold(graph: &mut ScaffoldGraph, sid: ScaffoldId, cfg: &GapstoneConfig) -> usize {
    mark_internal_edges(graph, sid);

    if !graph.variances_monotonic(sid) {
        warn!("scaffold {} variance dip after insertion; repairing", sid.0);
    }
    graph.force_increasing_variances(sid);

    // Edge-connected components, then adjacent members with a believable
    // gap between them are merged: a break survives only where the chain
    // is held by nothing.
    let edge_components = graph.scaffold_components(sid, |_| true);
    let members = graph.scaffolds[sid.idx()].contigs.clone();
    let mut comp_of: std::collections::HashMap<_, usize> = std::collections::HashMap::new();
    for (i, comp) in edge_components.iter().enumerate() {
        for &cid in comp {
            comp_of.insert(cid, i);
        }
    }

    let mut merged: Vec<usize> = (0..edge_components.len()).collect();
    fn find(merged: &mut Vec<usize>, x: usize) -> usize {
        if merged[x] != x {
            merged[x] = find(merged, merged[x]);
        }
        merged[x]
    }
    for w in members.windows(2) {
        let gap = graph.contig(w[1]).min_offset().mean - graph.contig(w[0]).max_offset().mean;
        if gap.abs() <= cfg.max_mate_distance {
            let (a, b) = (
                find(&mut merged, comp_of[&w[0]]),
                find(&mut merged, comp_of[&w[1]]),
            );
            if a != b {
                merged[a] = b;
            }
        }
    }

    let mut final_components: Vec<Vec<_>> = Vec::new();
    let mut root_slot: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();
    for &cid in &members {
        let root = find(&mut merged, comp_of[&cid]);
        let slot = *root_slot.entry(root).or_insert_with(|| {
            final_components.push(Vec::new());
            final_components.len() - 1
        });
        final_components[slot].push(cid);
    }

    graph
        .split_scaffold_components(sid, final_components)
        .len()
}

/// Flag edges internal to a scaffold whose distance agrees with the
/// realized positions of their endpoints.
fn mark_internal_edges(graph: &mut ScaffoldGraph, sid: ScaffoldId) -> usize {
    let members: std::collections::HashSet<_> = graph.scaffolds[sid.idx()]
        .contigs
        .iter()
        .copied()
        .collect();
    let mut marked = 0;

    for ei in 0..graph.edges.len() {
        let (a, b) = (graph.edges[ei].a, graph.edges[ei].b);
        if !members.contains(&a) || !members.contains(&b) {
            continue;
        }
        let (left, right) = if graph.contig(a).min_offset().mean <= graph.contig(b).min_offset().mean
        {
            (a, b)
        } else {
            (b, a)
        };
        let observed = graph.contig(right).min_offset().mean - graph.contig(left).max_offset().mean;
        let e = &graph.edges[ei];
        let tol = 3.0 * (e.distance.variance.max(1.0)).sqrt();
        let consistent = (observed - e.distance.mean).abs() <= tol;
        graph.edges[ei].set(Edge::FLAG_HAS_CONFIRMING_PATH, consistent);
        if consistent {
            marked += 1;
        }
    }
    marked
}

/// Every insertion leaves the target scaffold monotonic; callers may use
/// this to spot violations early in debug runs.
pub fn assert_fill_invariants(graph: &ScaffoldGraph) -> Result<()> {
    for (s, scaff) in graph.scaffolds.iter().enumerate() {
        if scaff.deleted {
            continue;
        }
        let sid = ScaffoldId(s as u32);
        if !graph.variances_monotonic(sid) {
            anyhow::bail!("scaffold {} violates the variance invariant", s);
        }
    }
    Ok(())
}

/// Convenience for tests and the binary: make an unplaced contig with a
/// sequence and a cover stat.
pub fn free_contig(graph: &mut ScaffoldGraph, len: f64, cover_stat: f64) -> crate::graph::ContigId {
    let mut c = Contig::new(len);
    c.cover_stat = cover_stat;
    graph.add_contig(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill::scan_gaps;
    use crate::graph::ContigId;

    fn scaffold_of_three(g: &mut ScaffoldGraph) -> (ScaffoldId, Vec<ContigId>) {
        let sid = g.add_scaffold();
        let mut ids = Vec::new();
        for i in 0..3 {
            let cid = g.add_contig(Contig::new(100.0));
            let base = i as f64 * 200.0;
            g.insert_contig(
                sid,
                cid,
                SeqPos::new(base, 1.0 + 2.0 * i as f64),
                SeqPos::new(base + 100.0, 2.0 + 2.0 * i as f64),
            );
            ids.push(cid);
        }
        (sid, ids)
    }

    #[test]
    fn test_insert_kept_chunk() {
        let mut g = ScaffoldGraph::new();
        let (sid, ids) = scaffold_of_three(&mut g);
        let rock = free_contig(&mut g, 60.0, 5.0);

        let mut fill = scan_gaps(&g, 1000.0);
        let mut chunk = GapChunk::new(
            rock,
            SeqPos::new(120.0, 3.0),
            SeqPos::new(180.0, 4.0),
            false,
        );
        chunk.set(GapChunk::FLAG_KEEP, true);
        fill.scaffolds[0].gaps[1].chunks.push(chunk);

        let cfg = GapstoneConfig::default();
        let mut noop = |_, _: &ScaffoldGraph| Ok(());
        let stats = insert_fill(&mut g, &mut fill, ContigTag::Rock, &cfg, &mut noop).unwrap();

        assert_eq!(stats.inserted, 1);
        assert_eq!(g.contig(rock).scaffold, Some(sid));
        assert_eq!(g.contig(rock).tag, Some(ContigTag::Rock));
        // Ordered between the flanks it was filed between.
        let order = &g.scaffold(sid).contigs;
        let pos = order.iter().position(|&c| c == rock).unwrap();
        assert_eq!(order[pos - 1], ids[0]);
        assert!(g.variances_monotonic(sid));
    }

    #[test]
    fn test_split_clone_on_second_copy() {
        let mut g = ScaffoldGraph::new();
        let (sid, _) = scaffold_of_three(&mut g);
        let stone = free_contig(&mut g, 60.0, 0.0);
        g.contig_mut(stone).n_reads = 4;

        let mut fill = scan_gaps(&g, 1000.0);
        for (gi, letter) in [(1usize, 'A'), (2usize, 'B')] {
            let base = 120.0 + 200.0 * (gi as f64 - 1.0);
            let mut chunk = GapChunk::new(
                stone,
                SeqPos::new(base, 5.0),
                SeqPos::new(base + 60.0, 6.0),
                false,
            );
            chunk.copy_letter = letter;
            chunk.set(GapChunk::FLAG_KEEP, true);
            chunk.set(GapChunk::FLAG_SPLIT, true);
            fill.scaffolds[0].gaps[gi].chunks.push(chunk);
        }

        let cfg = GapstoneConfig::default();
        let mut noop = |_, _: &ScaffoldGraph| Ok(());
        let stats = insert_fill(&mut g, &mut fill, ContigTag::Stone, &cfg, &mut noop).unwrap();
        assert_eq!(stats.inserted, 2);
        // First copy reused the contig, second became a clone.
        let placed: Vec<_> = g
            .scaffold(sid)
            .contigs
            .iter()
            .filter(|&&c| g.contig(c).tag == Some(ContigTag::Stone))
            .collect();
        assert_eq!(placed.len(), 2);
    }

    #[test]
    fn test_checkpoint_cadence() {
        let mut g = ScaffoldGraph::new();
        let (_, _) = scaffold_of_three(&mut g);
        let mut fill = scan_gaps(&g, 1000.0);
        for i in 0..5 {
            let rock = free_contig(&mut g, 10.0, 5.0);
            let base = 110.0 + 12.0 * i as f64;
            let mut chunk = GapChunk::new(
                rock,
                SeqPos::new(base, 3.0 + i as f64),
                SeqPos::new(base + 10.0, 3.5 + i as f64),
                false,
            );
            chunk.set(GapChunk::FLAG_KEEP, true);
            fill.scaffolds[0].gaps[1].chunks.push(chunk);
        }

        let mut cfg = GapstoneConfig::default();
        cfg.stones_per_checkpoint = 2;
        let mut calls = Vec::new();
        let mut cb = |n, _: &ScaffoldGraph| {
            calls.push(n);
            Ok(())
        };
        let stats = insert_fill(&mut g, &mut fill, ContigTag::Rock, &cfg, &mut cb).unwrap();
        assert_eq!(stats.inserted, 5);
        assert_eq!(calls, vec![2, 4]);
    }
}
