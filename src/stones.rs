/// Stones: candidate contigs with weaker link evidence that must be
/// confirmed by a chain of real overlaps before they may enter a gap.
///
/// Selection mirrors rock selection but tolerates repetitive candidates
/// and multiple placements: stack entries are partitioned by scaffold,
/// orientation and position, and each surviving partition files its own
/// copy. Confirmation then builds an overlap DAG over each gap's
/// candidates (plus the two flanks), walks the longest left-to-right
/// path, and keeps exactly the candidates threaded by it.
use anyhow::Result;
use log::{debug, warn};
use ordered_float::OrderedFloat;

use crate::align::OverlapAligner;
use crate::config::GapstoneConfig;
use crate::fill::{nearest_gap, Fill, Gap, GapChunk};
use crate::graph::{ContigEnd, ContigId, ScaffoldGraph};
use crate::path::{find_olap_path, PathQuery, PathTarget};
use crate::position::{fudge_variance, intervals_intersect, SeqPos, MIN_VARIANCE};
use crate::rocks::{build_stack, estimate_chunk_ends, GapFillCtx, StackEntry};
use crate::store::reverse_complement;

/// Deviation tolerance, in standard deviations, between a path-implied
/// position and the link-estimated one.
const NUM_STD_DEVS: f64 = 5.0;

/// Base slop when deciding whether two candidates might overlap.
const OVERLAP_SLOP: f64 = 30.0;

/// Sort key for partitioning: scaffold, then orientation, then left end.
fn by_scaff_flipped_and_left_end(a: &StackEntry, b: &StackEntry) -> std::cmp::Ordering {
    (a.sid, a.flipped, OrderedFloat(a.left_end.mean)).cmp(&(
        b.sid,
        b.flipped,
        OrderedFloat(b.left_end.mean),
    ))
}

/// Assign partition ids: entries in the same scaffold and orientation
/// whose three-sigma position intervals chain together share a partition.
pub fn partition_stack(stack: &mut [StackEntry]) -> usize {
    stack.sort_by(by_scaff_flipped_and_left_end);
    let mut next = 0;
    for i in 0..stack.len() {
        if i == 0 {
            stack[0].partition = 0;
            continue;
        }
        let same_group = stack[i].sid == stack[i - 1].sid
            && stack[i].flipped == stack[i - 1].flipped
            && intervals_intersect(&stack[i].left_end, &stack[i - 1].left_end, 0.0);
        if same_group {
            stack[i].partition = next;
        } else {
            next += 1;
            stack[i].partition = next;
        }
    }
    (next + 1) as usize
}

/// Select stone candidates and file one placement per surviving
/// partition, each with its own copy letter. Returns the number filed.
pub fn select_stones(
    graph: &ScaffoldGraph,
    fill: &mut Fill,
    cfg: &GapstoneConfig,
    ctx: &mut GapFillCtx,
) -> usize {
    let mut filed = 0;

    for c in 0..graph.contigs.len() {
        let cid = ContigId(c as u32);
        let contig = graph.contig(cid);
        if contig.scaffold.is_some() {
            continue;
        }
        if contig.cover_stat < cfg.min_stone_cover_stat {
            continue;
        }
        if cfg.single_fragment_only && contig.n_reads != 1 {
            continue;
        }

        build_stack(graph, cid, false, ctx);
        if ctx.stack.is_empty() {
            continue;
        }

        let nparts = partition_stack(&mut ctx.stack);
        let n_reads = contig.n_reads;
        let cover_stat = contig.cover_stat;
        let mut copy = 0u8;

        for p in 0..nparts {
            let mut part: Vec<StackEntry> = ctx
                .stack
                .iter()
                .filter(|e| e.partition == p as i32)
                .cloned()
                .collect();
            let links: u32 = part.iter().map(|e| e.good_mates).sum();
            if links < cfg.min_good_links {
                continue;
            }
            let Some((left, right, flipped)) = estimate_chunk_ends(&mut part) else {
                continue;
            };
            let sid = part[0].sid;
            let Some(sf) = fill.scaffolds.iter_mut().find(|s| s.sid == sid) else {
                continue;
            };

            let g = nearest_gap(&sf.gaps, (left.mean + right.mean) / 2.0);
            let mut chunk = GapChunk::new(cid, left, right, flipped);
            chunk.copy_letter = (b'A' + copy) as char;
            chunk.link_ct = links;
            chunk.cover_stat = cover_stat;
            if n_reads > 1 {
                chunk.set(GapChunk::FLAG_SPLIT, true);
            }
            sf.gaps[g].chunks.push(chunk);
            copy += 1;
            filed += 1;
        }
    }
    filed
}

/// A node of the per-gap confirmation graph: a candidate chunk or a
/// flanking contig.
#[derive(Debug, Clone)]
struct StoneNode {
    chunk: Option<usize>,
    cid: ContigId,
    left: SeqPos,
    right: SeqPos,
    flipped: bool,
    len: f64,
}

#[derive(Debug, Clone, Copy)]
struct DagEdge {
    from: usize,
    to: usize,
    ahang: f64,
}

/// Confirm every gap of the fill. Candidates not threaded by an overlap
/// path lose their `keep` flag; threaded ones gain positions measured
/// along the path.
pub fn confirm_stones<A: OverlapAligner>(
    graph: &mut ScaffoldGraph,
    fill: &mut Fill,
    aligner: &A,
    cfg: &GapstoneConfig,
) -> Result<usize> {
    let mut confirmed = 0;
    for sf in &mut fill.scaffolds {
        for gap in &mut sf.gaps {
            if gap.chunks.is_empty() {
                continue;
            }
            prune_by_graph_paths(graph, gap, cfg);
            confirmed += confirm_gap(graph, gap, aligner, cfg)?;
        }
    }
    Ok(confirmed)
}

/// Ask the path engine about candidates the contig graph already holds
/// overlap edges for: a walk from the left flank toward the right flank
/// must be able to thread the candidate at its estimated distance, or
/// the candidate is withdrawn before any alignment work. Candidates with
/// no overlap edges in the graph are left for sequence confirmation.
fn prune_by_graph_paths(graph: &mut ScaffoldGraph, gap: &mut Gap, cfg: &GapstoneConfig) {
    let (Some(left), Some(right)) = (gap.left_cid, gap.right_cid) else {
        return;
    };
    let exit = if graph.contig(left).is_forward() {
        ContigEnd::B
    } else {
        ContigEnd::A
    };
    let gap_span = (gap.end.mean - gap.start.mean).abs();

    for chunk in &mut gap.chunks {
        let has_olap_edges = graph
            .edges_of(chunk.cid)
            .any(|(_, e)| e.is_overlap_edge());
        if !has_olap_edges {
            continue;
        }

        let expect = chunk.start.mean - gap.start.mean;
        let slack = OVERLAP_SLOP + 3.0 * chunk.start.stddev();
        let target = PathTarget {
            cid: chunk.cid,
            lo: expect - slack,
            hi: expect + slack,
            arrival: if chunk.flipped {
                ContigEnd::B
            } else {
                ContigEnd::A
            },
        };
        let mut q = PathQuery::new(left, exit);
        q.destination = Some(right);
        q.bound = gap_span + chunk.len_mean() + slack;
        q.skip_containment = cfg.skip_contained_stones;
        q.max_calls = cfg.max_calls;
        q.max_outdegree = cfg.max_outdegree;

        let res = find_olap_path(graph, &q, &[target]);
        if !res.hits.iter().any(|h| h.cid == chunk.cid) {
            debug!(
                "stone {}{} unreachable by graph walk; withdrawn",
                chunk.cid.0, chunk.copy_letter
            );
            chunk.set(GapChunk::FLAG_CANDIDATE, false);
            chunk.set(GapChunk::FLAG_KEEP, false);
        }
    }
}

fn flank_node(graph: &ScaffoldGraph, cid: ContigId) -> StoneNode {
    let c = graph.contig(cid);
    StoneNode {
        chunk: None,
        cid,
        left: c.min_offset(),
        right: c.max_offset(),
        flipped: !c.is_forward(),
        len: c.bp_len.mean,
    }
}

fn oriented_seq(graph: &ScaffoldGraph, node: &StoneNode) -> Vec<u8> {
    let seq = &graph.contig(node.cid).sequence;
    if node.flipped {
        reverse_complement(seq)
    } else {
        seq.clone()
    }
}

/// Try to confirm a dovetail overlap between two nodes, returning the
/// a-hang and b-hang. Containments (the second node not extending past
/// the first) never make path steps.
fn confirm_overlap<A: OverlapAligner>(
    graph: &ScaffoldGraph,
    aligner: &A,
    cfg: &GapstoneConfig,
    a: &StoneNode,
    b: &StoneNode,
) -> Option<(f64, f64)> {
    let sa = oriented_seq(graph, a);
    let sb = oriented_seq(graph, b);
    if sa.is_empty() || sb.is_empty() {
        return None;
    }
    let o = aligner.optimal_overlap(&sa, &sb, -10, cfg.error_rate + 0.02, cfg.min_overlap)?;
    if o.begpos < 0 && cfg.skip_contained_stones {
        return None;
    }
    Some((o.begpos as f64, o.endpos as f64))
}

fn confirm_gap<A: OverlapAligner>(
    graph: &ScaffoldGraph,
    gap: &mut Gap,
    aligner: &A,
    cfg: &GapstoneConfig,
) -> Result<usize> {
    let mut nodes: Vec<StoneNode> = Vec::new();
    let left_flank = gap.left_cid.map(|cid| {
        nodes.push(flank_node(graph, cid));
        nodes.len() - 1
    });
    for (i, chunk) in gap.chunks.iter().enumerate() {
        if !chunk.candidate() {
            continue; // withdrawn by the graph walk
        }
        nodes.push(StoneNode {
            chunk: Some(i),
            cid: chunk.cid,
            left: chunk.start,
            right: chunk.end,
            flipped: chunk.flipped,
            len: graph.contig(chunk.cid).bp_len.mean,
        });
    }
    let right_flank = gap.right_cid.map(|cid| {
        nodes.push(flank_node(graph, cid));
        nodes.len() - 1
    });

    // Confirm overlaps between every plausibly-adjacent ordered pair:
    // candidates whose estimated spans intersect within slop. Only
    // forward dovetails (non-negative a-hang, positive b-hang) become
    // path steps, so a containment cannot cycle the graph.
    let mut edges: Vec<DagEdge> = Vec::new();
    for i in 0..nodes.len() {
        for j in 0..nodes.len() {
            if i == j || nodes[i].left.mean > nodes[j].left.mean {
                continue;
            }
            if nodes[i].chunk.is_none() && nodes[j].chunk.is_none() {
                continue; // flank-to-flank adds nothing
            }
            let overlap_est = nodes[i].right.mean.min(nodes[j].right.mean)
                - nodes[i].left.mean.max(nodes[j].left.mean);
            let slop = OVERLAP_SLOP + cfg.error_rate * overlap_est.abs();
            let sigma = 3.0 * (nodes[i].right.stddev() + nodes[j].left.stddev());
            if overlap_est + slop + sigma <= 0.0 {
                continue;
            }
            if let Some((ahang, bhang)) = confirm_overlap(graph, aligner, cfg, &nodes[i], &nodes[j])
            {
                if ahang >= 0.0 && bhang > 0.0 {
                    edges.push(DagEdge { from: i, to: j, ahang });
                }
            }
        }
    }

    // Root the walk at the left flank; a sentinel-left gap is walked
    // backwards from the right flank instead.
    let (root, reversed) = match (left_flank, right_flank) {
        (Some(l), _) => (l, false),
        (None, Some(r)) => (r, true),
        (None, None) => return Ok(0),
    };
    let walk_edges: Vec<DagEdge> = if reversed {
        edges
            .iter()
            .map(|e| DagEdge {
                from: e.to,
                to: e.from,
                ahang: e.ahang,
            })
            .collect()
    } else {
        edges.clone()
    };

    // Reachability, then longest path by hops over a topological order.
    let n = nodes.len();
    let mut reachable = vec![false; n];
    reachable[root] = true;
    let mut stack = vec![root];
    while let Some(u) = stack.pop() {
        for e in &walk_edges {
            if e.from == u && !reachable[e.to] {
                reachable[e.to] = true;
                stack.push(e.to);
            }
        }
    }

    let Some(order) = topo_order(n, &walk_edges, &reachable) else {
        // A cycle means the confirmed overlaps contradict each other.
        warn!("overlap graph for gap at {:.0} is cyclic; abandoned", gap.start.mean);
        for chunk in &mut gap.chunks {
            chunk.set(GapChunk::FLAG_KEEP, false);
        }
        return Ok(0);
    };

    let mut hops = vec![-1i64; n];
    let mut dist = vec![0.0f64; n];
    let mut hi_sum = vec![0.0f64; n];
    let mut pred = vec![usize::MAX; n];
    hops[root] = 0;

    for &u in &order {
        if hops[u] < 0 {
            continue;
        }
        for e in &walk_edges {
            if e.from != u {
                continue;
            }
            let v = e.to;
            let cand_dist = dist[u] + e.ahang;

            // Geometric consistency: the path-implied position must agree
            // with the link-estimated one.
            if nodes[v].chunk.is_some() {
                let implied = if reversed {
                    nodes[root].left.mean - cand_dist
                } else {
                    nodes[root].left.mean + cand_dist
                };
                let sigma = (nodes[v].left.variance + fudge_variance(cand_dist))
                    .max(MIN_VARIANCE)
                    .sqrt();
                if (implied - nodes[v].left.mean).abs() > NUM_STD_DEVS * sigma {
                    debug!(
                        "stone {} strays {:.0} from its estimate; edge skipped",
                        nodes[v].cid.0,
                        (implied - nodes[v].left.mean).abs()
                    );
                    continue;
                }
            }

            let cand_hi = hi_sum[u] + nodes[v].right.mean;
            if hops[u] + 1 > hops[v] || (hops[u] + 1 == hops[v] && cand_hi > hi_sum[v]) {
                hops[v] = hops[u] + 1;
                dist[v] = cand_dist;
                hi_sum[v] = cand_hi;
                pred[v] = u;
            }
        }
    }

    // Pick the path endpoint: the far flank when it was reached, else the
    // deepest node (an end gap has no far flank to reach).
    let far_flank = if reversed { left_flank } else { right_flank };
    let endpoint = match far_flank {
        Some(f) if hops[f] > 0 => Some(f),
        Some(_) => None,
        None => (0..n)
            .filter(|&v| hops[v] > 0)
            .max_by(|&a, &b| hops[a].cmp(&hops[b]).then(dist[a].total_cmp(&dist[b]))),
    };

    let Some(endpoint) = endpoint else {
        let kept = if cfg.use_partial_paths {
            keep_partial_components(graph, gap, &nodes, &edges, cfg)
        } else {
            0
        };
        if kept == 0 {
            for chunk in &mut gap.chunks {
                chunk.set(GapChunk::FLAG_KEEP, false);
            }
        }
        return Ok(kept);
    };

    // Thread the path back from the endpoint.
    let mut path = Vec::new();
    let mut v = endpoint;
    while v != root {
        path.push(v);
        v = pred[v];
    }
    path.push(root);
    if !reversed {
        path.reverse();
    }

    // Reorder by realized position and make sure consecutive pairs really
    // overlap; a missing overlap that cannot be found abandons the gap.
    let path_dist = |v: usize| -> f64 {
        if reversed {
            nodes[root].left.mean - dist[v]
        } else {
            nodes[root].left.mean + dist[v]
        }
    };
    let mut ordered = path.clone();
    ordered.sort_by(|&a, &b| path_dist(a).total_cmp(&path_dist(b)));
    for w in ordered.windows(2) {
        let present = edges.iter().any(|e| e.from == w[0] && e.to == w[1]);
        if !present {
            let found = confirm_overlap(graph, aligner, cfg, &nodes[w[0]], &nodes[w[1]])
                .map(|(a, b)| a >= 0.0 && b > 0.0)
                .unwrap_or(false);
            if !found {
                warn!(
                    "ordered stones {} and {} share no overlap; gap abandoned",
                    nodes[w[0]].cid.0, nodes[w[1]].cid.0
                );
                for chunk in &mut gap.chunks {
                    chunk.set(GapChunk::FLAG_KEEP, false);
                }
                return Ok(0);
            }
        }
    }

    // Keep path candidates with positions measured along the path.
    let on_path: std::collections::HashSet<usize> = ordered.iter().copied().collect();
    let mut kept = 0;
    for v in 0..n {
        let Some(ci) = nodes[v].chunk else { continue };
        let chunk = &mut gap.chunks[ci];
        if on_path.contains(&v) {
            let start_mean = path_dist(v);
            let total_olap = (start_mean - gap.start.mean).abs() + nodes[v].len;
            chunk.start = SeqPos::new(
                start_mean,
                gap.ref_variance + fudge_variance(total_olap - nodes[v].len),
            );
            chunk.end = SeqPos::new(
                start_mean + nodes[v].len,
                gap.ref_variance + fudge_variance(total_olap),
            );
            chunk.set(GapChunk::FLAG_KEEP, true);
            chunk.set(GapChunk::FLAG_PATH_CONFIRMED, true);
            chunk.set(GapChunk::FLAG_VISITED, true);
            chunk.set(GapChunk::FLAG_FINISHED, true);
            kept += 1;
        } else {
            chunk.set(GapChunk::FLAG_KEEP, false);
            chunk.set(GapChunk::FLAG_VISITED, true);
        }
    }

    // Resize the gap so both flanks stay put around the threaded path.
    if let Some(f) = far_flank {
        if hops[f] > 0 && !reversed {
            let implied_end = nodes[root].left.mean + dist[f];
            let delta = implied_end - gap.end.mean;
            if delta.abs() > f64::EPSILON {
                gap.adjustment = SeqPos::new(delta, fudge_variance(delta));
            }
        }
    }

    Ok(kept)
}

/// Kahn's algorithm over the reachable subgraph; None on a cycle.
fn topo_order(n: usize, edges: &[DagEdge], reachable: &[bool]) -> Option<Vec<usize>> {
    let mut indeg = vec![0usize; n];
    for e in edges {
        if reachable[e.from] && reachable[e.to] {
            indeg[e.to] += 1;
        }
    }
    let mut queue: Vec<usize> = (0..n).filter(|&v| reachable[v] && indeg[v] == 0).collect();
    let mut order = Vec::new();
    while let Some(u) = queue.pop() {
        order.push(u);
        for e in edges {
            if e.from == u && reachable[e.to] {
                indeg[e.to] -= 1;
                if indeg[e.to] == 0 {
                    queue.push(e.to);
                }
            }
        }
    }
    let live = reachable.iter().filter(|&&r| r).count();
    if order.len() == live {
        Some(order)
    } else {
        None
    }
}

/// Partial-path mode: a component of the overlap graph that touches a
/// flank, or that internally chains at least two candidates, keeps its
/// members at their link-estimated positions, within the gap's variance
/// budget.
fn keep_partial_components(
    graph: &ScaffoldGraph,
    gap: &mut Gap,
    nodes: &[StoneNode],
    edges: &[DagEdge],
    _cfg: &GapstoneConfig,
) -> usize {
    let _ = graph;
    let n = nodes.len();
    let mut comp = vec![usize::MAX; n];
    let mut ncomp = 0;
    for start in 0..n {
        if comp[start] != usize::MAX {
            continue;
        }
        let mut stack = vec![start];
        comp[start] = ncomp;
        while let Some(u) = stack.pop() {
            for e in edges {
                let other = if e.from == u {
                    Some(e.to)
                } else if e.to == u {
                    Some(e.from)
                } else {
                    None
                };
                if let Some(v) = other {
                    if comp[v] == usize::MAX {
                        comp[v] = ncomp;
                        stack.push(v);
                    }
                }
            }
        }
        ncomp += 1;
    }

    let budget = 3.0 * gap.len.variance.max(MIN_VARIANCE).sqrt();
    let mut kept = 0;
    for c in 0..ncomp {
        let members: Vec<usize> = (0..n).filter(|&v| comp[v] == c).collect();
        let touches_flank = members.iter().any(|&v| nodes[v].chunk.is_none());
        let internal = members.iter().filter(|&&v| nodes[v].chunk.is_some()).count();
        if !(touches_flank || internal >= 2) {
            continue;
        }
        // The component must fit the gap without more than the budgeted
        // expansion; overrun past either flank counts.
        let spill = members
            .iter()
            .filter(|&&v| nodes[v].chunk.is_some())
            .map(|&v| {
                let right_over = (nodes[v].right.mean - gap.end.mean).max(0.0);
                let left_over = (gap.start.mean - nodes[v].left.mean).max(0.0);
                right_over.max(left_over)
            })
            .fold(0.0f64, f64::max);
        if spill > budget {
            continue;
        }
        for &v in &members {
            if let Some(ci) = nodes[v].chunk {
                gap.chunks[ci].set(GapChunk::FLAG_KEEP, true);
                gap.chunks[ci].set(GapChunk::FLAG_PATH_CONFIRMED, true);
                kept += 1;
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ScaffoldId;
    use crate::graph::EdgeId;

    fn entry(sid: u32, flipped: bool, left: f64) -> StackEntry {
        StackEntry {
            edge: EdgeId(0),
            sid: ScaffoldId(sid),
            anchor: ContigId(0),
            good_mates: 2,
            left_end: SeqPos::new(left, 100.0),
            right_end: SeqPos::new(left + 200.0, 100.0),
            flipped,
            left_link: true,
            is_bad: false,
            partition: -1,
            source_variance: 10.0,
            edge_variance: 100.0,
        }
    }

    #[test]
    fn test_partition_by_position() {
        // Two clusters far apart in the same scaffold and orientation.
        let mut stack = vec![
            entry(0, false, 100.0),
            entry(0, false, 120.0),
            entry(0, false, 9000.0),
        ];
        let n = partition_stack(&mut stack);
        assert_eq!(n, 2);
        assert_eq!(stack[0].partition, stack[1].partition);
        assert_ne!(stack[0].partition, stack[2].partition);
    }

    #[test]
    fn test_partition_by_orientation() {
        let mut stack = vec![entry(0, false, 100.0), entry(0, true, 110.0)];
        let n = partition_stack(&mut stack);
        assert_eq!(n, 2);
    }

    #[test]
    fn test_partition_by_scaffold() {
        let mut stack = vec![entry(0, false, 100.0), entry(1, false, 100.0)];
        assert_eq!(partition_stack(&mut stack), 2);
    }

    #[test]
    fn test_topo_order_detects_cycle() {
        let edges = vec![
            DagEdge { from: 0, to: 1, ahang: 10.0 },
            DagEdge { from: 1, to: 2, ahang: 10.0 },
            DagEdge { from: 2, to: 0, ahang: 10.0 },
        ];
        assert!(topo_order(3, &edges, &[true, true, true]).is_none());
        let acyclic = &edges[..2];
        assert!(topo_order(3, acyclic, &[true, true, true]).is_some());
    }
}
