/// Rock placement: file unplaced contigs into scaffold gaps on the
/// strength of their mate links to already-scaffolded contigs.
///
/// Each candidate's mate edges to unique scaffolded anchors are stacked;
/// the stack is grouped by anchor scaffold, the dominant group is vetted
/// for orientation and per-edge chi-squared consistency, the surviving
/// entries are combined into a maximum-likelihood placement, and the
/// candidate is filed into the nearest gap. Candidates with strong
/// evidence in two scaffolds become scaffold-join claims instead.
use log::debug;

use crate::align::OverlapAligner;
use crate::config::GapstoneConfig;
use crate::fill::{nearest_gap, Fill, Gap, GapChunk};
use crate::graph::{ContigEnd, ContigId, Edge, EdgeId, ScaffoldGraph, ScaffoldId};
use crate::joins::{JoinBuffer, ScaffJoin};
use crate::position::{fudge_variance, weighted_combine, SeqPos};

/// Placement evidence carried by one edge.
#[derive(Debug, Clone)]
pub struct StackEntry {
    pub edge: EdgeId,
    pub sid: ScaffoldId,
    pub anchor: ContigId,
    pub good_mates: u32,
    pub left_end: SeqPos,
    pub right_end: SeqPos,
    pub flipped: bool,
    /// Is the anchor on the candidate's left?
    pub left_link: bool,
    pub is_bad: bool,
    pub partition: i32,
    pub source_variance: f64,
    pub edge_variance: f64,
}

/// Reusable scratch for one placement pass, so repeated candidates do not
/// reallocate.
#[derive(Debug, Default)]
pub struct GapFillCtx {
    pub stack: Vec<StackEntry>,
}

impl GapFillCtx {
    pub fn new() -> Self {
        GapFillCtx::default()
    }
}

/// Project a candidate through one edge into its anchor's scaffold frame.
pub fn implied_placement(
    graph: &ScaffoldGraph,
    candidate: ContigId,
    anchor: ContigId,
    eid: EdgeId,
) -> Option<StackEntry> {
    let edge = graph.edge(eid);
    let anchor_c = graph.contig(anchor);
    let sid = anchor_c.scaffold?;
    let cand = graph.contig(candidate);
    let len = cand.bp_len.mean;

    let o = edge.orient_wrt(anchor);
    let anchor_fwd = anchor_c.is_forward();
    // The candidate sits right of the anchor when the edge leaves the end
    // of the anchor that faces right in scaffold coordinates.
    let right_side = (o.exit_end() == ContigEnd::B) == anchor_fwd;

    let (left_end, right_end, left_link, source_variance) = if right_side {
        let base = anchor_c.max_offset();
        let left = SeqPos::new(
            base.mean + edge.distance.mean,
            base.variance + edge.distance.variance,
        );
        let right = SeqPos::new(left.mean + len, left.variance + fudge_variance(len));
        (left, right, true, base.variance)
    } else {
        let base = anchor_c.min_offset();
        let right = SeqPos::new(
            base.mean - edge.distance.mean,
            base.variance + edge.distance.variance,
        );
        let left = SeqPos::new(right.mean - len, right.variance + fudge_variance(len));
        (left, right, false, base.variance)
    };

    // (anchor reversed) XOR (edge flips the far side)
    let flipped = !anchor_fwd ^ o.far_reversed();

    Some(StackEntry {
        edge: eid,
        sid,
        anchor,
        good_mates: edge.good_mates(),
        left_end,
        right_end,
        flipped,
        left_link,
        is_bad: false,
        partition: -1,
        source_variance,
        edge_variance: edge.distance.variance,
    })
}

/// Stack every usable mate edge of a candidate. `require_unique` limits
/// anchors to unique contigs (rocks); stones accept any scaffolded anchor.
pub fn build_stack(
    graph: &ScaffoldGraph,
    candidate: ContigId,
    require_unique: bool,
    ctx: &mut GapFillCtx,
) {
    ctx.stack.clear();
    for (eid, edge) in graph.edges_of(candidate) {
        if edge.probably_bogus() || edge.sloppy() {
            continue;
        }
        if edge.good_mates() == 0 {
            continue;
        }
        let anchor = edge.other_end(candidate);
        if anchor == candidate {
            continue;
        }
        let anchor_c = graph.contig(anchor);
        if anchor_c.scaffold.is_none() {
            continue;
        }
        if require_unique && !anchor_c.is_unique {
            continue;
        }
        if let Some(entry) = implied_placement(graph, candidate, anchor, eid) {
            ctx.stack.push(entry);
        }
    }
}

/// Mate-link totals per anchor scaffold, heaviest first.
pub fn group_by_scaffold(stack: &[StackEntry]) -> Vec<(ScaffoldId, u32)> {
    let mut groups: Vec<(ScaffoldId, u32)> = Vec::new();
    for e in stack {
        if e.is_bad {
            continue;
        }
        match groups.iter_mut().find(|(sid, _)| *sid == e.sid) {
            Some((_, links)) => *links += e.good_mates,
            None => groups.push((e.sid, e.good_mates)),
        }
    }
    groups.sort_by(|a, b| b.1.cmp(&a.1));
    groups
}

/// Maximum-likelihood combination of the stack into a single placement.
///
/// The reference variance is the largest left-link source variance (or
/// the smallest right-link one when no left link exists); the entry that
/// defined it is swapped into slot zero, whose orientation later stages
/// read. Entries are weighted inversely by how far their source variance
/// sits from the reference plus their own edge variance.
pub fn estimate_chunk_ends(stack: &mut [StackEntry]) -> Option<(SeqPos, SeqPos, bool)> {
    let live = stack.iter().filter(|e| !e.is_bad).count();
    if live == 0 {
        return None;
    }

    let ref_idx = {
        let mut best: Option<usize> = None;
        for (i, e) in stack.iter().enumerate() {
            if e.is_bad || !e.left_link {
                continue;
            }
            if best.map_or(true, |b| e.source_variance > stack[b].source_variance) {
                best = Some(i);
            }
        }
        if best.is_none() {
            for (i, e) in stack.iter().enumerate() {
                if e.is_bad {
                    continue;
                }
                if best.map_or(true, |b| e.source_variance < stack[b].source_variance) {
                    best = Some(i);
                }
            }
        }
        best?
    };
    let ref_variance = stack[ref_idx].source_variance;
    stack.swap(0, ref_idx);

    let weight = |e: &StackEntry| -> f64 {
        1.0 / ((e.source_variance - ref_variance).abs() + e.edge_variance + 1.0)
    };

    let lefts: Vec<(SeqPos, f64)> = stack
        .iter()
        .filter(|e| !e.is_bad)
        .map(|e| (e.left_end, weight(e)))
        .collect();
    let rights: Vec<(SeqPos, f64)> = stack
        .iter()
        .filter(|e| !e.is_bad)
        .map(|e| (e.right_end, weight(e)))
        .collect();

    let mut left = weighted_combine(&lefts)?;
    let mut right = weighted_combine(&rights)?;

    // Keep the pair consistent: a crossed combination falls back to the
    // candidate length read off the reference entry.
    if right.mean <= left.mean {
        let len = stack[0].right_end.mean - stack[0].left_end.mean;
        right = SeqPos::new(left.mean + len, right.variance);
    }
    left.variance = left.variance.max(ref_variance);
    right.variance = right.variance.max(left.variance);

    Some((left, right, stack[0].flipped))
}

/// Per-edge chi-squared test against the combined placement: an entry
/// whose own implied position strays beyond three sigma is marked bad.
/// Returns the number newly marked.
pub fn chi_squared_filter(stack: &mut [StackEntry], left: &SeqPos, right: &SeqPos) -> usize {
    let mut newly_bad = 0;
    for e in stack.iter_mut() {
        if e.is_bad {
            continue;
        }
        let dl = e.left_end.mean - left.mean;
        let dr = e.right_end.mean - right.mean;
        let vl = e.left_end.variance + left.variance;
        let vr = e.right_end.variance + right.variance;
        if dl * dl > 9.0 * vl || dr * dr > 9.0 * vr {
            e.is_bad = true;
            newly_bad += 1;
        }
    }
    newly_bad
}

/// One combined estimate plus its supporting link count, after the
/// fixed-point bad-edge pass.
fn settle_stack(
    stack: &mut Vec<StackEntry>,
    cfg: &GapstoneConfig,
) -> Option<(SeqPos, SeqPos, bool, u32)> {
    let (left, right, flipped) = estimate_chunk_ends(stack)?;
    let bad = chi_squared_filter(stack, &left, &right);

    let (left, right, flipped) = if bad > 0 {
        // One idempotent retry over the survivors.
        estimate_chunk_ends(stack)?
    } else {
        (left, right, flipped)
    };

    let good_links: u32 = stack
        .iter()
        .filter(|e| !e.is_bad)
        .map(|e| e.good_mates)
        .sum();
    let bad_count = stack.iter().filter(|e| e.is_bad).count() as u32;

    let tolerated = if good_links >= cfg.good_links_if_bad { 1 } else { 0 };
    if good_links < cfg.min_good_links || bad_count > tolerated {
        return None;
    }
    Some((left, right, flipped, good_links))
}

/// Place rocks: for every unplaced contig passing the cover-stat floor,
/// vet its link stack and file it into the nearest gap of the winning
/// scaffold. Join candidates are diverted into `joins`. Returns the
/// number filed.
pub fn select_rocks(
    graph: &ScaffoldGraph,
    fill: &mut Fill,
    cfg: &GapstoneConfig,
    joins: &mut JoinBuffer,
    ctx: &mut GapFillCtx,
) -> usize {
    let mut filed = 0;

    for c in 0..graph.contigs.len() {
        let cid = ContigId(c as u32);
        let contig = graph.contig(cid);
        if contig.scaffold.is_some() {
            continue;
        }
        if contig.cover_stat < cfg.min_rock_cover_stat {
            continue;
        }

        build_stack(graph, cid, true, ctx);
        if ctx.stack.is_empty() {
            continue;
        }

        let groups = group_by_scaffold(&ctx.stack);

        // Strong evidence in two scaffolds: a join candidate, not a rock.
        if groups.len() >= 2
            && groups[0].1 >= cfg.min_good_links
            && groups[1].1 >= cfg.min_good_links
        {
            if let Some(join) = make_join(graph, cid, &groups, ctx, cfg) {
                joins.push(join);
            }
            continue;
        }

        let (best_sid, best_links) = groups[0];
        if best_links < cfg.min_good_links {
            continue;
        }
        let conflict_links: u32 = groups.iter().skip(1).map(|(_, l)| l).sum();
        if conflict_links > 1 || (conflict_links == 1 && best_links < cfg.good_links_if_bad) {
            debug!(
                "contig {c}: {conflict_links} conflicting links against {best_links}; skipped"
            );
            continue;
        }

        let mut stack: Vec<StackEntry> =
            ctx.stack.iter().filter(|e| e.sid == best_sid).cloned().collect();
        let Some((left, right, flipped, links)) = settle_stack(&mut stack, cfg) else {
            continue;
        };

        let Some(sf) = fill.scaffolds.iter_mut().find(|s| s.sid == best_sid) else {
            continue;
        };
        let g = nearest_gap(&sf.gaps, (left.mean + right.mean) / 2.0);
        let mut chunk = GapChunk::new(cid, left, right, flipped);
        chunk.link_ct = links;
        chunk.cover_stat = contig.cover_stat;
        chunk.set(GapChunk::FLAG_KEEP, true);
        sf.gaps[g].chunks.push(chunk);
        filed += 1;
    }
    filed
}

/// Build a join claim from the candidate's two strongest scaffold groups.
fn make_join(
    graph: &ScaffoldGraph,
    cid: ContigId,
    groups: &[(ScaffoldId, u32)],
    ctx: &GapFillCtx,
    cfg: &GapstoneConfig,
) -> Option<ScaffJoin> {
    let mut a_stack: Vec<StackEntry> = ctx
        .stack
        .iter()
        .filter(|e| e.sid == groups[0].0)
        .cloned()
        .collect();
    let mut b_stack: Vec<StackEntry> = ctx
        .stack
        .iter()
        .filter(|e| e.sid == groups[1].0)
        .cloned()
        .collect();

    let (a_left, a_right, a_flip, a_links) = settle_stack(&mut a_stack, cfg)?;
    let (b_left, b_right, b_flip, b_links) = settle_stack(&mut b_stack, cfg)?;

    Some(ScaffJoin::from_placements(
        cid,
        groups[0].0,
        a_left,
        a_right,
        a_flip,
        groups[1].0,
        b_left,
        b_right,
        b_flip,
        a_links + b_links,
    ))
}

/// Last-chance rescue for a gap whose placements all washed out: if one
/// candidate is uniquely best (tightest variance, contained by nothing),
/// confirm it against the flanking contigs with the aligner and keep it,
/// growing the gap by at most three sigma.
pub fn restore_best_rock<A: OverlapAligner>(
    graph: &ScaffoldGraph,
    gap: &mut Gap,
    aligner: &A,
    cfg: &GapstoneConfig,
) -> bool {
    if gap.has_kept_chunk() || gap.chunks.is_empty() {
        return false;
    }
    let (Some(left_cid), Some(right_cid)) = (gap.left_cid, gap.right_cid) else {
        return false;
    };

    // Tightest combined variance wins the `best` flag.
    let mut best_idx = 0;
    let mut best_var = f64::MAX;
    for (i, c) in gap.chunks.iter().enumerate() {
        let v = c.start.variance + c.end.variance;
        if v < best_var {
            best_var = v;
            best_idx = i;
        }
    }

    // Disqualified if contained in another candidate or in a flank.
    let (bs, be) = (gap.chunks[best_idx].start.mean, gap.chunks[best_idx].end.mean);
    for (i, other) in gap.chunks.iter().enumerate() {
        if i != best_idx && bs >= other.start.mean && be <= other.end.mean {
            return false;
        }
    }
    for flank in [left_cid, right_cid] {
        let f = graph.contig(flank);
        if bs >= f.min_offset().mean && be <= f.max_offset().mean {
            return false;
        }
    }
    gap.chunks[best_idx].set(GapChunk::FLAG_BEST, true);

    let cand = graph.contig(gap.chunks[best_idx].cid);
    if cand.sequence.is_empty() {
        return false;
    }
    let cand_seq = if gap.chunks[best_idx].flipped {
        crate::store::reverse_complement(&cand.sequence)
    } else {
        cand.sequence.clone()
    };

    // Confirm against the left flank; fall back to the right.
    let left_seq = &graph.contig(left_cid).sequence;
    let right_seq = &graph.contig(right_cid).sequence;
    let erate = cfg.error_rate + 0.02;

    let mut placed: Option<(SeqPos, SeqPos)> = None;
    if !left_seq.is_empty() {
        if let Some(o) =
            aligner.optimal_overlap(left_seq, &cand_seq, 0, erate, cfg.min_overlap)
        {
            let flank_min = graph.contig(left_cid).min_offset();
            let start_mean = flank_min.mean + o.begpos as f64;
            let start = SeqPos::new(start_mean, gap.ref_variance + fudge_variance(o.length as f64));
            let end = SeqPos::new(
                start_mean + cand.bp_len.mean,
                start.variance + fudge_variance(cand.bp_len.mean),
            );
            placed = Some((start, end));
        }
    }
    if placed.is_none() && !right_seq.is_empty() {
        if let Some(o) =
            aligner.optimal_overlap(&cand_seq, right_seq, 0, erate, cfg.min_overlap)
        {
            // The flank's start sits begpos into the candidate, so the
            // candidate starts begpos left of the flank.
            let flank_min = graph.contig(right_cid).min_offset();
            let start_mean = flank_min.mean - o.begpos as f64;
            let start = SeqPos::new(start_mean, gap.ref_variance + fudge_variance(o.length as f64));
            let end = SeqPos::new(
                start_mean + cand.bp_len.mean,
                start.variance + fudge_variance(cand.bp_len.mean),
            );
            placed = Some((start, end));
        }
    }

    let Some((start, end)) = placed else {
        return false;
    };

    // The gap may only grow within its own three-sigma budget.
    let expansion = (end.mean - gap.end.mean).max(0.0);
    if expansion > 3.0 * gap.len.variance.max(1.0).sqrt() {
        return false;
    }
    if expansion > 0.0 {
        gap.adjustment += SeqPos::new(expansion, fudge_variance(expansion));
    }

    let chunk = &mut gap.chunks[best_idx];
    chunk.start = start;
    chunk.end = end;
    chunk.set(GapChunk::FLAG_KEEP, true);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Contig, EdgeOrient};

    fn unique_contig(len: f64, a: (f64, f64), b: (f64, f64)) -> Contig {
        let mut c = Contig::new(len);
        c.a_end = SeqPos::new(a.0, a.1);
        c.b_end = SeqPos::new(b.0, b.1);
        c.is_unique = true;
        c
    }

    fn mate_edge(a: ContigId, b: ContigId, orient: EdgeOrient, d: f64, n: u32) -> Edge {
        let mut e = Edge::new(a, b, orient, SeqPos::new(d, 100.0));
        e.edges_contributing = n;
        e
    }

    #[test]
    fn test_implied_placement_right_of_forward_anchor() {
        let mut g = ScaffoldGraph::new();
        let sid = g.add_scaffold();
        let anchor = g.add_contig(unique_contig(100.0, (0.0, 1.0), (100.0, 2.0)));
        g.insert_contig(sid, anchor, SeqPos::new(0.0, 1.0), SeqPos::new(100.0, 2.0));
        let cand = g.add_contig(Contig::new(50.0));
        let eid = g.add_edge(mate_edge(anchor, cand, EdgeOrient::AbAb, 30.0, 3));

        let entry = implied_placement(&g, cand, anchor, eid).unwrap();
        assert!(entry.left_link);
        assert!(!entry.flipped);
        assert_eq!(entry.left_end.mean, 130.0);
        assert_eq!(entry.right_end.mean, 180.0);
    }

    #[test]
    fn test_implied_placement_left_and_flipped() {
        let mut g = ScaffoldGraph::new();
        let sid = g.add_scaffold();
        let anchor = g.add_contig(unique_contig(100.0, (200.0, 5.0), (300.0, 6.0)));
        g.insert_contig(sid, anchor, SeqPos::new(200.0, 5.0), SeqPos::new(300.0, 6.0));
        let cand = g.add_contig(Contig::new(50.0));
        // Edge out of the anchor's A end, far side reversed.
        let eid = g.add_edge(mate_edge(anchor, cand, EdgeOrient::BaAb, 30.0, 3));

        let entry = implied_placement(&g, cand, anchor, eid).unwrap();
        assert!(!entry.left_link);
        assert!(entry.flipped);
        assert_eq!(entry.right_end.mean, 170.0);
        assert_eq!(entry.left_end.mean, 120.0);
    }

    #[test]
    fn test_estimate_moves_reference_to_slot_zero() {
        let e = |sv: f64, left: f64, flip: bool| StackEntry {
            edge: EdgeId(0),
            sid: ScaffoldId(0),
            anchor: ContigId(0),
            good_mates: 2,
            left_end: SeqPos::new(left, 50.0),
            right_end: SeqPos::new(left + 100.0, 60.0),
            flipped: flip,
            left_link: true,
            is_bad: false,
            partition: -1,
            source_variance: sv,
            edge_variance: 50.0,
        };
        let mut stack = vec![e(10.0, 500.0, false), e(90.0, 510.0, true), e(40.0, 505.0, false)];
        let (left, right, flipped) = estimate_chunk_ends(&mut stack).unwrap();
        // Largest left-link source variance (90) becomes the reference.
        assert_eq!(stack[0].source_variance, 90.0);
        assert!(flipped, "orientation read off slot zero");
        assert!(left.mean > 499.0 && left.mean < 511.0);
        assert!(right.mean > left.mean);
    }

    #[test]
    fn test_chi_squared_marks_outlier() {
        let e = |left: f64| StackEntry {
            edge: EdgeId(0),
            sid: ScaffoldId(0),
            anchor: ContigId(0),
            good_mates: 2,
            left_end: SeqPos::new(left, 25.0),
            right_end: SeqPos::new(left + 100.0, 25.0),
            flipped: false,
            left_link: true,
            is_bad: false,
            partition: -1,
            source_variance: 10.0,
            edge_variance: 25.0,
        };
        let mut stack = vec![e(500.0), e(505.0), e(2000.0)];
        let left = SeqPos::new(502.0, 25.0);
        let right = SeqPos::new(602.0, 25.0);
        assert_eq!(chi_squared_filter(&mut stack, &left, &right), 1);
        assert!(stack[2].is_bad);
    }
}
