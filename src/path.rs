/// Overlap-path search over the contig graph.
///
/// A depth-first walk from a source contig's chosen end, following overlap
/// edges, trying to reach a destination and to hit as many target contigs
/// as possible within a distance bound. Used by stone confirmation to
/// verify that candidate placements are threaded by real overlaps, and by
/// the consensus engine when hunting for a placement anchor.
///
/// Each (contig, entry-end) node is expanded at most once; re-entries reuse
/// the memoized subtree result, and back-edges to nodes still on the active
/// stack are cut. The walk is bounded by a call counter: saturation is a
/// clean failure that marks the source contig, not an error.
use std::collections::HashMap;

use crate::graph::{ContigEnd, ContigId, Edge, ScaffoldGraph};

/// A contig the path should try to hit, with the acceptable arrival
/// distance window and the end it must be entered through.
#[derive(Debug, Clone)]
pub struct PathTarget {
    pub cid: ContigId,
    pub lo: f64,
    pub hi: f64,
    pub arrival: ContigEnd,
}

/// Parameters of one path search.
#[derive(Debug, Clone)]
pub struct PathQuery {
    pub source: ContigId,
    pub exit_end: ContigEnd,
    pub destination: Option<ContigId>,
    pub bound: f64,
    pub allow_tandem: bool,
    pub skip_containment: bool,
    pub max_calls: u64,
    /// Only the best-ranked edges at each node are descended.
    pub max_outdegree: usize,
}

impl PathQuery {
    pub fn new(source: ContigId, exit_end: ContigEnd) -> Self {
        PathQuery {
            source,
            exit_end,
            destination: None,
            bound: f64::MAX,
            allow_tandem: false,
            skip_containment: true,
            max_calls: DEFAULT_MAX_CALLS,
            max_outdegree: DEFAULT_MAX_OUTDEGREE,
        }
    }
}

pub const DEFAULT_MAX_CALLS: u64 = 100_000;
pub const DEFAULT_MAX_OUTDEGREE: usize = 8;

/// One target hit, with cumulative distances from the source's exit end.
#[derive(Debug, Clone)]
pub struct TargetHit {
    pub cid: ContigId,
    pub distance: f64,
    pub frag_len_sum: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PathResult {
    pub found: bool,
    pub reached_destination: bool,
    pub hits: Vec<TargetHit>,
    pub calls: u64,
    pub saturated: bool,
}

/// Memoized subtree result, relative to arrival at the node's entry end.
#[derive(Debug, Clone, Default)]
struct NodeResult {
    target_hits: u32,
    first_hit_dist: f64,
    hits: Vec<TargetHit>,
    reaches_dest: bool,
}

#[derive(Debug, Clone)]
enum NodeState {
    Active,
    Finished(NodeResult),
}

struct Walker<'a> {
    graph: &'a ScaffoldGraph,
    query: &'a PathQuery,
    targets: &'a [PathTarget],
    states: HashMap<(ContigId, ContigEnd), NodeState>,
    calls: u64,
    saturated: bool,
}

/// Search for an overlap path. Returns a clean failure result (never an
/// error) when no admissible path exists or the call budget saturates; on
/// saturation the source contig is flagged `walk_maxed_out`.
pub fn find_olap_path(
    graph: &mut ScaffoldGraph,
    query: &PathQuery,
    targets: &[PathTarget],
) -> PathResult {
    let mut walker = Walker {
        graph,
        query,
        targets,
        states: HashMap::new(),
        calls: 0,
        saturated: false,
    };

    let mut best: Option<NodeResult> = None;
    let source_len = walker.graph.contig(query.source).bp_len.mean;

    // Expand the source manually: targets are only tested on arrival at a
    // node, and the source is departed, not arrived at.
    for edge in walker.ranked_edges(query.source, query.exit_end, true) {
        let o = edge.orient_wrt(query.source);
        let next = edge.other_end(query.source);
        let child = walker.walk(next, o.entry_end(), edge.distance.mean, 0.0);
        if let Some(mut child) = child {
            offset_hits(&mut child, edge.distance.mean, source_len);
            if better(&child, best.as_ref()) {
                best = Some(child);
            }
        }
        if walker.saturated {
            break;
        }
    }

    let calls = walker.calls;
    let saturated = walker.saturated;
    if saturated {
        graph.contig_mut(query.source).walk_maxed_out = true;
    }

    let sub = best.unwrap_or_default();
    let found = if saturated {
        false
    } else if query.destination.is_some() {
        sub.reaches_dest
    } else {
        sub.target_hits > 0
    };

    PathResult {
        found,
        reached_destination: sub.reaches_dest,
        hits: sub.hits,
        calls,
        saturated,
    }
}

impl<'a> Walker<'a> {
    /// Expand one node. `cum_dist` is the distance from the source's exit
    /// end to this node's entry end; hits inside the returned result are
    /// relative to this node.
    fn walk(
        &mut self,
        cid: ContigId,
        entry: ContigEnd,
        cum_dist: f64,
        cum_frag: f64,
    ) -> Option<NodeResult> {
        self.calls += 1;
        if self.calls > self.query.max_calls {
            self.saturated = true;
            return None;
        }

        match self.states.get(&(cid, entry)) {
            Some(NodeState::Active) => return None, // back-edge
            Some(NodeState::Finished(res)) => return Some(res.clone()),
            None => {}
        }
        self.states.insert((cid, entry), NodeState::Active);

        let node_len = self.graph.contig(cid).bp_len.mean;
        let mut res = NodeResult::default();

        // Arrival tests.
        for t in self.targets {
            if t.cid == cid && t.arrival == entry && cum_dist >= t.lo && cum_dist <= t.hi {
                res.target_hits = 1;
                res.first_hit_dist = 0.0;
                res.hits.push(TargetHit {
                    cid,
                    distance: 0.0,
                    frag_len_sum: 0.0,
                });
                break;
            }
        }
        if self.query.destination == Some(cid) {
            res.reaches_dest = true;
        }

        // Distance pruning: once even the near end of this node is past the
        // bound, nothing deeper can qualify.
        let descend = cum_dist - node_len <= self.query.bound && !res.reaches_dest;

        if descend {
            let exit = entry.opposite();
            let mut best: Option<NodeResult> = None;

            for edge in self.ranked_edges(cid, exit, false) {
                let o = edge.orient_wrt(cid);
                let next = edge.other_end(cid);
                let step = node_len + edge.distance.mean;
                let child = self.walk(next, o.entry_end(), cum_dist + step, cum_frag + node_len);
                if let Some(mut child) = child {
                    offset_hits(&mut child, step, node_len);
                    if better(&child, best.as_ref()) {
                        best = Some(child);
                    }
                }
                if self.saturated {
                    break;
                }
            }

            if let Some(best) = best {
                res.target_hits += best.target_hits;
                res.reaches_dest |= best.reaches_dest;
                if res.hits.is_empty() {
                    res.first_hit_dist = best.first_hit_dist;
                }
                res.hits.extend(best.hits);
            }
        }

        self.states.insert((cid, entry), NodeState::Finished(res.clone()));
        Some(res)
    }

    /// Admissible edges out of `exit`, best first, capped at the query's
    /// out-degree limit. Ranking prefers well-supported edges, then
    /// tighter distance estimates, so a high-degree repeat node spends
    /// its fan-out on the credible continuations.
    fn ranked_edges(&self, cid: ContigId, exit: ContigEnd, first_step: bool) -> Vec<Edge> {
        let mut out: Vec<Edge> = Vec::new();
        for &eid in &self.graph.contigs[cid.idx()].edges {
            let edge = self.graph.edge(eid);
            if !self.admissible(edge, cid, first_step) {
                continue;
            }
            let o = edge.orient_wrt(cid);
            if o.exit_end() != exit {
                continue;
            }
            let next = edge.other_end(cid);
            if !self.forward_progress(edge, next) {
                continue;
            }
            out.push(edge.clone());
        }
        out.sort_by(|a, b| {
            b.edges_contributing
                .cmp(&a.edges_contributing)
                .then(a.distance.variance.total_cmp(&b.distance.variance))
        });
        out.truncate(self.query.max_outdegree.max(1));
        out
    }

    /// Edge admissibility for path traversal.
    fn admissible(&self, edge: &Edge, _from: ContigId, first_step: bool) -> bool {
        if !edge.is_overlap_edge() {
            return false;
        }
        if edge.probably_bogus() {
            return false;
        }
        if !self.query.allow_tandem && edge.has(Edge::FLAG_HAS_TANDEM_OVERLAP) {
            return false;
        }
        if self.query.skip_containment && edge.has(Edge::FLAG_CONTAINMENT) {
            // Containments are only usable entering or leaving the path.
            let terminal = first_step
                || self.query.destination == Some(edge.a)
                || self.query.destination == Some(edge.b);
            if !terminal {
                return false;
            }
        }
        true
    }

    /// A step must make forward progress unless it lands on the
    /// destination itself.
    fn forward_progress(&self, edge: &Edge, next: ContigId) -> bool {
        if self.query.destination == Some(next) {
            return true;
        }
        let next_len = self.graph.contig(next).bp_len.mean;
        next_len + edge.distance.mean > 0.0
    }
}

/// Rebase a child result to its parent's frame: hits move by the edge step
/// and the parent's own length.
fn offset_hits(res: &mut NodeResult, dist_step: f64, frag_step: f64) {
    for h in &mut res.hits {
        h.distance += dist_step;
        h.frag_len_sum += frag_step;
    }
    if res.target_hits > 0 {
        res.first_hit_dist += dist_step;
    }
}

/// Child selection: most target hits win; ties break toward the shorter
/// distance to the first hit, then toward reaching the destination.
fn better(candidate: &NodeResult, best: Option<&NodeResult>) -> bool {
    let Some(best) = best else { return true };
    if candidate.target_hits != best.target_hits {
        return candidate.target_hits > best.target_hits;
    }
    if candidate.reaches_dest != best.reaches_dest {
        return candidate.reaches_dest;
    }
    candidate.target_hits > 0 && candidate.first_hit_dist < best.first_hit_dist
}
