/// Scaffold joins: a candidate contig with strong links into two
/// different scaffolds is evidence those scaffolds abut. Join claims
/// accumulate during rock selection and are vetted as a batch; survivors
/// are filed back into the fill as ordinary candidates tagged as joiners.
use log::{debug, warn};

use crate::fill::{nearest_gap, Fill, GapChunk};
use crate::graph::{ContigId, ScaffoldGraph, ScaffoldId};
use crate::position::SeqPos;

/// A claim that scaffold `b_sid`'s coordinates map into scaffold
/// `a_sid`'s by `y = m*x + b`, inferred from one candidate contig placed
/// in both frames.
#[derive(Debug, Clone)]
pub struct ScaffJoin {
    pub cid: ContigId,
    pub a_sid: ScaffoldId,
    pub b_sid: ScaffoldId,
    /// +1 or -1.
    pub m: i8,
    pub b: f64,
    pub b_variance: f64,
    /// Candidate's implied interval in the `a_sid` frame.
    pub insert_left: SeqPos,
    pub insert_right: SeqPos,
    pub flipped: bool,
    pub link_ct: u32,
    pub violated: bool,
    pub is_bad: bool,
}

impl ScaffJoin {
    /// Infer the affine relation from the candidate's two placements:
    /// (left, flipped) in each scaffold frame.
    pub fn from_placements(
        cid: ContigId,
        a_sid: ScaffoldId,
        a_left: SeqPos,
        a_right: SeqPos,
        a_flipped: bool,
        b_sid: ScaffoldId,
        b_left: SeqPos,
        b_right: SeqPos,
        b_flipped: bool,
        link_ct: u32,
    ) -> Self {
        let a_center = (a_left.mean + a_right.mean) / 2.0;
        let b_center = (b_left.mean + b_right.mean) / 2.0;
        let m: i8 = if a_flipped == b_flipped { 1 } else { -1 };
        let b = a_center - m as f64 * b_center;
        let b_variance =
            a_left.variance + a_right.variance + b_left.variance + b_right.variance;
        ScaffJoin {
            cid,
            a_sid,
            b_sid,
            m,
            b,
            b_variance,
            insert_left: a_left,
            insert_right: a_right,
            flipped: a_flipped,
            link_ct,
            violated: false,
            is_bad: false,
        }
    }

    fn same_pair(&self, other: &ScaffJoin) -> bool {
        (self.a_sid == other.a_sid && self.b_sid == other.b_sid)
            || (self.a_sid == other.b_sid && self.b_sid == other.a_sid)
    }
}

/// Accumulator for join claims; reset at phase boundaries.
#[derive(Debug, Default)]
pub struct JoinBuffer {
    pub joins: Vec<ScaffJoin>,
}

impl JoinBuffer {
    pub fn new() -> Self {
        JoinBuffer::default()
    }

    pub fn push(&mut self, join: ScaffJoin) {
        self.joins.push(join);
    }

    pub fn reset(&mut self) {
        self.joins.clear();
    }

    pub fn survivors(&self) -> impl Iterator<Item = &ScaffJoin> {
        self.joins.iter().filter(|j| !j.is_bad && !j.violated)
    }
}

/// Batch consistency check over accumulated joins.
///
/// Two claims relating the same scaffold pair (or landing overlapping
/// inserts in the same target) with different affine relations poison each
/// other. Each survivor is then tested against the trusted edges already
/// connecting the two scaffolds: a trusted edge whose implied offset
/// disagrees beyond three sigma vetoes the join.
pub fn check_joins(graph: &ScaffoldGraph, buffer: &mut JoinBuffer) {
    let n = buffer.joins.len();

    for i in 0..n {
        for j in (i + 1)..n {
            let (ji, jj) = (&buffer.joins[i], &buffer.joins[j]);
            let conflict = if ji.same_pair(jj) {
                ji.m != jj.m || {
                    let tol = 3.0 * (ji.b_variance + jj.b_variance).max(1.0).sqrt();
                    (ji.b - jj.b).abs() > tol
                }
            } else if ji.a_sid == jj.a_sid {
                // Two different scaffolds claiming overlapping ground in
                // the same target.
                let overlap = ji.insert_left.mean < jj.insert_right.mean
                    && jj.insert_left.mean < ji.insert_right.mean;
                overlap && ji.b_sid != jj.b_sid
            } else {
                false
            };
            if conflict {
                debug!(
                    "join conflict: contig {} vs contig {}",
                    ji.cid.0, jj.cid.0
                );
                buffer.joins[i].is_bad = true;
                buffer.joins[j].is_bad = true;
            }
        }
    }

    for join in &mut buffer.joins {
        if join.is_bad {
            continue;
        }
        if let Some((implied_b, var)) = trusted_edge_offset(graph, join.a_sid, join.b_sid, join.m)
        {
            let tol = 3.0 * (var + join.b_variance).max(1.0).sqrt();
            if (implied_b - join.b).abs() > tol {
                warn!(
                    "join of scaffolds {} and {} violated by trusted edge (off by {:.0})",
                    join.a_sid.0,
                    join.b_sid.0,
                    (implied_b - join.b).abs()
                );
                join.violated = true;
            }
        }
    }
}

/// Offset implied by the trusted edges between two scaffolds, if any:
/// place the far contig through the edge and read off the resulting
/// b-intercept for the given slope.
fn trusted_edge_offset(
    graph: &ScaffoldGraph,
    a_sid: ScaffoldId,
    b_sid: ScaffoldId,
    m: i8,
) -> Option<(f64, f64)> {
    for edge in &graph.edges {
        if !graph.is_trusted(edge) {
            continue;
        }
        let (ca, cb) = (graph.contig(edge.a), graph.contig(edge.b));
        let (x, y) = match (ca.scaffold, cb.scaffold) {
            (Some(sa), Some(sb)) if sa == a_sid && sb == b_sid => (edge.a, edge.b),
            (Some(sb), Some(sa)) if sa == a_sid && sb == b_sid => (edge.b, edge.a),
            _ => continue,
        };

        let anchor = graph.contig(x);
        let far = graph.contig(y);
        let o = edge.orient_wrt(x);
        let anchor_fwd = anchor.is_forward();
        let right_side = (o.exit_end() == crate::graph::ContigEnd::B) == anchor_fwd;

        let far_len = far.bp_len.mean;
        let far_center_pred = if right_side {
            anchor.max_offset().mean + edge.distance.mean + far_len / 2.0
        } else {
            anchor.min_offset().mean - edge.distance.mean - far_len / 2.0
        };
        let far_center_actual = far.center();
        let implied_b = far_center_pred - m as f64 * far_center_actual;
        let var = anchor.max_variance() + edge.distance.variance;
        return Some((implied_b, var));
    }
    None
}

/// File surviving joins into the target scaffold's fill as joiner-tagged
/// candidates.
pub fn file_joins(fill: &mut Fill, buffer: &JoinBuffer) -> usize {
    let mut filed = 0;
    for join in buffer.survivors() {
        let Some(sf) = fill.scaffolds.iter_mut().find(|s| s.sid == join.a_sid) else {
            continue;
        };
        let center = (join.insert_left.mean + join.insert_right.mean) / 2.0;
        let g = nearest_gap(&sf.gaps, center);
        let mut chunk = GapChunk::new(join.cid, join.insert_left, join.insert_right, join.flipped);
        chunk.link_ct = join.link_ct;
        chunk.set(GapChunk::FLAG_JOINER, true);
        // A join already survived the batch and trusted-edge checks.
        chunk.set(GapChunk::FLAG_KEEP, true);
        sf.gaps[g].chunks.push(chunk);
        filed += 1;
    }
    filed
}
