/// The fill structure: per-scaffold gap annotations and candidate
/// placements, produced by rock and stone selection and consumed by
/// confirmation and insertion.
use crate::graph::{ContigId, ScaffoldGraph, ScaffoldId};
use crate::position::SeqPos;

/// Endpoints agreeing within this many bases make two placements of the
/// same contig duplicates.
pub const DUP_SLOP: f64 = 30.0;

/// A candidate placement of one contig into one gap.
#[derive(Debug, Clone)]
pub struct GapChunk {
    pub cid: ContigId,
    /// Distinguishes multiple placements of the same contig.
    pub copy_letter: char,
    pub start: SeqPos,
    pub end: SeqPos,
    pub flipped: bool,
    pub link_ct: u32,
    pub cover_stat: f64,
    pub flags: u16,
}

impl GapChunk {
    pub const FLAG_KEEP: u16 = 0x0001;
    pub const FLAG_BEST: u16 = 0x0002;
    pub const FLAG_CANDIDATE: u16 = 0x0004;
    pub const FLAG_SPLIT: u16 = 0x0008;
    pub const FLAG_PATH_CONFIRMED: u16 = 0x0010;
    pub const FLAG_VISITED: u16 = 0x0020;
    pub const FLAG_FINISHED: u16 = 0x0040;
    pub const FLAG_JOINER: u16 = 0x0080;

    pub fn new(cid: ContigId, start: SeqPos, end: SeqPos, flipped: bool) -> Self {
        GapChunk {
            cid,
            copy_letter: 'A',
            start,
            end,
            flipped,
            link_ct: 0,
            cover_stat: 0.0,
            flags: Self::FLAG_CANDIDATE,
        }
    }

    pub fn has(&self, mask: u16) -> bool {
        (self.flags & mask) != 0
    }

    pub fn set(&mut self, mask: u16, on: bool) -> &mut Self {
        if on {
            self.flags |= mask;
        } else {
            self.flags &= !mask;
        }
        self
    }

    pub fn keep(&self) -> bool {
        self.has(Self::FLAG_KEEP)
    }

    pub fn candidate(&self) -> bool {
        self.has(Self::FLAG_CANDIDATE)
    }

    pub fn path_confirmed(&self) -> bool {
        self.has(Self::FLAG_PATH_CONFIRMED)
    }

    pub fn center(&self) -> f64 {
        (self.start.mean + self.end.mean) / 2.0
    }

    pub fn len_mean(&self) -> f64 {
        (self.end.mean - self.start.mean).abs()
    }
}

/// One gap of a scaffold. Sentinel gaps at the two scaffold ends have no
/// left (respectively right) flank.
#[derive(Debug, Clone)]
pub struct Gap {
    pub left_cid: Option<ContigId>,
    pub right_cid: Option<ContigId>,
    /// End of the left flank.
    pub start: SeqPos,
    /// Start of the right flank.
    pub end: SeqPos,
    /// Variance of the left flank end: the local origin for variance
    /// arithmetic inside this gap.
    pub ref_variance: f64,
    pub len: SeqPos,
    /// Pending shift for everything right of this gap.
    pub adjustment: SeqPos,
    pub chunks: Vec<GapChunk>,
}

impl Gap {
    pub fn center(&self) -> f64 {
        (self.start.mean + self.end.mean) / 2.0
    }

    pub fn has_kept_chunk(&self) -> bool {
        self.chunks.iter().any(|c| c.keep())
    }
}

#[derive(Debug, Clone)]
pub struct ScaffoldFill {
    pub sid: ScaffoldId,
    pub gaps: Vec<Gap>,
}

#[derive(Debug, Clone, Default)]
pub struct Fill {
    pub scaffolds: Vec<ScaffoldFill>,
}

impl Fill {
    pub fn num_candidates(&self) -> usize {
        self.scaffolds
            .iter()
            .flat_map(|s| &s.gaps)
            .map(|g| g.chunks.len())
            .sum()
    }

    pub fn num_kept(&self) -> usize {
        self.scaffolds
            .iter()
            .flat_map(|s| &s.gaps)
            .flat_map(|g| &g.chunks)
            .filter(|c| c.keep())
            .count()
    }
}

/// Build the gap array for every live scaffold: a sentinel gap off each
/// end plus one gap per adjacent contig pair.
pub fn scan_gaps(graph: &ScaffoldGraph, max_mate_distance: f64) -> Fill {
    let mut fill = Fill::default();

    for (s, scaff) in graph.scaffolds.iter().enumerate() {
        if scaff.deleted || scaff.contigs.is_empty() {
            continue;
        }
        let sid = ScaffoldId(s as u32);
        let mut gaps = Vec::with_capacity(scaff.contigs.len() + 1);

        let first = graph.contig(scaff.contigs[0]);
        gaps.push(Gap {
            left_cid: None,
            right_cid: Some(scaff.contigs[0]),
            start: SeqPos::new(-max_mate_distance, 0.0),
            end: first.min_offset(),
            ref_variance: 0.0,
            len: first.min_offset() - SeqPos::new(-max_mate_distance, 0.0),
            adjustment: SeqPos::default(),
            chunks: Vec::new(),
        });

        for w in scaff.contigs.windows(2) {
            let l = graph.contig(w[0]);
            let r = graph.contig(w[1]);
            let start = l.max_offset();
            let end = r.min_offset();
            gaps.push(Gap {
                left_cid: Some(w[0]),
                right_cid: Some(w[1]),
                start,
                end,
                ref_variance: start.variance,
                len: end - start,
                adjustment: SeqPos::default(),
                chunks: Vec::new(),
            });
        }

        let last = graph.contig(*scaff.contigs.last().unwrap());
        gaps.push(Gap {
            left_cid: Some(*scaff.contigs.last().unwrap()),
            right_cid: None,
            start: last.max_offset(),
            end: last.max_offset() + SeqPos::new(max_mate_distance, 0.0),
            ref_variance: last.max_offset().variance,
            len: SeqPos::new(max_mate_distance, 0.0),
            adjustment: SeqPos::default(),
            chunks: Vec::new(),
        });

        fill.scaffolds.push(ScaffoldFill { sid, gaps });
    }
    fill
}

/// Index of the gap whose center is nearest to `center`.
pub fn nearest_gap(gaps: &[Gap], center: f64) -> usize {
    let mut best = 0;
    let mut best_d = f64::MAX;
    for (i, g) in gaps.iter().enumerate() {
        let d = (g.center() - center).abs();
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Apply a gap's pending adjustment: shift both ends of every contig to
/// the right of the gap, and rebase every later gap (positions and
/// ref-variance) in the same scaffold. The adjustment is consumed.
pub fn propagate_adjustment(graph: &mut ScaffoldGraph, sf: &mut ScaffoldFill, gap_idx: usize) {
    let delta = sf.gaps[gap_idx].adjustment;
    if delta.mean == 0.0 && delta.variance == 0.0 {
        return;
    }
    sf.gaps[gap_idx].adjustment = SeqPos::default();

    // Everything from the right flank onward moves; inserts sitting
    // inside this gap are anchored to the left flank and stay.
    let boundary = sf.gaps[gap_idx].end.mean - 1e-9;
    let members = graph.scaffolds[sf.sid.idx()].contigs.clone();
    for cid in members {
        if graph.contig(cid).min_offset().mean >= boundary {
            let c = graph.contig_mut(cid);
            c.a_end += delta;
            c.b_end += delta;
        }
    }

    // This gap widens; later gaps shift wholesale.
    sf.gaps[gap_idx].end += delta;
    sf.gaps[gap_idx].len += delta;
    for g in sf.gaps.iter_mut().skip(gap_idx + 1) {
        g.start += delta;
        g.end += delta;
        g.ref_variance += delta.variance;
        for c in &mut g.chunks {
            c.start += delta;
            c.end += delta;
        }
    }
}

/// Drop later placements of a contig whose endpoints agree with an
/// earlier one within `DUP_SLOP` on both ends.
pub fn kill_duplicates(fill: &mut Fill) -> usize {
    let mut killed = 0;
    for sf in &mut fill.scaffolds {
        for gap in &mut sf.gaps {
            let mut kept: Vec<GapChunk> = Vec::with_capacity(gap.chunks.len());
            for chunk in gap.chunks.drain(..) {
                let dup = kept.iter().any(|k| {
                    k.cid == chunk.cid
                        && (k.start.mean - chunk.start.mean).abs() <= DUP_SLOP
                        && (k.end.mean - chunk.end.mean).abs() <= DUP_SLOP
                });
                if dup {
                    killed += 1;
                } else {
                    kept.push(chunk);
                }
            }
            gap.chunks = kept;
        }
    }
    killed
}
