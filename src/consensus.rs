/// Per-unitig consensus: place every read of a unitig against a running
/// consensus sequence, retrying with relaxed error tolerance and several
/// position-estimation strategies before giving up on a read.
///
/// The running consensus (the frankenstein) is rebuilt from the abacus
/// after every placement; a full abacus refinement is only run mid-unitig
/// when the cheap placements have failed twice, and again at the end.
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::HashSet;

use crate::abacus::Abacus;
use crate::align::{Overlap, OverlapAligner};
use crate::config::GapstoneConfig;
use crate::microhet::{microhet_prob, pack_rows};
use crate::refine::refine_full;
use crate::store::{BeadIdx, FragIdx};

/// What a layout entry is. Only reads participate in unitig consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Read,
    Unitig,
}

/// One read's layout within a unitig, as delivered by the layout stage.
/// `bgn > end` means the read is reverse complemented.
#[derive(Debug, Clone)]
pub struct FragLayout {
    pub ident: u32,
    pub kind: LayoutKind,
    pub bgn: i32,
    pub end: i32,
    pub parent: u32,
    pub ahang: i32,
    pub bhang: i32,
    pub contained: u32,
}

#[derive(Debug, Clone)]
pub struct UnitigLayout {
    pub id: u32,
    pub frags: Vec<FragLayout>,
}

#[derive(Debug, Clone)]
pub struct Read {
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

/// Read sequences and qualities, keyed by read id, iterated in load order.
#[derive(Debug, Default)]
pub struct ReadStore {
    reads: IndexMap<u32, Read>,
}

impl ReadStore {
    pub fn new() -> Self {
        ReadStore::default()
    }

    pub fn insert(&mut self, ident: u32, seq: Vec<u8>, qual: Vec<u8>) {
        self.reads.insert(ident, Read { seq, qual });
    }

    pub fn get(&self, ident: u32) -> Option<&Read> {
        self.reads.get(&ident)
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Read)> {
        self.reads.iter()
    }
}

/// Final placement of one read in the consensus, in column coordinates.
#[derive(Debug, Clone)]
pub struct ReadPlacement {
    pub ident: u32,
    pub bgn: i32,
    pub end: i32,
    pub complement: bool,
}

/// The product of one unitig's consensus run.
#[derive(Debug, Clone)]
pub struct UnitigResult {
    pub id: u32,
    pub success: bool,
    pub consensus: Vec<u8>,
    pub quality: Vec<u8>,
    pub placements: Vec<ReadPlacement>,
    pub microhet_prob: f64,
    pub failed: Vec<bool>,
}

/// Position-estimation strategies, tried in order within each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Parent,
    ContainedParent,
    Layout,
    Alignment,
}

const STRATEGIES: [Strategy; 4] = [
    Strategy::Parent,
    Strategy::ContainedParent,
    Strategy::Layout,
    Strategy::Alignment,
];

/// Error-rate tiers: base, doubled, base again after a full abacus
/// rebuild, then quadrupled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Base,
    Doubled,
    AfterRebuild,
    Quadrupled,
}

const TIERS: [Tier; 4] = [Tier::Base, Tier::Doubled, Tier::AfterRebuild, Tier::Quadrupled];

pub struct UnitigConsensus<'a, A: OverlapAligner> {
    aligner: &'a A,
    cfg: &'a GapstoneConfig,
    unitig_id: u32,
    layout: Vec<FragLayout>,
    backup: Vec<FragLayout>,
    abacus: Abacus,
    /// Original layout intervals, forward-oriented. Never modified.
    utgpos: Vec<(i32, i32)>,
    /// Current placement in frankenstein coordinates; (0,0) = unplaced.
    cnspos: Vec<(i32, i32)>,
    frankenstein: Vec<u8>,
    frank_bof: Vec<BeadIdx>,
    tiid: usize,
    piid: Option<usize>,
    trace: Vec<i32>,
    trace_bgn: i32,
    pub failed: Vec<bool>,
}

impl<'a, A: OverlapAligner> UnitigConsensus<'a, A> {
    pub fn new(
        unitig: &UnitigLayout,
        reads: &ReadStore,
        aligner: &'a A,
        cfg: &'a GapstoneConfig,
    ) -> Result<Self> {
        if unitig.frags.is_empty() {
            bail!("unitig {} has no fragments", unitig.id);
        }

        let mut uc = UnitigConsensus {
            aligner,
            cfg,
            unitig_id: unitig.id,
            layout: unitig.frags.clone(),
            backup: unitig.frags.clone(),
            abacus: Abacus::new(),
            utgpos: Vec::new(),
            cnspos: Vec::new(),
            frankenstein: Vec::new(),
            frank_bof: Vec::new(),
            tiid: 0,
            piid: None,
            trace: Vec::new(),
            trace_bgn: 0,
            failed: vec![true; unitig.frags.len()],
        };
        uc.initialize(reads)?;
        Ok(uc)
    }

    /// Install every fragment into the local stores and seed the abacus
    /// with the first one. Duplicates and non-read entries abort.
    fn initialize(&mut self, reads: &ReadStore) -> Result<()> {
        let mut seen = HashSet::new();

        for frag in &self.layout {
            if frag.kind != LayoutKind::Read {
                bail!(
                    "unitig {} failed: fragment {} is not a read",
                    self.unitig_id,
                    frag.ident
                );
            }
            if !seen.insert(frag.ident) {
                bail!(
                    "unitig {} failed: fragment {} is a duplicate",
                    self.unitig_id,
                    frag.ident
                );
            }

            let read = reads
                .get(frag.ident)
                .with_context(|| format!("read {} not in store", frag.ident))?;
            let complement = frag.bgn > frag.end;
            self.abacus
                .add_fragment(frag.ident, &read.seq, &read.qual, complement);

            let (lo, hi) = if complement {
                (frag.end, frag.bgn)
            } else {
                (frag.bgn, frag.end)
            };
            self.utgpos.push((lo, hi));
            self.cnspos.push((0, 0));
        }

        self.abacus.seed_with_fragment(FragIdx(0));
        let (frank, bof) = self.abacus.refresh();
        self.cnspos[0] = (0, self.abacus.frag(FragIdx(0)).length as i32);
        self.frankenstein = frank;
        self.frank_bof = bof;
        self.failed[0] = false;
        Ok(())
    }

    fn frank_len(&self) -> i32 {
        self.frankenstein.len() as i32
    }

    /// Estimate a placement from the already-placed parent, scaling the
    /// stored hangs by how much consensus changed the parent's extent.
    fn position_from_parent(&mut self, contained: bool) -> bool {
        debug_assert!(self.piid.is_none());
        let me = &self.layout[self.tiid];
        let parent = if contained { me.contained } else { me.parent };
        if parent == 0 {
            return false;
        }
        if contained && me.parent == me.contained {
            // Already tried as the plain parent.
            return false;
        }

        let Some(piid) = (0..self.tiid)
            .rev()
            .find(|&q| self.layout[q].ident == parent)
        else {
            return false;
        };
        if self.cnspos[piid] == (0, 0) {
            return false;
        }
        if self.utgpos[piid].1 < self.utgpos[self.tiid].0
            || self.utgpos[self.tiid].1 < self.utgpos[piid].0
        {
            debug!(
                "parent {} at utg {:?} disagrees with fragment at utg {:?}",
                parent, self.utgpos[piid], self.utgpos[self.tiid]
            );
            return false;
        }

        let putg = self.utgpos[piid];
        let pcns = self.cnspos[piid];
        let scale = (pcns.1 - pcns.0) as f64 / (putg.1 - putg.0) as f64;

        let mut bgn = pcns.0 + (self.layout[self.tiid].ahang as f64 * scale) as i32;
        let mut end = pcns.1 + (self.layout[self.tiid].bhang as f64 * scale) as i32;

        // If the scaling shrank the window too far, recenter it at the
        // scaled fragment length.
        let frag_len = (self.utgpos[self.tiid].1 - self.utgpos[self.tiid].0) as f64;
        if bgn >= end || ((end - bgn) as f64) < 0.75 * frag_len {
            let center = (bgn + end) / 2;
            let half = (frag_len * scale / 2.0) as i32;
            bgn = center - half;
            end = center + half;
        }
        if bgn >= end {
            return false;
        }

        self.cnspos[self.tiid] = (bgn, end);
        self.piid = Some(piid);
        true
    }

    /// Estimate a placement from raw layout coordinates, anchored to the
    /// placed fragment with the thickest layout overlap.
    fn position_from_layout(&mut self) -> bool {
        debug_assert!(self.piid.is_none());
        let mut thickest = 0i32;
        let mut choice: Option<usize> = None;

        for qiid in (0..self.tiid).rev() {
            if self.cnspos[qiid] == (0, 0) {
                continue;
            }
            if self.utgpos[self.tiid].0 >= self.utgpos[qiid].1
                || self.utgpos[self.tiid].1 <= self.utgpos[qiid].0
            {
                continue;
            }

            let bgn = self.cnspos[qiid].0 + self.utgpos[self.tiid].0 - self.utgpos[qiid].0;
            let end = self.cnspos[qiid].1 + self.utgpos[self.tiid].1 - self.utgpos[qiid].1;

            // A bad original placement can leave no overlap after mapping
            // into frankenstein coordinates; skip those rather than assert.
            if bgn >= end {
                debug!(
                    "layout projection for fragment {} collapsed ({bgn},{end}); skipped",
                    self.layout[self.tiid].ident
                );
                continue;
            }

            let ooo = end.min(self.frank_len()) - bgn;
            if bgn < self.frank_len() && ooo > thickest {
                thickest = ooo;
                choice = Some(qiid);
            }
        }

        if thickest >= self.cfg.min_overlap {
            let qiid = choice.expect("thickest overlap without anchor");
            let bgn = self.cnspos[qiid].0 + self.utgpos[self.tiid].0 - self.utgpos[qiid].0;
            let end = self.cnspos[qiid].1 + self.utgpos[self.tiid].1 - self.utgpos[qiid].1;
            if bgn >= end {
                return false;
            }
            self.cnspos[self.tiid] = (bgn, end);
            self.piid = Some(qiid);
            return true;
        }

        self.cnspos[self.tiid] = (0, 0);
        false
    }

    /// Last resort: align the whole fragment against the whole
    /// frankenstein, then adopt the thickest intersection as parent.
    fn position_from_alignment(&mut self, erate: f64) -> bool {
        debug_assert!(self.piid.is_none());
        let seq = self.abacus.frag_seq(FragIdx(self.tiid as u32)).to_vec();

        let Some(olap) = self.aligner.optimal_overlap(
            &self.frankenstein,
            &seq,
            -10,
            erate,
            self.cfg.min_overlap,
        ) else {
            debug!("position_from_alignment: no overlap");
            return false;
        };

        let bgn = olap.begpos;
        let end = olap.endpos + self.frank_len();
        if bgn >= end {
            return false;
        }
        self.cnspos[self.tiid] = (bgn, end);

        let mut thickest = 0i32;
        for qiid in (0..self.layout.len()).rev() {
            if qiid == self.tiid || self.cnspos[qiid] == (0, 0) {
                continue;
            }
            if bgn < self.cnspos[qiid].1 && end > self.cnspos[qiid].0 {
                let ooo = end.min(self.cnspos[qiid].1) - bgn.max(self.cnspos[qiid].0);
                if ooo > thickest {
                    thickest = ooo;
                    self.piid = Some(qiid);
                }
            }
        }

        if thickest > 0 {
            return true;
        }
        self.cnspos[self.tiid] = (0, 0);
        self.piid = None;
        false
    }

    fn reject_alignment(&self, allow_bhang: bool, allow_ahang: bool, o: &Overlap, erate: f64) -> bool {
        if o.begpos < 0 && !allow_ahang {
            debug!("rejected: negative ahang {} not allowed", o.begpos);
            return true;
        }
        if o.endpos > 0 && !allow_bhang {
            debug!("rejected: positive bhang {} not allowed", o.endpos);
            return true;
        }
        if o.error_rate() > erate {
            debug!("rejected: error rate {:.4} > {:.4}", o.error_rate(), erate);
            return true;
        }
        if o.length < self.cfg.min_overlap {
            debug!("rejected: overlap {} too short", o.length);
            return true;
        }
        false
    }

    /// Attempt a bounded overlap between a frankenstein window and the
    /// fragment, widening the window or loosening the end trim when the
    /// overlap spills past what was allowed.
    fn align_fragment(&mut self, erate: f64) -> bool {
        debug_assert!(self.cnspos[self.tiid] != (0, 0));
        debug_assert!(self.piid.is_some());
        let piid = self.piid.unwrap_or(0);

        let (tb, te) = self.cnspos[self.tiid];
        let (pb, pe) = self.cnspos[piid];

        let mut bgn_extra = ((erate * (tb - pb).abs() as f64).ceil() as i32).max(10);
        let mut end_extra = ((erate * (te - pe).abs() as f64).ceil() as i32).max(10);

        let (cnsbgn, cnsend) = if tb < te { (tb, te) } else { (te, tb) };
        let mut end_trim =
            (cnsend - self.frank_len()) - (erate * (cnsend - cnsbgn) as f64).ceil() as i32;
        if end_trim < 20 {
            end_trim = 0;
        }

        loop {
            let frank_bgn = (tb - bgn_extra).max(0);
            let mut frank_end = self.frank_len();
            let allow_ahang = frank_bgn == 0;
            let mut allow_bhang = true;
            let mut try_again = false;

            if te + end_extra < frank_end {
                frank_end = te + end_extra;
                allow_bhang = false;
            }

            let blen = self.abacus.frag(FragIdx(self.tiid as u32)).length as i32;
            if end_trim >= blen || end_trim < 0 {
                warn!(
                    "excessive endTrim {} for fragment {} (len {})",
                    end_trim, self.layout[self.tiid].ident, blen
                );
                break;
            }
            if frank_bgn >= frank_end {
                break;
            }

            let aseq = self.frankenstein[frank_bgn as usize..frank_end as usize].to_vec();
            let bseq = self.abacus.frag_seq(FragIdx(self.tiid as u32))
                [..(blen - end_trim) as usize]
                .to_vec();

            let mut olap = self.aligner.optimal_overlap(
                &aseq,
                &bseq,
                -(bseq.len() as i32),
                erate + 0.02,
                self.cfg.min_overlap,
            );

            if let Some(o) = &olap {
                if o.begpos < 0 && frank_bgn > 0 {
                    bgn_extra += -o.begpos + 10;
                    try_again = true;
                    olap = None;
                }
            }
            if let Some(o) = &olap {
                if o.endpos > 0 && !allow_bhang {
                    end_extra += o.endpos + 10;
                    try_again = true;
                    olap = None;
                }
            }
            if let Some(o) = &olap {
                if o.endpos < 0 && end_trim > 0 {
                    end_trim -= -o.endpos + 10;
                    if end_trim < 20 {
                        end_trim = 0;
                    }
                    try_again = true;
                    olap = None;
                }
            }
            if let Some(o) = &olap {
                if self.reject_alignment(allow_bhang, allow_ahang, o, erate) {
                    olap = None;
                }
            }

            if let Some(o) = olap {
                self.trace_bgn = frank_bgn + o.begpos;
                self.trace = o
                    .trace
                    .iter()
                    .map(|&t| if t < 0 { t - frank_bgn } else { t })
                    .collect();
                debug!(
                    "fragment {} aligned at {} ({} diffs over {})",
                    self.layout[self.tiid].ident, self.trace_bgn, o.diffs, o.length
                );
                return true;
            }

            if !try_again {
                break;
            }
        }

        self.cnspos[self.tiid] = (0, 0);
        self.piid = None;
        false
    }

    /// Install the pending alignment into the abacus.
    fn apply_alignment(&mut self) -> Result<()> {
        let trace = std::mem::take(&mut self.trace);
        self.abacus.apply_alignment(
            FragIdx(self.tiid as u32),
            &trace,
            self.trace_bgn,
            &self.frank_bof,
        )
    }

    /// Rebuild frankenstein from the column store; optionally run the full
    /// refinement chain first. Placed fragments get fresh column
    /// intervals, and the just-placed fragment's layout parent and hangs
    /// are rewritten from its realized position.
    fn rebuild(&mut self, full: bool) {
        if full {
            refine_full(&mut self.abacus);
        }
        let (frank, bof) = self.abacus.refresh();
        self.frankenstein = frank;
        self.frank_bof = bof;

        for i in 0..=self.tiid.min(self.layout.len() - 1) {
            if self.cnspos[i] == (0, 0) {
                continue;
            }
            if let Some(iv) = self.abacus.frag_interval(FragIdx(i as u32)) {
                self.cnspos[i] = iv;
            }
        }

        if let Some(piid) = self.piid {
            let (tb, te) = self.cnspos[self.tiid];
            let (pb, pe) = self.cnspos[piid];
            let parent_ident = self.layout[piid].ident;
            let me = &mut self.layout[self.tiid];
            me.parent = parent_ident;
            me.ahang = tb - pb;
            me.bhang = te - pe;
            me.contained = if me.bhang > 0 || me.ahang < 0 {
                0
            } else {
                parent_ident
            };
        }
        self.piid = None;
    }

    /// Place the fragment at the current index: four strategies at four
    /// error tiers, with a full abacus rebuild before the third tier.
    /// Returns whether the fragment landed.
    fn align_next(&mut self) -> Result<bool> {
        let e0 = self.cfg.error_rate;
        let emax = self.cfg.max_error_rate;

        for tier in TIERS {
            let erate = match tier {
                Tier::Base => e0,
                Tier::Doubled => (2.0 * e0).min(emax),
                Tier::AfterRebuild => {
                    debug!("unitig {}: recompute full consensus", self.unitig_id);
                    self.rebuild(true);
                    e0
                }
                Tier::Quadrupled => (4.0 * e0).min(emax),
            };

            for strategy in STRATEGIES {
                let estimated = match strategy {
                    Strategy::Parent => self.position_from_parent(false),
                    Strategy::ContainedParent => self.position_from_parent(true),
                    Strategy::Layout => self.position_from_layout(),
                    Strategy::Alignment => self.position_from_alignment(erate),
                };
                if estimated && self.align_fragment(erate) {
                    self.apply_alignment()?;
                    self.rebuild(false);
                    self.failed[self.tiid] = false;
                    return Ok(true);
                }
                self.cnspos[self.tiid] = (0, 0);
                self.piid = None;
            }
        }

        warn!(
            "failed to align fragment {} in unitig {}",
            self.layout[self.tiid].ident, self.unitig_id
        );
        self.failed[self.tiid] = true;
        Ok(false)
    }

    /// Revert the mutable layout fields to the snapshot taken at entry.
    fn restore(&mut self) {
        self.layout = self.backup.clone();
    }

    /// Final refinement and extraction: consensus and quality strings,
    /// per-read column intervals, and the micro-heterozygosity score.
    fn generate_consensus(&mut self) -> UnitigResult {
        refine_full(&mut self.abacus);
        let (_, bof) = self.abacus.refresh();
        self.frank_bof = bof;

        let mut consensus = Vec::new();
        let mut quality = Vec::new();
        for &ci in &self.abacus.column_list.clone() {
            let call = self.abacus.column(ci).call;
            if call.is_ascii_lowercase() {
                // Gap-dominated column: not part of the final sequence.
                continue;
            }
            consensus.push(call);
            quality.push(self.abacus.column_quality(ci));
        }

        let mut placements = Vec::new();
        for (i, frag) in self.layout.iter().enumerate() {
            let fidx = FragIdx(i as u32);
            if let Some((bgn, end)) = self.abacus.frag_interval(fidx) {
                placements.push(ReadPlacement {
                    ident: frag.ident,
                    bgn,
                    end,
                    complement: self.abacus.frag(fidx).complement,
                });
            }
        }

        let rows = pack_rows(&self.abacus);
        let mh = microhet_prob(&rows);

        UnitigResult {
            id: self.unitig_id,
            success: true,
            consensus,
            quality,
            placements,
            microhet_prob: mh,
            failed: self.failed.clone(),
        }
    }

    /// Drive the whole unitig. A failed fragment fails the unitig: the
    /// layout snapshot is restored and no consensus is emitted.
    pub fn run(mut self) -> Result<UnitigResult> {
        let mut any_failed = false;

        while self.tiid + 1 < self.layout.len() {
            self.tiid += 1;
            if !self.align_next()? {
                if self.cfg.failure_is_fatal {
                    bail!(
                        "failed to align fragment {} in unitig {}",
                        self.layout[self.tiid].ident,
                        self.unitig_id
                    );
                }
                any_failed = true;
            }
        }

        if any_failed {
            warn!("unitig {} failed", self.unitig_id);
            self.restore();
            return Ok(UnitigResult {
                id: self.unitig_id,
                success: false,
                consensus: Vec::new(),
                quality: Vec::new(),
                placements: Vec::new(),
                microhet_prob: 1.0,
                failed: self.failed.clone(),
            });
        }

        Ok(self.generate_consensus())
    }
}

/// Convenience entry point: build and run the consensus for one unitig.
pub fn multi_align_unitig<A: OverlapAligner>(
    unitig: &UnitigLayout,
    reads: &ReadStore,
    aligner: &A,
    cfg: &GapstoneConfig,
) -> Result<UnitigResult> {
    UnitigConsensus::new(unitig, reads, aligner, cfg)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::DpAligner;

    fn read_layout(ident: u32, bgn: i32, end: i32) -> FragLayout {
        FragLayout {
            ident,
            kind: LayoutKind::Read,
            bgn,
            end,
            parent: 0,
            ahang: 0,
            bhang: 0,
            contained: 0,
        }
    }

    fn store_with(reads: &[(u32, &[u8])]) -> ReadStore {
        let mut store = ReadStore::new();
        for (ident, seq) in reads {
            store.insert(*ident, seq.to_vec(), vec![b'I'; seq.len()]);
        }
        store
    }

    #[test]
    fn test_duplicate_fragment_rejected() {
        let unitig = UnitigLayout {
            id: 1,
            frags: vec![read_layout(7, 0, 8), read_layout(7, 2, 10)],
        };
        let reads = store_with(&[(7, b"ACGTACGT")]);
        let aligner = DpAligner::new();
        let cfg = GapstoneConfig::default();
        assert!(UnitigConsensus::new(&unitig, &reads, &aligner, &cfg).is_err());
    }

    #[test]
    fn test_non_read_rejected() {
        let mut frag = read_layout(7, 0, 8);
        frag.kind = LayoutKind::Unitig;
        let unitig = UnitigLayout {
            id: 1,
            frags: vec![frag],
        };
        let reads = store_with(&[(7, b"ACGTACGT")]);
        let aligner = DpAligner::new();
        let cfg = GapstoneConfig::default();
        assert!(UnitigConsensus::new(&unitig, &reads, &aligner, &cfg).is_err());
    }

    #[test]
    fn test_single_fragment_consensus() {
        let unitig = UnitigLayout {
            id: 1,
            frags: vec![read_layout(7, 0, 8)],
        };
        let reads = store_with(&[(7, b"ACGTACGT")]);
        let aligner = DpAligner::new();
        let cfg = GapstoneConfig::default();
        let res = multi_align_unitig(&unitig, &reads, &aligner, &cfg).unwrap();
        assert!(res.success);
        assert_eq!(res.consensus, b"ACGTACGT".to_vec());
        assert_eq!(res.placements.len(), 1);
        assert_eq!((res.placements[0].bgn, res.placements[0].end), (0, 8));
    }
}
