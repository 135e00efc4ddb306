/// Scaffold graph store: contigs, scaffolds, and mate-link edges.
///
/// Contigs and edges live in growable arenas addressed by index newtypes.
/// A scaffold is an ordered list of contig ids; each member carries its two
/// end positions in scaffold coordinates. The invariant maintained across
/// every mutation is that end variances never decrease left to right.
use anyhow::{bail, Result};
use log::warn;

use crate::position::{SeqPos, MIN_VARIANCE, VAR_EPSILON};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContigId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScaffoldId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

impl ContigId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl ScaffoldId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Which end of a contig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContigEnd {
    A,
    B,
}

impl ContigEnd {
    pub fn opposite(self) -> ContigEnd {
        match self {
            ContigEnd::A => ContigEnd::B,
            ContigEnd::B => ContigEnd::A,
        }
    }
}

/// Relative orientation of the two contigs joined by an edge, read as
/// (orientation of A, orientation of B) with A on the left.
///
/// `AbAb`: A forward, B forward (A's B-end meets B's A-end).
/// `AbBa`: A forward, B reversed (innie).
/// `BaAb`: A reversed, B forward (outie).
/// `BaBa`: both reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOrient {
    AbAb,
    AbBa,
    BaAb,
    BaBa,
}

impl EdgeOrient {
    /// The same physical relation viewed from the other contig. The two
    /// symmetric orientations are fixed points; normal and anti swap.
    pub fn flipped(self) -> EdgeOrient {
        match self {
            EdgeOrient::AbAb => EdgeOrient::BaBa,
            EdgeOrient::BaBa => EdgeOrient::AbAb,
            EdgeOrient::AbBa => EdgeOrient::AbBa,
            EdgeOrient::BaAb => EdgeOrient::BaAb,
        }
    }

    /// End of the near contig the edge leaves from.
    pub fn exit_end(self) -> ContigEnd {
        match self {
            EdgeOrient::AbAb | EdgeOrient::AbBa => ContigEnd::B,
            EdgeOrient::BaAb | EdgeOrient::BaBa => ContigEnd::A,
        }
    }

    /// End of the far contig the edge arrives at.
    pub fn entry_end(self) -> ContigEnd {
        match self {
            EdgeOrient::AbAb | EdgeOrient::BaAb => ContigEnd::A,
            EdgeOrient::AbBa | EdgeOrient::BaBa => ContigEnd::B,
        }
    }

    /// Does the far contig end up reversed relative to the near one?
    /// True for the two innie/outie orientations.
    pub fn far_reversed(self) -> bool {
        matches!(self, EdgeOrient::AbBa | EdgeOrient::BaAb)
    }
}

/// A mate-link or overlap edge between two contigs.
#[derive(Debug, Clone)]
pub struct Edge {
    pub a: ContigId,
    pub b: ContigId,
    pub distance: SeqPos,
    pub edges_contributing: u32,
    pub orient: EdgeOrient,
    pub flags: u16,
}

impl Edge {
    pub const FLAG_PROBABLY_BOGUS: u16 = 0x0001;
    pub const FLAG_SLOPPY: u16 = 0x0002;
    pub const FLAG_POSSIBLE_CHIMERA: u16 = 0x0004;
    pub const FLAG_HAS_CONTRIBUTING_OVERLAP: u16 = 0x0008;
    pub const FLAG_HAS_TANDEM_OVERLAP: u16 = 0x0010;
    pub const FLAG_HAS_REPEAT_OVERLAP: u16 = 0x0020;
    pub const FLAG_IS_OVERLAP: u16 = 0x0040;
    pub const FLAG_HAS_CONFIRMING_PATH: u16 = 0x0080;
    pub const FLAG_CONTAINMENT: u16 = 0x0100;

    pub fn new(a: ContigId, b: ContigId, orient: EdgeOrient, distance: SeqPos) -> Self {
        Edge {
            a,
            b,
            distance,
            edges_contributing: 0,
            orient,
            flags: 0,
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

    pub fn is_overlap_edge(&self) -> bool {
        self.has(Self::FLAG_IS_OVERLAP)
    }

    pub fn probably_bogus(&self) -> bool {
        self.has(Self::FLAG_PROBABLY_BOGUS)
    }

    pub fn sloppy(&self) -> bool {
        self.has(Self::FLAG_SLOPPY)
    }

    pub fn possible_chimera(&self) -> bool {
        self.has(Self::FLAG_POSSIBLE_CHIMERA)
    }

    pub fn other_end(&self, cid: ContigId) -> ContigId {
        if cid == self.a {
            self.b
        } else {
            self.a
        }
    }

    /// Orientation as seen from `cid`'s side.
    pub fn orient_wrt(&self, cid: ContigId) -> EdgeOrient {
        if cid == self.a {
            self.orient
        } else {
            self.orient.flipped()
        }
    }

    /// Mate pairs actually vouching for this edge: overlap-only support and
    /// chimera-suspect support are discounted.
    pub fn good_mates(&self) -> u32 {
        let mut n = self.edges_contributing;
        if self.has(Self::FLAG_HAS_CONTRIBUTING_OVERLAP) || self.is_overlap_edge() {
            n = n.saturating_sub(1);
        }
        if self.possible_chimera() {
            n = n.saturating_sub(1);
        }
        n
    }
}

/// Kind of insertion that placed a contig into its scaffold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContigTag {
    Placed,
    Rock,
    Stone,
    Walk,
}

#[derive(Debug, Clone)]
pub struct Contig {
    pub bp_len: SeqPos,
    pub scaffold: Option<ScaffoldId>,
    pub a_end: SeqPos,
    pub b_end: SeqPos,
    pub cover_stat: f64,
    pub n_reads: u32,
    pub is_unique: bool,
    pub tag: Option<ContigTag>,
    pub walk_maxed_out: bool,
    pub sequence: Vec<u8>,
    pub edges: Vec<EdgeId>,
}

impl Contig {
    pub fn new(bp_len: f64) -> Self {
        Contig {
            bp_len: SeqPos::new(bp_len, MIN_VARIANCE),
            scaffold: None,
            a_end: SeqPos::default(),
            b_end: SeqPos::default(),
            cover_stat: 0.0,
            n_reads: 1,
            is_unique: false,
            tag: None,
            walk_maxed_out: false,
            sequence: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Forward means the A end sits left of the B end in scaffold coords.
    pub fn is_forward(&self) -> bool {
        self.a_end.mean <= self.b_end.mean
    }

    pub fn min_offset(&self) -> SeqPos {
        if self.is_forward() {
            self.a_end
        } else {
            self.b_end
        }
    }

    pub fn max_offset(&self) -> SeqPos {
        if self.is_forward() {
            self.b_end
        } else {
            self.a_end
        }
    }

    pub fn min_variance(&self) -> f64 {
        self.a_end.variance.min(self.b_end.variance)
    }

    pub fn max_variance(&self) -> f64 {
        self.a_end.variance.max(self.b_end.variance)
    }

    pub fn center(&self) -> f64 {
        (self.a_end.mean + self.b_end.mean) / 2.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scaffold {
    pub contigs: Vec<ContigId>,
    pub deleted: bool,
}

#[derive(Debug, Default, Clone)]
pub struct ScaffoldGraph {
    pub contigs: Vec<Contig>,
    pub scaffolds: Vec<Scaffold>,
    pub edges: Vec<Edge>,
}

impl ScaffoldGraph {
    pub fn new() -> Self {
        ScaffoldGraph::default()
    }

    pub fn add_contig(&mut self, contig: Contig) -> ContigId {
        let id = ContigId(self.contigs.len() as u32);
        self.contigs.push(contig);
        id
    }

    pub fn add_edge(&mut self, edge: Edge) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        let (a, b) = (edge.a, edge.b);
        self.edges.push(edge);
        self.contigs[a.idx()].edges.push(id);
        if b != a {
            self.contigs[b.idx()].edges.push(id);
        }
        id
    }

    pub fn add_scaffold(&mut self) -> ScaffoldId {
        let id = ScaffoldId(self.scaffolds.len() as u32);
        self.scaffolds.push(Scaffold::default());
        id
    }

    pub fn contig(&self, cid: ContigId) -> &Contig {
        &self.contigs[cid.idx()]
    }

    pub fn contig_mut(&mut self, cid: ContigId) -> &mut Contig {
        &mut self.contigs[cid.idx()]
    }

    pub fn edge(&self, eid: EdgeId) -> &Edge {
        &self.edges[eid.idx()]
    }

    pub fn edge_mut(&mut self, eid: EdgeId) -> &mut Edge {
        &mut self.edges[eid.idx()]
    }

    pub fn scaffold(&self, sid: ScaffoldId) -> &Scaffold {
        &self.scaffolds[sid.idx()]
    }

    /// Edges incident to `cid`, as (id, edge) pairs.
    pub fn edges_of(&self, cid: ContigId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.contigs[cid.idx()]
            .edges
            .iter()
            .map(move |&eid| (eid, &self.edges[eid.idx()]))
    }

    /// A trusted edge is mate-supported and not suspect. The trusted
    /// subgraph defines scaffold connectivity for join vetting.
    pub fn is_trusted(&self, edge: &Edge) -> bool {
        !edge.probably_bogus() && !edge.sloppy() && edge.edges_contributing >= 2
    }

    /// Gap between two adjacent contigs of one scaffold: the distance from
    /// the left contig's max offset to the right contig's min offset.
    ///
    /// A negative gap variance means the caller already violated the
    /// monotonic-variance invariant, which is unrecoverable here.
    pub fn gap_length(&self, left: ContigId, right: ContigId) -> Result<SeqPos> {
        let l = self.contig(left);
        let r = self.contig(right);

        if l.min_offset().mean > r.min_offset().mean {
            warn!(
                "contigs {} and {} are out of order (scaffold {:?})",
                left.0, right.0, l.scaffold
            );
        }

        let lmax = l.max_offset();
        let rmin = r.min_offset();
        let gap = rmin - lmax;

        if gap.variance < 0.0 {
            bail!(
                "negative gap variance {:.3} between contigs {} and {}: variance invariant violated",
                gap.variance,
                left.0,
                right.0
            );
        }
        Ok(gap)
    }

    /// Keep a scaffold's contig list sorted by leftmost offset.
    pub fn normalize_scaffold(&mut self, sid: ScaffoldId) {
        let mut members = std::mem::take(&mut self.scaffolds[sid.idx()].contigs);
        members.sort_by(|&x, &y| {
            self.contig(x)
                .min_offset()
                .mean
                .partial_cmp(&self.contig(y).min_offset().mean)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.scaffolds[sid.idx()].contigs = members;
    }

    /// Walk a scaffold left to right and repair any variance inversion by
    /// shifting every contig from the dip onward up past the running
    /// maximum. Means are untouched.
    pub fn force_increasing_variances(&mut self, sid: ScaffoldId) {
        let members = self.scaffolds[sid.idx()].contigs.clone();
        let mut prev_max = 0.0f64;
        let mut carry = 0.0f64;

        for cid in members {
            let c = self.contig_mut(cid);
            c.a_end.variance += carry;
            c.b_end.variance += carry;

            let min_v = c.min_variance();
            if min_v < prev_max {
                let bump = prev_max - min_v + VAR_EPSILON;
                c.a_end.variance += bump;
                c.b_end.variance += bump;
                carry += bump;
            }
            prev_max = prev_max.max(self.contig(cid).max_variance());
        }

        debug_assert!(self.variances_monotonic(sid));
    }

    /// Check the invariant: every contig's min end variance is at least the
    /// previous contig's max end variance, up to epsilon.
    pub fn variances_monotonic(&self, sid: ScaffoldId) -> bool {
        let members = &self.scaffolds[sid.idx()].contigs;
        let mut prev_max = f64::NEG_INFINITY;
        for &cid in members {
            let c = self.contig(cid);
            if c.min_variance() < prev_max - VAR_EPSILON {
                return false;
            }
            prev_max = prev_max.max(c.max_variance());
        }
        true
    }

    /// Insert a contig into a scaffold at the given end positions.
    pub fn insert_contig(
        &mut self,
        sid: ScaffoldId,
        cid: ContigId,
        a_end: SeqPos,
        b_end: SeqPos,
    ) {
        {
            let c = self.contig_mut(cid);
            c.scaffold = Some(sid);
            c.a_end = a_end.clamped();
            c.b_end = b_end.clamped();
        }
        self.scaffolds[sid.idx()].contigs.push(cid);
        self.normalize_scaffold(sid);
    }

    /// Remove a contig from whatever scaffold holds it. An emptied
    /// scaffold is marked deleted.
    pub fn remove_contig(&mut self, cid: ContigId) {
        let Some(sid) = self.contig(cid).scaffold else {
            return;
        };
        let scaff = &mut self.scaffolds[sid.idx()];
        scaff.contigs.retain(|&c| c != cid);
        if scaff.contigs.is_empty() {
            scaff.deleted = true;
        }
        self.contig_mut(cid).scaffold = None;
    }

    /// Clone a contig for a multi-copy placement. The clone starts
    /// unplaced and carries no edges.
    pub fn clone_contig(&mut self, cid: ContigId) -> ContigId {
        let src = self.contig(cid);
        let copy = Contig {
            bp_len: src.bp_len,
            scaffold: None,
            a_end: SeqPos::default(),
            b_end: SeqPos::default(),
            cover_stat: src.cover_stat,
            n_reads: src.n_reads,
            is_unique: false,
            tag: src.tag,
            walk_maxed_out: false,
            sequence: src.sequence.clone(),
            edges: Vec::new(),
        };
        self.add_contig(copy)
    }

    /// Connected components of a scaffold under edges passing `admit`.
    pub fn scaffold_components<F>(&self, sid: ScaffoldId, admit: F) -> Vec<Vec<ContigId>>
    where
        F: Fn(&Edge) -> bool,
    {
        let members = &self.scaffolds[sid.idx()].contigs;
        let in_scaffold: std::collections::HashSet<ContigId> = members.iter().copied().collect();
        let mut seen: std::collections::HashSet<ContigId> = std::collections::HashSet::new();
        let mut components = Vec::new();

        for &start in members {
            if seen.contains(&start) {
                continue;
            }
            let mut comp = Vec::new();
            let mut stack = vec![start];
            seen.insert(start);
            while let Some(cid) = stack.pop() {
                comp.push(cid);
                for (_, e) in self.edges_of(cid) {
                    if !admit(e) {
                        continue;
                    }
                    let other = e.other_end(cid);
                    if in_scaffold.contains(&other) && seen.insert(other) {
                        stack.push(other);
                    }
                }
            }
            comp.sort_by(|&x, &y| {
                self.contig(x)
                    .min_offset()
                    .mean
                    .partial_cmp(&self.contig(y).min_offset().mean)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            components.push(comp);
        }
        components
    }

    /// Split a scaffold into its connected components under `admit`.
    pub fn split_scaffold<F>(&mut self, sid: ScaffoldId, admit: F) -> Vec<ScaffoldId>
    where
        F: Fn(&Edge) -> bool,
    {
        let components = self.scaffold_components(sid, admit);
        self.split_scaffold_components(sid, components)
    }

    /// Split a scaffold into the given member partitions. The first
    /// component keeps the scaffold id; the rest are rebased to start near
    /// zero and get fresh ids. Returns the new ids.
    pub fn split_scaffold_components(
        &mut self,
        sid: ScaffoldId,
        components: Vec<Vec<ContigId>>,
    ) -> Vec<ScaffoldId> {
        if components.len() <= 1 {
            return Vec::new();
        }

        warn!(
            "scaffold {} split into {} components",
            sid.0,
            components.len()
        );

        let mut new_ids = Vec::new();
        self.scaffolds[sid.idx()].contigs = components[0].clone();

        for comp in components.into_iter().skip(1) {
            let nid = self.add_scaffold();
            let base = comp
                .iter()
                .map(|&c| self.contig(c).min_offset())
                .fold(SeqPos::new(f64::INFINITY, f64::INFINITY), |acc, p| {
                    if p.mean < acc.mean {
                        p
                    } else {
                        acc
                    }
                });
            for &cid in &comp {
                let c = self.contig_mut(cid);
                c.scaffold = Some(nid);
                c.a_end = (c.a_end - base).clamped();
                c.b_end = (c.b_end - base).clamped();
            }
            self.scaffolds[nid.idx()].contigs = comp;
            self.force_increasing_variances(nid);
            new_ids.push(nid);
        }
        self.force_increasing_variances(sid);
        new_ids
    }
}
