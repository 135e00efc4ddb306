/// The abacus: an editable column-major multiple alignment of the reads in
/// one unitig.
///
/// Beads (one read character in one column) and columns live in index-
/// addressed arenas that only grow; the column order is a doubly index-
/// linked list so a new column can be spliced between two others with a
/// four-index update. A bead chain threads each read through its columns.
/// Content mutates; arena entries are never removed while a unitig is
/// being aligned, though refinement may unlink a column from the chain.
use anyhow::{bail, Result};

use crate::store::{reverse_complement, BeadIdx, ColIdx, FragIdx, SeqStore};

#[derive(Debug, Clone)]
pub struct Bead {
    pub frag: FragIdx,
    pub base: u8,
    pub qual: u8,
    pub prev: Option<BeadIdx>,
    pub next: Option<BeadIdx>,
    pub column: Option<ColIdx>,
}

/// Per-column tallies over {A, C, G, T, N, -}.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseCounts([u16; 6]);

impl BaseCounts {
    fn slot(base: u8) -> usize {
        match base.to_ascii_uppercase() {
            b'A' => 0,
            b'C' => 1,
            b'G' => 2,
            b'T' => 3,
            b'-' => 5,
            _ => 4,
        }
    }

    pub fn inc(&mut self, base: u8) {
        self.0[Self::slot(base)] += 1;
    }

    pub fn dec(&mut self, base: u8) {
        let s = Self::slot(base);
        debug_assert!(self.0[s] > 0);
        self.0[s] -= 1;
    }

    pub fn get(&self, base: u8) -> u16 {
        self.0[Self::slot(base)]
    }

    pub fn clear(&mut self) {
        self.0 = [0; 6];
    }

    /// Majority call: the most frequent real base, lowercased when gaps
    /// strictly outnumber it. Never returns '-'.
    pub fn call(&self) -> u8 {
        let mut nn = 0u16;
        let mut call = b'N';
        for (i, base) in [b'A', b'C', b'G', b'T'].iter().enumerate() {
            if self.0[i] > nn {
                nn = self.0[i];
                call = *base;
            }
        }
        if self.0[5] > nn {
            call = call.to_ascii_lowercase();
        }
        debug_assert!(call != b'-');
        call
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub call: u8,
    pub counts: BaseCounts,
    pub beads: Vec<BeadIdx>,
    pub prev: Option<ColIdx>,
    pub next: Option<ColIdx>,
    /// Position in the refreshed column list; -1 until refreshed.
    pub ma_index: i32,
}

impl Column {
    fn new() -> Self {
        Column {
            call: b'N',
            counts: BaseCounts::default(),
            beads: Vec::new(),
            prev: None,
            next: None,
            ma_index: -1,
        }
    }

    pub fn depth(&self) -> usize {
        self.beads.len()
    }
}

#[derive(Debug, Clone)]
pub struct Fragment {
    pub ident: u32,
    pub length: u32,
    pub complement: bool,
    pub deleted: bool,
    pub first_bead: Option<BeadIdx>,
    pub last_bead: Option<BeadIdx>,
    seq_off: u32,
}

/// One unitig's multi-alignment state: the bead, column and fragment
/// arenas plus the head of the column chain.
#[derive(Debug, Default)]
pub struct Abacus {
    pub beads: Vec<Bead>,
    pub columns: Vec<Column>,
    pub frags: Vec<Fragment>,
    pub seqs: SeqStore,
    pub first_col: Option<ColIdx>,
    /// Refreshed, ordered column ids.
    pub column_list: Vec<ColIdx>,
}

impl Abacus {
    pub fn new() -> Self {
        Abacus::default()
    }

    /// Install a read. The stored sequence is unitig-oriented: reverse
    /// complemented up front when the layout places the read backwards.
    pub fn add_fragment(&mut self, ident: u32, seq: &[u8], qual: &[u8], complement: bool) -> FragIdx {
        let (seq, qual): (Vec<u8>, Vec<u8>) = if complement {
            (reverse_complement(seq), qual.iter().rev().copied().collect())
        } else {
            (seq.to_vec(), qual.to_vec())
        };
        let off = self.seqs.append(&seq, &qual);
        let fi = FragIdx(self.frags.len() as u32);
        self.frags.push(Fragment {
            ident,
            length: seq.len() as u32,
            complement,
            deleted: false,
            first_bead: None,
            last_bead: None,
            seq_off: off,
        });
        fi
    }

    pub fn frag(&self, fi: FragIdx) -> &Fragment {
        &self.frags[fi.idx()]
    }

    pub fn bead(&self, bi: BeadIdx) -> &Bead {
        &self.beads[bi.idx()]
    }

    pub fn column(&self, ci: ColIdx) -> &Column {
        &self.columns[ci.idx()]
    }

    pub fn frag_seq(&self, fi: FragIdx) -> &[u8] {
        let f = &self.frags[fi.idx()];
        self.seqs.seq(f.seq_off, f.length)
    }

    pub fn frag_qual(&self, fi: FragIdx) -> &[u8] {
        let f = &self.frags[fi.idx()];
        self.seqs.qual(f.seq_off, f.length)
    }

    fn new_bead(&mut self, fi: FragIdx, base: u8, qual: u8) -> BeadIdx {
        let bi = BeadIdx(self.beads.len() as u32);
        self.beads.push(Bead {
            frag: fi,
            base,
            qual,
            prev: None,
            next: None,
            column: None,
        });
        bi
    }

    /// Splice a fresh column into the chain after `prev`; `None` makes it
    /// the new head.
    pub fn insert_column_after(&mut self, prev: Option<ColIdx>) -> ColIdx {
        let ci = ColIdx(self.columns.len() as u32);
        self.columns.push(Column::new());

        match prev {
            None => {
                let old_head = self.first_col;
                self.columns[ci.idx()].next = old_head;
                if let Some(h) = old_head {
                    self.columns[h.idx()].prev = Some(ci);
                }
                self.first_col = Some(ci);
            }
            Some(p) => {
                let after = self.columns[p.idx()].next;
                self.columns[ci.idx()].prev = Some(p);
                self.columns[ci.idx()].next = after;
                self.columns[p.idx()].next = Some(ci);
                if let Some(a) = after {
                    self.columns[a.idx()].prev = Some(ci);
                }
            }
        }
        ci
    }

    /// Unlink a column from the chain. Its arena entry and beads remain,
    /// but it no longer has a consensus position.
    pub fn unlink_column(&mut self, ci: ColIdx) {
        let (prev, next) = {
            let c = &self.columns[ci.idx()];
            (c.prev, c.next)
        };
        match prev {
            Some(p) => self.columns[p.idx()].next = next,
            None => self.first_col = next,
        }
        if let Some(n) = next {
            self.columns[n.idx()].prev = prev;
        }
        self.columns[ci.idx()].prev = None;
        self.columns[ci.idx()].next = None;
        self.columns[ci.idx()].ma_index = -1;
    }

    /// Drop a bead into a column and thread it onto its fragment's chain.
    fn place(&mut self, fi: FragIdx, ci: ColIdx, base: u8, qual: u8) -> BeadIdx {
        let bi = self.new_bead(fi, base, qual);
        self.beads[bi.idx()].column = Some(ci);
        self.columns[ci.idx()].beads.push(bi);
        self.columns[ci.idx()].counts.inc(base);

        let frag = &mut self.frags[fi.idx()];
        match frag.last_bead {
            None => {
                frag.first_bead = Some(bi);
                frag.last_bead = Some(bi);
            }
            Some(last) => {
                frag.last_bead = Some(bi);
                self.beads[last.idx()].next = Some(bi);
                self.beads[bi.idx()].prev = Some(last);
            }
        }
        bi
    }

    /// Seed the alignment with the first fragment: one new column per base.
    pub fn seed_with_fragment(&mut self, fi: FragIdx) {
        let seq = self.frag_seq(fi).to_vec();
        let qual = self.frag_qual(fi).to_vec();
        let mut last: Option<ColIdx> = None;
        for (b, q) in seq.iter().zip(qual.iter()) {
            let ci = self.insert_column_after(last);
            self.place(fi, ci, *b, *q);
            last = Some(ci);
        }
    }

    /// Column holding frankenstein position `pos`.
    fn col_at(&self, frank_bof: &[BeadIdx], pos: i32) -> Result<ColIdx> {
        let Some(&bi) = frank_bof.get(pos as usize) else {
            bail!("frankenstein position {pos} out of range");
        };
        match self.beads[bi.idx()].column {
            Some(ci) => Ok(ci),
            None => bail!("bead {} has no column", bi.0),
        }
    }

    /// Weave an aligned fragment into the abacus.
    ///
    /// `trace` and `trace_bgn` are in whole-frankenstein coordinates
    /// (callers rebase slice-relative overlaps first). A negative
    /// `trace_bgn` prepends new columns; fragment bases beyond the last
    /// frankenstein column append new ones.
    pub fn apply_alignment(
        &mut self,
        fi: FragIdx,
        trace: &[i32],
        trace_bgn: i32,
        frank_bof: &[BeadIdx],
    ) -> Result<()> {
        let bseq = self.frag_seq(fi).to_vec();
        let bqual = self.frag_qual(fi).to_vec();
        let blen = bseq.len();
        let frank_len = frank_bof.len() as i32;

        let mut apos = trace_bgn;
        let mut bpos: usize = 0;
        let mut last_col: Option<ColIdx> = None;

        // Fragment hangs left of the whole consensus: fresh columns first.
        while apos < 0 && bpos < blen {
            let ci = self.insert_column_after(last_col);
            self.place(fi, ci, bseq[bpos], bqual[bpos]);
            last_col = Some(ci);
            apos += 1;
            bpos += 1;
        }

        // A gap bead scores the lesser of its flanking base qualities.
        let gap_qual = |bpos: usize| -> u8 {
            let left = if bpos > 0 { bqual[bpos - 1] } else { bqual[0] };
            let right = *bqual.get(bpos).unwrap_or(&bqual[blen - 1]);
            left.min(right)
        };

        for &t in trace {
            if t < 0 {
                // New column before frankenstein position -t-1, seeded with
                // the fragment's extra base.
                let stop = -t - 1;
                while apos < stop && bpos < blen {
                    let ci = self.col_at(frank_bof, apos)?;
                    self.place(fi, ci, bseq[bpos], bqual[bpos]);
                    last_col = Some(ci);
                    apos += 1;
                    bpos += 1;
                }
                if bpos >= blen {
                    break;
                }
                let anchor = match last_col {
                    Some(c) => Some(c),
                    None if apos > 0 => Some(self.col_at(frank_bof, apos - 1)?),
                    None => None,
                };
                let ci = self.insert_column_after(anchor);
                self.place(fi, ci, bseq[bpos], bqual[bpos]);
                last_col = Some(ci);
                bpos += 1;
            } else {
                // Gap bead in the fragment at frankenstein position apos.
                let stop_b = (t - 1) as usize;
                while bpos < stop_b && apos < frank_len {
                    let ci = self.col_at(frank_bof, apos)?;
                    self.place(fi, ci, bseq[bpos], bqual[bpos]);
                    last_col = Some(ci);
                    apos += 1;
                    bpos += 1;
                }
                let ci = self.col_at(frank_bof, apos)?;
                self.place(fi, ci, b'-', gap_qual(bpos));
                last_col = Some(ci);
                apos += 1;
            }
        }

        // Aligned tail.
        while bpos < blen && apos < frank_len {
            let ci = self.col_at(frank_bof, apos)?;
            self.place(fi, ci, bseq[bpos], bqual[bpos]);
            last_col = Some(ci);
            apos += 1;
            bpos += 1;
        }

        // Positive b-hang: extend the consensus rightwards.
        while bpos < blen {
            let ci = self.insert_column_after(last_col);
            self.place(fi, ci, bseq[bpos], bqual[bpos]);
            last_col = Some(ci);
            bpos += 1;
        }

        Ok(())
    }

    /// Recompute every column call from its beads and rebuild the
    /// frankenstein buffer: the concatenated calls plus, per position, the
    /// bead driving that column.
    pub fn refresh(&mut self) -> (Vec<u8>, Vec<BeadIdx>) {
        let mut frank = Vec::with_capacity(self.column_list.len().max(64));
        let mut bof = Vec::with_capacity(self.column_list.len().max(64));
        self.column_list.clear();

        let mut index = 0i32;
        let mut cur = self.first_col;
        while let Some(ci) = cur {
            let mut counts = BaseCounts::default();
            for &bi in &self.columns[ci.idx()].beads {
                counts.inc(self.beads[bi.idx()].base);
            }
            let call = counts.call();

            let col = &mut self.columns[ci.idx()];
            col.counts = counts;
            col.call = call;
            col.ma_index = index;

            frank.push(call);
            bof.push(col.beads[0]);
            self.column_list.push(ci);

            index += 1;
            cur = col.next;
        }
        (frank, bof)
    }

    /// The fragment's refreshed column interval, half-open. Beads parked
    /// in retired columns are skipped from either end.
    pub fn frag_interval(&self, fi: FragIdx) -> Option<(i32, i32)> {
        let f = &self.frags[fi.idx()];

        let mut cur = f.first_bead;
        let bgn = loop {
            let bi = cur?;
            let mi = self.columns[self.beads[bi.idx()].column?.idx()].ma_index;
            if mi >= 0 {
                break mi;
            }
            cur = self.beads[bi.idx()].next;
        };

        let mut cur = f.last_bead;
        let end = loop {
            let bi = cur?;
            let mi = self.columns[self.beads[bi.idx()].column?.idx()].ma_index;
            if mi >= 0 {
                break mi + 1;
            }
            cur = self.beads[bi.idx()].prev;
        };

        Some((bgn, end))
    }

    /// The fragment's bases in chain order, gaps included.
    pub fn frag_row(&self, fi: FragIdx) -> Vec<u8> {
        let mut row = Vec::new();
        let mut cur = self.frags[fi.idx()].first_bead;
        while let Some(bi) = cur {
            row.push(self.beads[bi.idx()].base);
            cur = self.beads[bi.idx()].next;
        }
        row
    }

    /// Consensus quality for a column: the best quality among beads that
    /// agree with the call, or among all base beads if none agree.
    pub fn column_quality(&self, ci: ColIdx) -> u8 {
        let col = &self.columns[ci.idx()];
        let call = col.call.to_ascii_uppercase();
        let mut best_match = 0u8;
        let mut best_any = 0u8;
        for &bi in &col.beads {
            let b = &self.beads[bi.idx()];
            if b.base == b'-' {
                continue;
            }
            best_any = best_any.max(b.qual);
            if b.base.to_ascii_uppercase() == call {
                best_match = best_match.max(b.qual);
            }
        }
        if best_match > 0 {
            best_match
        } else {
            best_any
        }
    }

    /// Number of placed, live fragments.
    pub fn num_frags(&self) -> usize {
        self.frags.len()
    }
}
