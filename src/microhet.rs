/// Micro-heterozygosity estimation for a finished unitig.
///
/// Reads are packed into display rows (first-fit by column interval), and
/// each deep column is tested for a secondary allele that sequencing error
/// alone is unlikely to produce. The combined tail probability is the
/// chance the observed disagreements are mere noise: low values suggest
/// the unitig collapses two diverged copies.
use crate::abacus::Abacus;
use crate::store::FragIdx;

/// Error rate assumed by the null model.
const SEQ_ERROR_RATE: f64 = 0.02;

/// Columns shallower than this carry no signal.
const MIN_TEST_DEPTH: usize = 4;

/// Pack fragments into rows: each row holds non-overlapping fragments in
/// column order, first fit. Returns one gapped character row per packed
/// row, space-padded to the alignment width.
pub fn pack_rows(ab: &Abacus) -> Vec<Vec<u8>> {
    let width = ab.column_list.len();
    let mut row_end: Vec<i32> = Vec::new();
    let mut rows: Vec<Vec<u8>> = Vec::new();

    for fi in 0..ab.num_frags() {
        let fidx = FragIdx(fi as u32);
        if ab.frag(fidx).deleted {
            continue;
        }
        let Some((bgn, end)) = ab.frag_interval(fidx) else {
            continue;
        };

        let mut slot = None;
        for (r, &e) in row_end.iter().enumerate() {
            if bgn >= e {
                slot = Some(r);
                break;
            }
        }
        let r = match slot {
            Some(r) => r,
            None => {
                row_end.push(0);
                rows.push(vec![b' '; width]);
                rows.len() - 1
            }
        };
        row_end[r] = end;

        let mut cur = ab.frag(fidx).first_bead;
        while let Some(bi) = cur {
            let bead = ab.bead(bi);
            if let Some(ci) = bead.column {
                let mi = ab.column(ci).ma_index;
                if mi >= 0 && (mi as usize) < width {
                    rows[r][mi as usize] = bead.base;
                }
            }
            cur = bead.next;
        }
    }
    rows
}

/// Probability that the column-wise disagreements in the packed rows are
/// explained by sequencing error alone. 1.0 means nothing suspicious.
pub fn microhet_prob(rows: &[Vec<u8>]) -> f64 {
    if rows.is_empty() {
        return 1.0;
    }
    let width = rows[0].len();
    let mut min_p = 1.0f64;

    for col in 0..width {
        let mut counts = [0usize; 4];
        for row in rows {
            match row[col].to_ascii_uppercase() {
                b'A' => counts[0] += 1,
                b'C' => counts[1] += 1,
                b'G' => counts[2] += 1,
                b'T' => counts[3] += 1,
                _ => {}
            }
        }
        let depth: usize = counts.iter().sum();
        if depth < MIN_TEST_DEPTH {
            continue;
        }
        counts.sort_unstable();
        let second = counts[2];
        if second < 2 {
            continue;
        }
        let p = binomial_tail(depth, second, SEQ_ERROR_RATE);
        min_p = min_p.min(p);
    }

    // Bonferroni-style correction over the number of columns tested keeps
    // long unitigs from looking heterozygous by chance.
    (min_p * width.max(1) as f64).min(1.0)
}

/// P(X >= k) for X ~ Binomial(n, p).
fn binomial_tail(n: usize, k: usize, p: f64) -> f64 {
    let mut tail = 0.0;
    for x in k..=n {
        tail += (ln_choose(n, x) + x as f64 * p.ln() + (n - x) as f64 * (1.0 - p).ln()).exp();
    }
    tail.min(1.0)
}

fn ln_choose(n: usize, k: usize) -> f64 {
    ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k)
}

fn ln_factorial(n: usize) -> f64 {
    (2..=n).map(|i| (i as f64).ln()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_columns_score_one() {
        let rows = vec![b"ACGTACGT".to_vec(); 6];
        assert_eq!(microhet_prob(&rows), 1.0);
    }

    #[test]
    fn test_split_column_scores_low() {
        // Five reads say A, five say C at the same position: far too many
        // for a 2% error process.
        let mut rows = vec![b"ACGTACGT".to_vec(); 5];
        rows.extend(vec![b"CCGTACGT".to_vec(); 5]);
        let p = microhet_prob(&rows);
        assert!(p < 0.01, "p = {p}");
    }

    #[test]
    fn test_single_disagreement_is_noise() {
        let mut rows = vec![b"ACGTACGT".to_vec(); 7];
        rows.push(b"CCGTACGT".to_vec());
        let p = microhet_prob(&rows);
        assert!(p > 0.05, "p = {p}");
    }

    #[test]
    fn test_binomial_tail_bounds() {
        assert!(binomial_tail(10, 0, 0.02) >= 1.0 - 1e-12);
        assert!(binomial_tail(10, 10, 0.02) < 1e-10);
    }
}
