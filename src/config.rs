/// Run-wide configuration for consensus and gap filling.

#[derive(Debug, Clone)]
pub struct GapstoneConfig {
    /// Base error tolerance for consensus alignment; retry tiers double
    /// and quadruple this.
    pub error_rate: f64,
    /// Ceiling the retry tiers clamp to.
    pub max_error_rate: f64,
    /// Minimum overlap length, for both consensus placement and path
    /// edges.
    pub min_overlap: i32,
    /// Mate links required to accept a rock placement.
    pub min_good_links: u32,
    /// With at least this many good links, one conflicting link is
    /// tolerated.
    pub good_links_if_bad: u32,
    /// Cover-stat floor for rocks.
    pub min_rock_cover_stat: f64,
    /// Cover-stat floor for stones.
    pub min_stone_cover_stat: f64,
    /// Accept stone paths that do not span their whole gap.
    pub use_partial_paths: bool,
    /// Restrict stones to single-read contigs.
    pub single_fragment_only: bool,
    /// Reject stone path edges with negative a-hang.
    pub skip_contained_stones: bool,
    /// Half-width of the sentinel gaps at scaffold ends.
    pub max_mate_distance: f64,
    /// Insertions between checkpoint requests.
    pub stones_per_checkpoint: u64,
    /// Node-expansion budget for one overlap-path search.
    pub max_calls: u64,
    /// Best-ranked edges descended per node during a path search.
    pub max_outdegree: usize,
    /// Halt instead of recording a failed fragment.
    pub failure_is_fatal: bool,
}

impl Default for GapstoneConfig {
    fn default() -> Self {
        GapstoneConfig {
            error_rate: 0.06,
            max_error_rate: 0.40,
            min_overlap: 40,
            min_good_links: 2,
            good_links_if_bad: 5,
            min_rock_cover_stat: 1.0,
            min_stone_cover_stat: -10.0,
            use_partial_paths: false,
            single_fragment_only: false,
            skip_contained_stones: false,
            max_mate_distance: 100_000.0,
            stones_per_checkpoint: 1000,
            max_calls: 100_000,
            max_outdegree: 8,
            failure_is_fatal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = GapstoneConfig::default();
        assert!(cfg.error_rate < cfg.max_error_rate);
        assert!(cfg.min_good_links <= cfg.good_links_if_bad);
        assert!(cfg.min_overlap > 0);
    }
}
