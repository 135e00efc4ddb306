/// Phase orchestration: one rocks pass and one (or two) stones passes
/// over the scaffold graph, each scanning gaps, selecting candidates,
/// vetting them, and committing the survivors.
use anyhow::Result;
use log::info;

use crate::align::OverlapAligner;
use crate::config::GapstoneConfig;
use crate::fill::{kill_duplicates, scan_gaps};
use crate::graph::{ContigTag, ScaffoldGraph};
use crate::insert::{insert_fill, InsertStats};
use crate::joins::{check_joins, file_joins, JoinBuffer};
use crate::rocks::{restore_best_rock, select_rocks, GapFillCtx};
use crate::stones::{confirm_stones, select_stones};

/// Place rocks: strong mate-link candidates, plus any scaffold joins
/// their evidence implies.
pub fn rocks_pass<A, F>(
    graph: &mut ScaffoldGraph,
    aligner: &A,
    cfg: &GapstoneConfig,
    checkpoint: &mut F,
) -> Result<InsertStats>
where
    A: OverlapAligner,
    F: FnMut(u64, &ScaffoldGraph) -> Result<()>,
{
    let mut fill = scan_gaps(graph, cfg.max_mate_distance);
    let mut ctx = GapFillCtx::new();
    let mut joins = JoinBuffer::new();

    let filed = select_rocks(graph, &mut fill, cfg, &mut joins, &mut ctx);
    info!("rocks: {} candidates filed", filed);

    check_joins(graph, &mut joins);
    let joined = file_joins(&mut fill, &joins);
    if joined > 0 {
        info!("rocks: {} scaffold joins filed", joined);
    }

    // Gaps whose placements all washed out get one aligner-backed rescue.
    let mut restored = 0;
    for sf in &mut fill.scaffolds {
        for gap in &mut sf.gaps {
            if restore_best_rock(graph, gap, aligner, cfg) {
                restored += 1;
            }
        }
    }
    if restored > 0 {
        info!("rocks: {} best-rock restorations", restored);
    }

    let killed = kill_duplicates(&mut fill);
    if killed > 0 {
        info!("rocks: {} duplicate placements dropped", killed);
    }

    insert_fill(graph, &mut fill, ContigTag::Rock, cfg, checkpoint)
}

/// Place stones: weaker candidates that must be threaded by an overlap
/// path before insertion. `partial` relaxes the span requirement for a
/// second pass.
pub fn stones_pass<A, F>(
    graph: &mut ScaffoldGraph,
    aligner: &A,
    cfg: &GapstoneConfig,
    partial: bool,
    checkpoint: &mut F,
) -> Result<InsertStats>
where
    A: OverlapAligner,
    F: FnMut(u64, &ScaffoldGraph) -> Result<()>,
{
    let mut pass_cfg = cfg.clone();
    pass_cfg.use_partial_paths = partial;

    let mut fill = scan_gaps(graph, pass_cfg.max_mate_distance);
    let mut ctx = GapFillCtx::new();

    let filed = select_stones(graph, &mut fill, &pass_cfg, &mut ctx);
    info!("stones: {} candidates filed", filed);

    let confirmed = confirm_stones(graph, &mut fill, aligner, &pass_cfg)?;
    info!("stones: {} path-confirmed", confirmed);

    let killed = kill_duplicates(&mut fill);
    if killed > 0 {
        info!("stones: {} duplicate placements dropped", killed);
    }

    insert_fill(graph, &mut fill, ContigTag::Stone, &pass_cfg, checkpoint)
}
