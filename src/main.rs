mod abacus;
mod align;
mod config;
mod consensus;
mod fill;
mod graph;
mod insert;
mod joins;
mod layout;
mod microhet;
mod path;
mod pipeline;
mod position;
mod refine;
mod rocks;
mod stones;
mod store;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;

use crate::align::DpAligner;
use crate::config::GapstoneConfig;
use crate::consensus::multi_align_unitig;
use crate::pipeline::{rocks_pass, stones_pass};

/// Gapstone - consensus and scaffold gap resolution for shotgun assembly
///
/// Takes a unitig layout (reads plus per-unitig read placements) and,
/// optionally, a scaffold graph. Computes a per-unitig consensus, then
/// fills scaffold gaps with rocks (mate-link evidence) and stones
/// (overlap-path confirmation), writing the updated graph back out.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Unitig layout file (reads + layouts)
    #[clap(value_name = "LAYOUT")]
    layout: String,

    /// Scaffold graph file; omit to run consensus only
    #[clap(long = "graph", value_name = "FILE")]
    graph: Option<String>,

    /// Consensus output file (default: stdout)
    #[clap(long = "output", short = 'o')]
    output: Option<String>,

    /// Updated scaffold graph output file
    #[clap(long = "graph-out", value_name = "FILE")]
    graph_out: Option<String>,

    // ============================================================================
    // Consensus options
    // ============================================================================
    /// Base error rate for consensus alignment (doubled, then quadrupled
    /// on retry)
    #[clap(long = "error-rate", default_value_t = 0.06, help_heading = "Consensus options")]
    error_rate: f64,

    /// Ceiling on the retry error rate
    #[clap(long = "max-error-rate", default_value_t = 0.40, help_heading = "Consensus options")]
    max_error_rate: f64,

    /// Minimum overlap length for placements and path edges
    #[clap(long = "min-overlap", default_value_t = 40, help_heading = "Consensus options")]
    min_overlap: i32,

    /// Halt on the first unalignable read instead of failing its unitig
    #[clap(long = "failure-is-fatal", help_heading = "Consensus options")]
    failure_is_fatal: bool,

    // ============================================================================
    // Gap filling options
    // ============================================================================
    /// Mate links required to accept a rock
    #[clap(long = "min-good-links", default_value_t = 2, help_heading = "Gap filling options")]
    min_good_links: u32,

    /// Cover-stat floor for rocks
    #[clap(long = "min-rock-cover-stat", default_value_t = 1.0, help_heading = "Gap filling options")]
    min_rock_cover_stat: f64,

    /// Cover-stat floor for stones
    #[clap(long = "min-stone-cover-stat", default_value_t = -10.0, help_heading = "Gap filling options")]
    min_stone_cover_stat: f64,

    /// Run a second stones pass accepting partial paths
    #[clap(long = "partial-stones", help_heading = "Gap filling options")]
    partial_stones: bool,

    /// Restrict stones to single-read contigs
    #[clap(long = "single-fragment-only", help_heading = "Gap filling options")]
    single_fragment_only: bool,

    /// Reject contained stone path edges
    #[clap(long = "skip-contained-stones", help_heading = "Gap filling options")]
    skip_contained_stones: bool,

    /// Sentinel gap half-width at scaffold ends
    #[clap(long = "max-mate-distance", default_value_t = 100000.0, help_heading = "Gap filling options")]
    max_mate_distance: f64,

    /// Insertions between graph checkpoints
    #[clap(long = "stones-per-checkpoint", default_value_t = 1000, help_heading = "Gap filling options")]
    stones_per_checkpoint: u64,

    /// Node-expansion budget for one overlap-path search
    #[clap(long = "max-calls", default_value_t = 100000, help_heading = "Gap filling options")]
    max_calls: u64,

    /// Best-ranked edges descended per node during a path search
    #[clap(long = "max-outdegree", default_value_t = 8, help_heading = "Gap filling options")]
    max_outdegree: usize,
}

impl Args {
    fn to_config(&self) -> GapstoneConfig {
        GapstoneConfig {
            error_rate: self.error_rate,
            max_error_rate: self.max_error_rate,
            min_overlap: self.min_overlap,
            min_good_links: self.min_good_links,
            good_links_if_bad: self.min_good_links.max(5),
            min_rock_cover_stat: self.min_rock_cover_stat,
            min_stone_cover_stat: self.min_stone_cover_stat,
            use_partial_paths: self.partial_stones,
            single_fragment_only: self.single_fragment_only,
            skip_contained_stones: self.skip_contained_stones,
            max_mate_distance: self.max_mate_distance,
            stones_per_checkpoint: self.stones_per_checkpoint,
            max_calls: self.max_calls,
            max_outdegree: self.max_outdegree,
            failure_is_fatal: self.failure_is_fatal,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let cfg = args.to_config();
    let aligner = DpAligner::new();
    let start = Instant::now();

    let (reads, unitigs) =
        layout::read_layout(&args.layout).context("reading unitig layout")?;
    eprintln!(
        "[gapstone] loaded {} reads, {} unitigs",
        reads.len(),
        unitigs.len()
    );

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {path}"))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };

    let mut ok = 0usize;
    let mut failed = 0usize;
    for unitig in &unitigs {
        let result = multi_align_unitig(unitig, &reads, &aligner, &cfg)
            .with_context(|| format!("unitig {}", unitig.id))?;
        if result.success {
            ok += 1;
        } else {
            failed += 1;
        }
        layout::write_consensus(&mut out, &result)?;
    }
    out.flush()?;
    eprintln!(
        "[gapstone] consensus: {} unitigs ok, {} failed ({:.1}s)",
        ok,
        failed,
        start.elapsed().as_secs_f64()
    );

    let Some(graph_path) = &args.graph else {
        return Ok(());
    };
    let mut graph = layout::read_graph(graph_path).context("reading scaffold graph")?;
    eprintln!(
        "[gapstone] graph: {} contigs, {} scaffolds, {} edges",
        graph.contigs.len(),
        graph.scaffolds.len(),
        graph.edges.len()
    );

    let ckpt_path = args
        .graph_out
        .clone()
        .unwrap_or_else(|| format!("{graph_path}.out"));
    let ckpt_target = format!("{ckpt_path}.ckpt");

    {
        let ckpt = &ckpt_target;
        let mut checkpoint = |n: u64, g: &graph::ScaffoldGraph| -> Result<()> {
            eprintln!("[gapstone] checkpoint at {n} insertions");
            layout::checkpoint_graph(ckpt, g)
        };

        let rocks = rocks_pass(&mut graph, &aligner, &cfg, &mut checkpoint)?;
        eprintln!(
            "[gapstone] rocks: {} inserted, {} scaffolds split",
            rocks.inserted, rocks.scaffolds_split
        );

        let stones = stones_pass(&mut graph, &aligner, &cfg, false, &mut checkpoint)?;
        eprintln!(
            "[gapstone] stones: {} inserted, {} scaffolds split",
            stones.inserted, stones.scaffolds_split
        );

        if args.partial_stones {
            let partial = stones_pass(&mut graph, &aligner, &cfg, true, &mut checkpoint)?;
            eprintln!(
                "[gapstone] partial stones: {} inserted, {} scaffolds split",
                partial.inserted, partial.scaffolds_split
            );
        }
    }

    insert::assert_fill_invariants(&graph)?;

    let mut gout = BufWriter::new(
        File::create(&ckpt_path).with_context(|| format!("creating {ckpt_path}"))?,
    );
    layout::write_graph(&mut gout, &graph)?;
    gout.flush()?;
    eprintln!(
        "[gapstone] wrote {} ({:.1}s total)",
        ckpt_path,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
