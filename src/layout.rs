/// Plain-text input and output formats.
///
/// A layout file carries reads and unitig layouts:
///
/// ```text
/// read   <ident> <sequence> <quality>
/// unitig <id>
/// frg    <ident> <bgn> <end> <parent> <ahang> <bhang> <contained>
/// ```
///
/// A graph file carries the scaffold graph:
///
/// ```text
/// contig   <id> <len> <aend_mean> <aend_var> <bend_mean> <bend_var> <cover_stat> <n_reads> <unique> [sequence]
/// scaffold <id> <cid>,<cid>,...
/// edge     <a> <b> <orient> <mean> <var> <contributing> <flags-hex>
/// ```
///
/// Lines starting with `#` and blank lines are ignored.
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::consensus::{FragLayout, LayoutKind, ReadStore, UnitigLayout, UnitigResult};
use crate::graph::{Contig, ContigId, Edge, EdgeOrient, ScaffoldGraph};
use crate::position::SeqPos;

/// Parse a layout file into reads and unitig layouts.
pub fn read_layout<P: AsRef<Path>>(path: P) -> Result<(ReadStore, Vec<UnitigLayout>)> {
    let file = File::open(&path)
        .with_context(|| format!("opening layout {}", path.as_ref().display()))?;
    let reader = BufReader::new(file);

    let mut reads = ReadStore::new();
    let mut unitigs: Vec<UnitigLayout> = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let err = |msg: &str| format!("layout line {}: {}", lineno + 1, msg);

        match fields[0] {
            "read" => {
                if fields.len() < 3 {
                    bail!(err("read needs ident and sequence"));
                }
                let ident: u32 = fields[1].parse().context(err("bad read ident"))?;
                let seq = fields[2].as_bytes().to_vec();
                let qual = if fields.len() > 3 {
                    fields[3].as_bytes().to_vec()
                } else {
                    vec![b'I'; seq.len()]
                };
                if qual.len() != seq.len() {
                    bail!(err("quality length differs from sequence"));
                }
                reads.insert(ident, seq, qual);
            }
            "unitig" => {
                if fields.len() < 2 {
                    bail!(err("unitig needs an id"));
                }
                let id: u32 = fields[1].parse().context(err("bad unitig id"))?;
                unitigs.push(UnitigLayout { id, frags: Vec::new() });
            }
            "frg" => {
                if fields.len() < 8 {
                    bail!(err("frg needs 7 fields"));
                }
                let Some(unitig) = unitigs.last_mut() else {
                    bail!(err("frg before any unitig"));
                };
                unitig.frags.push(FragLayout {
                    ident: fields[1].parse().context(err("bad frg ident"))?,
                    kind: LayoutKind::Read,
                    bgn: fields[2].parse().context(err("bad bgn"))?,
                    end: fields[3].parse().context(err("bad end"))?,
                    parent: fields[4].parse().context(err("bad parent"))?,
                    ahang: fields[5].parse().context(err("bad ahang"))?,
                    bhang: fields[6].parse().context(err("bad bhang"))?,
                    contained: fields[7].parse().context(err("bad contained"))?,
                });
            }
            other => bail!(err(&format!("unknown record '{other}'"))),
        }
    }
    Ok((reads, unitigs))
}

fn parse_orient(s: &str) -> Result<EdgeOrient> {
    Ok(match s {
        "AB_AB" => EdgeOrient::AbAb,
        "AB_BA" => EdgeOrient::AbBa,
        "BA_AB" => EdgeOrient::BaAb,
        "BA_BA" => EdgeOrient::BaBa,
        _ => bail!("unknown edge orientation '{s}'"),
    })
}

fn orient_str(o: EdgeOrient) -> &'static str {
    match o {
        EdgeOrient::AbAb => "AB_AB",
        EdgeOrient::AbBa => "AB_BA",
        EdgeOrient::BaAb => "BA_AB",
        EdgeOrient::BaBa => "BA_BA",
    }
}

/// Parse a scaffold graph file. Contig ids must be dense and in order.
pub fn read_graph<P: AsRef<Path>>(path: P) -> Result<ScaffoldGraph> {
    let file =
        File::open(&path).with_context(|| format!("opening graph {}", path.as_ref().display()))?;
    let reader = BufReader::new(file);
    let mut graph = ScaffoldGraph::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let err = |msg: &str| format!("graph line {}: {}", lineno + 1, msg);

        match fields[0] {
            "contig" => {
                if fields.len() < 10 {
                    bail!(err("contig needs 9 fields"));
                }
                let id: u32 = fields[1].parse().context(err("bad contig id"))?;
                if id as usize != graph.contigs.len() {
                    bail!(err("contig ids must be dense and ordered"));
                }
                let mut c = Contig::new(fields[2].parse().context(err("bad length"))?);
                c.a_end = SeqPos::new(
                    fields[3].parse().context(err("bad aend mean"))?,
                    fields[4].parse().context(err("bad aend var"))?,
                );
                c.b_end = SeqPos::new(
                    fields[5].parse().context(err("bad bend mean"))?,
                    fields[6].parse().context(err("bad bend var"))?,
                );
                c.cover_stat = fields[7].parse().context(err("bad cover stat"))?;
                c.n_reads = fields[8].parse().context(err("bad read count"))?;
                c.is_unique = fields[9] == "1";
                if let Some(seq) = fields.get(10) {
                    c.sequence = seq.as_bytes().to_vec();
                }
                graph.add_contig(c);
            }
            "scaffold" => {
                if fields.len() < 3 {
                    bail!(err("scaffold needs id and members"));
                }
                let sid = graph.add_scaffold();
                for part in fields[2].split(',') {
                    let cid: u32 = part.parse().context(err("bad member id"))?;
                    if cid as usize >= graph.contigs.len() {
                        bail!(err("scaffold member out of range"));
                    }
                    let cid = ContigId(cid);
                    graph.contig_mut(cid).scaffold = Some(sid);
                    graph.scaffolds[sid.idx()].contigs.push(cid);
                }
                graph.normalize_scaffold(sid);
            }
            "edge" => {
                if fields.len() < 8 {
                    bail!(err("edge needs 7 fields"));
                }
                let a = ContigId(fields[1].parse().context(err("bad edge a"))?);
                let b = ContigId(fields[2].parse().context(err("bad edge b"))?);
                let mut e = Edge::new(
                    a,
                    b,
                    parse_orient(fields[3]).context(err("bad orientation"))?,
                    SeqPos::new(
                        fields[4].parse().context(err("bad edge mean"))?,
                        fields[5].parse().context(err("bad edge var"))?,
                    ),
                );
                e.edges_contributing = fields[6].parse().context(err("bad contributing"))?;
                e.flags = u16::from_str_radix(fields[7].trim_start_matches("0x"), 16)
                    .context(err("bad flags"))?;
                graph.add_edge(e);
            }
            other => bail!(err(&format!("unknown record '{other}'"))),
        }
    }
    Ok(graph)
}

/// Write the scaffold graph in the same format `read_graph` accepts.
pub fn write_graph<W: Write>(out: &mut W, graph: &ScaffoldGraph) -> Result<()> {
    for (i, c) in graph.contigs.iter().enumerate() {
        write!(
            out,
            "contig {} {} {} {} {} {} {} {} {}",
            i,
            c.bp_len.mean,
            c.a_end.mean,
            c.a_end.variance,
            c.b_end.mean,
            c.b_end.variance,
            c.cover_stat,
            c.n_reads,
            if c.is_unique { 1 } else { 0 },
        )?;
        if !c.sequence.is_empty() {
            write!(out, " {}", String::from_utf8_lossy(&c.sequence))?;
        }
        writeln!(out)?;
    }
    for (i, s) in graph.scaffolds.iter().enumerate() {
        if s.deleted || s.contigs.is_empty() {
            continue;
        }
        let members: Vec<String> = s.contigs.iter().map(|c| c.0.to_string()).collect();
        writeln!(out, "scaffold {} {}", i, members.join(","))?;
    }
    for e in &graph.edges {
        writeln!(
            out,
            "edge {} {} {} {} {} {} 0x{:04x}",
            e.a.0,
            e.b.0,
            orient_str(e.orient),
            e.distance.mean,
            e.distance.variance,
            e.edges_contributing,
            e.flags,
        )?;
    }
    Ok(())
}

/// Write one unitig's consensus record: sequence, quality, placements and
/// the micro-heterozygosity estimate.
pub fn write_consensus<W: Write>(out: &mut W, result: &UnitigResult) -> Result<()> {
    writeln!(
        out,
        "unitig {} status={} microhet={:.4}",
        result.id,
        if result.success { "ok" } else { "failed" },
        result.microhet_prob,
    )?;
    if result.success {
        writeln!(out, "cns {}", String::from_utf8_lossy(&result.consensus))?;
        writeln!(out, "qlt {}", String::from_utf8_lossy(&result.quality))?;
        for p in &result.placements {
            writeln!(
                out,
                "pos {} {} {} {}",
                p.ident,
                p.bgn,
                p.end,
                if p.complement { '-' } else { '+' }
            )?;
        }
    }
    Ok(())
}

/// Atomic write of the graph to a path: write a temp file alongside, then
/// persist over the target.
pub fn checkpoint_graph<P: AsRef<Path>>(path: P, graph: &ScaffoldGraph) -> Result<()> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        write_graph(&mut w, graph)?;
        w.flush()?;
    }
    tmp.persist(path)
        .with_context(|| format!("persisting checkpoint to {}", path.display()))?;
    Ok(())
}
