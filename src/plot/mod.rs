//! Figure writer: turns the engine's summary structures into a zip
//! archive of SVG figures. Nothing here feeds back into the metrics.

mod svg;

use crate::core::engine::Summary;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use svg::Series;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const QUANTILE_LABELS: [&str; 5] = ["q05", "q25", "q50", "q75", "q95"];
const MAX_KMER_SERIES: usize = 9;

/// Write `<output_base>.zip` containing the figure set. Returns the
/// archive path.
pub fn write_figures(summary: &Summary, output_base: &Path) -> Result<PathBuf> {
    let zip_path = PathBuf::from(format!("{}.zip", output_base.display()));
    let file = File::create(&zip_path)
        .with_context(|| format!("failed to create {}", zip_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, content) in figures(summary) {
        zip.start_file(name, options)?;
        zip.write_all(content.as_bytes())?;
    }
    zip.finish().with_context(|| "failed to finalize figure archive")?;
    Ok(zip_path)
}

fn figures(summary: &Summary) -> Vec<(String, String)> {
    let mut out = vec![
        ("qualplot.svg".to_string(), qualplot(summary)),
        ("qualdist.svg".to_string(), qualdist(summary)),
        ("nucplot.svg".to_string(), nucplot(summary)),
        ("depthplot.svg".to_string(), depthplot(summary)),
        ("gcplot.svg".to_string(), gcplot(summary)),
        ("gcdist.svg".to_string(), gcdist(summary)),
        ("kmerplot.svg".to_string(), kmerplot(summary)),
        ("adaptermerplot.svg".to_string(), adaptermerplot(summary)),
    ];
    if summary.aligned_input && !summary.mismatch.is_empty() {
        out.push(("mismatchplot.svg".to_string(), mismatchplot(summary)));
    }
    out
}

fn qualplot(summary: &Summary) -> String {
    let series: Vec<Series> = QUANTILE_LABELS
        .iter()
        .enumerate()
        .map(|(qi, label)| Series {
            label: label.to_string(),
            points: summary
                .positions
                .iter()
                .zip(summary.quantiles.iter())
                .map(|(&pos, row)| (pos as f64, row[qi]))
                .collect(),
        })
        .collect();
    svg::line_chart("Quality score quantiles by cycle", "Cycle", "Phred score", &series)
}

fn qualdist(summary: &Summary) -> String {
    let mut combined: BTreeMap<u8, u64> = BTreeMap::new();
    for hist in summary.qual_scores.values() {
        for (&score, &count) in hist {
            *combined.entry(score).or_insert(0) += count;
        }
    }
    let bars: Vec<(f64, f64)> = combined
        .iter()
        .map(|(&s, &c)| (s as f64, c as f64))
        .collect();
    svg::bar_chart("Quality score distribution", "Phred score", "Count", &bars)
}

fn nucplot(summary: &Summary) -> String {
    let series: Vec<Series> = summary
        .bases
        .iter()
        .map(|&base| Series {
            label: (base as char).to_string(),
            points: summary
                .positions
                .iter()
                .map(|&pos| {
                    let total = summary.nuc.total_at(pos);
                    let pct = if total == 0 {
                        0.0
                    } else {
                        summary.nuc.count(pos, &base) as f64 / total as f64 * 100.0
                    };
                    (pos as f64, pct)
                })
                .collect(),
        })
        .collect();
    svg::line_chart("Base composition by cycle", "Cycle", "%", &series)
}

fn depthplot(summary: &Summary) -> String {
    let bars: Vec<(f64, f64)> = summary
        .read_len
        .iter()
        .map(|(l, c)| (l as f64, c as f64))
        .collect();
    svg::bar_chart("Read length distribution", "Length", "Count", &bars)
}

fn gcplot(summary: &Summary) -> String {
    let series = [Series {
        label: "GC%".to_string(),
        points: summary
            .positions
            .iter()
            .zip(summary.pos_gc.iter())
            .map(|(&pos, &gc)| (pos as f64, gc))
            .collect(),
    }];
    svg::line_chart("GC content by cycle", "Cycle", "GC%", &series)
}

fn gcdist(summary: &Summary) -> String {
    let bars: Vec<(f64, f64)> = (0..=100)
        .map(|pct| (pct as f64, summary.gc_hist.count(pct) as f64))
        .collect();
    svg::bar_chart("Read GC content distribution", "GC%", "Count", &bars)
}

/// Positional profile of the most frequent kmers.
fn kmerplot(summary: &Summary) -> String {
    let series = kmer_series(summary, |_| true);
    svg::line_chart("Kmer frequency by cycle", "Cycle", "Count", &series)
}

/// Same profile restricted to kmers from the adapter library.
fn adaptermerplot(summary: &Summary) -> String {
    let series = kmer_series(summary, |kmer| summary.adapter_kmers.contains(kmer));
    svg::line_chart("Adapter kmer frequency by cycle", "Cycle", "Count", &series)
}

fn kmer_series(summary: &Summary, keep: impl Fn(&str) -> bool) -> Vec<Series> {
    let mut totals: BTreeMap<&Vec<u8>, u64> = BTreeMap::new();
    for (_, symbols) in summary.kmers.iter() {
        for (kmer, &count) in symbols {
            *totals.entry(kmer).or_insert(0) += count;
        }
    }
    let mut ranked: Vec<(&Vec<u8>, u64)> = totals
        .into_iter()
        .filter(|(kmer, _)| keep(&String::from_utf8_lossy(kmer)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(MAX_KMER_SERIES);

    ranked
        .into_iter()
        .map(|(kmer, _)| Series {
            label: String::from_utf8_lossy(kmer).into_owned(),
            points: summary
                .positions
                .iter()
                .map(|&pos| (pos as f64, summary.kmers.count(pos, kmer) as f64))
                .collect(),
        })
        .collect()
}

fn mismatchplot(summary: &Summary) -> String {
    let series: Vec<Series> = summary
        .mismatch
        .partitions()
        .map(|(base, tally)| Series {
            label: format!("ref {}", base as char),
            points: summary
                .positions
                .iter()
                .map(|&pos| (pos as f64, tally.total_at(pos) as f64))
                .collect(),
        })
        .collect();
    svg::line_chart("Mismatches by cycle", "Cycle", "Count", &series)
}
