//! Tidy text output: one `sample<TAB>metric<TAB>position<TAB>value` line
//! per observation, in an order downstream tooling depends on.

use crate::core::engine::Summary;
use anyhow::Result;
use std::io::Write;

const QUANTILE_LABELS: [&str; 5] = ["q05", "q25", "q50", "q75", "q95"];

pub fn write(summary: &Summary, w: &mut dyn Write) -> Result<()> {
    let name = &summary.sample_name;

    writeln!(w, "{name}\treads\tNone\t{}", summary.total_reads)?;

    for (len, count) in summary.read_len.iter() {
        writeln!(w, "{name}\tread_len\t{len}\t{count}")?;
    }

    for (i, &pos) in summary.positions.iter().enumerate() {
        for (label, value) in QUANTILE_LABELS.iter().zip(summary.quantiles[i].iter()) {
            writeln!(w, "{name}\t{label}\t{pos}\t{value}")?;
        }
    }

    for &base in &summary.bases {
        for &pos in &summary.positions {
            writeln!(
                w,
                "{name}\t{}\t{pos}\t{}",
                base as char,
                summary.nuc.count(pos, &base)
            )?;
        }
    }

    // Each GC value is paired with its own position; the positions list
    // and pos_gc are built in lockstep.
    for (&pos, gc) in summary.positions.iter().zip(summary.pos_gc.iter()) {
        writeln!(w, "{name}\tpos_gc\t{pos}\t{gc}")?;
    }

    for percent in 0..=100usize {
        writeln!(
            w,
            "{name}\tread_gc\t{percent}\t{}",
            summary.gc_hist.count(percent)
        )?;
    }

    for (kmer, ratio) in &summary.observed_expected {
        writeln!(w, "{name}\t{kmer}\tNone\t{ratio}")?;
    }

    if let Some(rate) = summary.duplicate_rate {
        writeln!(w, "{name}\tduplicate\tNone\t{rate}")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{TallyOptions, aggregate, summarize};
    use crate::core::record::Record;

    fn summary_of(records: Vec<Record>, opts: &TallyOptions) -> Summary {
        let agg = aggregate(records.into_iter().map(Ok), opts, 1, None, None, true).unwrap();
        summarize(agg, opts, "sample".to_string(), false)
    }

    fn fastq(seq: &str, qual: &str) -> Record {
        Record::unaligned(seq.as_bytes().to_vec(), qual.as_bytes().to_vec())
    }

    #[test]
    fn rows_come_out_in_the_contract_order() {
        let opts = TallyOptions::default();
        let summary = summary_of((0..4).map(|_| fastq("ACGT", "IIII")).collect(), &opts);
        let mut out = Vec::new();
        write(&summary, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("sample\treads\tNone\t4\n"));
        assert!(text.contains("sample\tread_len\t4\t4\n"));
        assert!(text.contains("sample\tq50\t1\t40\n"));
        assert!(text.contains("sample\tA\t1\t4\n"));
        assert!(text.contains("sample\tA\t2\t0\n"));
        assert!(text.contains("sample\tpos_gc\t2\t100\n"));
        assert!(text.contains("sample\tread_gc\t50\t4\n"));
        assert!(text.contains("sample\tread_gc\t0\t0\n"));

        let idx = |needle: &str| text.find(needle).unwrap();
        assert!(idx("\treads\t") < idx("\tread_len\t"));
        assert!(idx("\tread_len\t") < idx("\tq05\t"));
        assert!(idx("\tq95\t") < idx("\tA\t"));
        assert!(idx("\tT\t") < idx("\tpos_gc\t"));
        assert!(idx("\tpos_gc\t") < idx("\tread_gc\t"));
    }

    #[test]
    fn gc_histogram_covers_all_percentages() {
        let opts = TallyOptions::default();
        let summary = summary_of(vec![fastq("ACGT", "IIII")], &opts);
        let mut out = Vec::new();
        write(&summary, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let gc_rows = text.lines().filter(|l| l.contains("\tread_gc\t")).count();
        assert_eq!(gc_rows, 101);
    }

    #[test]
    fn kmer_ratios_sort_ascending_and_duplicates_append() {
        let opts = TallyOptions {
            kmer: 2,
            ..TallyOptions::default()
        };
        let records = vec![fastq("AAAC", "IIII"), fastq("AAAC", "IIII")];
        let agg = aggregate(records.into_iter().map(Ok), &opts, 1, None, None, true).unwrap();
        let mut summary = summarize(agg, &opts, "sample".to_string(), true);
        summary.duplicate_rate = Some(0.5);

        let mut out = Vec::new();
        write(&summary, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let ratios: Vec<f64> = summary
            .observed_expected
            .iter()
            .map(|(_, r)| *r)
            .collect();
        assert!(ratios.windows(2).all(|p| p[0] <= p[1]));
        assert!(text.ends_with("sample\tduplicate\tNone\t0.5\n"));
    }
}
