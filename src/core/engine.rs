use crate::core::adapters;
use crate::core::dedupe::{self, ScalableBloom};
use crate::core::io::{self, Format, Input, InputKind};
use crate::core::record::Record;
use crate::core::sample::{self, CountHint, PREFIX_SAMPLE_LIMIT};
use crate::core::stats::{self, KmerBias};
use crate::core::tally::{CycleTally, GcHist, LengthHist, MismatchTally, gc_percent};
use anyhow::{Context, Result, bail};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use thiserror::Error;

/// Fatal conditions detected before the main loop starts.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("the input appears empty; check the file for data")]
    EmptyInput,
    #[error("duplicate tracking was requested but the duplicate-set capability is unavailable")]
    MissingCapability,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoleFilter {
    All,
    AlignedOnly,
    UnalignedOnly,
}

/// Knobs that shape the per-read tallying itself.
#[derive(Clone, Debug)]
pub struct TallyOptions {
    /// Leftmost cycle, 1-based inclusive.
    pub leftlimit: usize,
    /// Rightmost cycle, 1-based inclusive; negative means "to end".
    pub rightlimit: i64,
    pub kmer: usize,
    /// Background probabilities of A,T,C,G,N in that order.
    pub base_probs: [f64; 5],
    pub filter: RoleFilter,
}

impl Default for TallyOptions {
    fn default() -> Self {
        Self {
            leftlimit: 1,
            rightlimit: -1,
            kmer: 5,
            base_probs: [0.25, 0.25, 0.25, 0.25, 0.1],
            filter: RoleFilter::All,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub input: Input,
    pub sample_name: String,
    pub nreads: u64,
    pub binsize: Option<usize>,
    pub opts: TallyOptions,
    pub count_duplicates: bool,
    pub quiet: bool,
    /// Decompressor pool size for gzip input; the engine itself stays
    /// single-threaded.
    pub threads: usize,
}

/// Everything downstream consumers need: the tidy report, the advisory
/// warnings, and the figure writer all read from here.
#[derive(Clone, Debug)]
pub struct Summary {
    pub sample_name: String,
    /// Stride-weighted count of logical reads, including window-skipped
    /// and role-filtered ones.
    pub total_reads: u64,
    pub read_len: LengthHist,
    pub positions: Vec<usize>,
    pub quantiles: Vec<[f64; 5]>,
    pub median_qual: f64,
    pub qual_scores: BTreeMap<usize, BTreeMap<u8, u64>>,
    pub nuc: CycleTally<u8>,
    pub bases: Vec<u8>,
    pub pos_gc: Vec<f64>,
    pub gc_hist: GcHist,
    pub kmers: CycleTally<Vec<u8>>,
    pub observed_expected: Vec<(String, f64)>,
    pub biased_kmers: Vec<KmerBias>,
    pub adapter_kmers: BTreeSet<String>,
    pub mismatch: MismatchTally,
    pub aligned_input: bool,
    pub duplicate_rate: Option<f64>,
}

pub fn run(cfg: &RunConfig) -> Result<Summary> {
    let hint = resolve_count_hint(cfg)?;
    if hint.value() == Some(0) {
        bail!(EngineError::EmptyInput);
    }
    let stride = match cfg.binsize {
        Some(n) => n.max(1),
        None => match hint.value() {
            Some(est) => sample::stride(est, cfg.nreads),
            None => 1,
        },
    };
    if !cfg.quiet {
        eprintln!("Bin size (-s) set to {stride}.");
    }

    let dedupe = if cfg.count_duplicates {
        if !dedupe::available() {
            bail!(EngineError::MissingCapability);
        }
        Some(ScalableBloom::new())
    } else {
        None
    };

    let source = io::open_source(&cfg.input, cfg.threads)
        .with_context(|| "failed to open input for the metrics pass")?;
    let stream = io::stream_records(source, stride);
    let agg = aggregate(
        stream,
        &cfg.opts,
        stride as u64,
        hint.value(),
        dedupe,
        cfg.quiet,
    )?;
    Ok(summarize(
        agg,
        &cfg.opts,
        cfg.sample_name.clone(),
        cfg.count_duplicates,
    ))
}

/// Work out how many records the input holds, as cheaply as the input
/// allows: streamed input is unknowable, gzip is counted exactly, and
/// plain files are extrapolated from a bounded prefix sample.
fn resolve_count_hint(cfg: &RunConfig) -> Result<CountHint> {
    let Some(path) = cfg.input.path.as_ref() else {
        if !cfg.quiet {
            eprintln!(
                "Reading from <stdin>, bin size (-s) set to {}.",
                cfg.binsize.unwrap_or(1)
            );
        }
        return Ok(CountHint::Unknown);
    };
    match (cfg.input.kind, cfg.input.format) {
        (InputKind::Gzip, Format::Fastq) => {
            if let Some(binsize) = cfg.binsize {
                if !cfg.quiet {
                    eprintln!("Reading from gzipped file, bin size (-s) set to {binsize}.");
                }
                return Ok(CountHint::Unknown);
            }
            if !cfg.quiet {
                eprintln!("Gzipped file detected. Reading file to determine bin size (-s).");
            }
            let records = io::count_gzip_records(path, cfg.threads)?;
            if !cfg.quiet {
                eprintln!("{records} reads in input file.");
            }
            Ok(CountHint::Exact(records))
        }
        (InputKind::Gzip, Format::Sam) => {
            if !cfg.quiet {
                eprintln!("Record count unavailable for gzipped SAM; supply --binsize to sample.");
            }
            Ok(CountHint::Unknown)
        }
        (InputKind::Plain, _) => {
            let mut source = io::open_source(&cfg.input, cfg.threads)
                .with_context(|| "failed to open input for estimation")?;
            let prefix = io::sample_prefix(source.as_mut(), PREFIX_SAMPLE_LIMIT)?;
            let total_bytes = cfg.input.byte_size().unwrap_or(0);
            let est = sample::estimate_from_prefix(&prefix, total_bytes);
            if !cfg.quiet && est.records > 0 {
                eprintln!(
                    "At {:.0} bytes per read of {:.0} length we estimate {} reads in input file.",
                    est.mean_record_bytes, est.mean_read_len, est.records
                );
            }
            Ok(CountHint::Estimated(est.records))
        }
    }
}

/// Outcome of one retained read, replacing the original's
/// exception-driven skip paths.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ReadOutcome {
    Tallied,
    /// Tallied, but alignment metadata was malformed so no mismatch
    /// observations were recorded.
    TalliedNoMismatch,
    /// The cycle window missed the read entirely; it still counts
    /// toward the processed total.
    EmptyWindow,
}

#[derive(Debug, Default)]
pub(crate) struct Aggregates {
    nuc: CycleTally<u8>,
    qual: CycleTally<u8>,
    kmers: CycleTally<Vec<u8>>,
    mismatch: MismatchTally,
    read_len: LengthHist,
    gc_hist: GcHist,
    duplicates: u64,
    total_reads: u64,
    aligned_input: bool,
}

struct Progress {
    est: Option<u64>,
    percent: u64,
    started: Instant,
    quiet: bool,
}

impl Progress {
    fn new(est: Option<u64>, quiet: bool) -> Self {
        Self {
            est,
            percent: 10,
            started: Instant::now(),
            quiet,
        }
    }

    fn tick(&mut self, processed: u64) {
        let Some(est) = self.est.filter(|&e| e > 0) else {
            return;
        };
        while self.percent <= 100 && processed * 100 >= est * self.percent {
            if !self.quiet {
                let secs = self.started.elapsed().as_secs();
                eprintln!(
                    "Approximately {}% complete at read {} in {:02}:{:02}:{:02}",
                    self.percent,
                    processed,
                    secs / 3600,
                    (secs % 3600) / 60,
                    secs % 60
                );
            }
            self.percent += 10;
        }
    }
}

/// Single pass over the subsampled stream. Strictly single-threaded; the
/// tallies are owned here for the duration of the pass.
pub(crate) fn aggregate(
    stream: impl Iterator<Item = Result<Record>>,
    opts: &TallyOptions,
    stride_weight: u64,
    est: Option<u64>,
    mut dedupe: Option<ScalableBloom>,
    quiet: bool,
) -> Result<Aggregates> {
    let mut agg = Aggregates::default();
    let mut progress = Progress::new(est, quiet);
    for record in stream {
        let record = record?;
        if record.is_aligned() {
            agg.aligned_input = true;
        }
        let keep = match opts.filter {
            RoleFilter::All => true,
            // Role filters only distinguish aligned records.
            RoleFilter::AlignedOnly => !record.is_aligned() || record.mapped(),
            RoleFilter::UnalignedOnly => !record.is_aligned() || !record.mapped(),
        };
        if keep {
            process_read(&mut agg, &record, opts, dedupe.as_mut());
        }
        // Filtered and window-skipped reads still advance the logical
        // read counter by the stride weight.
        agg.total_reads += stride_weight;
        progress.tick(agg.total_reads);
    }
    Ok(agg)
}

/// Inclusive 1-based window to a half-open byte range, clamped to the
/// read. An empty range means the window missed the read.
fn window_bounds(len: usize, leftlimit: usize, rightlimit: i64) -> (usize, usize) {
    let start = leftlimit.saturating_sub(1).min(len);
    let end = if rightlimit < 0 {
        len
    } else {
        (rightlimit as usize).min(len)
    };
    (start, end.max(start))
}

fn process_read(
    agg: &mut Aggregates,
    record: &Record,
    opts: &TallyOptions,
    dedupe: Option<&mut ScalableBloom>,
) -> ReadOutcome {
    // Reverse-strand reads go back to sequencing order before any
    // cycle-indexed tally sees them.
    let reverse = record.reverse();
    let mut seq = record.seq.clone();
    let mut qual = record.qual.clone();
    if reverse {
        seq.reverse();
        qual.reverse();
    }

    let (start, end) = window_bounds(seq.len(), opts.leftlimit, opts.rightlimit);
    if start >= end {
        return ReadOutcome::EmptyWindow;
    }
    let seq = &seq[start..end];
    let qual_end = end.min(qual.len());
    let qual = &qual[start.min(qual_end)..qual_end];

    agg.gc_hist.add(gc_percent(seq));

    if let Some(filter) = dedupe {
        if filter.contains(seq) {
            agg.duplicates += 1;
        } else {
            filter.insert(seq);
        }
    }

    let left = opts.leftlimit;
    for (i, (&s, &q)) in seq.iter().zip(qual.iter()).enumerate() {
        agg.nuc.add(left + i, s);
        agg.qual.add(left + i, q);
    }
    agg.read_len.add(seq.len());

    if opts.kmer > 0 && seq.len() >= opts.kmer {
        for (i, window) in seq.windows(opts.kmer).enumerate() {
            agg.kmers.add(left + i, window.to_vec());
        }
    }

    if record.mapped() {
        match record.reference() {
            Ok(mut reference) => {
                if reverse {
                    reference.reverse();
                }
                let reference = &reference[start..end];
                for (i, (&s, &r)) in seq.iter().zip(reference.iter()).enumerate() {
                    if s != r {
                        // Unknown reference bases drop just this one
                        // observation.
                        agg.mismatch.add(r, left + i, s);
                    }
                }
            }
            Err(_) => return ReadOutcome::TalliedNoMismatch,
        }
    }
    ReadOutcome::Tallied
}

pub(crate) fn summarize(
    agg: Aggregates,
    opts: &TallyOptions,
    sample_name: String,
    duplicates_enabled: bool,
) -> Summary {
    let qual_scores = stats::score_histograms(&agg.qual);
    let positions: Vec<usize> = qual_scores.keys().copied().collect();
    let quantiles = stats::cycle_quantiles(&qual_scores);
    let median_qual = stats::combined_median(&qual_scores);
    let pos_gc = stats::position_gc(&agg.nuc, &positions);

    let mut bases: BTreeSet<u8> = BTreeSet::new();
    for (_, symbols) in agg.nuc.iter() {
        bases.extend(symbols.keys().copied());
    }

    let kmer_summary = stats::kmer_bias(&agg.kmers, &agg.read_len, &opts.base_probs);
    let duplicate_rate = duplicates_enabled.then(|| {
        if agg.total_reads == 0 {
            0.0
        } else {
            agg.duplicates as f64 / agg.total_reads as f64
        }
    });

    Summary {
        sample_name,
        total_reads: agg.total_reads,
        read_len: agg.read_len,
        positions,
        quantiles,
        median_qual,
        qual_scores,
        nuc: agg.nuc,
        bases: bases.into_iter().collect(),
        pos_gc,
        gc_hist: agg.gc_hist,
        kmers: agg.kmers,
        observed_expected: kmer_summary.observed_expected,
        biased_kmers: kmer_summary.biased,
        adapter_kmers: adapters::adapter_kmers(opts.kmer),
        mismatch: agg.mismatch,
        aligned_input: agg.aligned_input,
        duplicate_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::AlignInfo;

    fn fastq(seq: &str, qual: &str) -> Record {
        Record::unaligned(seq.as_bytes().to_vec(), qual.as_bytes().to_vec())
    }

    fn ok_stream(records: Vec<Record>) -> impl Iterator<Item = Result<Record>> {
        records.into_iter().map(Ok)
    }

    fn aggregate_quiet(
        records: Vec<Record>,
        opts: &TallyOptions,
        dedupe: Option<ScalableBloom>,
    ) -> Aggregates {
        aggregate(ok_stream(records), opts, 1, None, dedupe, true).unwrap()
    }

    #[test]
    fn four_identical_reads_tally_per_cycle() {
        let opts = TallyOptions::default();
        let records = (0..4).map(|_| fastq("ACGT", "IIII")).collect();
        let agg = aggregate_quiet(records, &opts, None);

        assert_eq!(agg.total_reads, 4);
        assert_eq!(agg.nuc.count(1, &b'A'), 4);
        assert_eq!(agg.nuc.count(2, &b'C'), 4);
        assert_eq!(agg.nuc.count(3, &b'G'), 4);
        assert_eq!(agg.nuc.count(4, &b'T'), 4);
        assert_eq!(agg.nuc.total_at(1), 4);
        let lens: Vec<(usize, u64)> = agg.read_len.iter().collect();
        assert_eq!(lens, vec![(4, 4)]);
        assert_eq!(agg.gc_hist.count(50), 4);
    }

    #[test]
    fn nucleotide_and_quality_totals_match_per_cycle() {
        let opts = TallyOptions::default();
        let records = vec![fastq("ACGT", "IIII"), fastq("AC", "JJ"), fastq("A", "#")];
        let agg = aggregate_quiet(records, &opts, None);
        for pos in agg.nuc.positions() {
            assert_eq!(agg.nuc.total_at(pos), agg.qual.total_at(pos));
        }
        // Cycle coverage: 3 reads reach cycle 1, 2 reach cycle 2.
        assert_eq!(agg.nuc.total_at(1), 3);
        assert_eq!(agg.nuc.total_at(2), 2);
        assert_eq!(agg.nuc.total_at(4), 1);
        assert_eq!(agg.gc_hist.total(), 3);
    }

    #[test]
    fn window_outside_read_counts_but_never_tallies() {
        let opts = TallyOptions {
            leftlimit: 5,
            ..TallyOptions::default()
        };
        let agg = aggregate_quiet(vec![fastq("ACG", "III")], &opts, None);
        assert_eq!(agg.total_reads, 1);
        assert!(agg.nuc.is_empty());
        assert!(agg.qual.is_empty());
        assert_eq!(agg.gc_hist.total(), 0);
        assert_eq!(agg.read_len.total_reads(), 0);

        let mut agg = Aggregates::default();
        let outcome = process_read(&mut agg, &fastq("ACG", "III"), &opts, None);
        assert_eq!(outcome, ReadOutcome::EmptyWindow);
    }

    #[test]
    fn window_trims_and_rekeys_cycles() {
        let opts = TallyOptions {
            leftlimit: 2,
            rightlimit: 3,
            kmer: 2,
            ..TallyOptions::default()
        };
        let agg = aggregate_quiet(vec![fastq("ACGT", "IJKL")], &opts, None);
        // Cycles keep their absolute positions after trimming.
        assert_eq!(agg.nuc.count(2, &b'C'), 1);
        assert_eq!(agg.nuc.count(3, &b'G'), 1);
        assert_eq!(agg.nuc.count(4, &b'T'), 0);
        assert_eq!(agg.qual.count(2, &b'J'), 1);
        assert_eq!(agg.kmers.count(2, &b"CG".to_vec()), 1);
        let lens: Vec<(usize, u64)> = agg.read_len.iter().collect();
        assert_eq!(lens, vec![(2, 1)]);
    }

    #[test]
    fn stride_weight_scales_the_processed_total() {
        let opts = TallyOptions::default();
        let agg = aggregate(
            ok_stream(vec![fastq("ACGT", "IIII"); 3]),
            &opts,
            5,
            None,
            None,
            true,
        )
        .unwrap();
        assert_eq!(agg.total_reads, 15);
        assert_eq!(agg.nuc.count(1, &b'A'), 3);
    }

    #[cfg(not(feature = "no-dedupe"))]
    #[test]
    fn duplicates_count_repeat_sequences() {
        let opts = TallyOptions::default();
        let records = vec![
            fastq("ACGTACGT", "IIIIIIII"),
            fastq("ACGTACGT", "IIIIIIII"),
            fastq("TTTTACGT", "IIIIIIII"),
            fastq("ACGTACGT", "IIIIIIII"),
        ];
        let agg = aggregate_quiet(records, &opts, Some(ScalableBloom::new()));
        assert_eq!(agg.duplicates, 2);
        assert_eq!(agg.total_reads, 4);
    }

    fn sam(seq: &str, flag: u16, cigar: &str, md: Option<&str>) -> Record {
        Record::aligned(
            seq.as_bytes().to_vec(),
            vec![b'I'; seq.len()],
            AlignInfo {
                mapped: flag & 0x4 == 0,
                reverse: flag & 0x10 != 0,
                cigar: cigar.to_string(),
                md: md.map(|s| s.to_string()),
            },
        )
    }

    #[test]
    fn mapped_reads_tally_mismatches_by_reference_base() {
        let opts = TallyOptions::default();
        // MD 1T2: reference ATGT against read ACGT, mismatch at cycle 2.
        let agg = aggregate_quiet(vec![sam("ACGT", 0, "4M", Some("1T2"))], &opts, None);
        let t = agg
            .mismatch
            .partitions()
            .find(|(b, _)| *b == b'T')
            .unwrap()
            .1;
        assert_eq!(t.count(2, &b'C'), 1);
        assert!(agg.aligned_input);
    }

    #[test]
    fn malformed_md_keeps_base_tallies_and_drops_mismatches() {
        let opts = TallyOptions::default();
        let agg = aggregate_quiet(vec![sam("ACGT", 0, "4M", Some("99"))], &opts, None);
        assert_eq!(agg.nuc.count(1, &b'A'), 1);
        assert!(agg.mismatch.is_empty());
        assert_eq!(agg.total_reads, 1);

        let mut agg = Aggregates::default();
        let outcome = process_read(&mut agg, &sam("ACGT", 0, "4M", Some("99")), &opts, None);
        assert_eq!(outcome, ReadOutcome::TalliedNoMismatch);
        let outcome = process_read(&mut agg, &sam("ACGT", 0, "4M", Some("4")), &opts, None);
        assert_eq!(outcome, ReadOutcome::Tallied);
    }

    #[test]
    fn reverse_strand_reads_are_flipped_before_tallying() {
        let opts = TallyOptions::default();
        let agg = aggregate_quiet(vec![sam("ACGT", 16, "4M", Some("4"))], &opts, None);
        // Stored ACGT sequenced as TGCA.
        assert_eq!(agg.nuc.count(1, &b'T'), 1);
        assert_eq!(agg.nuc.count(4, &b'A'), 1);
        assert!(agg.mismatch.is_empty());
    }

    #[test]
    fn role_filters_skip_tallies_but_advance_the_counter() {
        let opts = TallyOptions {
            filter: RoleFilter::AlignedOnly,
            ..TallyOptions::default()
        };
        let records = vec![sam("ACGT", 4, "*", None), sam("ACGT", 0, "4M", Some("4"))];
        let agg = aggregate_quiet(records, &opts, None);
        assert_eq!(agg.total_reads, 2);
        assert_eq!(agg.nuc.total_at(1), 1);

        let opts = TallyOptions {
            filter: RoleFilter::UnalignedOnly,
            ..TallyOptions::default()
        };
        let records = vec![sam("ACGT", 4, "*", None), sam("ACGT", 0, "4M", Some("4"))];
        let agg = aggregate_quiet(records, &opts, None);
        assert_eq!(agg.total_reads, 2);
        assert_eq!(agg.nuc.total_at(1), 1);
    }

    #[test]
    fn summary_exposes_positions_quantiles_and_gc() {
        let opts = TallyOptions::default();
        let records = (0..4).map(|_| fastq("ACGT", "IIII")).collect();
        let agg = aggregate_quiet(records, &opts, None);
        let summary = summarize(agg, &opts, "sample".to_string(), false);

        assert_eq!(summary.positions, vec![1, 2, 3, 4]);
        assert_eq!(summary.quantiles.len(), 4);
        for row in &summary.quantiles {
            assert_eq!(*row, [40.0; 5]);
        }
        assert_eq!(summary.median_qual, 40.0);
        assert_eq!(summary.pos_gc, vec![0.0, 100.0, 100.0, 0.0]);
        assert_eq!(summary.gc_hist.count(50), 4);
        assert_eq!(summary.bases, vec![b'A', b'C', b'G', b'T']);
        assert!(summary.duplicate_rate.is_none());
        assert!(!summary.aligned_input);
    }

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("cycleqc-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn file_config(path: std::path::PathBuf) -> RunConfig {
        RunConfig {
            input: Input {
                path: Some(path),
                format: Format::Fastq,
                kind: InputKind::Plain,
            },
            sample_name: "sample".to_string(),
            nreads: 2_000_000,
            binsize: None,
            opts: TallyOptions::default(),
            count_duplicates: false,
            quiet: true,
            threads: 1,
        }
    }

    #[test]
    fn empty_input_is_fatal_before_the_loop() {
        let path = temp_file("empty.fastq", "");
        let err = run(&file_config(path.clone())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::EmptyInput)
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn run_covers_a_small_fastq_end_to_end() {
        let fastq = "@r1\nACGT\n+\nIIII\n".repeat(4);
        let path = temp_file("small.fastq", &fastq);
        let summary = run(&file_config(path.clone())).unwrap();
        assert_eq!(summary.total_reads, 4);
        assert_eq!(summary.positions, vec![1, 2, 3, 4]);
        assert_eq!(summary.gc_hist.count(50), 4);
        let _ = std::fs::remove_file(path);
    }

    #[cfg(feature = "no-dedupe")]
    #[test]
    fn missing_duplicate_capability_is_fatal() {
        let path = temp_file("cap.fastq", "@r1\nACGT\n+\nIIII\n");
        let mut cfg = file_config(path.clone());
        cfg.count_duplicates = true;
        let err = run(&cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::MissingCapability)
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn empty_window_reads_still_reach_the_summary_total() {
        let opts = TallyOptions {
            leftlimit: 9,
            ..TallyOptions::default()
        };
        let agg = aggregate_quiet(vec![fastq("ACGT", "IIII")], &opts, None);
        let summary = summarize(agg, &opts, "s".into(), false);
        assert_eq!(summary.total_reads, 1);
        assert!(summary.positions.is_empty());
        assert!(summary.quantiles.is_empty());
    }
}
