use crate::cli::args::{Cli, TypeArg};
use crate::core::engine::{self, RoleFilter, RunConfig, TallyOptions};
use crate::core::io::{self, Format, Input, InputKind};
use crate::plot;
use crate::report;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

pub fn entry() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(args: Cli) -> Result<()> {
    let started = Instant::now();

    if args.kmer < 2 || args.kmer > 7 {
        bail!("--kmer must be between 2 and 7");
    }
    if args.leftlimit < 1 {
        bail!("--leftlimit must be >= 1");
    }
    if args.nreads == 0 {
        bail!("--nreads must be >= 1");
    }
    if args.threads == 0 {
        bail!("--threads must be >= 1");
    }
    let base_probs = parse_base_probs(&args.base_probs)?;

    let input = resolve_input(&args)?;
    let sample_name = match &args.name {
        Some(name) => name.clone(),
        None => match &input.path {
            Some(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
                .context("failed to determine sample name from input file")?,
            None => "stdin".to_string(),
        },
    };

    let filter = if args.aligned_only {
        RoleFilter::AlignedOnly
    } else if args.unaligned_only {
        RoleFilter::UnalignedOnly
    } else {
        RoleFilter::All
    };

    let config = RunConfig {
        input,
        sample_name,
        nreads: args.nreads,
        binsize: args.binsize,
        opts: TallyOptions {
            leftlimit: args.leftlimit,
            rightlimit: args.rightlimit,
            kmer: args.kmer,
            base_probs,
            filter,
        },
        count_duplicates: args.count_duplicates,
        quiet: args.quiet,
        threads: args.threads,
    };

    let summary = engine::run(&config)?;

    let mut writer = open_text_output(&args.text)?;
    report::tidy::write(&summary, writer.as_mut())
        .with_context(|| "failed to write tidy output")?;
    writer.flush()?;

    if !args.no_figures
        && let Err(e) = plot::write_figures(&summary, &args.output)
    {
        // Figure output is independent of the metrics contract.
        eprintln!("FigureWarning: failed to write figure archive: {e:#}");
    }

    if !args.quiet {
        let secs = started.elapsed().as_secs();
        eprintln!(
            "There were {} reads in the file. Analysis finished in {:02}:{:02}:{:02}.",
            summary.total_reads,
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        );
        for bad in &summary.biased_kmers {
            eprintln!(
                "KmerWarning: kmer {} has a non-uniform profile (slope = {}, p = {}).",
                bad.kmer, bad.slope, bad.p_value
            );
        }
        if summary.median_qual < args.median_qual as f64 {
            eprintln!(
                "QualityWarning: median base quality score is {}.",
                summary.median_qual
            );
        }
    }

    Ok(())
}

fn resolve_input(args: &Cli) -> Result<Input> {
    if args.input == "-" {
        let format = match args.r#type {
            Some(TypeArg::Sam) => Format::Sam,
            _ => Format::Fastq,
        };
        return Ok(Input {
            path: None,
            format,
            kind: InputKind::Plain,
        });
    }
    let path = PathBuf::from(&args.input);
    if !path.is_file() {
        bail!("input file not found: {}", path.display());
    }
    let kind = match args.r#type {
        Some(TypeArg::Gz) => InputKind::Gzip,
        Some(_) => InputKind::Plain,
        None => io::detect_input_kind(&path)?,
    };
    let format = match args.r#type {
        Some(TypeArg::Sam) => Format::Sam,
        Some(TypeArg::Fastq) | Some(TypeArg::Gz) => Format::Fastq,
        None => io::detect_format(&path).with_context(|| {
            format!(
                "cannot determine input type of {}; use --type",
                path.display()
            )
        })?,
    };
    Ok(Input {
        path: Some(path),
        format,
        kind,
    })
}

fn parse_base_probs(raw: &str) -> Result<[f64; 5]> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("invalid --base-probs value: {raw}"))?;
    let values: [f64; 5] = values
        .try_into()
        .map_err(|_| anyhow::anyhow!("--base-probs needs 5 comma-separated values (A,T,C,G,N)"))?;
    if values.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
        bail!("--base-probs values must lie in [0, 1]");
    }
    Ok(values)
}

fn open_text_output(target: &str) -> Result<Box<dyn Write>> {
    if target == "-" {
        Ok(Box::new(BufWriter::new(std::io::stdout())))
    } else {
        let file =
            File::create(target).with_context(|| format!("failed to create {target}"))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}
