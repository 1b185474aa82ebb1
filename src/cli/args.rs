use crate::core::sample::DEFAULT_NREADS;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cycleqc",
    version,
    about = "Per-cycle read quality assessment for FASTQ and SAM"
)]
pub struct Cli {
    /// Input file (.fastq, .fq, .sam, optionally .gz) or - for stdin
    pub input: String,

    /// Do not print any progress or warning messages
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Number of reads to bin for sampling (default: auto)
    #[arg(short = 's', long)]
    pub binsize: Option<usize>,

    /// Sample name identifier for text and figure output
    #[arg(short = 'a', long)]
    pub name: Option<String>,

    /// Number of reads to sample from the input
    #[arg(short, long, default_value_t = DEFAULT_NREADS)]
    pub nreads: u64,

    /// Probabilities of observing A,T,C,G,N in reads
    #[arg(short = 'p', long, default_value = "0.25,0.25,0.25,0.25,0.1")]
    pub base_probs: String,

    /// Kmer length for over-represented kmer counts
    #[arg(short, long, default_value_t = 5)]
    pub kmer: usize,

    /// Base name for the figure archive
    #[arg(short, long, default_value = "cycleqc_figures")]
    pub output: PathBuf,

    /// File name for text output, - for stdout
    #[arg(short = 'e', long, default_value = "-")]
    pub text: String,

    /// Input type (default: from the file name)
    #[arg(short = 't', long, value_enum)]
    pub r#type: Option<TypeArg>,

    /// Leftmost cycle limit, 1-based
    #[arg(long, default_value_t = 1)]
    pub leftlimit: usize,

    /// Rightmost cycle limit, -1 for none
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub rightlimit: i64,

    /// Median quality threshold for the QC warning
    #[arg(long, default_value_t = 30)]
    pub median_qual: u8,

    /// Tally aligned reads only
    #[arg(long, default_value_t = false, conflicts_with = "unaligned_only")]
    pub aligned_only: bool,

    /// Tally unaligned reads only
    #[arg(long, default_value_t = false)]
    pub unaligned_only: bool,

    /// Estimate the sequence duplication rate
    #[arg(short = 'd', long, default_value_t = false)]
    pub count_duplicates: bool,

    /// Skip the figure archive
    #[arg(long, default_value_t = false)]
    pub no_figures: bool,

    /// Decompressor threads for gzip input
    #[arg(long, default_value_t = num_cpus::get())]
    pub threads: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TypeArg {
    #[value(name = "fastq")]
    Fastq,
    #[value(name = "gz")]
    Gz,
    #[value(name = "sam")]
    Sam,
}
