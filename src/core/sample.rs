/// Sampling-rate estimation: from a record-count hint, pick the stride
/// `n` so that at most the target number of reads is processed.

pub const PREFIX_SAMPLE_LIMIT: usize = 10_000;
pub const DEFAULT_NREADS: u64 = 2_000_000;

/// How many records the input holds, as well as the estimator can know.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CountHint {
    /// Counted outright (e.g. decompressing a gzip member end to end).
    Exact(u64),
    /// Extrapolated from a prefix sample and the input byte size.
    Estimated(u64),
    /// Streamed input with no byte size; sampling cannot be tuned.
    Unknown,
}

impl CountHint {
    pub fn value(self) -> Option<u64> {
        match self {
            CountHint::Exact(n) | CountHint::Estimated(n) => Some(n),
            CountHint::Unknown => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Estimate {
    pub records: u64,
    pub mean_record_bytes: f64,
    pub mean_read_len: f64,
}

/// Extrapolate the record count from up to [`PREFIX_SAMPLE_LIMIT`]
/// (read-length, serialized-record-size) pairs and the input byte size.
pub fn estimate_from_prefix(prefix: &[(usize, usize)], total_bytes: u64) -> Estimate {
    if prefix.is_empty() {
        return Estimate {
            records: 0,
            mean_record_bytes: 0.0,
            mean_read_len: 0.0,
        };
    }
    let n = prefix.len() as f64;
    let mean_record_bytes = prefix.iter().map(|&(_, b)| b as f64).sum::<f64>() / n;
    let mean_read_len = prefix.iter().map(|&(l, _)| l as f64).sum::<f64>() / n;
    let records = if mean_record_bytes > 0.0 {
        (total_bytes as f64 / mean_record_bytes) as u64
    } else {
        0
    };
    Estimate {
        records,
        mean_record_bytes,
        mean_read_len,
    }
}

/// Stride between retained records: floor(est / nreads), never below 1.
pub fn stride(est_records: u64, nreads: u64) -> usize {
    if nreads == 0 {
        return 1;
    }
    (est_records / nreads).max(1) as usize
}
