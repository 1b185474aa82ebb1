use std::collections::BTreeSet;

/// Known library-preparation adapter sequences. Injected into the engine
/// as a static configuration table; the engine only derives the kmer set
/// the figure writer compares observed kmer positions against.
pub const ADAPTERS: [&str; 10] = [
    "AGATCGGAAGAGCACACGTCTGAACTCCAGTCAC", // Illumina Universal Adapter
    "AGATCGGAAGAGCGTCGTGTAGGGAAAGAGTGTA", // Illumina TruSeq Adapter, Read 2
    "GATCGGAAGAGCACACGTCTGAACTCCAGTCAC",  // Illumina Single End Adapter 1
    "GATCGGAAGAGCGGTTCAGCAGGAATGCCGAG",   // Illumina Paired End Adapter 2
    "TGGAATTCTCGGGTGCCAAGG",              // Illumina Small RNA 3' Adapter
    "GTTCAGAGTTCTACAGTCCGACGATC",         // Illumina Small RNA 5' Adapter
    "CTGTCTCTTATACACATCT",                // Nextera Transposase Sequence
    "CGCCTTGGCCGTACAGCAG",                // SOLiD Small RNA Adapter
    "AATGATACGGCGACCACCGAGATCTACAC",      // Illumina P5 flow cell sequence
    "CAAGCAGAAGACGGCATACGAGAT",           // Illumina P7 flow cell sequence
];

/// Every contiguous length-`k` window over the adapter library.
pub fn adapter_kmers(k: usize) -> BTreeSet<String> {
    let mut kmers = BTreeSet::new();
    if k == 0 {
        return kmers;
    }
    for adapter in ADAPTERS {
        let bytes = adapter.as_bytes();
        if bytes.len() < k {
            continue;
        }
        for window in bytes.windows(k) {
            kmers.insert(String::from_utf8_lossy(window).into_owned());
        }
    }
    kmers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kmer_set_covers_every_window() {
        let kmers = adapter_kmers(5);
        assert!(kmers.contains("AGATC"));
        assert!(kmers.contains("CTGTC"));
        for k in &kmers {
            assert_eq!(k.len(), 5);
        }
    }

    #[test]
    fn oversized_k_yields_nothing_from_short_adapters() {
        let kmers = adapter_kmers(40);
        assert!(kmers.is_empty());
    }
}
