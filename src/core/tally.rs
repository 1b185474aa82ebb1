use std::collections::BTreeMap;

/// Count of each symbol seen at each 1-based cycle position. Counts only
/// ever increase; absent keys read as zero.
#[derive(Clone, Debug, Default)]
pub struct CycleTally<K: Ord> {
    cycles: BTreeMap<usize, BTreeMap<K, u64>>,
}

impl<K: Ord> CycleTally<K> {
    pub fn new() -> Self {
        Self {
            cycles: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, cycle: usize, symbol: K) {
        *self
            .cycles
            .entry(cycle)
            .or_default()
            .entry(symbol)
            .or_insert(0) += 1;
    }

    pub fn count(&self, cycle: usize, symbol: &K) -> u64 {
        self.cycles
            .get(&cycle)
            .and_then(|m| m.get(symbol))
            .copied()
            .unwrap_or(0)
    }

    pub fn positions(&self) -> Vec<usize> {
        self.cycles.keys().copied().collect()
    }

    pub fn total_at(&self, cycle: usize) -> u64 {
        self.cycles
            .get(&cycle)
            .map(|m| m.values().sum())
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BTreeMap<K, u64>)> {
        self.cycles.iter().map(|(&p, m)| (p, m))
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}

/// Mismatch counts partitioned by reference base. Only A/C/G/T partitions
/// exist; an observation against any other reference base is dropped.
#[derive(Clone, Debug)]
pub struct MismatchTally {
    by_ref: BTreeMap<u8, CycleTally<u8>>,
}

impl Default for MismatchTally {
    fn default() -> Self {
        Self::new()
    }
}

impl MismatchTally {
    pub fn new() -> Self {
        let mut by_ref = BTreeMap::new();
        for base in [b'A', b'C', b'G', b'T'] {
            by_ref.insert(base, CycleTally::new());
        }
        Self { by_ref }
    }

    /// Returns false when the reference base has no partition.
    pub fn add(&mut self, ref_base: u8, cycle: usize, observed: u8) -> bool {
        match self.by_ref.get_mut(&ref_base) {
            Some(tally) => {
                tally.add(cycle, observed);
                true
            }
            None => false,
        }
    }

    pub fn partitions(&self) -> impl Iterator<Item = (u8, &CycleTally<u8>)> {
        self.by_ref.iter().map(|(&b, t)| (b, t))
    }

    pub fn is_empty(&self) -> bool {
        self.by_ref.values().all(|t| t.is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct LengthHist {
    counts: BTreeMap<usize, u64>,
}

impl LengthHist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, len: usize) {
        *self.counts.entry(len).or_insert(0) += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().map(|(&l, &c)| (l, c))
    }

    pub fn total_bases(&self) -> u64 {
        self.counts.iter().map(|(&l, &c)| l as u64 * c).sum()
    }

    pub fn total_reads(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Reads binned by integer GC percent, 0-100 inclusive.
#[derive(Clone, Debug)]
pub struct GcHist {
    counts: [u64; 101],
}

impl Default for GcHist {
    fn default() -> Self {
        Self::new()
    }
}

impl GcHist {
    pub fn new() -> Self {
        Self { counts: [0; 101] }
    }

    pub fn add(&mut self, percent: usize) {
        self.counts[percent.min(100)] += 1;
    }

    pub fn count(&self, percent: usize) -> u64 {
        self.counts[percent]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Truncating integer GC percent of a sequence, matching the tool's
/// histogram bucketing.
pub fn gc_percent(seq: &[u8]) -> usize {
    if seq.is_empty() {
        return 0;
    }
    let gc = seq
        .iter()
        .filter(|&&b| matches!(b & 0xDF, b'G' | b'C'))
        .count();
    gc * 100 / seq.len()
}
