//! Derived statistics over the raw tallies: histogram quantiles, the
//! median-quality check, GC-by-position, and the kmer bias test.

use crate::core::tally::{CycleTally, LengthHist};
use std::collections::{BTreeMap, BTreeSet};

pub const QUANTILE_FRACTIONS: [f64; 5] = [0.05, 0.25, 0.5, 0.75, 0.95];
pub const PHRED_OFFSET: u8 = 33;

/// Empirical quantile of a count-weighted histogram, interpolating
/// linearly between neighboring order statistics.
pub fn percentile(hist: &BTreeMap<u8, u64>, fraction: f64) -> f64 {
    let n: u64 = hist.values().sum();
    if n == 0 {
        return 0.0;
    }
    let rank = fraction.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = rank.floor() as u64;
    let hi = rank.ceil() as u64;
    let v_lo = value_at(hist, lo);
    if lo == hi {
        return v_lo as f64;
    }
    let v_hi = value_at(hist, hi);
    v_lo as f64 * (hi as f64 - rank) + v_hi as f64 * (rank - lo as f64)
}

fn value_at(hist: &BTreeMap<u8, u64>, index: u64) -> u8 {
    let mut cum = 0u64;
    for (&value, &count) in hist {
        cum += count;
        if index < cum {
            return value;
        }
    }
    hist.keys().next_back().copied().unwrap_or(0)
}

/// Re-key the quality tally from ASCII symbol to numeric score.
pub fn score_histograms(qual: &CycleTally<u8>) -> BTreeMap<usize, BTreeMap<u8, u64>> {
    let mut out = BTreeMap::new();
    for (pos, symbols) in qual.iter() {
        let mut scores = BTreeMap::new();
        for (&ascii, &count) in symbols {
            *scores
                .entry(ascii.saturating_sub(PHRED_OFFSET))
                .or_insert(0) += count;
        }
        out.insert(pos, scores);
    }
    out
}

/// Per-cycle quantiles at [`QUANTILE_FRACTIONS`], in position order.
pub fn cycle_quantiles(scores: &BTreeMap<usize, BTreeMap<u8, u64>>) -> Vec<[f64; 5]> {
    scores
        .values()
        .map(|hist| {
            let mut row = [0.0; 5];
            for (slot, &q) in row.iter_mut().zip(QUANTILE_FRACTIONS.iter()) {
                *slot = percentile(hist, q);
            }
            row
        })
        .collect()
}

/// Median base quality over every cycle combined.
pub fn combined_median(scores: &BTreeMap<usize, BTreeMap<u8, u64>>) -> f64 {
    let mut combined: BTreeMap<u8, u64> = BTreeMap::new();
    for hist in scores.values() {
        for (&score, &count) in hist {
            *combined.entry(score).or_insert(0) += count;
        }
    }
    percentile(&combined, 0.5)
}

/// GC percent at each requested cycle; an all-N column is 0.
pub fn position_gc(nuc: &CycleTally<u8>, positions: &[usize]) -> Vec<f64> {
    positions
        .iter()
        .map(|&pos| {
            let c = nuc.count(pos, &b'C');
            let g = nuc.count(pos, &b'G');
            let denom = c + g + nuc.count(pos, &b'A') + nuc.count(pos, &b'T');
            if denom == 0 {
                0.0
            } else {
                (c + g) as f64 / denom as f64 * 100.0
            }
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct Regression {
    pub slope: f64,
    pub p_value: f64,
}

/// Ordinary least squares with the two-sided p-value of the slope's
/// t-statistic against Student's t with n-2 degrees of freedom.
pub fn linregress(points: &[(f64, f64)]) -> Option<Regression> {
    let n = points.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;
    let mean_x = points.iter().map(|&(x, _)| x).sum::<f64>() / nf;
    let mean_y = points.iter().map(|&(_, y)| y).sum::<f64>() / nf;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for &(x, y) in points {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let df = (n - 2) as f64;
    let sse = (syy - slope * sxy).max(0.0);
    let stderr = (sse / df / sxx).sqrt();
    let p_value = if stderr == 0.0 {
        if slope == 0.0 { 1.0 } else { 0.0 }
    } else {
        let t = slope / stderr;
        betai(df / 2.0, 0.5, df / (df + t * t))
    };
    Some(Regression { slope, p_value })
}

#[derive(Clone, Debug)]
pub struct KmerBias {
    pub kmer: String,
    pub slope: f64,
    pub p_value: f64,
}

#[derive(Clone, Debug, Default)]
pub struct KmerSummary {
    /// (kmer, observed/expected), ascending by ratio.
    pub observed_expected: Vec<(String, f64)>,
    /// Flagged kmers, ascending p, at most [`MAX_BIASED`].
    pub biased: Vec<KmerBias>,
}

pub const MAX_BIASED: usize = 10;
const SLOPE_LIMIT: f64 = 2.0;
const P_LIMIT: f64 = 0.05;

/// Observed/expected ratios and the per-kmer uniformity test. `priors`
/// are the background probabilities of A,T,C,G,N in that order.
pub fn kmer_bias(
    kmers: &CycleTally<Vec<u8>>,
    read_len: &LengthHist,
    priors: &[f64; 5],
) -> KmerSummary {
    let positions = kmers.positions();
    if positions.is_empty() {
        return KmerSummary::default();
    }
    let mut universe: BTreeSet<&Vec<u8>> = BTreeSet::new();
    for (_, symbols) in kmers.iter() {
        universe.extend(symbols.keys());
    }
    let sequenced_bases = read_len.total_bases() as f64;

    let mut observed_expected = Vec::with_capacity(universe.len());
    let mut biased = Vec::new();
    for kmer in universe {
        let counts: Vec<(usize, u64)> = positions
            .iter()
            .map(|&pos| (pos, kmers.count(pos, kmer)))
            .collect();
        let expected = expected_fraction(kmer, priors) * sequenced_bases;
        let total: u64 = counts.iter().map(|&(_, c)| c).sum();
        let name = String::from_utf8_lossy(kmer).into_owned();
        observed_expected.push((name.clone(), total as f64 / expected));

        let points: Vec<(f64, f64)> = counts
            .iter()
            .map(|&(pos, c)| (pos as f64, c as f64))
            .collect();
        if let Some(fit) = linregress(&points)
            && fit.slope.abs() > SLOPE_LIMIT
            && fit.p_value < P_LIMIT
        {
            biased.push(KmerBias {
                kmer: name,
                slope: fit.slope,
                p_value: fit.p_value,
            });
        }
    }
    observed_expected.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    biased.sort_by(|a, b| a.p_value.total_cmp(&b.p_value).then_with(|| a.kmer.cmp(&b.kmer)));
    biased.truncate(MAX_BIASED);
    KmerSummary {
        observed_expected,
        biased,
    }
}

fn expected_fraction(kmer: &[u8], priors: &[f64; 5]) -> f64 {
    let mut fraction = 1.0;
    for (base, &prior) in [b'A', b'T', b'C', b'G', b'N'].iter().zip(priors.iter()) {
        let occurrences = kmer.iter().filter(|&&b| b & 0xDF == *base).count() as i32;
        if occurrences > 0 {
            fraction *= prior.powi(occurrences);
        }
    }
    fraction
}

fn ln_gamma(x: f64) -> f64 {
    const COF: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000000000190015;
    for c in COF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

/// Regularized incomplete beta I_x(a, b).
fn betai(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let bt = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln()).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        bt * betacf(a, b, x) / a
    } else {
        1.0 - bt * betacf(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for `betai`, modified Lentz.
fn betacf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3.0e-12;
    const FPMIN: f64 = 1.0e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;
    for m in 1..=MAX_ITER {
        let mf = m as f64;
        let m2 = 2.0 * mf;
        let aa = mf * (b - mf) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;
        let aa = -(a + mf) * (qab + mf) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(pairs: &[(u8, u64)]) -> BTreeMap<u8, u64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn percentile_interpolates_between_order_statistics() {
        let h = hist(&[(1, 1), (2, 1), (3, 1), (4, 1)]);
        assert_eq!(percentile(&h, 0.0), 1.0);
        assert_eq!(percentile(&h, 0.5), 2.5);
        assert_eq!(percentile(&h, 0.25), 1.75);
        assert_eq!(percentile(&h, 1.0), 4.0);
    }

    #[test]
    fn percentile_respects_counts() {
        // 1,1,1,5 as a multiset.
        let h = hist(&[(1, 3), (5, 1)]);
        assert_eq!(percentile(&h, 0.5), 1.0);
        assert_eq!(percentile(&h, 1.0), 5.0);
        assert_eq!(percentile(&hist(&[]), 0.5), 0.0);
    }

    #[test]
    fn quantiles_are_nondecreasing() {
        let mut qual: CycleTally<u8> = CycleTally::new();
        for (pos, symbol) in [(1, b'I'), (1, b'5'), (1, b'#'), (2, b'I'), (2, b'I')] {
            qual.add(pos, symbol);
        }
        let scores = score_histograms(&qual);
        for row in cycle_quantiles(&scores) {
            for pair in row.windows(2) {
                assert!(pair[0] <= pair[1]);
            }
        }
    }

    #[test]
    fn score_rekeying_subtracts_offset() {
        let mut qual: CycleTally<u8> = CycleTally::new();
        qual.add(1, b'I');
        qual.add(1, b'I');
        let scores = score_histograms(&qual);
        assert_eq!(scores[&1][&40], 2);
        assert_eq!(combined_median(&scores), 40.0);
    }

    #[test]
    fn position_gc_defines_empty_column_as_zero() {
        let mut nuc: CycleTally<u8> = CycleTally::new();
        nuc.add(1, b'G');
        nuc.add(1, b'C');
        nuc.add(1, b'A');
        nuc.add(1, b'T');
        nuc.add(2, b'N');
        let gc = position_gc(&nuc, &[1, 2]);
        assert_eq!(gc, vec![50.0, 0.0]);
    }

    #[test]
    fn flat_counts_are_not_biased() {
        let points: Vec<(f64, f64)> = (1..=10).map(|x| (x as f64, 5.0)).collect();
        let fit = linregress(&points).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.p_value, 1.0);
    }

    #[test]
    fn perfect_trend_has_vanishing_p() {
        let points: Vec<(f64, f64)> = (1..=10).map(|x| (x as f64, 3.0 * x as f64)).collect();
        let fit = linregress(&points).unwrap();
        assert!((fit.slope - 3.0).abs() < 1e-9);
        assert!(fit.p_value < 1e-6);
    }

    #[test]
    fn p_value_matches_reference_regression() {
        // slope 0.6, t = 2.1213 on 3 degrees of freedom.
        let points = [(1.0, 2.0), (2.0, 4.0), (3.0, 5.0), (4.0, 4.0), (5.0, 5.0)];
        let fit = linregress(&points).unwrap();
        assert!((fit.slope - 0.6).abs() < 1e-9);
        assert!((fit.p_value - 0.124).abs() < 0.005, "p = {}", fit.p_value);
    }

    #[test]
    fn too_few_points_is_not_a_fit() {
        assert!(linregress(&[(1.0, 1.0), (2.0, 2.0)]).is_none());
        assert!(linregress(&[(1.0, 1.0), (1.0, 2.0), (1.0, 3.0)]).is_none());
    }

    #[test]
    fn expected_fraction_multiplies_priors_per_occurrence() {
        let priors = [0.25, 0.25, 0.25, 0.25, 0.1];
        let f = expected_fraction(b"AAN", &priors);
        assert!((f - 0.25 * 0.25 * 0.1).abs() < 1e-12);
    }

    #[test]
    fn obs_exp_is_invariant_to_occurrence_order() {
        let priors = [0.25, 0.25, 0.25, 0.25, 0.1];
        let mut read_len = LengthHist::new();
        read_len.add(8);
        read_len.add(8);

        let mut forward: CycleTally<Vec<u8>> = CycleTally::new();
        forward.add(1, b"ACGTA".to_vec());
        forward.add(2, b"CGTAC".to_vec());
        let mut reversed: CycleTally<Vec<u8>> = CycleTally::new();
        reversed.add(2, b"CGTAC".to_vec());
        reversed.add(1, b"ACGTA".to_vec());

        let a = kmer_bias(&forward, &read_len, &priors);
        let b = kmer_bias(&reversed, &read_len, &priors);
        assert_eq!(a.observed_expected, b.observed_expected);
    }

    #[test]
    fn biased_kmers_rank_by_significance_and_cap_at_ten() {
        let priors = [0.25, 0.25, 0.25, 0.25, 0.1];
        let mut read_len = LengthHist::new();
        read_len.add(20);
        let mut kmers: CycleTally<Vec<u8>> = CycleTally::new();
        // A strongly rising profile and a flat one.
        for pos in 1..=10usize {
            for _ in 0..pos * 10 {
                kmers.add(pos, b"AAAAA".to_vec());
            }
            for _ in 0..5 {
                kmers.add(pos, b"CCCCC".to_vec());
            }
        }
        let summary = kmer_bias(&kmers, &read_len, &priors);
        assert!(summary.biased.len() <= MAX_BIASED);
        assert_eq!(summary.biased.len(), 1);
        assert_eq!(summary.biased[0].kmer, "AAAAA");
        assert!(summary.biased[0].slope > 2.0);
    }
}
