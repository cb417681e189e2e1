//! # Estimating genotypes from allele length evidence
//!
//! Per-read repeat length observations are reduced to one [`AlleleCount`]
//! per distinct length, then scored against homozygous and heterozygous
//! hypotheses with a Dirichlet-multinomial likelihood whose priors come
//! from the [`crate::error_profile`] table.
use std::collections::HashMap;

use statrs::function::gamma::ln_gamma;

use crate::{error_profile, utils};

/// More distinct allele lengths than this marks a locus as unusable.
pub const MAX_DISTINCT_ALLELES: usize = 9;

/// A single allele length backed by this many reads marks the locus as
/// unusable (coverage this deep at an STR is an alignment artifact).
pub const MAX_ALLELE_COUNT: u32 = 10_000;

/// Calls at or below this confidence are reported as `NA`.
pub const MIN_CONFIDENCE: f64 = 3.02;

/// Concordance at or above this, with at least two reads, short-circuits
/// enumeration into a confident homozygous call.
pub const CONCORDANCE_SHORTCUT: f64 = 0.99;

/// Caller ploidy mode: 1 haploid, 2 diploid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ploidy {
    Haploid,
    Diploid,
}

impl Ploidy {
    pub fn mode(self) -> u8 {
        match self {
            Ploidy::Haploid => 1,
            Ploidy::Diploid => 2,
        }
    }
}

/// Aggregated evidence for one observed allele length.
#[derive(Debug, Clone, PartialEq)]
pub struct AlleleCount {
    pub length: i64,
    pub count: u32,
    pub sum_base_quality: f64,
    pub sum_min_flank: u64,
    pub reverse_count: u32,
}

impl AlleleCount {
    pub fn avg_base_quality(&self) -> f64 {
        self.sum_base_quality / f64::from(self.count)
    }

    pub fn avg_min_flank(&self) -> f64 {
        self.sum_min_flank as f64 / f64::from(self.count)
    }
}

/// Accumulates per-read observations for one region, merging by length.
#[derive(Debug, Default)]
pub struct Evidence {
    counts: HashMap<i64, AlleleCount>,
}

impl Evidence {
    pub fn record(&mut self, length: i64, base_quality: f64, min_flank: usize, reverse: bool) {
        let entry = self.counts.entry(length).or_insert(AlleleCount {
            length,
            count: 0,
            sum_base_quality: 0.0,
            sum_min_flank: 0,
            reverse_count: 0,
        });
        entry.count += 1;
        entry.sum_base_quality += base_quality;
        entry.sum_min_flank += min_flank as u64;
        if reverse {
            entry.reverse_count += 1;
        }
    }

    pub fn total_reads(&self) -> u32 {
        self.counts.values().map(|a| a.count).sum()
    }

    /// Consume the accumulator, returning alleles sorted by count
    /// descending with ties broken towards the longer length.
    pub fn finalize(self) -> Vec<AlleleCount> {
        let mut alleles: Vec<AlleleCount> = self.counts.into_values().collect();
        alleles.sort_unstable_by(|a, b| b.count.cmp(&a.count).then(b.length.cmp(&a.length)));

        alleles
    }
}

/// Evidence that cannot support a genotype call at all: nothing observed,
/// too many distinct lengths, or absurd coverage on a single length.
pub fn evidence_is_degenerate(alleles: &[AlleleCount]) -> bool {
    alleles.is_empty()
        || alleles.len() > MAX_DISTINCT_ALLELES
        || alleles.iter().any(|a| a.count >= MAX_ALLELE_COUNT)
}

/// Fraction of reads supporting the majority allele, discounting one read:
/// `(majority - 1) / (total - 1)`. Zero when fewer than two reads.
pub fn concordance(majority_count: u32, total_reads: u32) -> f64 {
    if total_reads <= 1 {
        0.0
    } else {
        f64::from(majority_count - 1) / f64::from(total_reads - 1)
    }
}

/// Genotype hypothesis scores keyed by `(shorter, longer)` allele length,
/// values phred-scaled and capped at 50.
pub type Likelihoods = HashMap<(i64, i64), f64>;

/// The outcome of genotyping one region.
#[derive(Debug)]
pub struct GenotypeCall {
    /// Called allele lengths with `alleles.0 <= alleles.1`; homozygous
    /// calls repeat the same length.
    pub alleles: (i64, i64),
    pub confidence: f64,
    pub likelihoods: Likelihoods,
}

impl GenotypeCall {
    /// A homozygous call made without enumeration, at the confidence cap.
    pub fn confident_homozygote(length: i64) -> GenotypeCall {
        GenotypeCall {
            alleles: (length, length),
            confidence: utils::MAX_SCORE,
            likelihoods: HashMap::from([((length, length), utils::MAX_SCORE)]),
        }
    }

    pub fn is_homozygous(&self) -> bool {
        self.alleles.0 == self.alleles.1
    }

    /// Genotype string for the `.calls` and `.repeatseq` outputs:
    /// `"12"` for homozygous, `"12h14"` for heterozygous calls.
    pub fn genotype_string(&self) -> String {
        if self.is_homozygous() {
            format!("{}", self.alleles.0)
        } else {
            format!("{}h{}", self.alleles.0, self.alleles.1)
        }
    }
}

/// Process-wide cache of `ln(n!)`. Built once at startup and shared
/// read-only across workers; arguments beyond the cache fall back to
/// `ln_gamma`.
#[derive(Debug)]
pub struct LnFactorial {
    cache: Vec<f64>,
}

/// Cached factorial arguments; counts at an STR rarely exceed this.
const LN_FACTORIAL_CACHE: usize = 4096;

impl LnFactorial {
    pub fn new() -> LnFactorial {
        let mut cache = Vec::with_capacity(LN_FACTORIAL_CACHE);
        cache.push(0.0);
        for n in 1..LN_FACTORIAL_CACHE {
            let previous = cache[n - 1];
            cache.push(previous + (n as f64).ln());
        }

        LnFactorial { cache }
    }

    pub fn get(&self, n: u64) -> f64 {
        match self.cache.get(n as usize) {
            Some(value) => *value,
            None => ln_gamma(n as f64 + 1.0),
        }
    }

    /// `ln Γ(n)` for integer `n >= 1`.
    fn ln_gamma_int(&self, n: u64) -> f64 {
        self.get(n - 1)
    }
}

impl Default for LnFactorial {
    fn default() -> Self {
        LnFactorial::new()
    }
}

/// Log Dirichlet-multinomial likelihood of observing outcome counts `x`
/// under prior pseudo-counts `alpha`:
/// `ln [ multinomial(x) * B(alpha + x) / B(alpha) ]`.
fn ln_dirichlet_multinomial(x: &[u64], alpha: &[u64], lnfact: &LnFactorial) -> f64 {
    let total: u64 = x.iter().sum();
    let mut ln = lnfact.get(total);
    let mut posterior_sum = 0;
    let mut prior_sum = 0;
    for (&observed, &prior) in x.iter().zip(alpha) {
        ln -= lnfact.get(observed);
        ln += lnfact.ln_gamma_int(prior + observed) - lnfact.ln_gamma_int(prior);
        posterior_sum += prior + observed;
        prior_sum += prior;
    }
    ln += lnfact.ln_gamma_int(prior_sum) - lnfact.ln_gamma_int(posterior_sum);

    ln
}

/// Enumerate genotype hypotheses for the observed alleles and return their
/// normalized posterior probabilities, keyed by `(shorter, longer)` allele
/// length and in enumeration order.
pub fn genotype_posteriors(
    alleles: &[AlleleCount],
    reference_length: i64,
    unit_length: i64,
    ploidy: Ploidy,
    lnfact: &LnFactorial,
) -> Vec<((i64, i64), f64)> {
    let total: u64 = alleles.iter().map(|a| u64::from(a.count)).sum();
    let phis: Vec<(u64, u64)> = alleles
        .iter()
        .map(|a| {
            let bucket = error_profile::quantize_quality(a.avg_base_quality());
            error_profile::phi(unit_length, reference_length, bucket)
        })
        .collect();

    let mut hypotheses: Vec<((i64, i64), f64)> = Vec::new();
    for i in 0..alleles.len() {
        let count_i = u64::from(alleles[i].count);
        let (error_i, correct_i) = phis[i];

        // homozygous: every discordant read is an error
        let x = [count_i, total - count_i];
        let alpha = [1 + correct_i, 1 + error_i];
        hypotheses.push((
            (alleles[i].length, alleles[i].length),
            ln_dirichlet_multinomial(&x, &alpha, lnfact),
        ));

        if ploidy == Ploidy::Haploid {
            continue;
        }
        for j in i + 1..alleles.len() {
            let count_j = u64::from(alleles[j].count);
            let (error_j, correct_j) = phis[j];
            let x = [count_i, count_j, total - count_i - count_j];
            let alpha = [1 + correct_i, 1 + correct_j, 1 + error_i + error_j];
            let key = if alleles[i].length <= alleles[j].length {
                (alleles[i].length, alleles[j].length)
            } else {
                (alleles[j].length, alleles[i].length)
            };
            hypotheses.push((key, ln_dirichlet_multinomial(&x, &alpha, lnfact)));
        }
    }

    // normalize in log space
    let max = hypotheses
        .iter()
        .map(|(_, ln)| *ln)
        .fold(f64::NEG_INFINITY, f64::max);
    let z: f64 = hypotheses.iter().map(|(_, ln)| (ln - max).exp()).sum();

    hypotheses
        .into_iter()
        .map(|(key, ln)| (key, (ln - max).exp() / z))
        .collect()
}

/// Rank all genotype hypotheses and return the best one together with the
/// full phred-scaled likelihood map. `None` when there are no alleles.
pub fn call_genotype(
    alleles: &[AlleleCount],
    reference_length: i64,
    unit_length: i64,
    ploidy: Ploidy,
    lnfact: &LnFactorial,
) -> Option<GenotypeCall> {
    if alleles.is_empty() {
        return None;
    }

    let posteriors = genotype_posteriors(alleles, reference_length, unit_length, ploidy, lnfact);
    let mut likelihoods = Likelihoods::with_capacity(posteriors.len());
    let mut best: Option<((i64, i64), f64)> = None;
    for (key, p) in posteriors {
        likelihoods.insert(key, utils::phred_confidence(p));
        match best {
            Some((_, best_p)) if best_p >= p => {}
            _ => best = Some((key, p)),
        }
    }

    let (alleles, p) = best?;
    Some(GenotypeCall {
        alleles,
        confidence: utils::phred_confidence(p),
        likelihoods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn allele(length: i64, count: u32, base_quality: f64) -> AlleleCount {
        AlleleCount {
            length,
            count,
            sum_base_quality: base_quality * f64::from(count),
            sum_min_flank: 20 * u64::from(count),
            reverse_count: count / 2,
        }
    }

    #[test]
    fn evidence_merges_by_length() {
        let mut evidence = Evidence::default();
        evidence.record(12, 0.99, 20, false);
        evidence.record(12, 0.97, 18, true);
        evidence.record(14, 0.98, 20, false);
        assert_eq!(3, evidence.total_reads());

        let alleles = evidence.finalize();
        assert_eq!(2, alleles.len());
        assert_eq!(12, alleles[0].length);
        assert_eq!(2, alleles[0].count);
        assert_eq!(1, alleles[0].reverse_count);
        assert_relative_eq!(alleles[0].avg_base_quality(), 0.98, epsilon = 1e-12);
        assert_relative_eq!(alleles[0].avg_min_flank(), 19.0, epsilon = 1e-12);
    }

    #[test]
    fn finalize_breaks_count_ties_towards_longer() {
        let mut evidence = Evidence::default();
        evidence.record(10, 0.99, 20, false);
        evidence.record(13, 0.99, 20, false);
        let alleles = evidence.finalize();
        assert_eq!(13, alleles[0].length);
        assert_eq!(10, alleles[1].length);
    }

    #[test]
    fn posteriors_sum_to_one() {
        let lnfact = LnFactorial::new();
        let alleles = vec![
            allele(14, 10, 0.99),
            allele(12, 9, 0.98),
            allele(11, 1, 0.95),
        ];
        let posteriors = genotype_posteriors(&alleles, 12, 2, Ploidy::Diploid, &lnfact);
        assert_eq!(6, posteriors.len());
        let sum: f64 = posteriors.iter().map(|(_, p)| p).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn balanced_split_calls_heterozygote() {
        let lnfact = LnFactorial::new();
        let alleles = vec![allele(14, 10, 0.99), allele(12, 10, 0.99)];
        let call = call_genotype(&alleles, 12, 2, Ploidy::Diploid, &lnfact).unwrap();

        assert_eq!((12, 14), call.alleles);
        assert!(call.confidence >= 30.0);
        assert_eq!("12h14", call.genotype_string());
        assert!(call.likelihoods.contains_key(&(12, 12)));
        assert!(call.likelihoods.contains_key(&(14, 14)));
    }

    #[test]
    fn haploid_mode_picks_the_majority() {
        let lnfact = LnFactorial::new();
        let alleles = vec![allele(15, 8, 0.99), allele(12, 2, 0.99)];
        let call = call_genotype(&alleles, 15, 3, Ploidy::Haploid, &lnfact).unwrap();

        assert_eq!((15, 15), call.alleles);
        assert!(call.is_homozygous());
        assert_eq!("15", call.genotype_string());
        // haploid mode never considers heterozygous pairs
        assert_eq!(2, call.likelihoods.len());
    }

    #[test]
    fn confidence_grows_with_concordance() {
        let lnfact = LnFactorial::new();
        let low = vec![allele(15, 7, 0.99), allele(12, 3, 0.99)];
        let high = vec![allele(15, 9, 0.99), allele(12, 1, 0.99)];
        let low_call = call_genotype(&low, 15, 3, Ploidy::Haploid, &lnfact).unwrap();
        let high_call = call_genotype(&high, 15, 3, Ploidy::Haploid, &lnfact).unwrap();

        assert!(high_call.confidence >= low_call.confidence);
    }

    #[test]
    fn likelihoods_are_capped() {
        let lnfact = LnFactorial::new();
        let alleles = vec![allele(10, 30, 0.99)];
        let call = call_genotype(&alleles, 10, 2, Ploidy::Diploid, &lnfact).unwrap();

        assert!(call.confidence <= utils::MAX_SCORE);
        assert!(call
            .likelihoods
            .values()
            .all(|v| (0.0..=utils::MAX_SCORE).contains(v)));
    }

    #[test]
    fn degenerate_evidence_is_flagged() {
        assert!(evidence_is_degenerate(&[]));
        assert!(evidence_is_degenerate(&[allele(10, 12_000, 0.99)]));

        let many: Vec<AlleleCount> = (8..18).map(|l| allele(l, 1, 0.99)).collect();
        assert!(evidence_is_degenerate(&many));

        assert!(!evidence_is_degenerate(&[allele(10, 20, 0.99)]));
    }

    #[test]
    fn concordance_discounts_one_read() {
        assert_relative_eq!(concordance(10, 10), 1.0);
        assert_relative_eq!(concordance(9, 10), 8.0 / 9.0);
        assert_eq!(0.0, concordance(1, 1));
    }

    #[test]
    fn factorial_cache_matches_ln_gamma() {
        let lnfact = LnFactorial::new();
        assert_eq!(0.0, lnfact.get(0));
        assert_relative_eq!(lnfact.get(10), (3_628_800.0_f64).ln(), epsilon = 1e-9);
        assert_relative_eq!(lnfact.get(10_000), ln_gamma(10_001.0), epsilon = 1e-9);
    }

    #[test]
    fn confident_homozygote_shortcut() {
        let call = GenotypeCall::confident_homozygote(9);
        assert_eq!((9, 9), call.alleles);
        assert_eq!(utils::MAX_SCORE, call.confidence);
        assert_eq!("9", call.genotype_string());
    }
}
