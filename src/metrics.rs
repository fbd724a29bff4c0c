//! Ranking metrics: MR, MRR, Hits@K, and the unbiased subsampled Hits@K.
//!
//! Metric names are parsed once, at configuration time, into tagged
//! descriptors; computation dispatches on the tag so no string is re-parsed
//! inside the evaluation loop. Anything malformed or unsupported is
//! rejected before any computation starts.
//!
//! Grammar: `mr`, `mrr`, `hits@K`, `hits@K_S`, each optionally suffixed
//! `-tail` to route through the tail-only corruption aggregate. `hits@K_S`
//! is the unbiased estimator for evaluations that scored only S-1 uniform
//! negatives instead of the full candidate universe.

use std::fmt;

use crate::error::{LinkPredError, Result};

/// Which aggregate a metric reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankScope {
    /// Combined head- and tail-corruption rankings.
    Both,
    /// Tail-corruption rankings only (`-tail` suffix).
    TailOnly,
}

/// Metric kind, parsed from the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Mean rank.
    Mr,
    /// Mean reciprocal rank.
    Mrr,
    /// Fraction of queries with rank <= K (exact, exhaustive evaluation).
    HitsAt(usize),
    /// Unbiased Hits@K estimate for a subsample of `sample - 1` negatives.
    HitsAtSampled { k: usize, sample: usize },
}

/// A parsed metric descriptor: kind, scope, and the original name used for
/// reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    name: String,
    kind: Metric,
    scope: RankScope,
}

impl MetricSpec {
    /// Build a descriptor from structured parts. `HitsAtSampled` callers
    /// are expected to satisfy `sample - 1 >= k` (enforced by `parse`).
    pub fn new(kind: Metric, scope: RankScope) -> Self {
        let base = match kind {
            Metric::Mr => "mr".to_string(),
            Metric::Mrr => "mrr".to_string(),
            Metric::HitsAt(k) => format!("hits@{k}"),
            Metric::HitsAtSampled { k, sample } => format!("hits@{k}_{sample}"),
        };
        let name = match scope {
            RankScope::Both => base,
            RankScope::TailOnly => format!("{base}-tail"),
        };
        Self { name, kind, scope }
    }

    /// Parse a metric name, failing fast on anything unsupported.
    pub fn parse(name: &str) -> Result<Self> {
        let reject = |reason: &str| LinkPredError::Metric {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let (base, scope) = match name.rsplit_once('-') {
            Some((base, "tail")) => (base, RankScope::TailOnly),
            Some((_, suffix)) => {
                return Err(reject(&format!(
                    "unsupported mode suffix `-{suffix}`, only `-tail` is supported"
                )))
            }
            None => (name, RankScope::Both),
        };

        let kind = match base {
            "mr" => Metric::Mr,
            "mrr" => Metric::Mrr,
            _ => {
                let spec = base
                    .strip_prefix("hits@")
                    .ok_or_else(|| reject("unknown metric"))?;
                match spec.split_once('_') {
                    Some((k_str, s_str)) => {
                        let k: usize = k_str
                            .parse()
                            .map_err(|_| reject("non-integer K in hits@K_S"))?;
                        let sample: usize = s_str
                            .parse()
                            .map_err(|_| reject("non-integer S in hits@K_S"))?;
                        if k == 0 {
                            return Err(reject("K must be >= 1"));
                        }
                        if sample < k + 1 {
                            return Err(reject(
                                "degenerate estimator: need S - 1 >= K negatives",
                            ));
                        }
                        Metric::HitsAtSampled { k, sample }
                    }
                    None => {
                        let k: usize =
                            spec.parse().map_err(|_| reject("non-integer K in hits@K"))?;
                        if k == 0 {
                            return Err(reject("K must be >= 1"));
                        }
                        Metric::HitsAt(k)
                    }
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            kind,
            scope,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Metric {
        self.kind
    }

    pub fn scope(&self) -> RankScope {
        self.scope
    }

    /// Compute the metric over a global ranking vector.
    ///
    /// `num_negatives` carries each query's valid-candidate count and is
    /// read only by the subsampled estimator. Empty input yields 0.0.
    pub fn compute(&self, ranking: &[i64], num_negatives: &[i64]) -> f64 {
        if ranking.is_empty() {
            return 0.0;
        }
        let n = ranking.len() as f64;
        match self.kind {
            Metric::Mr => ranking.iter().map(|&r| r as f64).sum::<f64>() / n,
            Metric::Mrr => ranking.iter().map(|&r| 1.0 / r as f64).sum::<f64>() / n,
            Metric::HitsAt(k) => {
                ranking.iter().filter(|&&r| r <= k as i64).count() as f64 / n
            }
            Metric::HitsAtSampled { k, sample } => {
                ranking
                    .iter()
                    .zip(num_negatives)
                    .map(|(&rank, &num_neg)| {
                        // estimated false-positive rate among the negatives
                        let fp_rate = if num_neg > 0 {
                            (rank - 1) as f64 / num_neg as f64
                        } else {
                            0.0
                        };
                        // probability that fewer than K of S-1 drawn
                        // negatives outrank the positive
                        (0..k)
                            .map(|i| {
                                binomial(sample - 1, i)
                                    * fp_rate.powi(i as i32)
                                    * (1.0 - fp_rate).powi((sample - 1 - i) as i32)
                            })
                            .sum::<f64>()
                    })
                    .sum::<f64>()
                    / n
            }
        }
    }
}

impl fmt::Display for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Binomial coefficient C(n, k) as f64, via the multiplicative form of the
/// factorial ratio (avoids factorial overflow). Out-of-range k yields 0,
/// the combinatorial convention; parse-time bounds make that unreachable
/// for metric descriptors.
fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    (1..=k).fold(1.0, |acc, j| acc * (n - k + j) as f64 / j as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> MetricSpec {
        MetricSpec::parse(name).unwrap()
    }

    #[test]
    fn test_reference_values() {
        let ranking = vec![1i64, 2, 3, 4];
        let num_neg = vec![100i64; 4];
        assert!((spec("mr").compute(&ranking, &num_neg) - 2.5).abs() < 1e-9);
        let mrr = (1.0 + 0.5 + 1.0 / 3.0 + 0.25) / 4.0;
        assert!((spec("mrr").compute(&ranking, &num_neg) - mrr).abs() < 1e-9);
        assert!((spec("hits@1").compute(&ranking, &num_neg) - 0.25).abs() < 1e-9);
        assert!((spec("hits@2").compute(&ranking, &num_neg) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_unknown_suffix() {
        let err = MetricSpec::parse("mrr-head").unwrap_err();
        assert!(matches!(err, LinkPredError::Metric { .. }));
    }

    #[test]
    fn test_parse_rejects_malformed_hits() {
        assert!(MetricSpec::parse("hits@x").is_err());
        assert!(MetricSpec::parse("hits@3_y").is_err());
        assert!(MetricSpec::parse("hits@").is_err());
        assert!(MetricSpec::parse("rank").is_err());
        assert!(MetricSpec::parse("hits@0").is_err());
    }

    #[test]
    fn test_parse_rejects_degenerate_estimator() {
        // S - 1 < K would require choosing more false positives than drawn
        assert!(MetricSpec::parse("hits@10_5").is_err());
        assert!(MetricSpec::parse("hits@10_10").is_err());
        assert!(MetricSpec::parse("hits@10_11").is_ok());
    }

    #[test]
    fn test_parse_tail_scope() {
        let s = spec("mrr-tail");
        assert_eq!(s.scope(), RankScope::TailOnly);
        assert_eq!(s.kind(), Metric::Mrr);
        assert_eq!(s.name(), "mrr-tail");
        assert_eq!(spec("hits@10_50-tail").scope(), RankScope::TailOnly);
    }

    #[test]
    fn test_unbiased_estimator_matches_exact_on_full_universe() {
        // when S - 1 equals the true negative count, drawing S - 1 samples
        // covers the whole universe and the estimate collapses onto the
        // exact indicator (the binomial mass concentrates at m false
        // positives; ranks here sit far from the K threshold)
        let universe = 99i64;
        let ranking = vec![1i64, 96, 1, 99];
        let num_neg = vec![universe; 4];
        let exact = spec("hits@5").compute(&ranking, &num_neg);
        let estimated = spec(&format!("hits@5_{}", universe + 1)).compute(&ranking, &num_neg);
        assert!((exact - 0.5).abs() < 1e-9);
        assert!(
            (exact - estimated).abs() < 1e-6,
            "exact {exact} vs estimated {estimated}"
        );
    }

    #[test]
    fn test_estimator_rank_one_is_certain_hit() {
        // rank 1 means zero false positives: the estimate is exactly 1
        let est = spec("hits@3_20").compute(&[1], &[50]);
        assert!((est - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_binomial() {
        assert_eq!(binomial(5, 0), 1.0);
        assert_eq!(binomial(5, 2), 10.0);
        assert_eq!(binomial(5, 5), 1.0);
        assert_eq!(binomial(3, 7), 0.0);
        // survives values where factorials would overflow
        assert!((binomial(200, 3) - 1_313_400.0).abs() < 1e-3);
    }

    #[test]
    fn test_canonical_names_round_trip() {
        for name in ["mr", "mrr", "hits@10", "hits@3_50", "mr-tail", "hits@1-tail"] {
            let s = spec(name);
            let rebuilt = MetricSpec::new(s.kind(), s.scope());
            assert_eq!(rebuilt.name(), name);
        }
    }

    #[test]
    fn test_empty_ranking() {
        assert_eq!(spec("mrr").compute(&[], &[]), 0.0);
    }
}
