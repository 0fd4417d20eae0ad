//! # Deal Aggregator
//!
//! Turns raw metric observations into scored findings, folds findings into
//! dimension scores, and folds dimensions into the final deal score.
//!
//! Philosophy: never fail a deal for one bad observation. Unknown metrics,
//! missing values, out-of-bounds values and absent benchmarks all degrade to
//! logged neutral defaults, with the reason recorded in the output metadata
//! so downstream consumers can audit what was skipped and why.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::benchmarks::{BenchmarkCache, ResolvedBenchmark, normalize_metric, reconcile};
use crate::confidence::{self, ConfidenceScore, FindingContext, combine_confidences};
use crate::percentile::{Assessment, PercentileResult, calculate_percentile, calculate_percentile_static};
use crate::registry::{MetricRegistry, NEUTRAL_SCORE};
use crate::weights::{Dimension, Stage, WeightPolicy};

/// Dimensions with fewer contributing findings than this are marked
/// low-confidence instead of being assigned a fabricated score.
pub const MIN_FINDINGS_PER_DIMENSION: usize = 2;

/// Cap applied to an under-threshold dimension's confidence score.
const LOW_CONFIDENCE_CAP: f64 = 40.0;

/// A raw observed value as produced upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservedValue {
    Number(f64),
    Text(String),
    Missing,
}

impl ObservedValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ObservedValue::Number(v) => Some(*v),
            _ => None,
        }
    }
}

/// One piece of supporting evidence attached to an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: String,
    pub content: String,
    pub source: String,
    /// 0–1.
    pub confidence: f64,
}

/// One raw metric observation from the upstream producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub metric: String,
    #[serde(default)]
    pub category: String,
    pub value: ObservedValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub source_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_age_days: Option<u32>,
    /// Direct evidence exists in context even if none was attached.
    #[serde(default)]
    pub has_direct_evidence: bool,
    #[serde(default)]
    pub is_verified: bool,
}

/// A deal's declared context plus its observation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealInput {
    pub sector: String,
    /// Free-form stage label; parsed with [`Stage::parse`].
    pub stage: String,
    pub observations: Vec<RawObservation>,
}

/// One normalized, benchmark-compared, confidence-scored observation.
/// Created once; immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredFinding {
    pub id: String,
    /// Originating source (first evidence source, or "unspecified").
    pub source: String,
    pub metric: String,
    pub category: String,
    pub raw_value: ObservedValue,
    /// 0–100.
    pub normalized_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Assessment>,
    /// Key of the benchmark row used, when one was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark_used: Option<String>,
    pub confidence: ConfidenceScore,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate score for one dimension. `score` is `None` when the dimension
/// had fewer than [`MIN_FINDINGS_PER_DIMENSION`] contributing findings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// This dimension's weight in the global formula.
    pub weight: f64,
    /// Ids of the contributing findings (full findings live on the deal).
    pub finding_ids: Vec<String>,
    pub confidence: ConfidenceScore,
}

/// Why a finding was excluded from dimension aggregation, or annotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// No benchmark at any fallback tier; the finding still contributed via
    /// raw-value normalization and is listed here for audit.
    NoBenchmark,
    UnknownMetric,
    NonNumericValue,
    OutOfBounds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedFinding {
    pub finding_id: String,
    pub metric: String,
    pub reason: ExclusionReason,
}

/// Bookkeeping handed to downstream consumers for auditability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreMetadata {
    pub finding_count: usize,
    pub benchmarks_used: usize,
    pub excluded: Vec<ExcludedFinding>,
    /// True when the benchmark cache served past its TTL after a failed
    /// reload.
    pub benchmark_cache_stale: bool,
    /// Expected swing of the global score, in score points.
    pub expected_variance: f64,
}

/// The terminal artifact: global score/confidence, the fixed per-dimension
/// map, every finding, and audit metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectiveDealScore {
    /// 0–100.
    pub score: f64,
    pub confidence: ConfidenceScore,
    /// One entry per dimension, in the fixed dimension order.
    pub dimensions: Vec<DimensionScore>,
    pub findings: Vec<ScoredFinding>,
    pub metadata: ScoreMetadata,
}

/// Orchestrates registry, benchmark cache, confidence engine and weight
/// policy into deal scores.
pub struct DealScorer {
    registry: MetricRegistry,
    cache: BenchmarkCache,
    policy: WeightPolicy,
    min_findings: usize,
}

impl DealScorer {
    pub fn new(registry: MetricRegistry, cache: BenchmarkCache, policy: WeightPolicy) -> Self {
        Self {
            registry,
            cache,
            policy,
            min_findings: MIN_FINDINGS_PER_DIMENSION,
        }
    }

    pub fn min_findings(mut self, min: usize) -> Self {
        self.min_findings = min;
        self
    }

    pub fn cache(&self) -> &BenchmarkCache {
        &self.cache
    }

    /// Score a whole deal. Infallible by design: every degraded input is
    /// scored neutrally and recorded in the metadata.
    pub async fn score_deal(&self, input: &DealInput) -> ObjectiveDealScore {
        let stage = Stage::parse(&input.stage).unwrap_or_else(|| {
            warn!(target: "aggregate", stage = %input.stage, "unparsable stage, assuming SEED");
            Stage::Seed
        });
        let weights = self.policy.weights_for_deal(stage, &input.sector);

        let mut findings = Vec::with_capacity(input.observations.len());
        let mut excluded = Vec::new();
        // (dimension, metric weight, normalized score, finding index) for
        // findings that participate in dimension aggregation.
        let mut contributions: Vec<(Dimension, f64, f64, usize)> = Vec::new();

        for (idx, obs) in input.observations.iter().enumerate() {
            let id = format!("f-{:03}", idx + 1);
            let metric_key = normalize_metric(&obs.metric);
            let def = self.registry.get(&metric_key).cloned();
            let value = obs.value.as_number();
            let valid = match value {
                Some(v) => self.registry.validate_value(&metric_key, v),
                None => false,
            };

            // Benchmark resolution: repository cascade, then the static
            // 5-point table per the reconciliation rule.
            let lookup = self.cache.lookup(&input.sector, stage, &metric_key).await;
            let resolved = reconcile(&lookup, &metric_key, stage);

            let pct: Option<PercentileResult> = match (&resolved, value) {
                (ResolvedBenchmark::Repository(entry, _), Some(v)) => {
                    Some(calculate_percentile(v, entry))
                }
                (ResolvedBenchmark::StaticTable(s), Some(v)) => {
                    Some(calculate_percentile_static(v, s))
                }
                _ => None,
            };

            let normalized_score = match value {
                Some(v) => {
                    self.registry
                        .score_value(&metric_key, v, pct.as_ref().map(|r| r.percentile))
                }
                None => NEUTRAL_SCORE,
            };

            let confidence = confidence::calculate_for_finding(&FindingContext {
                value_present: value.is_some(),
                evidence_confidences: obs.evidence.iter().map(|e| e.confidence).collect(),
                has_direct_evidence: obs.has_direct_evidence,
                benchmark_attached: pct.is_some(),
                benchmark_match_known: pct.is_none()
                    && !matches!(resolved, ResolvedBenchmark::None),
                source_count: obs.source_count,
                data_age_days: obs.data_age_days,
                is_verified: obs.is_verified,
            });

            // Decide participation in dimension aggregation, recording why
            // a finding is skipped or merely annotated.
            match (&def, value, valid) {
                (None, _, _) => {
                    warn!(target: "aggregate", metric = %metric_key, "unknown metric, neutral finding");
                    excluded.push(ExcludedFinding {
                        finding_id: id.clone(),
                        metric: metric_key.clone(),
                        reason: ExclusionReason::UnknownMetric,
                    });
                }
                (Some(_), None, _) => {
                    excluded.push(ExcludedFinding {
                        finding_id: id.clone(),
                        metric: metric_key.clone(),
                        reason: ExclusionReason::NonNumericValue,
                    });
                }
                (Some(_), Some(_), false) => {
                    excluded.push(ExcludedFinding {
                        finding_id: id.clone(),
                        metric: metric_key.clone(),
                        reason: ExclusionReason::OutOfBounds,
                    });
                }
                (Some(d), Some(_), true) => {
                    if matches!(resolved, ResolvedBenchmark::None) {
                        // Scored without benchmark comparison; annotated,
                        // not dropped.
                        excluded.push(ExcludedFinding {
                            finding_id: id.clone(),
                            metric: metric_key.clone(),
                            reason: ExclusionReason::NoBenchmark,
                        });
                    }
                    contributions.push((d.dimension, d.weight, normalized_score, idx));
                }
            }

            let benchmark_used = pct.as_ref().map(|r| r.benchmark.key());
            findings.push(ScoredFinding {
                id,
                source: obs
                    .evidence
                    .first()
                    .map(|e| e.source.clone())
                    .unwrap_or_else(|| "unspecified".to_string()),
                metric: metric_key,
                category: obs.category.clone(),
                raw_value: obs.value.clone(),
                normalized_score,
                percentile: pct.as_ref().map(|r| r.percentile),
                assessment: pct.as_ref().map(|r| r.assessment),
                benchmark_used,
                confidence,
                evidence: obs.evidence.clone(),
                timestamp: Utc::now(),
            });
        }

        // Fold findings into the fixed dimension map.
        let mut dimensions = Vec::with_capacity(Dimension::ALL.len());
        for dim in Dimension::ALL {
            let contributing: Vec<_> = contributions
                .iter()
                .filter(|(d, _, _, _)| *d == dim)
                .collect();
            let finding_ids: Vec<String> = contributing
                .iter()
                .map(|(_, _, _, i)| findings[*i].id.clone())
                .collect();
            let dim_confidences: Vec<ConfidenceScore> = contributing
                .iter()
                .map(|(_, _, _, i)| findings[*i].confidence.clone())
                .collect();

            let (score, confidence) = if contributing.len() >= self.min_findings {
                let weight_sum: f64 = contributing.iter().map(|(_, w, _, _)| *w).sum();
                let score = if weight_sum > f64::EPSILON {
                    contributing
                        .iter()
                        .map(|(_, w, s, _)| w * s)
                        .sum::<f64>()
                        / weight_sum
                } else {
                    NEUTRAL_SCORE
                };
                (Some(score), combine_confidences(&dim_confidences))
            } else if contributing.is_empty() {
                (None, ConfidenceScore::insufficient())
            } else {
                // Under threshold: no fabricated number, confidence capped
                // into the low band.
                let combined = combine_confidences(&dim_confidences);
                let capped = combined.score.min(LOW_CONFIDENCE_CAP);
                (None, ConfidenceScore::from_score(capped, combined.factors))
            };

            dimensions.push(DimensionScore {
                dimension: dim,
                score,
                weight: weights.get(dim),
                finding_ids,
                confidence,
            });
        }

        // Global score: weighted mean over scored dimensions, renormalized
        // by the weight mass actually present.
        let scored: Vec<_> = dimensions.iter().filter(|d| d.score.is_some()).collect();
        let score = if scored.is_empty() {
            warn!(target: "aggregate", "no dimension reached the findings threshold, neutral deal score");
            NEUTRAL_SCORE
        } else {
            let mass: f64 = scored.iter().map(|d| d.weight).sum();
            if mass > f64::EPSILON {
                scored
                    .iter()
                    .map(|d| d.weight * d.score.unwrap_or(NEUTRAL_SCORE))
                    .sum::<f64>()
                    / mass
            } else {
                NEUTRAL_SCORE
            }
        };

        let all_confidences: Vec<ConfidenceScore> =
            dimensions.iter().map(|d| d.confidence.clone()).collect();
        let confidence = combine_confidences(&all_confidences);

        let benchmarks_used = findings.iter().filter(|f| f.benchmark_used.is_some()).count();
        let cache_meta = self.cache.metadata();
        let expected_variance = (100.0 - confidence.score) * 0.15;

        ObjectiveDealScore {
            score: score.clamp(0.0, 100.0),
            confidence,
            dimensions,
            metadata: ScoreMetadata {
                finding_count: findings.len(),
                benchmarks_used,
                excluded,
                benchmark_cache_stale: cache_meta.stale,
                expected_variance,
            },
            findings,
        }
    }
}
