//! # Confidence Engine
//!
//! Multi-factor confidence scoring for findings and aggregates.
//!
//! Factors are explicit `(kind, weight, score, rationale)` tuples — only the
//! factors actually supplied participate in the average, so an absent factor
//! neither contributes nor dilutes. Levels are a pure, non-decreasing step
//! function of the numeric score.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Qualitative confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Insufficient,
    Low,
    Medium,
    High,
}

/// Step thresholds: ≥75 high, ≥50 medium, ≥25 low, else insufficient.
pub fn score_to_level(score: f64) -> ConfidenceLevel {
    if score >= 75.0 {
        ConfidenceLevel::High
    } else if score >= 50.0 {
        ConfidenceLevel::Medium
    } else if score >= 25.0 {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::Insufficient
    }
}

/// The named confidence factors and their default weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    DataAvailability,
    EvidenceQuality,
    BenchmarkMatch,
    SourceReliability,
    TemporalRelevance,
}

impl FactorKind {
    pub fn default_weight(self) -> f64 {
        match self {
            FactorKind::DataAvailability => 0.30,
            FactorKind::EvidenceQuality => 0.25,
            FactorKind::BenchmarkMatch => 0.20,
            FactorKind::SourceReliability => 0.15,
            FactorKind::TemporalRelevance => 0.10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FactorKind::DataAvailability => "data_availability",
            FactorKind::EvidenceQuality => "evidence_quality",
            FactorKind::BenchmarkMatch => "benchmark_match",
            FactorKind::SourceReliability => "source_reliability",
            FactorKind::TemporalRelevance => "temporal_relevance",
        }
    }
}

/// One named, weighted confidence input with its justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactor {
    pub kind: FactorKind,
    pub weight: f64,
    /// 0–100.
    pub score: f64,
    pub rationale: String,
}

impl ConfidenceFactor {
    /// Factor at its default weight.
    pub fn new(kind: FactorKind, score: f64, rationale: impl Into<String>) -> Self {
        Self {
            kind,
            weight: kind.default_weight(),
            score: score.clamp(0.0, 100.0),
            rationale: rationale.into(),
        }
    }
}

/// A confidence assessment: numeric score, derived level, and the ordered
/// factor list behind it. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub level: ConfidenceLevel,
    /// 0–100.
    pub score: f64,
    pub factors: Vec<ConfidenceFactor>,
}

impl ConfidenceScore {
    pub(crate) fn from_score(score: f64, factors: Vec<ConfidenceFactor>) -> Self {
        let score = score.clamp(0.0, 100.0);
        Self {
            level: score_to_level(score),
            score,
            factors,
        }
    }

    /// Zero-information confidence.
    pub fn insufficient() -> Self {
        Self::from_score(0.0, Vec::new())
    }
}

/// Weighted average over the supplied factors only. The denominator is the
/// sum of the supplied factors' weights, not 1.0 — a single factor at 100
/// yields 100, undiluted by the absent factors' default weights.
pub fn calculate(factors: &[ConfidenceFactor]) -> ConfidenceScore {
    if factors.is_empty() {
        debug!(target: "confidence", "calculate() with no factors, returning insufficient");
        return ConfidenceScore::insufficient();
    }
    let weight_sum: f64 = factors.iter().map(|f| f.weight).sum();
    let score = if weight_sum > f64::EPSILON {
        factors.iter().map(|f| f.weight * f.score).sum::<f64>() / weight_sum
    } else {
        0.0
    };
    ConfidenceScore::from_score(score, factors.to_vec())
}

/// Everything the confidence engine needs to know about one observation.
/// Built by the aggregator from the raw observation and its benchmark
/// lookup; evidence confidences are the upstream per-evidence 0–1 values.
#[derive(Debug, Clone, Default)]
pub struct FindingContext {
    pub value_present: bool,
    /// Per-evidence confidence in [0, 1].
    pub evidence_confidences: Vec<f64>,
    /// Some direct evidence exists in context even if none was attached.
    pub has_direct_evidence: bool,
    /// Benchmark data was attached to the finding.
    pub benchmark_attached: bool,
    /// A benchmark match exists but was not attached.
    pub benchmark_match_known: bool,
    pub source_count: u32,
    pub data_age_days: Option<u32>,
    /// Verified observations get every factor boosted ×1.1 (capped at 100).
    pub is_verified: bool,
}

/// Derive the full factor set from a finding's context and fold it.
pub fn calculate_for_finding(ctx: &FindingContext) -> ConfidenceScore {
    let data_availability = if ctx.value_present {
        ConfidenceFactor::new(FactorKind::DataAvailability, 100.0, "value present")
    } else {
        ConfidenceFactor::new(FactorKind::DataAvailability, 0.0, "no value extracted")
    };

    let evidence_quality = if !ctx.evidence_confidences.is_empty() {
        let mean = ctx.evidence_confidences.iter().sum::<f64>()
            / ctx.evidence_confidences.len() as f64;
        ConfidenceFactor::new(
            FactorKind::EvidenceQuality,
            mean * 100.0,
            format!("mean of {} evidence confidences", ctx.evidence_confidences.len()),
        )
    } else if ctx.has_direct_evidence {
        ConfidenceFactor::new(
            FactorKind::EvidenceQuality,
            50.0,
            "direct evidence in context, none attached",
        )
    } else {
        ConfidenceFactor::new(FactorKind::EvidenceQuality, 20.0, "no supporting evidence")
    };

    let benchmark_match = if ctx.benchmark_attached {
        ConfidenceFactor::new(FactorKind::BenchmarkMatch, 100.0, "benchmark data attached")
    } else if ctx.benchmark_match_known {
        ConfidenceFactor::new(
            FactorKind::BenchmarkMatch,
            70.0,
            "benchmark match exists but was not attached",
        )
    } else {
        ConfidenceFactor::new(FactorKind::BenchmarkMatch, 30.0, "no benchmark match")
    };

    let source_reliability = {
        let (score, why) = match ctx.source_count {
            n if n >= 3 => (100.0, "3+ independent sources"),
            2 => (70.0, "2 sources"),
            1 => (50.0, "single source"),
            _ => (20.0, "no identified source"),
        };
        ConfidenceFactor::new(FactorKind::SourceReliability, score, why)
    };

    let temporal_relevance = {
        let (score, why) = match ctx.data_age_days {
            None => (50.0, "data age unknown".to_string()),
            Some(d) if d <= 30 => (100.0, format!("{d} days old")),
            Some(d) if d <= 90 => (80.0, format!("{d} days old")),
            Some(d) if d <= 180 => (60.0, format!("{d} days old")),
            Some(d) if d <= 365 => (40.0, format!("{d} days old")),
            Some(d) => (20.0, format!("{d} days old, stale")),
        };
        ConfidenceFactor::new(FactorKind::TemporalRelevance, score, why)
    };

    let mut factors = vec![
        data_availability,
        evidence_quality,
        benchmark_match,
        source_reliability,
        temporal_relevance,
    ];

    if ctx.is_verified {
        for f in &mut factors {
            f.score = (f.score * 1.1).min(100.0);
        }
    }

    calculate(&factors)
}

/// Combine many confidence scores into one. Each input is weighted by its
/// own score/100, so higher-confidence inputs dominate. Same-kind factors
/// across inputs are averaged (score and weight both). A singleton input is
/// returned unchanged.
pub fn combine_confidences(inputs: &[ConfidenceScore]) -> ConfidenceScore {
    match inputs.len() {
        0 => {
            debug!(target: "confidence", "combine_confidences() with no inputs");
            return ConfidenceScore::insufficient();
        }
        1 => return inputs[0].clone(),
        _ => {}
    }

    let weight_sum: f64 = inputs.iter().map(|c| c.score / 100.0).sum();
    let combined = if weight_sum > f64::EPSILON {
        inputs
            .iter()
            .map(|c| c.score * (c.score / 100.0))
            .sum::<f64>()
            / weight_sum
    } else {
        // All inputs carry zero confidence; the combination does too.
        0.0
    };

    // Average same-kind factors, preserving first-seen order.
    let mut order: Vec<FactorKind> = Vec::new();
    let mut sums: Vec<(f64, f64, usize)> = Vec::new(); // (score, weight, n)
    for c in inputs {
        for f in &c.factors {
            match order.iter().position(|k| *k == f.kind) {
                Some(i) => {
                    sums[i].0 += f.score;
                    sums[i].1 += f.weight;
                    sums[i].2 += 1;
                }
                None => {
                    order.push(f.kind);
                    sums.push((f.score, f.weight, 1));
                }
            }
        }
    }
    let factors = order
        .into_iter()
        .zip(sums)
        .map(|(kind, (score, weight, n))| ConfidenceFactor {
            kind,
            weight: weight / n as f64,
            score: score / n as f64,
            rationale: format!("Aggregated from {n} sources"),
        })
        .collect();

    ConfidenceScore::from_score(combined, factors)
}
