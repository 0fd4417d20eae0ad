// tests/deal_scoring.rs
//
// End-to-end: raw observations → findings → dimension scores → deal score,
// against a fake repository. Checks the degradation paths (unknown metric,
// missing value, no benchmark) surface in metadata instead of failing.

use async_trait::async_trait;
use chrono::Utc;
use deal_scoring_engine::aggregate::{ExclusionReason, MIN_FINDINGS_PER_DIMENSION};
use deal_scoring_engine::{
    BenchmarkCache, BenchmarkEntry, BenchmarkRepository, ConfidenceLevel, DealInput, DealScorer,
    Dimension, Evidence, ObservedValue, RawObservation, Stage, WeightPolicy,
};
use std::sync::Arc;

struct FixtureRepo;

#[async_trait]
impl BenchmarkRepository for FixtureRepo {
    async fn fetch_all(&self) -> anyhow::Result<Vec<BenchmarkEntry>> {
        let entry = |stage, metric: &str, p25, median, p75| BenchmarkEntry {
            sector: "SaaS B2B".to_string(),
            stage,
            metric: metric.to_string(),
            p25,
            median,
            p75,
            source: "fixture".to_string(),
            updated_at: Utc::now(),
        };
        Ok(vec![
            entry(Stage::Seed, "arr_growth_rate", 100.0, 150.0, 250.0),
            entry(Stage::Seed, "net_revenue_retention", 90.0, 105.0, 120.0),
            entry(Stage::Seed, "gross_margin", 55.0, 68.0, 78.0),
            entry(Stage::Seed, "team_completeness", 40.0, 60.0, 80.0),
            entry(Stage::Seed, "founder_domain_years", 2.0, 5.0, 10.0),
        ])
    }
}

/// Install a test subscriber once so the engine's degradation warnings are
/// visible under `RUST_LOG=warn cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scorer() -> DealScorer {
    init_tracing();
    DealScorer::new(
        deal_scoring_engine::registry::default_seed(),
        BenchmarkCache::new(Arc::new(FixtureRepo)),
        WeightPolicy::default_seed(),
    )
}

fn obs(metric: &str, value: f64) -> RawObservation {
    RawObservation {
        metric: metric.to_string(),
        category: String::new(),
        value: ObservedValue::Number(value),
        unit: None,
        evidence: vec![Evidence {
            kind: "document".to_string(),
            content: format!("{metric} extracted from data room"),
            source: "data_room".to_string(),
            confidence: 0.9,
        }],
        source_count: 2,
        data_age_days: Some(20),
        has_direct_evidence: true,
        is_verified: false,
    }
}

fn saas_seed_deal() -> DealInput {
    DealInput {
        sector: "saas".to_string(),
        stage: "seed".to_string(),
        observations: vec![
            obs("arr_growth_rate", 150.0),
            obs("net_revenue_retention", 120.0),
            obs("gross_margin", 72.0),
            obs("team_completeness", 80.0),
            obs("founder_domain_years", 8.0),
        ],
    }
}

#[tokio::test]
async fn full_deal_produces_bounded_scores_and_full_dimension_map() {
    let result = scorer().score_deal(&saas_seed_deal()).await;

    assert!(result.score >= 0.0 && result.score <= 100.0);
    assert_eq!(result.dimensions.len(), 7);
    assert_eq!(result.findings.len(), 5);
    assert_eq!(result.metadata.finding_count, 5);
    assert_eq!(result.metadata.benchmarks_used, 5);
    assert!(!result.metadata.benchmark_cache_stale);

    // Dimension weights always carry the renormalized vector.
    let weight_sum: f64 = result.dimensions.iter().map(|d| d.weight).sum();
    assert!((weight_sum - 1.0).abs() < 0.001);

    // Findings order and ids are stable.
    assert_eq!(result.findings[0].id, "f-001");
    assert_eq!(result.findings[0].metric, "arr_growth_rate");
}

#[tokio::test]
async fn dimensions_with_enough_findings_get_scores_others_do_not() {
    let result = scorer().score_deal(&saas_seed_deal()).await;

    let dim = |d: Dimension| result.dimensions.iter().find(|x| x.dimension == d).unwrap();

    // Financials has 3 findings, Team has 2: both at or above threshold.
    assert!(dim(Dimension::Financials).finding_ids.len() >= MIN_FINDINGS_PER_DIMENSION);
    assert!(dim(Dimension::Financials).score.is_some());
    assert!(dim(Dimension::Team).score.is_some());

    // Market got no observations: no fabricated score, no confidence.
    let market = dim(Dimension::Market);
    assert!(market.score.is_none());
    assert!(market.finding_ids.is_empty());
    assert_eq!(market.confidence.level, ConfidenceLevel::Insufficient);
}

#[tokio::test]
async fn single_finding_dimension_is_low_confidence_not_scored() {
    let mut deal = saas_seed_deal();
    deal.observations.push(obs("market_growth_rate", 25.0));
    let result = scorer().score_deal(&deal).await;

    let market = result
        .dimensions
        .iter()
        .find(|d| d.dimension == Dimension::Market)
        .unwrap();
    assert_eq!(market.finding_ids.len(), 1);
    assert!(market.score.is_none(), "one finding is below the threshold");
    assert!(
        market.confidence.level <= ConfidenceLevel::Low,
        "under-threshold dimension is marked low-confidence"
    );
}

#[tokio::test]
async fn degraded_observations_are_recorded_not_fatal() {
    let mut deal = saas_seed_deal();
    // Unknown metric, missing value, and an out-of-bounds value.
    deal.observations.push(obs("mystery_metric", 12.0));
    deal.observations.push(RawObservation {
        value: ObservedValue::Missing,
        ..obs("nps", 0.0)
    });
    deal.observations.push(obs("gross_margin", 150.0));

    let result = scorer().score_deal(&deal).await;
    assert_eq!(result.findings.len(), 8, "every observation yields a finding");

    let reason_for = |metric: &str| {
        result
            .metadata
            .excluded
            .iter()
            .find(|e| e.metric == metric)
            .map(|e| e.reason)
    };
    assert_eq!(reason_for("mystery_metric"), Some(ExclusionReason::UnknownMetric));
    assert_eq!(reason_for("nps"), Some(ExclusionReason::NonNumericValue));
    // The second gross_margin observation is the out-of-bounds one.
    assert!(result
        .metadata
        .excluded
        .iter()
        .any(|e| e.metric == "gross_margin" && e.reason == ExclusionReason::OutOfBounds));

    // Unknown metric still yields a neutral finding.
    let mystery = result
        .findings
        .iter()
        .find(|f| f.metric == "mystery_metric")
        .unwrap();
    assert!((mystery.normalized_score - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn no_benchmark_finding_is_annotated_and_still_contributes() {
    let mut deal = saas_seed_deal();
    // win_rate is in the registry but has no benchmark row anywhere.
    deal.observations.push(obs("win_rate", 30.0));
    deal.observations.push(obs("win_rate_x", 30.0)); // unknown, ignore

    let result = scorer().score_deal(&deal).await;
    let win = result.findings.iter().find(|f| f.metric == "win_rate").unwrap();
    assert!(win.percentile.is_none());
    assert!(win.benchmark_used.is_none());
    // Raw normalization still produced a real score (bounds [0, 100]).
    assert!((win.normalized_score - 30.0).abs() < 1e-9);

    assert!(result
        .metadata
        .excluded
        .iter()
        .any(|e| e.metric == "win_rate" && e.reason == ExclusionReason::NoBenchmark));

    let competitive = result
        .dimensions
        .iter()
        .find(|d| d.dimension == Dimension::Competitive)
        .unwrap();
    assert_eq!(
        competitive.finding_ids.len(),
        1,
        "no-benchmark finding still counts toward its dimension"
    );
}

#[tokio::test]
async fn alias_stage_and_sector_labels_resolve() {
    let mut deal = saas_seed_deal();
    deal.sector = "B2B SaaS".to_string();
    deal.stage = "Seed".to_string();
    let result = scorer().score_deal(&deal).await;
    assert_eq!(result.metadata.benchmarks_used, 5);
}

#[tokio::test]
async fn global_confidence_reflects_finding_confidence() {
    let result = scorer().score_deal(&saas_seed_deal()).await;
    // Well-evidenced, benchmarked, fresh observations: every scored finding
    // should be high confidence, and the blend should not be insufficient.
    for f in &result.findings {
        assert!(f.confidence.score > 50.0, "{} too low", f.metric);
    }
    assert!(result.confidence.score > 0.0);
    assert!(result.metadata.expected_variance >= 0.0);
    assert!(
        (result.metadata.expected_variance - (100.0 - result.confidence.score) * 0.15).abs()
            < 1e-9
    );
}

#[tokio::test]
async fn empty_deal_degrades_to_neutral() {
    let deal = DealInput {
        sector: "saas".to_string(),
        stage: "seed".to_string(),
        observations: Vec::new(),
    };
    let result = scorer().score_deal(&deal).await;
    assert!((result.score - 50.0).abs() < 1e-9);
    assert_eq!(result.confidence.level, ConfidenceLevel::Insufficient);
    assert!(result.findings.is_empty());
}
