//! # Benchmark Repository Cache
//!
//! Alias-normalized benchmark lookup with a TTL cache and a multi-tier
//! fallback cascade.
//!
//! - All rows are held in memory keyed `sector:stage:metric`; a 5-minute
//!   TTL gates lazy reload from the repository.
//! - Reload is an atomic snapshot swap: concurrent reloads are wasted work,
//!   never a correctness hazard. Repository fetch is the only async
//!   boundary and carries a timeout; on failure the last good snapshot is
//!   retained and flagged stale instead of failing the call.
//! - Fallback order: exact → same sector, nearest stage → generic sector,
//!   same stage → generic sector, any stage → not found. The tier used is
//!   recorded for auditability.
//! - A static 5-point table ({p10..p90} per metric/stage) ships inside the
//!   crate and reconciles non-exact cascade hits.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};
use tracing::{info, warn};

use crate::weights::Stage;

/// Default TTL for the in-memory snapshot.
pub const DEFAULT_TTL_SECS: u64 = 5 * 60;
/// Default timeout on a repository fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Sector used by the generic fallback tiers.
pub const GENERIC_SECTOR: &str = "SaaS B2B";

/// One benchmark row: (sector, stage, metric) → quartiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkEntry {
    pub sector: String,
    pub stage: Stage,
    pub metric: String,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    /// Source citation for the row.
    pub source: String,
    pub updated_at: DateTime<Utc>,
}

impl BenchmarkEntry {
    /// Cache key for this row. Sector and metric are normalized so repo
    /// rows and lookups agree on spelling.
    pub fn key(&self) -> String {
        cache_key(&normalize_sector(&self.sector), self.stage, &normalize_metric(&self.metric))
    }
}

/// Richer 5-point row shipped statically with the crate, keyed
/// (metric, stage) independent of sector. Used as a reconciliation
/// fallback when the repository cascade returns a non-exact match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticBenchmark {
    pub metric: &'static str,
    pub stage: Stage,
    pub p10: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p90: f64,
}

impl StaticBenchmark {
    /// View as a 3-anchor entry (for result bookkeeping).
    pub fn to_entry(&self) -> BenchmarkEntry {
        BenchmarkEntry {
            sector: "ANY".to_string(),
            stage: self.stage,
            metric: self.metric.to_string(),
            p25: self.p25,
            median: self.median,
            p75: self.p75,
            source: "static_table".to_string(),
            updated_at: Utc
                .with_ymd_and_hms(2025, 6, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
        }
    }
}

/// Which fallback tier satisfied a lookup (`None` on the result means exact).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTier {
    /// Same sector + metric, nearest stage by ordinal distance.
    NearestStage,
    /// Generic sector, requested stage.
    GenericSector,
    /// Generic sector, any stage carrying the metric.
    GenericSectorAnyStage,
}

/// Outcome of a cascade lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkLookup {
    pub found: bool,
    pub exact: bool,
    pub benchmark: Option<BenchmarkEntry>,
    pub fallback: Option<FallbackTier>,
}

impl BenchmarkLookup {
    fn miss() -> Self {
        Self {
            found: false,
            exact: false,
            benchmark: None,
            fallback: None,
        }
    }

    fn hit(entry: BenchmarkEntry, fallback: Option<FallbackTier>) -> Self {
        Self {
            found: true,
            exact: fallback.is_none(),
            benchmark: Some(entry),
            fallback,
        }
    }
}

/// Cache observability surfaced to scoring metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheMetadata {
    /// True when the last reload failed and the snapshot is past its TTL.
    pub stale: bool,
    pub entry_count: usize,
    pub loaded_at_unix: Option<u64>,
    pub ttl_secs: u64,
}

/// Read-only benchmark store. The engine never writes through this.
#[async_trait]
pub trait BenchmarkRepository: Send + Sync {
    async fn fetch_all(&self) -> anyhow::Result<Vec<BenchmarkEntry>>;
}

/// Wall-clock source, injected so tests can pin time.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// Real wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    entries: HashMap<String, BenchmarkEntry>,
    loaded_at_unix: Option<u64>,
    stale: bool,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            loaded_at_unix: None,
            stale: false,
        }
    }
}

/// TTL cache over a [`BenchmarkRepository`] plus the fallback cascade.
pub struct BenchmarkCache {
    repo: Arc<dyn BenchmarkRepository>,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
    fetch_timeout: Duration,
    // Atomic-swap discipline: readers clone the Arc, reloads replace it
    // wholesale. Overlapping reloads are duplicate work, not a hazard.
    state: RwLock<Arc<Snapshot>>,
}

impl BenchmarkCache {
    pub fn new(repo: Arc<dyn BenchmarkRepository>) -> Self {
        Self::with_clock(repo, Arc::new(SystemClock))
    }

    pub fn with_clock(repo: Arc<dyn BenchmarkRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            ttl_secs: DEFAULT_TTL_SECS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            state: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    pub fn ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn swap(&self, snap: Snapshot) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snap);
    }

    /// Reload if the snapshot was never loaded or its TTL expired.
    async fn ensure_fresh(&self) {
        let snap = self.snapshot();
        let now = self.clock.now_unix();
        let fresh = snap
            .loaded_at_unix
            .map(|t| now.saturating_sub(t) < self.ttl_secs)
            .unwrap_or(false);
        if !fresh {
            self.refresh().await;
        }
    }

    /// Force a reload. On fetch failure or timeout the previous entries are
    /// retained and the snapshot is flagged stale; scoring calls never fail
    /// because the repository is down.
    pub async fn refresh(&self) {
        let fetched = tokio::time::timeout(self.fetch_timeout, self.repo.fetch_all()).await;
        let now = self.clock.now_unix();

        match fetched {
            Ok(Ok(rows)) => {
                let mut entries = HashMap::with_capacity(rows.len());
                for row in rows {
                    entries.insert(row.key(), row);
                }
                info!(target: "benchmarks", entries = entries.len(), "benchmark cache reloaded");
                self.swap(Snapshot {
                    entries,
                    loaded_at_unix: Some(now),
                    stale: false,
                });
            }
            Ok(Err(e)) => {
                warn!(target: "benchmarks", error = %e, "benchmark fetch failed, serving stale cache");
                self.mark_stale(now);
            }
            Err(_) => {
                warn!(target: "benchmarks", "benchmark fetch timed out, serving stale cache");
                self.mark_stale(now);
            }
        }
    }

    fn mark_stale(&self, now: u64) {
        let prev = self.snapshot();
        self.swap(Snapshot {
            entries: prev.entries.clone(),
            // Bump the clock so the next TTL window retries, rather than
            // re-fetching on every call while the repository is down.
            loaded_at_unix: Some(now),
            stale: true,
        });
    }

    pub fn metadata(&self) -> CacheMetadata {
        let snap = self.snapshot();
        CacheMetadata {
            stale: snap.stale,
            entry_count: snap.entries.len(),
            loaded_at_unix: snap.loaded_at_unix,
            ttl_secs: self.ttl_secs,
        }
    }

    /// Cascade lookup. Names are case-folded and alias-mapped before any
    /// tier is tried.
    pub async fn lookup(&self, sector: &str, stage: Stage, metric: &str) -> BenchmarkLookup {
        self.ensure_fresh().await;
        let snap = self.snapshot();

        let sector = normalize_sector(sector);
        let metric = normalize_metric(metric);

        // Tier 1: exact.
        if let Some(entry) = snap.entries.get(&cache_key(&sector, stage, &metric)) {
            return BenchmarkLookup::hit(entry.clone(), None);
        }

        // Tier 2: same sector + metric, nearest stage by ordinal distance.
        // Ties between equidistant stages go to the earlier stage.
        let mut candidates: Vec<Stage> = Stage::ALL.into_iter().filter(|s| *s != stage).collect();
        candidates.sort_by_key(|s| (s.distance(stage), s.ordinal()));
        for cand in candidates {
            if let Some(entry) = snap.entries.get(&cache_key(&sector, cand, &metric)) {
                return BenchmarkLookup::hit(entry.clone(), Some(FallbackTier::NearestStage));
            }
        }

        // Tier 3: generic sector, requested stage.
        let generic = normalize_sector(GENERIC_SECTOR);
        if generic != sector {
            if let Some(entry) = snap.entries.get(&cache_key(&generic, stage, &metric)) {
                return BenchmarkLookup::hit(entry.clone(), Some(FallbackTier::GenericSector));
            }
        }

        // Tier 4: generic sector, any stage carrying the metric.
        for cand in Stage::ALL {
            if let Some(entry) = snap.entries.get(&cache_key(&generic, cand, &metric)) {
                return BenchmarkLookup::hit(
                    entry.clone(),
                    Some(FallbackTier::GenericSectorAnyStage),
                );
            }
        }

        BenchmarkLookup::miss()
    }

    /// All cached rows for a sector, sorted by (stage, metric).
    pub async fn benchmarks_for_sector(&self, sector: &str) -> Vec<BenchmarkEntry> {
        self.ensure_fresh().await;
        let snap = self.snapshot();
        let sector = normalize_sector(sector);
        let mut out: Vec<_> = snap
            .entries
            .values()
            .filter(|e| normalize_sector(&e.sector) == sector)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.stage, &a.metric).cmp(&(b.stage, &b.metric)));
        out
    }
}

/// What a lookup resolved to after reconciling the repository cascade with
/// the static 5-point table.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedBenchmark {
    /// Repository row, with the fallback tier used (if any).
    Repository(BenchmarkEntry, Option<FallbackTier>),
    /// Exact static-table row.
    StaticTable(&'static StaticBenchmark),
    None,
}

/// Reconciliation rule: an exact repository hit always wins; a non-exact
/// cascade result is preferred only when it came from the same-sector
/// nearest-stage tier; otherwise an exact static-table hit wins. When the
/// static table has no exact row either, whatever the cascade found is used
/// rather than discarding data.
pub fn reconcile(lookup: &BenchmarkLookup, metric: &str, stage: Stage) -> ResolvedBenchmark {
    let static_hit = lookup_static(metric, stage);

    match (&lookup.benchmark, lookup.fallback) {
        (Some(entry), None) => ResolvedBenchmark::Repository(entry.clone(), None),
        (Some(entry), Some(FallbackTier::NearestStage)) => {
            ResolvedBenchmark::Repository(entry.clone(), Some(FallbackTier::NearestStage))
        }
        (Some(entry), tier) => match static_hit {
            Some(s) => ResolvedBenchmark::StaticTable(s),
            None => ResolvedBenchmark::Repository(entry.clone(), tier),
        },
        (None, _) => match static_hit {
            Some(s) => ResolvedBenchmark::StaticTable(s),
            None => ResolvedBenchmark::None,
        },
    }
}

/// Exact (metric, stage) hit in the static 5-point table.
pub fn lookup_static(metric: &str, stage: Stage) -> Option<&'static StaticBenchmark> {
    let metric = normalize_metric(metric);
    STATIC_BENCHMARKS
        .iter()
        .find(|b| b.metric == metric && b.stage == stage)
}

// ---- name normalization ----

static SECTOR_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("saas", "SaaS B2B"),
        ("b2b saas", "SaaS B2B"),
        ("saas b2b", "SaaS B2B"),
        ("enterprise saas", "SaaS B2B"),
        ("b2c", "B2C"),
        ("consumer", "B2C"),
        ("d2c", "B2C"),
        ("deep tech", "DeepTech"),
        ("deeptech", "DeepTech"),
        ("fintech", "FinTech"),
        ("fin tech", "FinTech"),
        ("healthtech", "HealthTech"),
        ("health tech", "HealthTech"),
        ("digital health", "HealthTech"),
        ("marketplace", "Marketplace"),
        ("marketplaces", "Marketplace"),
        ("ai", "AI/ML"),
        ("ml", "AI/ML"),
        ("ai/ml", "AI/ML"),
    ])
});

static METRIC_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("arr growth", "arr_growth_rate"),
        ("arr growth rate", "arr_growth_rate"),
        ("revenue growth", "arr_growth_rate"),
        ("ndr", "net_revenue_retention"),
        ("nrr", "net_revenue_retention"),
        ("net dollar retention", "net_revenue_retention"),
        ("gross margins", "gross_margin"),
        ("gm", "gross_margin"),
        ("burn", "burn_multiple"),
        ("cac payback", "cac_payback_months"),
        ("payback period", "cac_payback_months"),
        ("runway", "runway_months"),
    ])
});

/// Case-fold and alias-map a sector name. Unmapped names pass through
/// unchanged (trimmed only).
pub fn normalize_sector(raw: &str) -> String {
    let folded = raw.trim().to_ascii_lowercase();
    match SECTOR_ALIASES.get(folded.as_str()) {
        Some(canon) => (*canon).to_string(),
        None => raw.trim().to_string(),
    }
}

/// Case-fold and alias-map a metric name. Unmapped names pass through in
/// their folded form (registry keys are lowercase).
pub fn normalize_metric(raw: &str) -> String {
    let folded = raw
        .trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    match METRIC_ALIASES.get(folded.as_str()) {
        Some(canon) => (*canon).to_string(),
        None => folded,
    }
}

fn cache_key(sector: &str, stage: Stage, metric: &str) -> String {
    format!("{}:{}:{}", sector, stage.name(), metric)
}

// ---- static 5-point table ----

/// Static (metric, stage) 5-point rows. Shipped with the engine; not
/// dynamically updated.
pub static STATIC_BENCHMARKS: Lazy<Vec<StaticBenchmark>> = Lazy::new(|| {
    let row = |metric, stage, p10, p25, median, p75, p90| StaticBenchmark {
        metric,
        stage,
        p10,
        p25,
        median,
        p75,
        p90,
    };
    vec![
        // ARR growth rate, %
        row("arr_growth_rate", Stage::Seed, 40.0, 100.0, 150.0, 250.0, 400.0),
        row("arr_growth_rate", Stage::SeriesA, 30.0, 70.0, 110.0, 180.0, 280.0),
        row("arr_growth_rate", Stage::SeriesB, 20.0, 45.0, 75.0, 120.0, 180.0),
        // Net revenue retention, %
        row("net_revenue_retention", Stage::Seed, 75.0, 90.0, 105.0, 120.0, 135.0),
        row("net_revenue_retention", Stage::SeriesA, 80.0, 95.0, 110.0, 125.0, 140.0),
        row("net_revenue_retention", Stage::SeriesB, 85.0, 100.0, 112.0, 125.0, 140.0),
        // Gross margin, %
        row("gross_margin", Stage::Seed, 40.0, 55.0, 68.0, 78.0, 85.0),
        row("gross_margin", Stage::SeriesA, 45.0, 60.0, 72.0, 80.0, 87.0),
        // Burn multiple, x (lower is better; anchors still ascend)
        row("burn_multiple", Stage::SeriesA, 0.8, 1.2, 1.8, 2.8, 4.0),
        row("burn_multiple", Stage::SeriesB, 0.6, 1.0, 1.5, 2.2, 3.2),
        // CAC payback, months
        row("cac_payback_months", Stage::SeriesA, 5.0, 9.0, 14.0, 22.0, 32.0),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_aliases_fold_case_and_map() {
        assert_eq!(normalize_sector("B2B SaaS"), "SaaS B2B");
        assert_eq!(normalize_sector("  saas "), "SaaS B2B");
        assert_eq!(normalize_sector("DeepTech"), "DeepTech");
        // Unmapped passes through unchanged.
        assert_eq!(normalize_sector("Space Mining"), "Space Mining");
    }

    #[test]
    fn metric_aliases_map_to_canonical_keys() {
        assert_eq!(normalize_metric("NRR"), "net_revenue_retention");
        assert_eq!(normalize_metric("ARR  Growth "), "arr_growth_rate");
        assert_eq!(normalize_metric("arr_growth_rate"), "arr_growth_rate");
        assert_eq!(normalize_metric("Weird Metric"), "weird metric");
    }

    #[test]
    fn static_table_exact_lookup_only() {
        assert!(lookup_static("arr_growth_rate", Stage::Seed).is_some());
        assert!(lookup_static("ARR growth", Stage::Seed).is_some());
        assert!(lookup_static("arr_growth_rate", Stage::Later).is_none());
    }

    #[test]
    fn static_rows_have_ascending_anchors() {
        for b in STATIC_BENCHMARKS.iter() {
            assert!(
                b.p10 <= b.p25 && b.p25 <= b.median && b.median <= b.p75 && b.p75 <= b.p90,
                "{} {:?} anchors out of order",
                b.metric,
                b.stage
            );
        }
    }

    #[test]
    fn reconcile_prefers_exact_repository_hit() {
        let entry = StaticBenchmark::to_entry(lookup_static("arr_growth_rate", Stage::Seed).unwrap());
        let lookup = BenchmarkLookup {
            found: true,
            exact: true,
            benchmark: Some(entry.clone()),
            fallback: None,
        };
        match reconcile(&lookup, "arr_growth_rate", Stage::Seed) {
            ResolvedBenchmark::Repository(_, None) => {}
            other => panic!("expected exact repository result, got {:?}", other),
        }
    }

    #[test]
    fn reconcile_keeps_nearest_stage_over_static() {
        let entry = StaticBenchmark::to_entry(lookup_static("arr_growth_rate", Stage::SeriesA).unwrap());
        let lookup = BenchmarkLookup {
            found: true,
            exact: false,
            benchmark: Some(entry),
            fallback: Some(FallbackTier::NearestStage),
        };
        match reconcile(&lookup, "arr_growth_rate", Stage::Seed) {
            ResolvedBenchmark::Repository(_, Some(FallbackTier::NearestStage)) => {}
            other => panic!("expected nearest-stage repository result, got {:?}", other),
        }
    }

    #[test]
    fn reconcile_prefers_static_over_generic_sector_fallback() {
        let entry = StaticBenchmark::to_entry(lookup_static("arr_growth_rate", Stage::Seed).unwrap());
        let lookup = BenchmarkLookup {
            found: true,
            exact: false,
            benchmark: Some(entry),
            fallback: Some(FallbackTier::GenericSector),
        };
        match reconcile(&lookup, "arr_growth_rate", Stage::Seed) {
            ResolvedBenchmark::StaticTable(s) => {
                assert_eq!(s.metric, "arr_growth_rate");
                assert_eq!(s.stage, Stage::Seed);
            }
            other => panic!("expected static-table result, got {:?}", other),
        }
    }

    #[test]
    fn reconcile_miss_falls_back_to_static_then_none() {
        let miss = BenchmarkLookup::miss();
        assert!(matches!(
            reconcile(&miss, "arr_growth_rate", Stage::Seed),
            ResolvedBenchmark::StaticTable(_)
        ));
        assert!(matches!(
            reconcile(&miss, "made_up_metric", Stage::Seed),
            ResolvedBenchmark::None
        ));
    }
}
