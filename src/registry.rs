//! # Metric Registry
//!
//! Static catalogue of metric definitions plus the value normalizer.
//!
//! - Definitions are immutable once registered; the registry is a
//!   read-mostly catalogue populated at startup.
//! - `score_value` turns a raw value (or a benchmark percentile) into a
//!   0–100 score given the metric's directionality.
//! - Unknown metric names never error: every entry point degrades to a
//!   logged neutral default so one bad observation cannot abort a deal.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::weights::Dimension;

/// Neutral score returned for unknown metrics and unscorable inputs.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// How a metric's raw value relates to quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    HigherBetter,
    LowerBetter,
    TargetRange,
}

/// Inclusive target band for `TargetRange` metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub min: f64,
    pub max: f64,
}

/// How the metric's value is produced upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationKind {
    Direct,
    Derived,
    Composite,
}

/// One catalogued metric. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Unique key, lowercase snake_case (e.g. "arr_growth_rate").
    pub name: String,
    pub category: String,
    pub dimension: Dimension,
    /// Relative weight within its dimension.
    pub weight: f64,
    pub direction: MetricDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_range: Option<TargetRange>,
    /// Declared plausible bounds for validation and raw normalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    pub unit: String,
    /// Key used for benchmark lookups (usually equal to `name`).
    pub benchmark_key: String,
    pub calculation: CalculationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl MetricDefinition {
    /// Minimal constructor for a direct, higher-is-better metric.
    /// Builder-style setters cover the rest.
    pub fn new(name: impl Into<String>, dimension: Dimension, weight: f64) -> Self {
        let name = name.into();
        Self {
            benchmark_key: name.clone(),
            name,
            category: String::new(),
            dimension,
            weight,
            direction: MetricDirection::HigherBetter,
            target_range: None,
            min_value: None,
            max_value: None,
            unit: String::new(),
            calculation: CalculationKind::Direct,
            formula: None,
            dependencies: Vec::new(),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn direction(mut self, direction: MetricDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn target_range(mut self, min: f64, max: f64) -> Self {
        self.direction = MetricDirection::TargetRange;
        self.target_range = Some(TargetRange { min, max });
        self
    }

    pub fn bounds(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn derived(mut self, formula: impl Into<String>, deps: &[&str]) -> Self {
        self.calculation = CalculationKind::Derived;
        self.formula = Some(formula.into());
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// Process-wide metric catalogue.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    defs: HashMap<String, MetricDefinition>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. The first registration wins; duplicates are
    /// logged and ignored (definitions are immutable once registered).
    pub fn register(&mut self, def: MetricDefinition) -> bool {
        let key = normalize_name(&def.name);
        if self.defs.contains_key(&key) {
            warn!(target: "registry", metric = %key, "duplicate metric registration ignored");
            return false;
        }
        self.defs.insert(key, def);
        true
    }

    pub fn get(&self, name: &str) -> Option<&MetricDefinition> {
        self.defs.get(&normalize_name(name))
    }

    pub fn by_dimension(&self, dim: Dimension) -> Vec<&MetricDefinition> {
        let mut out: Vec<_> = self.defs.values().filter(|d| d.dimension == dim).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn by_category(&self, category: &str) -> Vec<&MetricDefinition> {
        let cat = category.trim().to_ascii_lowercase();
        let mut out: Vec<_> = self
            .defs
            .values()
            .filter(|d| d.category.to_ascii_lowercase() == cat)
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Soft validation against declared bounds. Returns `false` for values
    /// outside [min, max] or non-finite values; never panics. Unknown
    /// metrics validate as `true` (nothing to check against) with a log.
    pub fn validate_value(&self, name: &str, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        let Some(def) = self.get(name) else {
            warn!(target: "registry", metric = %name, "validate_value on unknown metric");
            return true;
        };
        if let Some(min) = def.min_value {
            if value < min {
                return false;
            }
        }
        if let Some(max) = def.max_value {
            if value > max {
                return false;
            }
        }
        true
    }

    /// Convert a raw value (or benchmark percentile) into a 0–100 score.
    ///
    /// With a percentile, the mapping is direct: higher-better keeps the
    /// percentile, lower-better inverts it, target-range peaks at the 50th
    /// and falls off at 2 score points per percentile point.
    ///
    /// Without a percentile, the raw value is normalized against the
    /// metric's declared bounds. Unknown metrics score a logged neutral 50.
    /// Output is always clamped to [0, 100].
    pub fn score_value(&self, name: &str, value: f64, percentile: Option<f64>) -> f64 {
        let Some(def) = self.get(name) else {
            warn!(target: "registry", metric = %name, "unknown metric, scoring neutral 50");
            return NEUTRAL_SCORE;
        };

        let score = match percentile {
            Some(p) => score_from_percentile(def.direction, p.clamp(0.0, 100.0)),
            None => score_from_raw(def, value),
        };
        score.clamp(0.0, 100.0)
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

fn score_from_percentile(direction: MetricDirection, p: f64) -> f64 {
    match direction {
        MetricDirection::HigherBetter => p,
        MetricDirection::LowerBetter => 100.0 - p,
        // Peaks at the 50th percentile, -2 score points per percentile point
        // of deviation, floored at 0.
        MetricDirection::TargetRange => (100.0 - 2.0 * (p - 50.0).abs()).max(0.0),
    }
}

fn score_from_raw(def: &MetricDefinition, value: f64) -> f64 {
    match def.direction {
        MetricDirection::HigherBetter => {
            let min = def.min_value.unwrap_or(0.0);
            let max = def.max_value.unwrap_or(min * 10.0);
            linear_up(value, min, max)
        }
        MetricDirection::LowerBetter => {
            let min = def.min_value.unwrap_or(0.0);
            let max = def.max_value.unwrap_or(min * 10.0);
            100.0 - linear_up(value, min, max)
        }
        MetricDirection::TargetRange => {
            let Some(range) = def.target_range else {
                warn!(
                    target: "registry",
                    metric = %def.name,
                    "target_range metric without a declared range, scoring neutral 50"
                );
                return NEUTRAL_SCORE;
            };
            target_range_score(value, range)
        }
    }
}

/// Linear map of `[min, max]` onto `[0, 100]`, clamped at both ends.
fn linear_up(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span <= f64::EPSILON {
        // Degenerate bounds: at or above the single point scores full marks.
        return if value >= max { 100.0 } else { 0.0 };
    }
    ((value - min) / span * 100.0).clamp(0.0, 100.0)
}

/// Inside the range: 80–100 by distance from the midpoint.
/// Outside: a distance-proportional penalty from 80 down, floored at 0.
fn target_range_score(value: f64, range: TargetRange) -> f64 {
    let width = (range.max - range.min).max(f64::EPSILON);
    let mid = (range.min + range.max) / 2.0;
    let half = width / 2.0;

    if value >= range.min && value <= range.max {
        let dist = (value - mid).abs();
        100.0 - (dist / half) * 20.0
    } else {
        let outside = if value < range.min {
            range.min - value
        } else {
            value - range.max
        };
        (80.0 - (outside / width) * 40.0).clamp(0.0, 80.0)
    }
}

/// Built-in catalogue of common venture metrics. Usable with zero
/// configuration; callers can register more on top.
pub fn default_seed() -> MetricRegistry {
    let mut reg = MetricRegistry::new();

    let defs = vec![
        MetricDefinition::new("arr_growth_rate", Dimension::Financials, 0.30)
            .category("growth")
            .unit("%")
            .bounds(-50.0, 500.0),
        MetricDefinition::new("net_revenue_retention", Dimension::Financials, 0.25)
            .category("retention")
            .unit("%")
            .bounds(40.0, 200.0),
        MetricDefinition::new("gross_margin", Dimension::Financials, 0.20)
            .category("unit_economics")
            .unit("%")
            .bounds(0.0, 100.0),
        MetricDefinition::new("burn_multiple", Dimension::Financials, 0.15)
            .category("efficiency")
            .direction(MetricDirection::LowerBetter)
            .unit("x")
            .bounds(0.0, 10.0)
            .derived("net_burn / net_new_arr", &["net_burn", "net_new_arr"]),
        MetricDefinition::new("runway_months", Dimension::Financials, 0.10)
            .category("efficiency")
            .unit("months")
            .target_range(12.0, 24.0)
            .bounds(0.0, 60.0),
        MetricDefinition::new("cac_payback_months", Dimension::GtmTraction, 0.35)
            .category("unit_economics")
            .direction(MetricDirection::LowerBetter)
            .unit("months")
            .bounds(0.0, 60.0),
        MetricDefinition::new("logo_retention", Dimension::GtmTraction, 0.30)
            .category("retention")
            .unit("%")
            .bounds(30.0, 100.0),
        MetricDefinition::new("pipeline_coverage", Dimension::GtmTraction, 0.35)
            .category("sales")
            .unit("x")
            .bounds(0.0, 10.0),
        MetricDefinition::new("team_completeness", Dimension::Team, 0.50)
            .category("team")
            .unit("%")
            .bounds(0.0, 100.0),
        MetricDefinition::new("founder_domain_years", Dimension::Team, 0.50)
            .category("team")
            .unit("years")
            .bounds(0.0, 40.0),
        MetricDefinition::new("market_growth_rate", Dimension::Market, 0.60)
            .category("market")
            .unit("%")
            .bounds(-20.0, 100.0),
        MetricDefinition::new("tam_usd_b", Dimension::Market, 0.40)
            .category("market")
            .unit("$B")
            .bounds(0.0, 1000.0),
        MetricDefinition::new("nps", Dimension::ProductTech, 0.50)
            .category("product")
            .unit("score")
            .bounds(-100.0, 100.0),
        MetricDefinition::new("release_cadence_weeks", Dimension::ProductTech, 0.50)
            .category("product")
            .direction(MetricDirection::LowerBetter)
            .unit("weeks")
            .bounds(0.0, 26.0),
        MetricDefinition::new("win_rate", Dimension::Competitive, 1.00)
            .category("competitive")
            .unit("%")
            .bounds(0.0, 100.0),
        MetricDefinition::new("comparable_exit_multiple", Dimension::ExitPotential, 1.00)
            .category("exit")
            .unit("x")
            .bounds(0.0, 50.0),
    ];

    for def in defs {
        reg.register(def);
    }
    reg
}
