//! # Dimension Weights
//!
//! Stage-based dimension weights with sector-specific adjustment.
//!
//! - A static base table encodes the policy thesis: team dominates early
//!   stages, financials dominate late stages.
//! - A sparse sector table applies multipliers on top of the stage row
//!   (e.g. deeptech boosts product/tech and discounts GTM traction).
//! - After adjustment the 7-entry vector is renormalized to sum to 1.00,
//!   rounded to 2 decimals, with any residual assigned deterministically.
//! - Optionally loads a policy override from JSON config (weights +
//!   multipliers), falling back to the built-in seed on any error.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};
use tracing::warn;

/// Tolerance for "sums to 1.00" checks across the crate.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

/// Investment stage, ordered from earliest to latest.
///
/// The ordering is load-bearing: benchmark fallback picks the nearest stage
/// by ordinal distance on this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    PreSeed,
    Seed,
    SeriesA,
    SeriesB,
    SeriesC,
    Later,
}

impl Stage {
    /// All stages in ordinal order.
    pub const ALL: [Stage; 6] = [
        Stage::PreSeed,
        Stage::Seed,
        Stage::SeriesA,
        Stage::SeriesB,
        Stage::SeriesC,
        Stage::Later,
    ];

    /// Position on the ordered stage list.
    pub fn ordinal(self) -> usize {
        match self {
            Stage::PreSeed => 0,
            Stage::Seed => 1,
            Stage::SeriesA => 2,
            Stage::SeriesB => 3,
            Stage::SeriesC => 4,
            Stage::Later => 5,
        }
    }

    /// Ordinal distance to another stage.
    pub fn distance(self, other: Stage) -> usize {
        self.ordinal().abs_diff(other.ordinal())
    }

    /// Canonical name as used in benchmark keys.
    pub fn name(self) -> &'static str {
        match self {
            Stage::PreSeed => "PRE_SEED",
            Stage::Seed => "SEED",
            Stage::SeriesA => "SERIES_A",
            Stage::SeriesB => "SERIES_B",
            Stage::SeriesC => "SERIES_C",
            Stage::Later => "LATER",
        }
    }

    /// Parse a free-form stage label (case-insensitive, common aliases).
    /// Unknown labels return `None`; callers pick their own fallback.
    pub fn parse(raw: &str) -> Option<Stage> {
        let s = raw
            .trim()
            .to_ascii_lowercase()
            .replace(['-', '_'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match s.as_str() {
            "pre seed" | "preseed" | "angel" => Some(Stage::PreSeed),
            "seed" => Some(Stage::Seed),
            "series a" | "a" | "a round" => Some(Stage::SeriesA),
            "series b" | "b" | "b round" => Some(Stage::SeriesB),
            "series c" | "c" | "c round" => Some(Stage::SeriesC),
            "later" | "growth" | "series d" | "series e" | "pre ipo" => Some(Stage::Later),
            _ => None,
        }
    }
}

/// The seven evaluation dimensions findings roll up into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Team,
    Financials,
    Market,
    ProductTech,
    GtmTraction,
    Competitive,
    ExitPotential,
}

impl Dimension {
    /// Fixed iteration order used everywhere weights are folded.
    pub const ALL: [Dimension; 7] = [
        Dimension::Team,
        Dimension::Financials,
        Dimension::Market,
        Dimension::ProductTech,
        Dimension::GtmTraction,
        Dimension::Competitive,
        Dimension::ExitPotential,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Dimension::Team => "team",
            Dimension::Financials => "financials",
            Dimension::Market => "market",
            Dimension::ProductTech => "product_tech",
            Dimension::GtmTraction => "gtm_traction",
            Dimension::Competitive => "competitive",
            Dimension::ExitPotential => "exit_potential",
        }
    }
}

/// A full 7-entry weight vector. Always kept normalized (sum 1.00 ± 0.001)
/// by the functions that produce it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionWeights {
    pub team: f64,
    pub financials: f64,
    pub market: f64,
    pub product_tech: f64,
    pub gtm_traction: f64,
    pub competitive: f64,
    pub exit_potential: f64,
}

impl DimensionWeights {
    pub fn get(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Team => self.team,
            Dimension::Financials => self.financials,
            Dimension::Market => self.market,
            Dimension::ProductTech => self.product_tech,
            Dimension::GtmTraction => self.gtm_traction,
            Dimension::Competitive => self.competitive,
            Dimension::ExitPotential => self.exit_potential,
        }
    }

    pub fn set(&mut self, dim: Dimension, value: f64) {
        match dim {
            Dimension::Team => self.team = value,
            Dimension::Financials => self.financials = value,
            Dimension::Market => self.market = value,
            Dimension::ProductTech => self.product_tech = value,
            Dimension::GtmTraction => self.gtm_traction = value,
            Dimension::Competitive => self.competitive = value,
            Dimension::ExitPotential => self.exit_potential = value,
        }
    }

    pub fn sum(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.get(*d)).sum()
    }

    /// Iterate `(dimension, weight)` in the fixed dimension order.
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, f64)> + '_ {
        Dimension::ALL.iter().map(move |d| (*d, self.get(*d)))
    }
}

/// Base weights per stage. Rows are policy configuration, not computed;
/// each literal row sums to 1.00.
pub fn base_weights(stage: Stage) -> DimensionWeights {
    let row = |team, financials, market, product_tech, gtm_traction, competitive, exit_potential| {
        DimensionWeights {
            team,
            financials,
            market,
            product_tech,
            gtm_traction,
            competitive,
            exit_potential,
        }
    };
    match stage {
        Stage::PreSeed => row(0.40, 0.05, 0.20, 0.15, 0.05, 0.10, 0.05),
        Stage::Seed => row(0.30, 0.10, 0.20, 0.15, 0.10, 0.10, 0.05),
        Stage::SeriesA => row(0.20, 0.20, 0.15, 0.15, 0.15, 0.08, 0.07),
        Stage::SeriesB => row(0.15, 0.25, 0.12, 0.12, 0.15, 0.08, 0.13),
        Stage::SeriesC => row(0.12, 0.30, 0.10, 0.10, 0.15, 0.06, 0.17),
        Stage::Later => row(0.10, 0.35, 0.10, 0.10, 0.15, 0.05, 0.15),
    }
}

/// Weight policy: stage base rows plus sparse sector multipliers.
/// Loads from JSON config or falls back to the built-in seed.
#[derive(Debug, Clone, Deserialize)]
pub struct WeightPolicy {
    /// Sparse (sector → dimension → multiplier) adjustments. Sector keys are
    /// matched case-insensitively against the deal's declared sector.
    #[serde(default)]
    pub sector_multipliers: HashMap<String, HashMap<Dimension, f64>>,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl WeightPolicy {
    /// Load policy from a JSON file.
    /// Falls back to `default_seed()` on read or parse error (logged).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                warn!(target: "weights", error = %e, "invalid weight policy file, using seed");
                Self::default_seed()
            }),
            Err(_) => Self::default_seed(),
        }
    }

    /// Built-in multiplier seed for common sectors.
    pub fn default_seed() -> Self {
        let mut sector_multipliers = HashMap::new();

        const SAAS: &[(Dimension, f64)] = &[
            (Dimension::Financials, 1.3),
            (Dimension::GtmTraction, 1.3),
            (Dimension::ProductTech, 0.8),
        ];
        const DEEPTECH: &[(Dimension, f64)] = &[
            (Dimension::ProductTech, 1.5),
            (Dimension::GtmTraction, 0.5),
        ];
        let rows: [(&str, &[(Dimension, f64)]); 8] = [
            ("saas", SAAS),
            ("saas b2b", SAAS),
            ("b2b saas", SAAS),
            ("deeptech", DEEPTECH),
            ("deep tech", DEEPTECH),
            (
                "fintech",
                &[
                    (Dimension::Financials, 1.4),
                    (Dimension::Competitive, 1.2),
                ],
            ),
            (
                "marketplace",
                &[
                    (Dimension::GtmTraction, 1.4),
                    (Dimension::ProductTech, 0.7),
                ],
            ),
            (
                "biotech",
                &[
                    (Dimension::ProductTech, 1.6),
                    (Dimension::ExitPotential, 1.2),
                    (Dimension::GtmTraction, 0.4),
                ],
            ),
        ];

        for (sector, muls) in rows {
            sector_multipliers.insert(sector.to_string(), muls.iter().copied().collect());
        }

        Self { sector_multipliers }
    }

    /// Multipliers for a sector, matched case-insensitively on the trimmed
    /// label. A sector with no row gets no adjustment.
    fn multipliers_for(&self, sector: &str) -> Option<&HashMap<Dimension, f64>> {
        let key = sector.trim().to_ascii_lowercase();
        self.sector_multipliers.get(&key)
    }

    /// The full weight vector for a deal: stage base row, sector multipliers,
    /// renormalization to sum 1.00.
    ///
    /// Renormalization: each weight is divided by the adjusted total and
    /// rounded to 2 decimals. Any residual |sum − 1.00| > 0.001 is added to
    /// the dimension currently holding the largest weight; ties go to the
    /// lexicographically-first dimension name.
    pub fn weights_for_deal(&self, stage: Stage, sector: &str) -> DimensionWeights {
        let mut w = base_weights(stage);

        if let Some(muls) = self.multipliers_for(sector) {
            for (dim, m) in muls {
                w.set(*dim, w.get(*dim) * m);
            }
        }

        renormalize(&mut w);
        w
    }
}

/// Divide by the total, round to 2 decimals, push any rounding residual onto
/// the largest weight (lexicographic dimension-name tie-break).
fn renormalize(w: &mut DimensionWeights) {
    let total = w.sum();
    if total <= f64::EPSILON {
        // Degenerate policy row; fall back to an even split.
        warn!(target: "weights", "weight vector collapsed to zero, using even split");
        for dim in Dimension::ALL {
            w.set(dim, 1.0 / 7.0);
        }
        return;
    }

    for dim in Dimension::ALL {
        let v = w.get(dim) / total;
        w.set(dim, (v * 100.0).round() / 100.0);
    }

    let residual = 1.0 - w.sum();
    if residual.abs() > WEIGHT_SUM_TOLERANCE {
        let target = largest_dimension(w);
        w.set(target, w.get(target) + residual);
    }
}

/// Dimension holding the largest weight; ties resolved by the
/// lexicographically-first dimension name.
fn largest_dimension(w: &DimensionWeights) -> Dimension {
    let mut best = Dimension::ALL[0];
    for dim in Dimension::ALL {
        let v = w.get(dim);
        let b = w.get(best);
        if v > b || (v == b && dim.name() < best.name()) {
            best = dim;
        }
    }
    best
}
