//! # Percentile Engine
//!
//! Benchmark-relative percentile computation with graceful degradation.
//!
//! Two interpolation shapes coexist:
//! - 3-anchor (repository rows): p25/median/p75 mapped to percentiles
//!   25/50/75, linear between anchors, slope extrapolation outside with
//!   hard clamps at 0 and 100.
//! - 5-anchor (static table rows): p10..p90 mapped to 10..90, same rules.
//!
//! A zero-width interpolation segment returns the nearer boundary
//! percentile (10 below, 90 above) instead of dividing by zero. Values more
//! than 3×IQR beyond either bound are classified `suspicious` regardless of
//! the computed percentile.

use serde::{Deserialize, Serialize};

use crate::benchmarks::{BenchmarkEntry, StaticBenchmark};

/// Boundary percentile returned for a degenerate lower segment.
const LOW_BOUNDARY_PERCENTILE: f64 = 10.0;
/// Boundary percentile returned for a degenerate upper segment.
const HIGH_BOUNDARY_PERCENTILE: f64 = 90.0;
/// Outlier threshold as a multiple of the interquartile range.
const IQR_OUTLIER_MULTIPLE: f64 = 3.0;

/// Qualitative assessment band for a percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    Exceptional,
    AboveAverage,
    Average,
    BelowAverage,
    Poor,
    /// More than 3×IQR beyond either quartile; treat the value itself as
    /// questionable, whatever its percentile.
    Suspicious,
}

/// Derived percentile assessment. Never stored; recomputed from inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileResult {
    /// Always clamped to [0, 100].
    pub percentile: f64,
    pub assessment: Assessment,
    /// False only when the value landed exactly on an anchor.
    pub interpolated: bool,
    /// The benchmark row the computation used.
    pub benchmark: BenchmarkEntry,
}

/// 3-anchor percentile against a repository benchmark row.
pub fn calculate_percentile(value: f64, benchmark: &BenchmarkEntry) -> PercentileResult {
    let anchors = [
        (benchmark.p25, 25.0),
        (benchmark.median, 50.0),
        (benchmark.p75, 75.0),
    ];
    let (percentile, interpolated) = interpolate(value, &anchors);
    PercentileResult {
        percentile,
        assessment: assess(value, percentile, benchmark.p25, benchmark.p75),
        interpolated,
        benchmark: benchmark.clone(),
    }
}

/// 5-anchor percentile against a static-table row.
pub fn calculate_percentile_static(value: f64, benchmark: &StaticBenchmark) -> PercentileResult {
    let anchors = [
        (benchmark.p10, 10.0),
        (benchmark.p25, 25.0),
        (benchmark.median, 50.0),
        (benchmark.p75, 75.0),
        (benchmark.p90, 90.0),
    ];
    let (percentile, interpolated) = interpolate(value, &anchors);
    PercentileResult {
        percentile,
        assessment: assess(value, percentile, benchmark.p25, benchmark.p75),
        interpolated,
        benchmark: benchmark.to_entry(),
    }
}

/// Piecewise-linear interpolation over ascending `(value, percentile)`
/// anchors, extrapolating past the ends with the slope of the adjacent
/// segment, clamped to [0, 100]. Returns `(percentile, interpolated)`.
fn interpolate(value: f64, anchors: &[(f64, f64)]) -> (f64, bool) {
    // Exact anchor hit: no interpolation.
    for (av, ap) in anchors {
        if value == *av {
            return (*ap, false);
        }
    }

    let (first, second) = (anchors[0], anchors[1]);
    let last = anchors[anchors.len() - 1];
    let second_last = anchors[anchors.len() - 2];

    // Below the lowest anchor: extrapolate with the first segment's slope.
    if value < first.0 {
        if second.0 - first.0 <= f64::EPSILON {
            return (LOW_BOUNDARY_PERCENTILE, true);
        }
        let slope = (second.1 - first.1) / (second.0 - first.0);
        let p = first.1 - (first.0 - value) * slope;
        return (p.max(0.0), true);
    }

    // Above the highest anchor: extrapolate with the last segment's slope.
    if value > last.0 {
        if last.0 - second_last.0 <= f64::EPSILON {
            return (HIGH_BOUNDARY_PERCENTILE, true);
        }
        let slope = (last.1 - second_last.1) / (last.0 - second_last.0);
        let p = last.1 + (value - last.0) * slope;
        return (p.min(100.0), true);
    }

    // Between anchors: linear within the containing segment.
    for pair in anchors.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if value > lo.0 && value < hi.0 {
            // Strictly between distinct anchors, so the width is positive.
            let t = (value - lo.0) / (hi.0 - lo.0);
            return (lo.1 + t * (hi.1 - lo.1), true);
        }
    }

    // Only reachable when equal anchors sandwich the value; treat as the
    // nearer boundary of the degenerate region.
    (50.0, true)
}

/// Assessment bands, with the suspicious-outlier override first.
fn assess(value: f64, percentile: f64, p25: f64, p75: f64) -> Assessment {
    let iqr = p75 - p25;
    if iqr > 0.0
        && (value > p75 + IQR_OUTLIER_MULTIPLE * iqr || value < p25 - IQR_OUTLIER_MULTIPLE * iqr)
    {
        return Assessment::Suspicious;
    }
    if percentile >= 90.0 {
        Assessment::Exceptional
    } else if percentile >= 75.0 {
        Assessment::AboveAverage
    } else if percentile >= 25.0 {
        Assessment::Average
    } else if percentile >= 10.0 {
        Assessment::BelowAverage
    } else {
        Assessment::Poor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::Stage;
    use chrono::Utc;

    /// Seed ARR-growth shaped row: {p25: 100, median: 150, p75: 250}.
    fn bench(p25: f64, median: f64, p75: f64) -> BenchmarkEntry {
        BenchmarkEntry {
            sector: "SaaS B2B".to_string(),
            stage: Stage::Seed,
            metric: "arr_growth_rate".to_string(),
            p25,
            median,
            p75,
            source: "test".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn anchors_map_to_their_percentiles() {
        let b = bench(100.0, 150.0, 250.0);
        let r = calculate_percentile(150.0, &b);
        assert!((r.percentile - 50.0).abs() < 1e-9);
        assert_eq!(r.assessment, Assessment::Average);
        assert!(!r.interpolated);

        assert!((calculate_percentile(100.0, &b).percentile - 25.0).abs() < 1e-9);
        assert!((calculate_percentile(250.0, &b).percentile - 75.0).abs() < 1e-9);
    }

    #[test]
    fn between_anchors_is_linear() {
        let b = bench(100.0, 150.0, 250.0);
        // Halfway between p25 and median.
        let r = calculate_percentile(125.0, &b);
        assert!((r.percentile - 37.5).abs() < 1e-9);
        assert!(r.interpolated);
        // Halfway between median and p75.
        let r = calculate_percentile(200.0, &b);
        assert!((r.percentile - 62.5).abs() < 1e-9);
    }

    #[test]
    fn below_p25_extrapolates_with_lower_slope_floored_at_zero() {
        let b = bench(100.0, 150.0, 250.0);
        // Slope below: 25 percentile points per 50 value points = 0.5/pt.
        let r = calculate_percentile(50.0, &b);
        assert!((r.percentile - 0.0).abs() < 1e-9, "25 - 50*0.5 = 0");
        let r = calculate_percentile(80.0, &b);
        assert!((r.percentile - 15.0).abs() < 1e-9, "25 - 20*0.5 = 15");
        // Far below still floors at 0.
        assert!((calculate_percentile(-500.0, &b).percentile - 0.0).abs() < 1e-9);
    }

    #[test]
    fn above_p75_extrapolates_with_upper_slope_capped_at_100() {
        let b = bench(100.0, 150.0, 250.0);
        // Slope above: 25 percentile points per 100 value points = 0.25/pt.
        let r = calculate_percentile(400.0, &b);
        // 75 + 150*0.25 = 112.5 → capped at 100.
        assert!((r.percentile - 100.0).abs() < 1e-9);
        let r = calculate_percentile(300.0, &b);
        assert!((r.percentile - 87.5).abs() < 1e-9);
    }

    #[test]
    fn values_at_or_below_p25_never_exceed_25() {
        let b = bench(100.0, 150.0, 250.0);
        for v in [-100.0, 0.0, 40.0, 99.9, 100.0] {
            let r = calculate_percentile(v, &b);
            assert!(r.percentile <= 25.0, "v={} p={}", v, r.percentile);
        }
    }

    #[test]
    fn percentile_is_monotonic_in_value() {
        let b = bench(100.0, 150.0, 250.0);
        let mut prev = f64::NEG_INFINITY;
        let mut v = -50.0;
        while v <= 500.0 {
            let p = calculate_percentile(v, &b).percentile;
            assert!(p >= prev - 1e-9, "non-monotonic at v={}", v);
            prev = p;
            v += 2.5;
        }
    }

    #[test]
    fn zero_width_segments_return_boundary_percentiles() {
        // p25 == median: below-range values get the low boundary.
        let b = bench(150.0, 150.0, 250.0);
        let r = calculate_percentile(100.0, &b);
        assert!((r.percentile - 10.0).abs() < 1e-9);
        // median == p75: above-range values get the high boundary.
        let b = bench(100.0, 250.0, 250.0);
        let r = calculate_percentile(300.0, &b);
        assert!((r.percentile - 90.0).abs() < 1e-9);
    }

    #[test]
    fn iqr_outlier_is_suspicious_regardless_of_percentile() {
        let b = bench(100.0, 150.0, 250.0);
        // IQR = 150; bound = 250 + 450 = 700.
        let r = calculate_percentile(800.0, &b);
        assert_eq!(r.assessment, Assessment::Suspicious);
        // And on the low side: 100 - 450 = -350.
        let r = calculate_percentile(-400.0, &b);
        assert_eq!(r.assessment, Assessment::Suspicious);
        // Just inside the bound is merely exceptional/poor, not suspicious.
        assert_ne!(calculate_percentile(650.0, &b).assessment, Assessment::Suspicious);
    }

    #[test]
    fn assessment_bands() {
        let b = bench(100.0, 150.0, 250.0);
        assert_eq!(calculate_percentile(360.0, &b).assessment, Assessment::Exceptional); // p≈102→100
        assert_eq!(calculate_percentile(250.0, &b).assessment, Assessment::AboveAverage); // p=75
        assert_eq!(calculate_percentile(150.0, &b).assessment, Assessment::Average); // p=50
        assert_eq!(calculate_percentile(90.0, &b).assessment, Assessment::BelowAverage); // p=20
        assert_eq!(calculate_percentile(50.0, &b).assessment, Assessment::Poor); // p=0
    }

    #[test]
    fn five_anchor_interpolation_uses_outer_anchors() {
        let b = StaticBenchmark {
            metric: "arr_growth_rate",
            stage: Stage::Seed,
            p10: 40.0,
            p25: 100.0,
            median: 150.0,
            p75: 250.0,
            p90: 400.0,
        };
        // Anchor hits.
        assert!((calculate_percentile_static(40.0, &b).percentile - 10.0).abs() < 1e-9);
        assert!((calculate_percentile_static(400.0, &b).percentile - 90.0).abs() < 1e-9);
        // Between p75 and p90: 325 is halfway → 82.5.
        let r = calculate_percentile_static(325.0, &b);
        assert!((r.percentile - 82.5).abs() < 1e-9);
        // Above p90 extrapolates with the (p75, p90) slope: 15/150 = 0.1/pt.
        let r = calculate_percentile_static(450.0, &b);
        assert!((r.percentile - 95.0).abs() < 1e-9);
    }
}
