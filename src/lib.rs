// src/lib.rs
// Public library surface for the scoring engine (library boundary only —
// no CLI, no wire protocol).

pub mod aggregate;
pub mod benchmarks;
pub mod confidence;
pub mod percentile;
pub mod registry;
pub mod weights;

// ---- Re-exports for stable public API ----
// The terminal artifact and its inputs.
pub use crate::aggregate::{
    DealInput, DealScorer, DimensionScore, Evidence, ObjectiveDealScore, ObservedValue,
    RawObservation, ScoredFinding,
};
// Benchmark boundary types callers implement or inspect.
pub use crate::benchmarks::{
    BenchmarkCache, BenchmarkEntry, BenchmarkLookup, BenchmarkRepository, Clock, FallbackTier,
    SystemClock,
};
pub use crate::confidence::{ConfidenceLevel, ConfidenceScore};
pub use crate::percentile::{Assessment, PercentileResult};
pub use crate::registry::{MetricDefinition, MetricDirection, MetricRegistry};
pub use crate::weights::{Dimension, DimensionWeights, Stage, WeightPolicy};
