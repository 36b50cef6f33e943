//! # PFA
//!
//! A MaxEnt phonotactic learner with Probabilistic Feature Attention.
//!
//! ## Overview
//!
//! The learner assigns a probability to every word up to a maximum length over
//! a segment inventory. Each word is scored by weighted violations of
//! automatically generated feature-bundle constraints. Weights are learned by
//! online gradient ascent; with attention below 1 each training step may
//! ignore some features, replacing the datum by a neutralized word built from
//! ambiguous segments.
//!
//! ## Structure
//!
//! - [`core`]: error type, valued features, segment inventory
//! - [`universe`]: enumeration and indexing of all candidate words
//! - [`constraints`]: constraint generation and pattern matching
//! - [`violations`]: violation matrix and its cache
//! - [`ambiguity`]: ambiguous segments and neutralized-word lookup
//! - [`maxent`]: harmony and normalized probabilities
//! - [`training`]: attention sampling and gradient steps
//! - [`simulation`]: run preparation and the language/rep/epoch loop
//! - [`data`]: CSV input tables
//! - [`output`]: per-epoch probability records

pub mod ambiguity;
pub mod constraints;
pub mod core;
pub mod data;
pub mod logging;
pub mod maxent;
pub mod output;
pub mod simulation;
pub mod training;
pub mod universe;
pub mod violations;

pub use crate::core::{FeatureIndex, PfaError, PfaResult, Polarity, SegmentId};
pub use ambiguity::{AmbiguityKey, AmbiguityResolver, AmbiguityTable};
pub use constraints::{Constraint, ConstraintSet, Pattern};
pub use maxent::MaxEntModel;
pub use output::{CsvSink, EpochRecord, JsonlSink, MemorySink, OutputSink};
pub use simulation::{prepare, PreparedRun, Simulation, SimulationSummary};
pub use training::{Attention, AttentionGradientLearner, EpochMetrics};
pub use universe::{UniverseShape, WordUniverse};
pub use violations::{CsvViolationStore, MemoryViolationStore, ViolationMatrix, ViolationStore};

use serde::{Deserialize, Serialize};

/// Run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Passes over the training order per repetition
    pub epochs: usize,
    /// Learning rate
    pub eta: f64,
    /// Probability of attending to each feature on a training step
    pub attention: f64,
    /// Independent repetitions per language, each from zero weights
    pub reps: usize,
    /// RNG seed; `None` draws one at startup
    pub seed: Option<u64>,
    /// Log progress every N epochs
    pub progress_every: usize,
    pub universe: UniverseShape,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            epochs: 200,
            eta: 0.05,
            attention: 1.0,
            reps: 15,
            seed: None,
            progress_every: 10,
            universe: UniverseShape::UpTo,
        }
    }
}

impl Config {
    pub fn validate(&self) -> PfaResult<()> {
        if !(0.0..=1.0).contains(&self.attention) {
            return Err(PfaError::InvalidConfig(format!(
                "attention must be in [0, 1], got {}",
                self.attention
            )));
        }
        if !self.eta.is_finite() || self.eta <= 0.0 {
            return Err(PfaError::InvalidConfig(format!(
                "eta must be finite and positive, got {}",
                self.eta
            )));
        }
        if self.progress_every == 0 {
            return Err(PfaError::InvalidConfig(
                "progress_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let bad = [
            Config {
                attention: 1.5,
                ..Config::default()
            },
            Config {
                attention: f64::NAN,
                ..Config::default()
            },
            Config {
                eta: 0.0,
                ..Config::default()
            },
            Config {
                eta: f64::INFINITY,
                ..Config::default()
            },
            Config {
                progress_every: 0,
                ..Config::default()
            },
        ];
        for config in &bad {
            assert!(matches!(config.validate(), Err(PfaError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_config_serde() {
        let config: Config =
            serde_json::from_str(r#"{"epochs": 3, "attention": 0.5, "universe": "exact"}"#)
                .expect("config");
        assert_eq!(config.epochs, 3);
        assert_eq!(config.attention, 0.5);
        assert_eq!(config.reps, 15);
        assert_eq!(config.universe, UniverseShape::Exact);
    }
}
