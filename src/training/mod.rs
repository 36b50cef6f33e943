//! Online gradient training with Probabilistic Feature Attention.
//!
//! One training step on datum `d` with target mass `t`:
//!
//! 1. **Attention** (only when attention < 1): for each feature name in sorted
//!    order draw `u ~ U[0,1)`; the feature is ignored when `u >= attention`.
//!    The ignored set picks the neutralized word `d'`. Otherwise `d' = d`.
//! 2. **Forward pass**: `p = P(d')` under the current weights, normalized over
//!    the whole universe (see [`crate::maxent`]).
//! 3. **Backward pass**:
//! ```text
//! TD = V[d'] * t          (violations present in the training data)
//! LE = V[d'] * p          (violations expected by the learner)
//! weights' = weights + eta * (TD - LE)
//! ```
//!
//! With attention = 1 this is plain MaxEnt online gradient ascent on the
//! log-likelihood, and no random numbers are drawn for attention at all.
//!
//! Weights are passed by value into each step and returned updated; the
//! caller owns the only copy.

use crate::ambiguity::{AmbiguityKey, AmbiguityResolver};
use crate::core::{FeatureIndex, PfaError, PfaResult};
use crate::maxent::MaxEntModel;
use crate::violations::ViolationMatrix;
use ndarray::{Array1, ArrayView1};
use rand::Rng;

/// Per-feature attention sampling over a fixed, sorted feature list.
#[derive(Debug, Clone)]
pub struct Attention<'a> {
    probability: f64,
    features: Vec<String>,
    resolver: &'a AmbiguityResolver,
}

impl<'a> Attention<'a> {
    /// # Errors
    /// - `InvalidConfig` if `probability` is outside [0, 1]
    pub fn new(
        probability: f64,
        features: &FeatureIndex,
        resolver: &'a AmbiguityResolver,
    ) -> PfaResult<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(PfaError::InvalidConfig(format!(
                "Attention probability must be in [0, 1], got {}",
                probability
            )));
        }
        Ok(Self {
            probability,
            features: features.attention_features(),
            resolver,
        })
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Draw one sample per feature; collect those not attended to.
    pub fn sample_ignored<R: Rng + ?Sized>(&self, rng: &mut R) -> AmbiguityKey {
        let ignored: Vec<&str> = self
            .features
            .iter()
            .filter(|_| rng.gen::<f64>() >= self.probability)
            .map(String::as_str)
            .collect();
        AmbiguityKey::new(ignored)
    }
}

/// Statistics for one pass over the training order.
#[derive(Debug, Clone, Default)]
pub struct EpochMetrics {
    /// Steps taken
    pub num_samples: usize,
    /// Steps whose datum was replaced by a different, neutralized word
    pub num_neutralized: usize,
}

/// MaxEnt learner with optional feature attention.
#[derive(Debug, Clone)]
pub struct AttentionGradientLearner<'a> {
    model: MaxEntModel<'a>,
    eta: f64,
    attention: Option<Attention<'a>>,
}

impl<'a> AttentionGradientLearner<'a> {
    /// Vanilla MaxEnt learner over `violations` with learning rate `eta`.
    pub fn new(violations: &'a ViolationMatrix, eta: f64) -> Self {
        Self {
            model: MaxEntModel::new(violations),
            eta,
            attention: None,
        }
    }

    /// Enable feature attention. Full attention (probability 1) is the
    /// vanilla learner, so it is dropped here and never samples.
    pub fn with_attention(mut self, attention: Attention<'a>) -> Self {
        self.attention = (attention.probability < 1.0).then_some(attention);
        self
    }

    pub fn model(&self) -> &MaxEntModel<'a> {
        &self.model
    }

    pub fn attends_fully(&self) -> bool {
        self.attention.is_none()
    }

    /// Row of the violation matrix this step trains on.
    pub fn attended_row<R: Rng + ?Sized>(&self, datum: usize, rng: &mut R) -> PfaResult<usize> {
        match &self.attention {
            None => Ok(datum),
            Some(attention) => {
                let key = attention.sample_ignored(rng);
                attention.resolver.resolve(datum, &key)
            }
        }
    }

    /// One gradient step on `datum` with training mass `target`.
    ///
    /// # Errors
    /// - `MissingAmbiguity` if the sampled ignored-feature set has no table row
    /// - `NonFiniteWeight` if the update produces a non-finite weight
    pub fn train_step<R: Rng + ?Sized>(
        &self,
        weights: Array1<f64>,
        datum: usize,
        target: f64,
        rng: &mut R,
    ) -> PfaResult<Array1<f64>> {
        let row_idx = self.attended_row(datum, rng)?;
        self.step_on_row(weights, row_idx, target)
    }

    fn step_on_row(
        &self,
        weights: Array1<f64>,
        row_idx: usize,
        target: f64,
    ) -> PfaResult<Array1<f64>> {
        let row = self.model.normalizer().row(row_idx);

        // Forward pass
        let predicted = self.model.probability(&weights, row)?;

        // Backward pass
        let updates = gradient(row, target, predicted) * self.eta;
        let new_weights = weights + &updates;

        if let Some(constraint) = new_weights.iter().position(|w| !w.is_finite()) {
            return Err(PfaError::NonFiniteWeight {
                constraint,
                word: row_idx,
            });
        }
        Ok(new_weights)
    }

    /// Train once on every datum, in `order` after an optional in-place shuffle.
    ///
    /// `targets[i]` is the training mass of word `i`. The shuffle starts from
    /// whatever order the caller passes in.
    pub fn train_epoch<R: Rng + ?Sized>(
        &self,
        mut weights: Array1<f64>,
        order: &mut [usize],
        targets: &Array1<f64>,
        rng: &mut R,
        shuffle: bool,
    ) -> PfaResult<(Array1<f64>, EpochMetrics)> {
        if shuffle {
            shuffle_indices(order, rng);
        }

        let mut metrics = EpochMetrics::default();
        for &datum in order.iter() {
            let target = *targets.get(datum).ok_or_else(|| {
                PfaError::ShapeMismatch(format!(
                    "Datum {} outside training distribution of {}",
                    datum,
                    targets.len()
                ))
            })?;
            let row_idx = self.attended_row(datum, rng)?;
            if row_idx != datum {
                metrics.num_neutralized += 1;
            }
            weights = self.step_on_row(weights, row_idx, target)?;
            metrics.num_samples += 1;
        }
        Ok((weights, metrics))
    }
}

/// `TD - LE` for one violation profile.
///
/// `target` and `predicted` are scalar probabilities of the same word.
pub fn gradient(row: ArrayView1<'_, f64>, target: f64, predicted: f64) -> Array1<f64> {
    let td = &row * target;
    let le = &row * predicted;
    td - le
}

/// Shuffle indices in-place using Fisher-Yates.
pub fn shuffle_indices<R: Rng + ?Sized>(indices: &mut [usize], rng: &mut R) {
    for i in (1..indices.len()).rev() {
        let j = rng.gen_range(0..=i);
        indices.swap(i, j);
    }
}
