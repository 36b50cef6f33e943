//! Maximum-entropy scoring.
//!
//! ## Forward Pass
//!
//! ```text
//! H(w)   = V[w] · weights              (violations are negative, so positive weights penalize)
//! P(w)   = exp(H(w)) / Z
//! Z      = Σ_{w' ∈ universe} exp(H(w'))
//! ```
//!
//! The normalizer always ranges over the entire word universe, whatever rows
//! are being scored. Scoring a neutralized word therefore yields its share of
//! the distribution over all unambiguous and ambiguous strings, not a
//! probability conditioned on the neutralization.
//!
//! `log Z` is computed with the log-sum-exp shift (`m = max H`), which keeps
//! large weights from overflowing `exp` and leaves results unchanged up to
//! floating-point rounding.

use crate::core::{PfaError, PfaResult};
use crate::violations::ViolationMatrix;
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Stateless MaxEnt scorer normalized over a fixed violation matrix.
#[derive(Debug, Clone, Copy)]
pub struct MaxEntModel<'a> {
    normalizer: &'a ViolationMatrix,
}

impl<'a> MaxEntModel<'a> {
    /// `normalizer` is the full-universe violation matrix.
    pub fn new(normalizer: &'a ViolationMatrix) -> Self {
        Self { normalizer }
    }

    pub fn normalizer(&self) -> &'a ViolationMatrix {
        self.normalizer
    }

    fn check_weights(&self, weights: &Array1<f64>) -> PfaResult<()> {
        let n = self.normalizer.dim().1;
        if weights.len() != n {
            return Err(PfaError::ShapeMismatch(format!(
                "Weights: expected {}, got {}",
                n,
                weights.len()
            )));
        }
        Ok(())
    }

    /// `log Z` over the whole universe.
    pub fn log_partition(&self, weights: &Array1<f64>) -> PfaResult<f64> {
        self.check_weights(weights)?;
        Ok(log_sum_exp(&self.normalizer.values().dot(weights)))
    }

    /// Probability of each candidate row, normalized over the universe.
    ///
    /// # Errors
    /// - `ShapeMismatch` if weights or candidate columns disagree with the normalizer
    pub fn predict(
        &self,
        weights: &Array1<f64>,
        candidates: ArrayView2<'_, f64>,
    ) -> PfaResult<Array1<f64>> {
        self.check_weights(weights)?;
        if candidates.ncols() != weights.len() {
            return Err(PfaError::ShapeMismatch(format!(
                "Candidate columns: expected {}, got {}",
                weights.len(),
                candidates.ncols()
            )));
        }
        let log_z = self.log_partition(weights)?;
        Ok(candidates.dot(weights).mapv(|h| (h - log_z).exp()))
    }

    /// Probability of a single violation profile.
    pub fn probability(&self, weights: &Array1<f64>, row: ArrayView1<'_, f64>) -> PfaResult<f64> {
        self.check_weights(weights)?;
        if row.len() != weights.len() {
            return Err(PfaError::ShapeMismatch(format!(
                "Violation row: expected {}, got {}",
                weights.len(),
                row.len()
            )));
        }
        let log_z = self.log_partition(weights)?;
        Ok((row.dot(weights) - log_z).exp())
    }

    /// Probability of every word in the universe.
    pub fn distribution(&self, weights: &Array1<f64>) -> PfaResult<Array1<f64>> {
        self.predict(weights, self.normalizer.values().view())
    }
}

/// `log Σ exp(h)` with the max shift. Empty input gives `-inf`.
pub fn log_sum_exp(harmonies: &Array1<f64>) -> f64 {
    let max = harmonies.fold(f64::NEG_INFINITY, |m, &h| m.max(h));
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + harmonies.mapv(|h| (h - max).exp()).sum().ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use proptest::prelude::*;

    fn matrix() -> ViolationMatrix {
        // Bias, [+voice], [-voice] over {p, b}
        ViolationMatrix::from_array(array![[-1.0, 0.0, -1.0], [-1.0, -1.0, 0.0]])
    }

    #[test]
    fn test_uniform_at_zero_weights() {
        let v = matrix();
        let model = MaxEntModel::new(&v);
        let probs = model.distribution(&Array1::zeros(3)).expect("distribution");
        assert_abs_diff_eq!(probs[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(probs[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_positive_weight_penalizes() {
        let v = matrix();
        let model = MaxEntModel::new(&v);
        let weights = array![0.0, 2.0, 0.0];
        let probs = model.distribution(&weights).expect("distribution");
        // b violates [+voice] once: P(b) = e^-2 / (1 + e^-2)
        let expected = (-2.0f64).exp() / (1.0 + (-2.0f64).exp());
        assert_abs_diff_eq!(probs[1], expected, epsilon = 1e-12);
        assert_abs_diff_eq!(
            model.probability(&weights, v.row(1)).expect("prob"),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_candidate_normalized_over_universe() {
        let v = matrix();
        let model = MaxEntModel::new(&v);
        let weights = array![0.0, 1.0, 0.0];
        let single = model
            .predict(&weights, v.values().slice(ndarray::s![0..1, ..]))
            .expect("predict");
        assert_eq!(single.len(), 1);
        let full = model.distribution(&weights).expect("distribution");
        assert_abs_diff_eq!(single[0], full[0], epsilon = 1e-15);
        assert!(single[0] < 1.0);
    }

    #[test]
    fn test_large_weights_stay_finite() {
        let v = matrix();
        let model = MaxEntModel::new(&v);
        let weights = array![0.0, -1000.0, 1000.0];
        let probs = model.distribution(&weights).expect("distribution");
        assert!(probs.iter().all(|p| p.is_finite()));
        assert_abs_diff_eq!(probs.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_mismatch() {
        let v = matrix();
        let model = MaxEntModel::new(&v);
        assert!(model.distribution(&Array1::zeros(2)).is_err());
        let bad_candidates = Array2::<f64>::zeros((1, 2));
        assert!(model
            .predict(&Array1::zeros(3), bad_candidates.view())
            .is_err());
    }

    #[test]
    fn test_log_sum_exp_empty() {
        assert_eq!(log_sum_exp(&Array1::zeros(0)), f64::NEG_INFINITY);
    }

    proptest! {
        #[test]
        fn prop_distribution_sums_to_one(w in proptest::collection::vec(-20.0f64..20.0, 3)) {
            let v = ViolationMatrix::from_array(array![
                [-1.0, 0.0, -1.0],
                [-1.0, -1.0, 0.0],
                [-2.0, -1.0, -1.0],
                [-2.0, -2.0, 0.0],
            ]);
            let model = MaxEntModel::new(&v);
            let probs = model.distribution(&Array1::from_vec(w)).unwrap();
            prop_assert!((probs.sum() - 1.0).abs() < 1e-9);
        }
    }
}
