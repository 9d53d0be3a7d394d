//! Target weight calculation for a selected basket.

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "weights", rename_all = "lowercase")]
pub enum WeightMode {
    #[default]
    Equal,
    Custom(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightAllocation {
    pub weights: Vec<f64>,
    pub warning: Option<String>,
}

fn equal(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

/// Weights for a basket of `n` instruments, always summing to 1 for n >= 1.
///
/// Custom weights use the first `n` supplied values, renormalised. Too few
/// values (or a non-positive total) fall back to equal weighting with a
/// warning rather than failing.
pub fn compute_weights(n: usize, mode: &WeightMode) -> WeightAllocation {
    if n == 0 {
        return WeightAllocation {
            weights: Vec::new(),
            warning: None,
        };
    }

    match mode {
        WeightMode::Equal => WeightAllocation {
            weights: equal(n),
            warning: None,
        },
        WeightMode::Custom(custom) => {
            if custom.len() < n {
                let msg = format!(
                    "{} custom weights supplied for {} instruments; using equal weights",
                    custom.len(),
                    n
                );
                warn!("{msg}");
                return WeightAllocation {
                    weights: equal(n),
                    warning: Some(msg),
                };
            }
            let head: Vec<f64> = custom[..n].iter().map(|w| w.max(0.0)).collect();
            let total: f64 = head.iter().sum();
            if !(total > 0.0) || !total.is_finite() {
                let msg = "custom weights sum to zero; using equal weights".to_string();
                warn!("{msg}");
                return WeightAllocation {
                    weights: equal(n),
                    warning: Some(msg),
                };
            }
            WeightAllocation {
                weights: head.iter().map(|w| w / total).collect(),
                warning: None,
            }
        }
    }
}

/// Scale each weight by its volatility factor and renormalise.
/// Mismatched lengths or a degenerate result leave the weights untouched.
pub fn apply_volatility_tilt(weights: &[f64], factors: &[f64]) -> Vec<f64> {
    if weights.len() != factors.len() {
        return weights.to_vec();
    }
    let tilted: Vec<f64> = weights
        .iter()
        .zip(factors)
        .map(|(w, f)| w * f.max(0.0))
        .collect();
    let total: f64 = tilted.iter().sum();
    if total > 0.0 && total.is_finite() {
        tilted.iter().map(|w| w / total).collect()
    } else {
        weights.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sum(v: &[f64]) -> f64 {
        v.iter().sum()
    }

    #[test]
    fn equal_weights() {
        let a = compute_weights(4, &WeightMode::Equal);
        assert_eq!(a.weights, vec![0.25; 4]);
        assert!(a.warning.is_none());
    }

    #[test]
    fn zero_instruments() {
        assert!(compute_weights(0, &WeightMode::Equal).weights.is_empty());
    }

    #[test]
    fn custom_takes_first_n_and_renormalises() {
        let a = compute_weights(2, &WeightMode::Custom(vec![0.6, 0.2, 0.2]));
        assert!((a.weights[0] - 0.75).abs() < 1e-12);
        assert!((a.weights[1] - 0.25).abs() < 1e-12);
        assert!(a.warning.is_none());
    }

    #[test]
    fn custom_too_few_falls_back_with_warning() {
        let a = compute_weights(3, &WeightMode::Custom(vec![0.5, 0.5]));
        assert_eq!(a.weights.len(), 3);
        assert!((a.weights[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!(a.warning.is_some());
    }

    #[test]
    fn custom_all_zero_falls_back() {
        let a = compute_weights(2, &WeightMode::Custom(vec![0.0, 0.0]));
        assert_eq!(a.weights, vec![0.5, 0.5]);
        assert!(a.warning.is_some());
    }

    #[test]
    fn tilt_favours_higher_factor() {
        let w = apply_volatility_tilt(&[0.5, 0.5], &[1.2, 0.6]);
        assert!((w[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((sum(&w) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tilt_ignores_length_mismatch() {
        assert_eq!(apply_volatility_tilt(&[0.5, 0.5], &[1.0]), vec![0.5, 0.5]);
    }

    proptest! {
        #[test]
        fn equal_weights_sum_to_one(n in 1usize..200) {
            let a = compute_weights(n, &WeightMode::Equal);
            prop_assert_eq!(a.weights.len(), n);
            prop_assert!((sum(&a.weights) - 1.0).abs() < 1e-6);
        }

        #[test]
        fn custom_weights_sum_to_one(
            n in 1usize..20,
            custom in proptest::collection::vec(0.01..10.0_f64, 0..30),
        ) {
            let a = compute_weights(n, &WeightMode::Custom(custom));
            prop_assert_eq!(a.weights.len(), n);
            prop_assert!((sum(&a.weights) - 1.0).abs() < 1e-6);
        }
    }
}
