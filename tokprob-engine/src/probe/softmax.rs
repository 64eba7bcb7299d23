//! Exponential normalization of a logits vector into probabilities.

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
type Result<T> = crate::error::Result<T>;

/// How logits are exponentiated.
///
/// Both strategies produce the same distribution within float tolerance
/// whenever `Naive` does not overflow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Subtract the maximum logit before exponentiating; never overflows.
    #[default]
    Stable,
    /// Exponentiate raw logits; overflows once a logit exceeds ~88.
    Naive,
}

/// Convert logits into a probability distribution of the same length.
///
/// Fails with [`ProbeError::Numeric`] on NaN or `+inf` logits, or when the
/// exponentials sum to zero or a non-finite value. The result is never
/// coerced into a default distribution.
pub fn normalize(logits: &[f32], normalization: Normalization) -> Result<Vec<f32>> {
    if let Some(i) = logits
        .iter()
        .position(|x| x.is_nan() || *x == f32::INFINITY)
    {
        return Err(ProbeError::Numeric(format!(
            "logit {} is {}",
            i, logits[i]
        )));
    }

    let shift = match normalization {
        Normalization::Stable => logits.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        Normalization::Naive => 0.0,
    };
    if shift == f32::NEG_INFINITY {
        return Err(ProbeError::Numeric(
            "every logit is -inf, nothing to normalize".to_string(),
        ));
    }

    let mut probs: Vec<f32> = logits.iter().map(|&x| (x - shift).exp()).collect();
    // f64 accumulation keeps the sum accurate over 100k+ entries
    let sum: f64 = probs.iter().map(|&p| p as f64).sum();
    if sum == 0.0 || !sum.is_finite() {
        return Err(ProbeError::Numeric(format!(
            "sum of exponentials is {} over {} logits",
            sum,
            logits.len()
        )));
    }

    for p in probs.iter_mut() {
        *p = (*p as f64 / sum) as f32;
    }
    Ok(probs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f32 = 1e-5;

    fn sample_logits() -> Vec<f32> {
        (0..1000)
            .map(|i| ((i * 37 % 101) as f32 - 50.0) * 0.2)
            .collect()
    }

    fn assert_distribution(probs: &[f32]) {
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < TOL, "sum = {}", sum);
        assert!(probs.iter().all(|&p| p >= 0.0));
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() < TOL, "index {}: {} vs {}", i, x, y);
        }
    }

    #[test]
    fn test_sums_to_one() {
        for mode in [Normalization::Stable, Normalization::Naive] {
            let probs = normalize(&sample_logits(), mode).unwrap();
            assert_eq!(probs.len(), 1000);
            assert_distribution(&probs);
        }
    }

    #[test]
    fn test_known_values() {
        let probs = normalize(&[0.0, 0.0, 2.0f32.ln()], Normalization::Stable).unwrap();
        assert_close(&probs, &[0.25, 0.25, 0.5]);
    }

    #[test]
    fn test_shift_invariance() {
        let logits = sample_logits();
        let base = normalize(&logits, Normalization::Stable).unwrap();
        for c in [-30.0f32, -1.5, 0.25, 7.0, 40.0] {
            let shifted: Vec<f32> = logits.iter().map(|x| x + c).collect();
            assert_close(&normalize(&shifted, Normalization::Stable).unwrap(), &base);
            assert_close(&normalize(&shifted, Normalization::Naive).unwrap(), &base);
        }
    }

    #[test]
    fn test_strategies_agree() {
        let logits = sample_logits();
        let stable = normalize(&logits, Normalization::Stable).unwrap();
        let naive = normalize(&logits, Normalization::Naive).unwrap();
        assert_close(&stable, &naive);
    }

    #[test]
    fn test_stable_survives_large_logits() {
        let probs = normalize(&[1000.0, 999.0, 0.0], Normalization::Stable).unwrap();
        assert_distribution(&probs);
        assert!(probs[0] > probs[1]);
        assert!(probs[2] < 1e-30);
    }

    #[test]
    fn test_naive_overflow_is_numeric_error() {
        let err = normalize(&[1000.0, 999.0, 0.0], Normalization::Naive).unwrap_err();
        assert!(matches!(err, ProbeError::Numeric(_)));
    }

    #[test]
    fn test_naive_underflow_is_numeric_error() {
        let err = normalize(&[-1000.0, -2000.0], Normalization::Naive).unwrap_err();
        assert!(matches!(err, ProbeError::Numeric(_)));
    }

    #[test]
    fn test_nan_logit_rejected() {
        for mode in [Normalization::Stable, Normalization::Naive] {
            let err = normalize(&[0.5, f32::NAN, 1.0], mode).unwrap_err();
            assert!(matches!(err, ProbeError::Numeric(_)));
        }
    }

    #[test]
    fn test_positive_infinity_rejected() {
        let err = normalize(&[0.5, f32::INFINITY], Normalization::Stable).unwrap_err();
        assert!(matches!(err, ProbeError::Numeric(_)));
    }

    #[test]
    fn test_negative_infinity_masks_token() {
        let probs = normalize(&[0.0, f32::NEG_INFINITY, 0.0], Normalization::Stable).unwrap();
        assert_close(&probs, &[0.5, 0.0, 0.5]);
    }

    #[test]
    fn test_all_negative_infinity_rejected() {
        let err = normalize(&[f32::NEG_INFINITY; 4], Normalization::Stable).unwrap_err();
        assert!(matches!(err, ProbeError::Numeric(_)));
    }

    #[test]
    fn test_empty_logits_rejected() {
        assert!(normalize(&[], Normalization::Stable).is_err());
    }

    #[test]
    fn test_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            normalization: Normalization,
        }
        let w: Wrapper = toml::from_str("normalization = \"naive\"").unwrap();
        assert_eq!(w.normalization, Normalization::Naive);
    }
}
