//! Standard normal distribution helpers, delegating to `statrs`.

use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use vcube_core::Real;

fn standard_normal() -> Normal {
    Normal::new(0.0, 1.0).expect("standard normal parameters are valid")
}

/// The standard normal probability density function φ(x).
pub fn normal_pdf(x: Real) -> Real {
    standard_normal().pdf(x)
}

/// The standard normal cumulative distribution function Φ(x).
pub fn normal_cdf(x: Real) -> Real {
    standard_normal().cdf(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn pdf_at_zero() {
        let expected = 1.0 / (2.0 * std::f64::consts::PI).sqrt();
        assert_abs_diff_eq!(normal_pdf(0.0), expected, epsilon = 1e-12);
    }

    #[test]
    fn cdf_symmetry() {
        assert_abs_diff_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(normal_cdf(1.0) + normal_cdf(-1.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn cdf_tails() {
        assert!(normal_cdf(-8.0) < 1e-14);
        assert!(normal_cdf(8.0) > 1.0 - 1e-14);
    }
}
