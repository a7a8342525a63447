//! Hagan et al. (2002) SABR implied-volatility formula.
//!
//! The inputs are effective rates: for shifted-lognormal quotes the caller
//! passes `forward + shift` and `strike + shift`, so this module never sees
//! the shift itself.

use vcube_core::{ensure, Real, Result, Time};

/// SABR model parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SabrParameters {
    /// Alpha, the volatility backbone level.
    pub alpha: Real,
    /// Beta, the CEV exponent (0 = normal, 1 = lognormal).
    pub beta: Real,
    /// Nu, the volatility of volatility.
    pub nu: Real,
    /// Rho, the rate/volatility correlation.
    pub rho: Real,
}

impl SabrParameters {
    /// Check the admissible ranges: `alpha > 0`, `beta` in `[0, 1]`,
    /// `nu >= 0`, `rho` in `(-1, 1)`.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.alpha > 0.0, "alpha ({}) must be positive", self.alpha);
        ensure!(
            (0.0..=1.0).contains(&self.beta),
            "beta ({}) must be in [0, 1]",
            self.beta
        );
        ensure!(self.nu >= 0.0, "nu ({}) must be non-negative", self.nu);
        ensure!(
            self.rho > -1.0 && self.rho < 1.0,
            "rho ({}) must be in (-1, 1)",
            self.rho
        );
        Ok(())
    }
}

/// Implied volatility at strike `k` for forward `f` and expiry `t`.
///
/// Near the money the expansion degenerates (`ln(f/k) -> 0`), so queries
/// within a relative tolerance of the forward fall back to the ATM formula.
pub fn sabr_volatility(f: Real, k: Real, t: Time, p: &SabrParameters) -> Real {
    if (f - k).abs() < 1e-12 * f.abs().max(1e-30) {
        return sabr_volatility_atm(f, t, p);
    }

    let SabrParameters { alpha, beta, nu, rho } = *p;
    let one_minus_beta = 1.0 - beta;
    let fk = f * k;
    let fk_pow = fk.powf(one_minus_beta);
    let fk_pow_half = fk.powf(one_minus_beta / 2.0);
    let log_fk = (f / k).ln();

    let z = (nu / alpha) * fk_pow_half * log_fk;
    let sqrt_val = (1.0 - 2.0 * rho * z + z * z).max(0.0).sqrt();
    let xz = ((sqrt_val + z - rho) / (1.0 - rho)).ln();
    if xz.abs() < 1e-15 {
        return sabr_volatility_atm(f, t, p);
    }

    let b2 = one_minus_beta * one_minus_beta;
    let denom =
        fk_pow_half * (1.0 + b2 / 24.0 * log_fk * log_fk + b2 * b2 / 1920.0 * log_fk.powi(4));
    let expiry_term = 1.0
        + (b2 / 24.0 * alpha * alpha / fk_pow
            + 0.25 * rho * beta * nu * alpha / fk_pow_half
            + (2.0 - 3.0 * rho * rho) / 24.0 * nu * nu)
            * t;

    alpha / denom * (z / xz) * expiry_term
}

/// Implied volatility at the money (`k == f`).
pub fn sabr_volatility_atm(f: Real, t: Time, p: &SabrParameters) -> Real {
    let SabrParameters { alpha, beta, nu, rho } = *p;
    let one_minus_beta = 1.0 - beta;
    let f_pow = f.powf(one_minus_beta);

    let term1 = one_minus_beta * one_minus_beta / 24.0 * alpha * alpha / (f_pow * f_pow);
    let term2 = 0.25 * rho * beta * nu * alpha / f_pow;
    let term3 = (2.0 - 3.0 * rho * rho) / 24.0 * nu * nu;

    alpha / f_pow * (1.0 + (term1 + term2 + term3) * t)
}
