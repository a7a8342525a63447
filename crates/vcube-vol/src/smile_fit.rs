//! Smile model strategy: fit parameters to market quotes at one node and
//! build smile sections from fitted parameters.
//!
//! The cube orchestrator is generic over [`SmileModel`], so alternative
//! parameterizations can be plugged in at runtime. [`SabrModel`] is the
//! concrete strategy used in production.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vcube_core::{ensure, Rate, Real, Result, Time, Volatility};
use vcube_math::optimization::{
    CostFunction, EndCriteria, EndCriteriaType, NoConstraint, Simplex,
};
use vcube_math::sabr::{sabr_volatility, SabrParameters};
use vcube_math::Array;

use crate::smile_section::{SabrSmileSection, SmileSection};

/// Everything a smile fit at one cube node needs.
#[derive(Debug, Clone)]
pub struct SmileFitInput {
    /// Strikes surviving the cutoff filter, ascending.
    pub strikes: Vec<Rate>,
    /// Market volatilities, one per strike.
    pub vols: Vec<Volatility>,
    /// Time to expiry in years.
    pub expiry_time: Time,
    /// Forward swap rate at this node.
    pub forward: Rate,
    /// Lognormal shift.
    pub shift: Real,
    /// Initial guess: alpha, beta, nu, rho.
    pub guess: [Real; 4],
    /// Which of the four parameters stay pinned at the guess.
    pub is_fixed: [bool; 4],
    /// Weight residuals by Black vega.
    pub vega_weighted: bool,
    /// Optimizer stopping criteria.
    pub end_criteria: EndCriteria,
    /// Stop retrying once the selected error metric falls at or below this.
    pub error_accept: Real,
    /// Select the max error instead of the rms error as the retry metric.
    pub use_max_error: bool,
    /// Maximum number of perturbed-guess attempts.
    pub max_guesses: usize,
}

/// The outcome of a smile fit at one node.
#[derive(Debug, Clone)]
pub struct SmileFitResult {
    /// Fitted parameters.
    pub params: SabrParameters,
    /// Forward used for the fit.
    pub forward: Rate,
    /// Root-mean-square vol error over the quoted strikes.
    pub rms_error: Real,
    /// Maximum absolute vol error over the quoted strikes.
    pub max_error: Real,
    /// Why the optimizer stopped on the winning attempt.
    pub end_type: EndCriteriaType,
}

/// A pluggable smile parameterization.
pub trait SmileModel: std::fmt::Debug + Send + Sync {
    /// Fit parameters to the quotes at one node.
    fn fit(&self, input: &SmileFitInput) -> Result<SmileFitResult>;

    /// Build a smile section from fitted parameters.
    fn smile(
        &self,
        expiry_time: Time,
        forward: Rate,
        params: SabrParameters,
        shift: Real,
    ) -> Arc<dyn SmileSection>;
}

// ── SABR strategy ─────────────────────────────────────────────────────────────

/// SABR smile fit via Nelder-Mead over the free parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SabrModel;

impl SabrModel {
    /// Create the SABR strategy.
    pub fn new() -> Self {
        Self
    }
}

/// Clamp a full parameter vector into the admissible SABR region.
fn clamp_params(alpha: Real, beta: Real, nu: Real, rho: Real) -> SabrParameters {
    SabrParameters {
        alpha: alpha.max(1e-8),
        beta: beta.clamp(0.0, 1.0),
        nu: nu.max(0.0),
        rho: rho.clamp(-0.999, 0.999),
    }
}

struct SabrObjective<'a> {
    input: &'a SmileFitInput,
    free: Vec<usize>,
    guess: [Real; 4],
    weights: Vec<Real>,
}

impl SabrObjective<'_> {
    fn params_from(&self, x: &Array) -> SabrParameters {
        let mut full = self.guess;
        for (slot, &idx) in self.free.iter().enumerate() {
            full[idx] = x[slot];
        }
        clamp_params(full[0], full[1], full[2], full[3])
    }

    fn model_vol(&self, params: &SabrParameters, strike: Rate) -> Volatility {
        sabr_volatility(
            self.input.forward + self.input.shift,
            strike + self.input.shift,
            self.input.expiry_time,
            params,
        )
    }

    /// Unweighted rms and max errors of `params` against the market vols.
    fn errors(&self, params: &SabrParameters) -> (Real, Real) {
        let mut sum_sq = 0.0;
        let mut max_err: Real = 0.0;
        for (&k, &v) in self.input.strikes.iter().zip(&self.input.vols) {
            let diff = self.model_vol(params, k) - v;
            sum_sq += diff * diff;
            max_err = max_err.max(diff.abs());
        }
        ((sum_sq / self.input.strikes.len() as Real).sqrt(), max_err)
    }
}

impl CostFunction for SabrObjective<'_> {
    fn values(&self, x: &Array) -> Array {
        let params = self.params_from(x);
        let residuals: Vec<Real> = self
            .input
            .strikes
            .iter()
            .zip(&self.input.vols)
            .zip(&self.weights)
            .map(|((&k, &v), &w)| (self.model_vol(&params, k) - v) * w.sqrt())
            .collect();
        Array::from_vec(residuals)
    }
}

/// Black vega of a unit notional at `strike`, used as fit weight.
fn black_vega(forward: Real, strike: Real, vol: Real, t: Time) -> Real {
    let std_dev = vol * t.sqrt();
    if std_dev < 1e-15 || forward <= 0.0 || strike <= 0.0 {
        return 0.0;
    }
    let d1 = ((forward / strike).ln() + 0.5 * std_dev * std_dev) / std_dev;
    forward * vcube_math::normal_pdf(d1) * t.sqrt()
}

impl SmileModel for SabrModel {
    fn fit(&self, input: &SmileFitInput) -> Result<SmileFitResult> {
        ensure!(
            !input.strikes.is_empty(),
            "no usable strikes at expiry {} (forward {})",
            input.expiry_time,
            input.forward
        );
        ensure!(
            input.strikes.len() == input.vols.len(),
            "strikes ({}) and vols ({}) must have the same length",
            input.strikes.len(),
            input.vols.len()
        );
        ensure!(input.max_guesses >= 1, "max_guesses must be at least 1");

        let free: Vec<usize> = (0..4).filter(|&i| !input.is_fixed[i]).collect();

        let mut weights: Vec<Real> = if input.vega_weighted {
            input
                .strikes
                .iter()
                .zip(&input.vols)
                .map(|(&k, &v)| {
                    black_vega(
                        input.forward + input.shift,
                        k + input.shift,
                        v,
                        input.expiry_time,
                    )
                })
                .collect()
        } else {
            vec![1.0; input.strikes.len()]
        };
        let total: Real = weights.iter().sum();
        ensure!(
            total > 0.0,
            "all fit weights vanished at expiry {} (forward {})",
            input.expiry_time,
            input.forward
        );
        for w in &mut weights {
            *w /= total;
        }

        let objective = SabrObjective {
            input,
            free,
            guess: input.guess,
            weights,
        };

        // All-fixed fit: nothing to optimize, just report the guess errors.
        if objective.free.is_empty() {
            let params = clamp_params(
                input.guess[0],
                input.guess[1],
                input.guess[2],
                input.guess[3],
            );
            let (rms_error, max_error) = objective.errors(&params);
            return Ok(SmileFitResult {
                params,
                forward: input.forward,
                rms_error,
                max_error,
                end_type: EndCriteriaType::StationaryPoint,
            });
        }

        let simplex = Simplex::new(0.01);
        let mut rng = StdRng::seed_from_u64(42);
        let mut best: Option<SmileFitResult> = None;

        for attempt in 0..input.max_guesses {
            let mut start = input.guess;
            if attempt > 0 {
                // Perturb the free entries of the guess on retries;
                // multiplicative for the positive parameters, additive for rho.
                for &idx in &objective.free {
                    match idx {
                        0 | 2 => start[idx] *= 1.0 + rng.gen_range(-0.5..0.5),
                        1 => start[idx] = rng.gen_range(0.0..1.0),
                        _ => start[idx] = (start[idx] + rng.gen_range(-0.3..0.3)).clamp(-0.9, 0.9),
                    }
                }
            }

            let x0 = Array::from_vec(objective.free.iter().map(|&i| start[i]).collect());
            let result =
                simplex.minimize(&objective, &NoConstraint, &x0, &input.end_criteria)?;

            let params = objective.params_from(&result.x);
            let (rms_error, max_error) = objective.errors(&params);
            let metric = if input.use_max_error { max_error } else { rms_error };

            let improved = match &best {
                None => true,
                Some(b) => {
                    let best_metric = if input.use_max_error {
                        b.max_error
                    } else {
                        b.rms_error
                    };
                    metric < best_metric
                }
            };
            if improved {
                best = Some(SmileFitResult {
                    params,
                    forward: input.forward,
                    rms_error,
                    max_error,
                    end_type: result.end_type,
                });
            }
            if metric <= input.error_accept {
                break;
            }
        }

        // max_guesses >= 1, so at least one attempt ran.
        best.ok_or_else(|| {
            vcube_core::Error::Runtime(format!(
                "smile fit produced no result at expiry {}",
                input.expiry_time
            ))
        })
    }

    fn smile(
        &self,
        expiry_time: Time,
        forward: Rate,
        params: SabrParameters,
        shift: Real,
    ) -> Arc<dyn SmileSection> {
        Arc::new(SabrSmileSection::new(expiry_time, forward, params, shift))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn synthetic_input(true_params: SabrParameters, guess: [Real; 4]) -> SmileFitInput {
        let forward = 0.04;
        let expiry = 1.0;
        let strikes: Vec<Real> = vec![0.02, 0.03, 0.035, 0.04, 0.045, 0.05, 0.06];
        let vols: Vec<Real> = strikes
            .iter()
            .map(|&k| sabr_volatility(forward, k, expiry, &true_params))
            .collect();
        SmileFitInput {
            strikes,
            vols,
            expiry_time: expiry,
            forward,
            shift: 0.0,
            guess,
            is_fixed: [false, true, false, false],
            vega_weighted: false,
            end_criteria: EndCriteria::new(60000, 100, 1e-14, 1e-14),
            error_accept: 1e-6,
            use_max_error: false,
            max_guesses: 50,
        }
    }

    #[test]
    fn recovers_exact_sabr_smile() {
        let truth = SabrParameters {
            alpha: 0.05,
            beta: 0.5,
            nu: 0.4,
            rho: -0.3,
        };
        let input = synthetic_input(truth, [0.04, 0.5, 0.3, -0.1]);
        let fit = SabrModel::new().fit(&input).unwrap();
        assert!(fit.rms_error < 1e-5, "rms = {}", fit.rms_error);
        assert!(fit.max_error < 5e-5, "max = {}", fit.max_error);
        assert_abs_diff_eq!(fit.params.beta, 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(fit.forward, input.forward, epsilon = 1e-15);
    }

    #[test]
    fn fixed_parameters_stay_pinned() {
        let truth = SabrParameters {
            alpha: 0.05,
            beta: 0.7,
            nu: 0.4,
            rho: -0.3,
        };
        let mut input = synthetic_input(truth, [0.05, 0.2, 0.4, -0.3]);
        input.is_fixed = [false, true, true, true];
        let fit = SabrModel::new().fit(&input).unwrap();
        assert_abs_diff_eq!(fit.params.beta, 0.2, epsilon = 1e-15);
        assert_abs_diff_eq!(fit.params.nu, 0.4, epsilon = 1e-15);
        assert_abs_diff_eq!(fit.params.rho, -0.3, epsilon = 1e-15);
    }

    #[test]
    fn all_fixed_reports_guess_errors() {
        let truth = SabrParameters {
            alpha: 0.05,
            beta: 0.5,
            nu: 0.4,
            rho: -0.3,
        };
        let mut input = synthetic_input(truth, [0.05, 0.5, 0.4, -0.3]);
        input.is_fixed = [true; 4];
        let fit = SabrModel::new().fit(&input).unwrap();
        assert!(fit.rms_error < 1e-12);
    }

    #[test]
    fn empty_strikes_is_an_error() {
        let truth = SabrParameters {
            alpha: 0.05,
            beta: 0.5,
            nu: 0.4,
            rho: -0.3,
        };
        let mut input = synthetic_input(truth, [0.04, 0.5, 0.3, -0.1]);
        input.strikes.clear();
        input.vols.clear();
        assert!(SabrModel::new().fit(&input).is_err());
    }

    #[test]
    fn vega_weighted_fit_converges() {
        let truth = SabrParameters {
            alpha: 0.05,
            beta: 0.5,
            nu: 0.4,
            rho: -0.3,
        };
        let mut input = synthetic_input(truth, [0.04, 0.5, 0.3, -0.1]);
        input.vega_weighted = true;
        let fit = SabrModel::new().fit(&input).unwrap();
        assert!(fit.rms_error < 1e-4, "rms = {}", fit.rms_error);
    }

    #[test]
    fn smile_factory_reproduces_fit() {
        let truth = SabrParameters {
            alpha: 0.05,
            beta: 0.5,
            nu: 0.4,
            rho: -0.3,
        };
        let model = SabrModel::new();
        let section = model.smile(1.0, 0.04, truth, 0.0);
        let direct = sabr_volatility(0.04, 0.03, 1.0, &truth);
        assert_abs_diff_eq!(section.volatility(0.03), direct, epsilon = 1e-12);
    }
}
