//! Optimization framework.
//!
//! Provides cost functions, constraints, end criteria, and a Nelder-Mead
//! simplex optimizer, which is what the smile calibration uses.

use crate::array::Array;
use vcube_core::{Real, Result};

// ── Cost function trait ───────────────────────────────────────────────────────

/// A multi-dimensional cost (objective) function.
pub trait CostFunction {
    /// Evaluate the cost function at `x` and return a vector of residuals.
    fn values(&self, x: &Array) -> Array;

    /// Return the scalar cost `0.5 * Σ r²(x)`.
    fn value(&self, x: &Array) -> Real {
        let v = self.values(x);
        0.5 * v.norm_squared()
    }
}

// ── Constraints ───────────────────────────────────────────────────────────────

/// A constraint on the parameter space.
pub trait Constraint {
    /// Return `true` if `x` satisfies the constraint.
    fn test(&self, x: &Array) -> bool;
}

/// No constraint: all parameter values are accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConstraint;

impl Constraint for NoConstraint {
    fn test(&self, _x: &Array) -> bool {
        true
    }
}

/// Box constraint: each parameter must lie within its own `[lo, hi]`.
#[derive(Debug, Clone)]
pub struct BoxConstraint {
    lo: Vec<Real>,
    hi: Vec<Real>,
}

impl BoxConstraint {
    /// Create a box constraint from per-parameter bounds.
    pub fn new(lo: Vec<Real>, hi: Vec<Real>) -> Self {
        Self { lo, hi }
    }
}

impl Constraint for BoxConstraint {
    fn test(&self, x: &Array) -> bool {
        (0..x.size()).all(|i| x[i] >= self.lo[i] && x[i] <= self.hi[i])
    }
}

// ── End criteria ──────────────────────────────────────────────────────────────

/// Criteria to stop an optimization.
#[derive(Debug, Clone)]
pub struct EndCriteria {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Maximum number of iterations without meaningful improvement.
    pub max_stationary_state_iterations: usize,
    /// Stop when the function value drops below this.
    pub root_epsilon: Real,
    /// Stop when the function change drops below this.
    pub function_epsilon: Real,
}

impl EndCriteria {
    /// Create new end criteria.
    pub fn new(
        max_iterations: usize,
        max_stationary_state_iterations: usize,
        root_epsilon: Real,
        function_epsilon: Real,
    ) -> Self {
        Self {
            max_iterations,
            max_stationary_state_iterations,
            root_epsilon,
            function_epsilon,
        }
    }
}

impl Default for EndCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            max_stationary_state_iterations: 100,
            root_epsilon: 1e-8,
            function_epsilon: 1e-8,
        }
    }
}

/// The reason an optimization terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndCriteriaType {
    /// Maximum iterations reached without convergence.
    MaxIterations,
    /// Function value below root epsilon.
    RootEpsilon,
    /// Function change stayed below function epsilon.
    StationaryPoint,
}

/// Result of an optimization.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Final parameter values.
    pub x: Array,
    /// Final function value.
    pub value: Real,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Reason for termination.
    pub end_type: EndCriteriaType,
}

// ── Simplex (Nelder-Mead) ─────────────────────────────────────────────────────

/// Nelder-Mead simplex optimizer.
pub struct Simplex {
    lambda: Real,
}

impl Simplex {
    /// Create a new simplex optimizer with initial step size `lambda`.
    pub fn new(lambda: Real) -> Self {
        Self { lambda }
    }

    /// Minimize `cost_fn` subject to `constraint`, starting from `initial_values`.
    pub fn minimize<C: CostFunction, K: Constraint>(
        &self,
        cost_fn: &C,
        constraint: &K,
        initial_values: &Array,
        end_criteria: &EndCriteria,
    ) -> Result<OptimizationResult> {
        let n = initial_values.size();
        let np1 = n + 1;

        // Initial simplex: perturb each coordinate by lambda, flipping the
        // direction if the perturbed vertex falls outside the constraint.
        let mut vertices: Vec<Array> = Vec::with_capacity(np1);
        vertices.push(initial_values.clone());
        for i in 0..n {
            let mut v = initial_values.clone();
            v[i] += self.lambda;
            if !constraint.test(&v) {
                v[i] = initial_values[i] - self.lambda;
            }
            vertices.push(v);
        }

        let mut values: Vec<Real> = vertices.iter().map(|v| cost_fn.value(v)).collect();

        let mut iterations = 0;
        let mut stationary_count = 0;
        let mut prev_best = f64::MAX;

        loop {
            // Best, worst and second-worst vertices.
            let (mut ilo, mut ihi, mut inhi) = (0usize, 0, 0);
            for i in 0..np1 {
                if values[i] < values[ilo] {
                    ilo = i;
                }
                if values[i] > values[ihi] {
                    inhi = ihi;
                    ihi = i;
                } else if i != ihi && values[i] > values[inhi] {
                    inhi = i;
                }
            }

            iterations += 1;
            if values[ilo] < end_criteria.root_epsilon {
                return Ok(OptimizationResult {
                    x: vertices[ilo].clone(),
                    value: values[ilo],
                    iterations,
                    end_type: EndCriteriaType::RootEpsilon,
                });
            }
            if (prev_best - values[ilo]).abs() < end_criteria.function_epsilon {
                stationary_count += 1;
                if stationary_count >= end_criteria.max_stationary_state_iterations {
                    return Ok(OptimizationResult {
                        x: vertices[ilo].clone(),
                        value: values[ilo],
                        iterations,
                        end_type: EndCriteriaType::StationaryPoint,
                    });
                }
            } else {
                stationary_count = 0;
            }
            prev_best = values[ilo];

            if iterations >= end_criteria.max_iterations {
                return Ok(OptimizationResult {
                    x: vertices[ilo].clone(),
                    value: values[ilo],
                    iterations,
                    end_type: EndCriteriaType::MaxIterations,
                });
            }

            // Centroid of all vertices except the worst.
            let mut centroid = Array::zeros(n);
            for (i, v) in vertices.iter().enumerate() {
                if i != ihi {
                    centroid = &centroid + v;
                }
            }
            centroid = &centroid / n as Real;

            // Reflection of the worst vertex through the centroid.
            let reflected = &(&centroid * 2.0) - &vertices[ihi];
            let fr = if constraint.test(&reflected) {
                cost_fn.value(&reflected)
            } else {
                f64::MAX
            };

            if fr < values[ilo] {
                // Expansion.
                let expanded = &(&reflected * 2.0) - &centroid;
                let fe = if constraint.test(&expanded) {
                    cost_fn.value(&expanded)
                } else {
                    f64::MAX
                };
                if fe < fr {
                    vertices[ihi] = expanded;
                    values[ihi] = fe;
                } else {
                    vertices[ihi] = reflected;
                    values[ihi] = fr;
                }
            } else if fr < values[inhi] {
                vertices[ihi] = reflected;
                values[ihi] = fr;
            } else {
                // Contraction, outside towards the reflected point or inside
                // towards the worst vertex.
                let contracted = if fr < values[ihi] {
                    &(&centroid + &reflected) / 2.0
                } else {
                    &(&centroid + &vertices[ihi]) / 2.0
                };
                let fc = if constraint.test(&contracted) {
                    cost_fn.value(&contracted)
                } else {
                    f64::MAX
                };
                if fc < values[ihi] {
                    vertices[ihi] = contracted;
                    values[ihi] = fc;
                } else {
                    // Shrink everything towards the best vertex.
                    for i in 0..np1 {
                        if i != ilo {
                            vertices[i] = &(&vertices[ilo] + &vertices[i]) / 2.0;
                            values[i] = cost_fn.value(&vertices[i]);
                        }
                    }
                }
            }
        }
    }
}
