//! 1D interpolation.
//!
//! Only linear interpolation is needed here: the cube uses it for
//! tenor-dependent parameter overrides, clamping the abscissa to the data
//! range for flat extrapolation at both ends.

use vcube_core::{ensure, Real, Result};

/// Linear interpolation over sorted abscissae.
#[derive(Debug, Clone)]
pub struct LinearInterpolation {
    xs: Vec<Real>,
    ys: Vec<Real>,
}

impl LinearInterpolation {
    /// Construct a linear interpolation from sorted `xs` and corresponding `ys`.
    ///
    /// # Errors
    /// Fails if the slices have different lengths, fewer than 2 points, or
    /// `xs` is not strictly increasing.
    pub fn new(xs: &[Real], ys: &[Real]) -> Result<Self> {
        ensure!(xs.len() >= 2, "need at least 2 points for interpolation");
        ensure!(xs.len() == ys.len(), "xs and ys must have the same length");
        ensure!(
            xs.windows(2).all(|w| w[0] < w[1]),
            "xs must be strictly increasing"
        );
        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
        })
    }

    /// Lower bound of the interpolation domain.
    pub fn x_min(&self) -> Real {
        self.xs[0]
    }

    /// Upper bound of the interpolation domain.
    pub fn x_max(&self) -> Real {
        self.xs[self.xs.len() - 1]
    }

    /// Evaluate at `x`; extends linearly beyond the domain.
    pub fn value(&self, x: Real) -> Real {
        let i = locate(&self.xs, x);
        let dx = self.xs[i + 1] - self.xs[i];
        self.ys[i] + (x - self.xs[i]) * (self.ys[i + 1] - self.ys[i]) / dx
    }

    /// Evaluate at `x`, clamped to the domain (flat extrapolation).
    pub fn value_flat(&self, x: Real) -> Real {
        self.value(x.clamp(self.x_min(), self.x_max()))
    }
}

/// Binary search: the index `k` such that `vs[k] <= v < vs[k+1]`, clamped
/// to `[0, n-2]`.
pub(crate) fn locate(vs: &[Real], v: Real) -> usize {
    let n = vs.len();
    if v <= vs[0] {
        return 0;
    }
    if v >= vs[n - 1] {
        return n - 2;
    }
    let mut lo = 0;
    let mut hi = n - 1;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if vs[mid] <= v {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}
