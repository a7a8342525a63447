//! 2D interpolation between discrete grid points.
//!
//! Provides the two schemes the cube layers need (bilinear and
//! backward-flat-linear) plus [`FlatExtrapolator2D`], which clamps queries
//! to the grid bounds so every scheme extrapolates flat on all four sides.

use crate::interpolation::locate;
use vcube_core::{ensure, Real, Result};

/// 2D interpolation trait.
pub trait Interpolation2D: std::fmt::Debug + Send + Sync {
    /// Evaluate the surface at `(x, y)`.
    fn value(&self, x: Real, y: Real) -> Real;
    /// Lower bound of the x domain.
    fn x_min(&self) -> Real;
    /// Upper bound of the x domain.
    fn x_max(&self) -> Real;
    /// Lower bound of the y domain.
    fn y_min(&self) -> Real;
    /// Upper bound of the y domain.
    fn y_max(&self) -> Real;
}

fn check_grid(xs: &[Real], ys: &[Real], z_len: usize) -> Result<()> {
    ensure!(xs.len() >= 2, "need at least 2 x points");
    ensure!(ys.len() >= 2, "need at least 2 y points");
    ensure!(
        z_len == xs.len() * ys.len(),
        "z length ({}) must equal nx*ny ({}*{}={})",
        z_len,
        xs.len(),
        ys.len(),
        xs.len() * ys.len()
    );
    Ok(())
}

// ── Bilinear ──────────────────────────────────────────────────────────────────

/// Bilinear interpolation on a rectangular grid.
///
/// `z` is stored row-major over y: `z[j * nx + i] = f(xs[i], ys[j])`.
#[derive(Debug, Clone)]
pub struct BilinearInterpolation {
    xs: Vec<Real>,
    ys: Vec<Real>,
    z: Vec<Real>,
    nx: usize,
}

impl BilinearInterpolation {
    /// Build a bilinear interpolation on the grid `(xs × ys → z)`.
    ///
    /// Both `xs` and `ys` must be sorted in strictly increasing order.
    pub fn new(xs: &[Real], ys: &[Real], z: &[Real]) -> Result<Self> {
        check_grid(xs, ys, z.len())?;
        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            z: z.to_vec(),
            nx: xs.len(),
        })
    }

    fn z_at(&self, i: usize, j: usize) -> Real {
        self.z[j * self.nx + i]
    }
}

impl Interpolation2D for BilinearInterpolation {
    fn x_min(&self) -> Real {
        self.xs[0]
    }

    fn x_max(&self) -> Real {
        self.xs[self.xs.len() - 1]
    }

    fn y_min(&self) -> Real {
        self.ys[0]
    }

    fn y_max(&self) -> Real {
        self.ys[self.ys.len() - 1]
    }

    fn value(&self, x: Real, y: Real) -> Real {
        let i = locate(&self.xs, x);
        let j = locate(&self.ys, y);

        let t = (x - self.xs[i]) / (self.xs[i + 1] - self.xs[i]);
        let u = (y - self.ys[j]) / (self.ys[j + 1] - self.ys[j]);

        (1.0 - t) * (1.0 - u) * self.z_at(i, j)
            + t * (1.0 - u) * self.z_at(i + 1, j)
            + (1.0 - t) * u * self.z_at(i, j + 1)
            + t * u * self.z_at(i + 1, j + 1)
    }
}

// ── Backward-flat-linear ──────────────────────────────────────────────────────

/// Backward-flat along x, linear along y.
///
/// For `x` in `(xs[i-1], xs[i]]` the value at node `xs[i]` applies: a value
/// is held constant from its node back to the previous one.  Calibrated
/// parameters use this so a parameter stays flat until the next quoted
/// expiry.
#[derive(Debug, Clone)]
pub struct BackwardflatLinearInterpolation {
    xs: Vec<Real>,
    ys: Vec<Real>,
    z: Vec<Real>,
    nx: usize,
}

impl BackwardflatLinearInterpolation {
    /// Build on the grid `(xs × ys → z)`, `z[j * nx + i] = f(xs[i], ys[j])`.
    pub fn new(xs: &[Real], ys: &[Real], z: &[Real]) -> Result<Self> {
        check_grid(xs, ys, z.len())?;
        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            z: z.to_vec(),
            nx: xs.len(),
        })
    }

    fn z_at(&self, i: usize, j: usize) -> Real {
        self.z[j * self.nx + i]
    }

    /// Index of the node whose value applies at `x` (backward flat).
    fn locate_backward(&self, x: Real) -> usize {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return 0;
        }
        if x >= self.xs[n - 1] {
            return n - 1;
        }
        // First node at or after x.
        let i = locate(&self.xs, x);
        if self.xs[i] >= x {
            i
        } else {
            i + 1
        }
    }
}

impl Interpolation2D for BackwardflatLinearInterpolation {
    fn x_min(&self) -> Real {
        self.xs[0]
    }

    fn x_max(&self) -> Real {
        self.xs[self.xs.len() - 1]
    }

    fn y_min(&self) -> Real {
        self.ys[0]
    }

    fn y_max(&self) -> Real {
        self.ys[self.ys.len() - 1]
    }

    fn value(&self, x: Real, y: Real) -> Real {
        let i = self.locate_backward(x);
        let j = locate(&self.ys, y);
        let u = (y - self.ys[j]) / (self.ys[j + 1] - self.ys[j]);
        (1.0 - u) * self.z_at(i, j) + u * self.z_at(i, j + 1)
    }
}

// ── Flat extrapolation wrapper ────────────────────────────────────────────────

/// Wraps any [`Interpolation2D`] and clamps queries to the grid bounds, so
/// values outside the domain equal the nearest boundary value.
#[derive(Debug, Clone)]
pub struct FlatExtrapolator2D<I: Interpolation2D> {
    inner: I,
}

impl<I: Interpolation2D> FlatExtrapolator2D<I> {
    /// Wrap `inner` with flat extrapolation.
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl<I: Interpolation2D> Interpolation2D for FlatExtrapolator2D<I> {
    fn x_min(&self) -> Real {
        self.inner.x_min()
    }

    fn x_max(&self) -> Real {
        self.inner.x_max()
    }

    fn y_min(&self) -> Real {
        self.inner.y_min()
    }

    fn y_max(&self) -> Real {
        self.inner.y_max()
    }

    fn value(&self, x: Real, y: Real) -> Real {
        let xc = x.clamp(self.inner.x_min(), self.inner.x_max());
        let yc = y.clamp(self.inner.y_min(), self.inner.y_max());
        self.inner.value(xc, yc)
    }
}
