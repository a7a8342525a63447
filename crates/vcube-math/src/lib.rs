//! # vcube-math
//!
//! Mathematical building blocks for the swaption volatility cube:
//! `Array` / `Matrix` newtypes over nalgebra, the standard normal
//! distribution (via statrs), 1D and 2D interpolation schemes with flat
//! extrapolation, a Nelder–Mead optimizer with end-criteria reporting, and
//! the Hagan 2002 SABR volatility formula.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// ── Modules ───────────────────────────────────────────────────────────────────

/// `Array` — 1D vector of reals.
pub mod array;

/// `Matrix` — 2D matrix of reals.
pub mod matrix;

/// Standard normal pdf / cdf.
pub mod distributions;

/// 1D interpolation.
pub mod interpolation;

/// 2D interpolation: bilinear, backward-flat-linear, flat extrapolation.
pub mod interpolation2d;

/// Optimization: cost functions, end criteria, Nelder–Mead simplex.
pub mod optimization;

/// SABR parameters and the Hagan implied-volatility formula.
pub mod sabr;

// ── Convenience re-exports ────────────────────────────────────────────────────

pub use array::Array;
pub use distributions::{normal_cdf, normal_pdf};
pub use matrix::Matrix;
