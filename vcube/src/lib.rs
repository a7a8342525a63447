//! # vcube
//!
//! A SABR swaption volatility cube: smiles are calibrated per node as soon
//! as quotes change ("fit early"), and surface queries interpolate the
//! calibrated parameters rather than the vols ("interpolate later").
//!
//! This crate is a **façade** that re-exports the public items of the
//! underlying workspace crates. Application code should depend on this
//! crate rather than the individual `vcube-*` crates.
//!
//! ## Quick start
//!
//! ```toml
//! [dependencies]
//! vcube = "0.1"
//! ```
//!
//! ```rust
//! use vcube::core::{Real, Tenor};
//!
//! let spread: Real = 0.01;
//! assert_eq!(Tenor::years(10).to_string(), "10Y");
//! assert!(spread > 0.0);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Core types, aliases, errors, and the lazy-recompute pattern.
pub use vcube_core as core;

/// Mathematical utilities: interpolation, optimization, the SABR formula.
pub use vcube_math as math;

/// Smile sections, the ATM boundary, and the volatility cube itself.
pub use vcube_vol as vol;
