//! # vcube-vol
//!
//! Swaption volatility cube built on SABR smiles, calibrated early and
//! interpolated in parameter space. Contains the smile-section interface,
//! the pluggable smile-fit strategy, the ATM surface boundary, the
//! dynamically growing cube grid, and the [`SwaptionVolCube`] orchestrator.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// ── Modules ───────────────────────────────────────────────────────────────────

/// Smile sections: implied volatility as a function of strike at one expiry.
pub mod smile_section;

/// The smile model strategy: fit parameters to quotes, build smile sections.
pub mod smile_fit;

/// ATM volatility structure boundary and a discretely quoted implementation.
pub mod atm;

/// The dynamically growing cube grid with per-layer 2D interpolation.
pub mod cube;

/// The swaption volatility cube orchestrator.
pub mod vol_cube;

// ── Convenience re-exports ────────────────────────────────────────────────────

pub use atm::{AtmVolMatrix, AtmVolStructure};
pub use cube::Cube;
pub use smile_fit::{SabrModel, SmileFitInput, SmileFitResult, SmileModel};
pub use smile_section::{SabrSmileSection, SmileSection, VolatilityType};
pub use vol_cube::SwaptionVolCube;
