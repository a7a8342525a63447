//! # vcube-core
//!
//! Core types and shared building blocks for the vcube workspace: primitive
//! type aliases, the error hierarchy with its `ensure!` / `fail!` macros,
//! the lazy-recompute (dirty-flag) pattern, and the `Tenor` time span.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// ── Public modules ───────────────────────────────────────────────────────────

/// Error types and the `ensure!` / `fail!` / `ensure_post!` macros.
pub mod errors;

/// Lazy-recompute pattern: `LazyObject` trait and `LazyState` bookkeeping.
pub mod lazy;

/// `Tenor` — a time span such as "3M" or "10Y".
pub mod tenor;

// ── Primitive type aliases ────────────────────────────────────────────────────

/// Floating-point type used throughout the library.
pub type Real = f64;

/// Alias used for array sizes / indices.
pub type Size = usize;

/// A rate expressed as a decimal (e.g. 0.05 = 5 %).
pub type Rate = Real;

/// A spread over a reference rate or volatility.
pub type Spread = Real;

/// A volatility level expressed as a decimal.
pub type Volatility = Real;

/// A time measurement in years.
pub type Time = Real;

/// Calendar date (UTC, no time component).
pub type Date = chrono::NaiveDate;

// ── Re-exports for convenience ────────────────────────────────────────────────

pub use errors::{Error, Result};
pub use lazy::{LazyObject, LazyState};
pub use tenor::{Tenor, TimeUnit};
