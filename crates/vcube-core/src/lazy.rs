//! Lazy-recompute pattern.
//!
//! `LazyObject` caches an expensive derived computation behind a dirty flag:
//! upstream mutations call [`LazyObject::update`] to mark the cache stale,
//! and every read path calls [`LazyObject::calculate`] to recompute on
//! demand.  This replaces an observer/notification mechanism with explicit
//! dependency tracking — the owner of the upstream data is responsible for
//! flagging staleness.
//!
//! The flag uses interior mutability (`Cell<bool>`) so recalculation can be
//! triggered through `&self` from logically read-only accessors.

use std::cell::Cell;

/// Trait for objects that lazily compute and cache derived state.
///
/// Implementors provide [`perform_calculations`][Self::perform_calculations];
/// the trait supplies the dirty-flag bookkeeping.
pub trait LazyObject {
    /// Perform the actual (expensive) calculation.
    ///
    /// Called by [`calculate`][Self::calculate] when the cache is stale.
    fn perform_calculations(&self) -> crate::errors::Result<()>;

    /// The `calculated` flag: `true` while the cached results are valid.
    fn calculated_flag(&self) -> &Cell<bool>;

    /// Ensure results are up-to-date, recomputing if stale.
    ///
    /// On failure the flag is cleared again so the next read retries rather
    /// than serving half-built state.
    fn calculate(&self) -> crate::errors::Result<()> {
        if !self.calculated_flag().get() {
            self.calculated_flag().set(true);
            if let Err(e) = self.perform_calculations() {
                self.calculated_flag().set(false);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Mark the cached results as stale without recomputing.
    fn update(&self) {
        self.calculated_flag().set(false);
    }

    /// Return `true` if the cache is currently valid.
    fn is_calculated(&self) -> bool {
        self.calculated_flag().get()
    }
}

/// Bookkeeping holder for [`LazyObject`] implementors.
///
/// Embed this in your struct and return `&self.lazy.calculated` from
/// [`LazyObject::calculated_flag`].
#[derive(Debug, Default)]
pub struct LazyState {
    /// `true` while the cached result is valid.
    pub calculated: Cell<bool>,
}

impl LazyState {
    /// Create a new `LazyState` with an initially stale cache.
    pub fn new() -> Self {
        Self {
            calculated: Cell::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler {
        lazy: LazyState,
        input: Cell<f64>,
        output: Cell<f64>,
        runs: Cell<u32>,
    }

    impl LazyObject for Doubler {
        fn perform_calculations(&self) -> crate::errors::Result<()> {
            self.runs.set(self.runs.get() + 1);
            self.output.set(2.0 * self.input.get());
            Ok(())
        }
        fn calculated_flag(&self) -> &Cell<bool> {
            &self.lazy.calculated
        }
    }

    #[test]
    fn recomputes_only_when_stale() {
        let d = Doubler {
            lazy: LazyState::new(),
            input: Cell::new(3.0),
            output: Cell::new(0.0),
            runs: Cell::new(0),
        };
        d.calculate().unwrap();
        d.calculate().unwrap();
        assert_eq!(d.runs.get(), 1);
        assert_eq!(d.output.get(), 6.0);

        d.input.set(5.0);
        d.update();
        d.calculate().unwrap();
        assert_eq!(d.runs.get(), 2);
        assert_eq!(d.output.get(), 10.0);
    }

    struct AlwaysFails {
        lazy: LazyState,
    }

    impl LazyObject for AlwaysFails {
        fn perform_calculations(&self) -> crate::errors::Result<()> {
            Err(crate::Error::Runtime("boom".into()))
        }
        fn calculated_flag(&self) -> &Cell<bool> {
            &self.lazy.calculated
        }
    }

    #[test]
    fn failure_leaves_object_stale() {
        let f = AlwaysFails {
            lazy: LazyState::new(),
        };
        assert!(f.calculate().is_err());
        assert!(!f.is_calculated());
        // A later call retries instead of serving stale state.
        assert!(f.calculate().is_err());
    }
}
