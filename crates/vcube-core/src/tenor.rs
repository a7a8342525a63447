//! `Tenor` — a time span expressed in days, weeks, months, or years.
//!
//! Used to label the swap-length axis of the cube ("1Y", "10Y") and the
//! option-expiry tenors of quoted smiles.

use crate::{Date, Time};

/// The unit of a [`Tenor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeUnit {
    /// Calendar days.
    Days,
    /// Calendar weeks.
    Weeks,
    /// Calendar months.
    Months,
    /// Calendar years.
    #[default]
    Years,
}

/// A time span made up of an integer length and a [`TimeUnit`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tenor {
    /// Number of units.
    pub length: i32,
    /// The unit of time.
    pub unit: TimeUnit,
}

impl Tenor {
    /// Create a new tenor.
    pub fn new(length: i32, unit: TimeUnit) -> Self {
        Self { length, unit }
    }

    /// A tenor of `n` years.
    pub fn years(n: i32) -> Self {
        Self::new(n, TimeUnit::Years)
    }

    /// A tenor of `n` months.
    pub fn months(n: i32) -> Self {
        Self::new(n, TimeUnit::Months)
    }

    /// The tenor expressed as a year fraction.
    ///
    /// Days count as 1/365, weeks as 7/365, months as 1/12.
    pub fn year_fraction(&self) -> Time {
        let n = self.length as Time;
        match self.unit {
            TimeUnit::Days => n / 365.0,
            TimeUnit::Weeks => n * 7.0 / 365.0,
            TimeUnit::Months => n / 12.0,
            TimeUnit::Years => n,
        }
    }

    /// Advance `date` by this tenor.
    ///
    /// Month and year arithmetic clamps to the end of the target month
    /// (chrono's checked month addition).
    pub fn advance(&self, date: Date) -> Date {
        match self.unit {
            TimeUnit::Days => date + chrono::Duration::days(self.length as i64),
            TimeUnit::Weeks => date + chrono::Duration::weeks(self.length as i64),
            TimeUnit::Months => date
                .checked_add_months(chrono::Months::new(self.length as u32))
                .unwrap_or(date),
            TimeUnit::Years => date
                .checked_add_months(chrono::Months::new(12 * self.length as u32))
                .unwrap_or(date),
        }
    }
}

impl std::fmt::Display for Tenor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let abbr = match self.unit {
            TimeUnit::Days => "D",
            TimeUnit::Weeks => "W",
            TimeUnit::Months => "M",
            TimeUnit::Years => "Y",
        };
        write!(f, "{}{abbr}", self.length)
    }
}

impl std::fmt::Debug for Tenor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tenor({self})")
    }
}
