//! At-the-money volatility structure boundary.
//!
//! The cube never owns the ATM surface; it reads it through
//! [`AtmVolStructure`]. [`AtmVolMatrix`] is the discretely quoted
//! implementation used in tests and simple setups: bilinear vol and forward
//! surfaces over (option time, swap length) with flat extrapolation and a
//! constant lognormal shift.

use vcube_core::{ensure, Date, Rate, Real, Result, Tenor, Time, Volatility};
use vcube_math::interpolation2d::{
    BilinearInterpolation, FlatExtrapolator2D, Interpolation2D,
};
use vcube_math::Matrix;

use crate::smile_section::VolatilityType;

/// Act/365F day count over whole days.
pub fn year_fraction(from: Date, to: Date) -> Time {
    (to - from).num_days() as Time / 365.0
}

/// The at-the-money surface the cube calibrates against.
pub trait AtmVolStructure: std::fmt::Debug + Send + Sync {
    /// The date times are measured from.
    fn reference_date(&self) -> Date;

    /// ATM volatility at (option time, swap length).
    fn volatility(&self, option_time: Time, swap_length: Time) -> Volatility;

    /// Lognormal shift at (option time, swap length).
    fn shift(&self, option_time: Time, swap_length: Time) -> Real;

    /// Forward swap rate at (option time, swap length).
    fn forward(&self, option_time: Time, swap_length: Time) -> Rate;

    /// Quoting convention of the surface.
    fn volatility_type(&self) -> VolatilityType;

    /// Quoted option expiry dates, ascending.
    fn option_dates(&self) -> &[Date];

    /// Quoted option expiry times, ascending.
    fn option_times(&self) -> &[Time];

    /// Quoted swap tenors, ascending.
    fn swap_tenors(&self) -> &[Tenor];

    /// Quoted swap lengths in years, ascending.
    fn swap_lengths(&self) -> &[Time];

    /// Time from the reference date, Act/365F.
    fn time_from_reference(&self, date: Date) -> Time {
        year_fraction(self.reference_date(), date)
    }

    /// Swap length in years for a tenor.
    fn swap_length(&self, tenor: Tenor) -> Time {
        tenor.year_fraction()
    }

    /// Expiry date reached by advancing the reference date by a tenor.
    fn option_date_from_tenor(&self, tenor: Tenor) -> Date {
        tenor.advance(self.reference_date())
    }
}

// ── AtmVolMatrix ──────────────────────────────────────────────────────────────

/// A discretely quoted ATM surface.
#[derive(Debug)]
pub struct AtmVolMatrix {
    reference_date: Date,
    option_dates: Vec<Date>,
    option_times: Vec<Time>,
    swap_tenors: Vec<Tenor>,
    swap_lengths: Vec<Time>,
    vols: Matrix,
    forwards: Matrix,
    shift: Real,
    vol_interp: FlatExtrapolator2D<BilinearInterpolation>,
    fwd_interp: FlatExtrapolator2D<BilinearInterpolation>,
}

impl AtmVolMatrix {
    /// Build from quoted matrices.
    ///
    /// `vols` and `forwards` are (option × swap) matrices, one row per
    /// option tenor and one column per swap tenor. Both axes need at least
    /// two quotes.
    pub fn new(
        reference_date: Date,
        option_tenors: &[Tenor],
        swap_tenors: &[Tenor],
        vols: Matrix,
        forwards: Matrix,
        shift: Real,
    ) -> Result<Self> {
        ensure!(option_tenors.len() >= 2, "need at least 2 option tenors");
        ensure!(swap_tenors.len() >= 2, "need at least 2 swap tenors");
        ensure!(
            vols.rows() == option_tenors.len() && vols.cols() == swap_tenors.len(),
            "vol matrix is {}x{}, expected {}x{}",
            vols.rows(),
            vols.cols(),
            option_tenors.len(),
            swap_tenors.len()
        );
        ensure!(
            forwards.rows() == vols.rows() && forwards.cols() == vols.cols(),
            "forward matrix dimensions must match the vol matrix"
        );

        let option_dates: Vec<Date> = option_tenors
            .iter()
            .map(|t| t.advance(reference_date))
            .collect();
        let option_times: Vec<Time> = option_dates
            .iter()
            .map(|&d| year_fraction(reference_date, d))
            .collect();
        let swap_lengths: Vec<Time> = swap_tenors.iter().map(|t| t.year_fraction()).collect();
        ensure!(
            option_times.windows(2).all(|w| w[0] < w[1]),
            "option tenors must be strictly increasing"
        );
        ensure!(
            swap_lengths.windows(2).all(|w| w[0] < w[1]),
            "swap tenors must be strictly increasing"
        );

        let vol_interp = build_surface(&option_times, &swap_lengths, &vols)?;
        let fwd_interp = build_surface(&option_times, &swap_lengths, &forwards)?;

        Ok(Self {
            reference_date,
            option_dates,
            option_times,
            swap_tenors: swap_tenors.to_vec(),
            swap_lengths,
            vols,
            forwards,
            shift,
            vol_interp,
            fwd_interp,
        })
    }

    /// Overwrite one quoted vol and rebuild the surface.
    pub fn set_volatility(&mut self, option_idx: usize, swap_idx: usize, vol: Volatility) -> Result<()> {
        ensure!(
            option_idx < self.vols.rows() && swap_idx < self.vols.cols(),
            "quote ({}, {}) outside the {}x{} surface",
            option_idx,
            swap_idx,
            self.vols.rows(),
            self.vols.cols()
        );
        self.vols[(option_idx, swap_idx)] = vol;
        self.vol_interp = build_surface(&self.option_times, &self.swap_lengths, &self.vols)?;
        Ok(())
    }
}

fn build_surface(
    option_times: &[Time],
    swap_lengths: &[Time],
    values: &Matrix,
) -> Result<FlatExtrapolator2D<BilinearInterpolation>> {
    // z[j * nx + i] = values[(i-th option time, j-th swap length)]
    let mut z = Vec::with_capacity(option_times.len() * swap_lengths.len());
    for j in 0..swap_lengths.len() {
        for i in 0..option_times.len() {
            z.push(values[(i, j)]);
        }
    }
    Ok(FlatExtrapolator2D::new(BilinearInterpolation::new(
        option_times,
        swap_lengths,
        &z,
    )?))
}

impl AtmVolStructure for AtmVolMatrix {
    fn reference_date(&self) -> Date {
        self.reference_date
    }

    fn volatility(&self, option_time: Time, swap_length: Time) -> Volatility {
        self.vol_interp.value(option_time, swap_length)
    }

    fn shift(&self, _option_time: Time, _swap_length: Time) -> Real {
        self.shift
    }

    fn forward(&self, option_time: Time, swap_length: Time) -> Rate {
        self.fwd_interp.value(option_time, swap_length)
    }

    fn volatility_type(&self) -> VolatilityType {
        VolatilityType::ShiftedLognormal
    }

    fn option_dates(&self) -> &[Date] {
        &self.option_dates
    }

    fn option_times(&self) -> &[Time] {
        &self.option_times
    }

    fn swap_tenors(&self) -> &[Tenor] {
        &self.swap_tenors
    }

    fn swap_lengths(&self) -> &[Time] {
        &self.swap_lengths
    }
}
