//! The swaption volatility cube orchestrator.
//!
//! Fit early, interpolate later: market vol quotes are turned into SABR
//! parameters per node as soon as the cube recomputes, and surface queries
//! interpolate in parameter space rather than in vol space. Recomputation is
//! lazy; mutating a quote marks the cube stale and the next read rebuilds
//! everything in order.

use std::cell::RefCell;
use std::sync::Arc;

use vcube_core::{
    ensure, ensure_post, Date, LazyObject, LazyState, Rate, Real, Result, Spread, Tenor, Time,
    Volatility,
};
use vcube_math::interpolation::LinearInterpolation;
use vcube_math::optimization::{EndCriteria, EndCriteriaType};
use vcube_math::sabr::SabrParameters;
use vcube_math::Matrix;

use crate::atm::AtmVolStructure;
use crate::cube::Cube;
use crate::smile_fit::{SmileFitInput, SmileModel};
use crate::smile_section::{SmileSection, VolatilityType};

/// Parameter-cube layer indices.
const LAYER_ALPHA: usize = 0;
const LAYER_BETA: usize = 1;
const LAYER_NU: usize = 2;
const LAYER_RHO: usize = 3;
const LAYER_FORWARD: usize = 4;
const LAYER_RMS_ERROR: usize = 5;
const LAYER_MAX_ERROR: usize = 6;
const LAYER_END_CODE: usize = 7;
const N_PARAM_LAYERS: usize = 8;

/// Default calibration tolerance: 100 bp of vol.
pub const DEFAULT_TOLERANCE: Real = 100.0e-4;
/// Default calibration tolerance when residuals are vega weighted: 15 bp.
pub const DEFAULT_TOLERANCE_VEGA_WEIGHTED: Real = 15.0e-4;
/// Default maximum number of perturbed-guess fit attempts per node.
pub const DEFAULT_MAX_GUESSES: usize = 50;
/// Default lower cutoff for usable shifted strikes.
pub const DEFAULT_CUTOFF_STRIKE: Real = 1.0e-4;

/// Numeric code stored in the end-criteria layer of the parameter cubes:
/// 1 = iteration budget exhausted, 2 = cost below root epsilon,
/// 3 = stationary point.
fn end_criteria_code(end_type: EndCriteriaType) -> Real {
    match end_type {
        EndCriteriaType::MaxIterations => 1.0,
        EndCriteriaType::RootEpsilon => 2.0,
        EndCriteriaType::StationaryPoint => 3.0,
    }
}

/// Index of the interval start bracketing `v`, clamped to `[0, n-2]`.
fn bracket(values: &[Time], v: Time) -> usize {
    let i = match values.binary_search_by(|p| p.total_cmp(&v)) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    };
    i.min(values.len() - 2)
}

/// A SABR swaption volatility cube calibrated on top of an ATM surface.
///
/// The smile model is injected, so the cube itself never names a concrete
/// parameterization.
#[derive(Debug)]
pub struct SwaptionVolCube {
    atm: Arc<dyn AtmVolStructure>,
    model: Arc<dyn SmileModel>,

    option_tenors: Vec<Tenor>,
    swap_tenors: Vec<Tenor>,
    option_dates: Vec<Date>,
    option_times: Vec<Time>,
    swap_lengths: Vec<Time>,
    strike_spreads: Vec<Spread>,
    /// One row per (option, swap) pair in option-major order, one column per
    /// strike spread.
    vol_spreads: Matrix,
    vega_weighted: bool,
    parameters_guess: Cube,
    is_parameter_fixed: [bool; 4],
    is_atm_calibrated: bool,
    backward_flat: bool,

    end_criteria: EndCriteria,
    max_error_tolerance: Real,
    error_accept: Real,
    use_max_error: bool,
    max_guesses: usize,
    cutoff_strike: Real,

    lazy: LazyState,
    market_vol_cube: RefCell<Option<Cube>>,
    sparse_parameters: RefCell<Option<Cube>>,
    dense_parameters: RefCell<Option<Cube>>,
    vol_cube_atm_calibrated: RefCell<Option<Cube>>,
    sparse_smiles: RefCell<Vec<Vec<Arc<dyn SmileSection>>>>,
}

impl SwaptionVolCube {
    /// Build a cube over the quoted axes.
    ///
    /// `vol_spreads` carries the quoted smile as spreads over the ATM vol,
    /// one row per (option tenor, swap tenor) pair in option-major order.
    /// `parameters_guess` holds the four initial-guess matrices (alpha,
    /// beta, nu, rho), each `(nOptions x nSwaps)`. Optional knobs default to
    /// the production values and can be overridden with the `with_*`
    /// builders before first use.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        atm: Arc<dyn AtmVolStructure>,
        model: Arc<dyn SmileModel>,
        option_tenors: &[Tenor],
        swap_tenors: &[Tenor],
        strike_spreads: &[Spread],
        vol_spreads: Matrix,
        vega_weighted: bool,
        parameters_guess: Vec<Matrix>,
        is_parameter_fixed: [bool; 4],
        is_atm_calibrated: bool,
        backward_flat: bool,
    ) -> Result<Self> {
        ensure!(
            atm.volatility_type() == VolatilityType::ShiftedLognormal,
            "the cube requires a shifted-lognormal ATM structure"
        );
        ensure!(option_tenors.len() >= 2, "need at least 2 option tenors");
        ensure!(swap_tenors.len() >= 2, "need at least 2 swap tenors");
        ensure!(!strike_spreads.is_empty(), "need at least one strike spread");
        ensure!(
            strike_spreads.windows(2).all(|w| w[0] < w[1]),
            "strike spreads must be strictly ascending"
        );
        ensure!(
            vol_spreads.rows() == option_tenors.len() * swap_tenors.len(),
            "vol spread matrix has {} rows, expected one per (option, swap) pair ({})",
            vol_spreads.rows(),
            option_tenors.len() * swap_tenors.len()
        );
        ensure!(
            vol_spreads.cols() == strike_spreads.len(),
            "vol spread matrix has {} columns, expected one per strike spread ({})",
            vol_spreads.cols(),
            strike_spreads.len()
        );
        ensure!(
            parameters_guess.len() == 4,
            "expected 4 parameter-guess matrices, got {}",
            parameters_guess.len()
        );

        let option_dates: Vec<Date> = option_tenors
            .iter()
            .map(|&t| atm.option_date_from_tenor(t))
            .collect();
        let option_times: Vec<Time> = option_dates
            .iter()
            .map(|&d| atm.time_from_reference(d))
            .collect();
        let swap_lengths: Vec<Time> = swap_tenors.iter().map(|&t| atm.swap_length(t)).collect();
        ensure!(
            option_times.windows(2).all(|w| w[0] < w[1]),
            "option tenors must be strictly increasing"
        );
        ensure!(
            swap_lengths.windows(2).all(|w| w[0] < w[1]),
            "swap tenors must be strictly increasing"
        );

        let mut guess_cube = Cube::new(
            option_dates.clone(),
            swap_tenors.to_vec(),
            option_times.clone(),
            swap_lengths.clone(),
            4,
            backward_flat,
        )?;
        guess_cube.set_points(parameters_guess)?;
        guess_cube.update_interpolators()?;

        let max_error_tolerance = if vega_weighted {
            DEFAULT_TOLERANCE_VEGA_WEIGHTED
        } else {
            DEFAULT_TOLERANCE
        };

        Ok(Self {
            atm,
            model,
            option_tenors: option_tenors.to_vec(),
            swap_tenors: swap_tenors.to_vec(),
            option_dates,
            option_times,
            swap_lengths,
            strike_spreads: strike_spreads.to_vec(),
            vol_spreads,
            vega_weighted,
            parameters_guess: guess_cube,
            is_parameter_fixed,
            is_atm_calibrated,
            backward_flat,
            end_criteria: EndCriteria::new(60000, 100, 1e-8, 1e-8),
            max_error_tolerance,
            error_accept: max_error_tolerance / 5.0,
            use_max_error: false,
            max_guesses: DEFAULT_MAX_GUESSES,
            cutoff_strike: DEFAULT_CUTOFF_STRIKE,
            lazy: LazyState::new(),
            market_vol_cube: RefCell::new(None),
            sparse_parameters: RefCell::new(None),
            dense_parameters: RefCell::new(None),
            vol_cube_atm_calibrated: RefCell::new(None),
            sparse_smiles: RefCell::new(Vec::new()),
        })
    }

    /// Override the optimizer stopping criteria.
    pub fn with_end_criteria(mut self, end_criteria: EndCriteria) -> Self {
        self.end_criteria = end_criteria;
        self
    }

    /// Override the hard-failure tolerance on the selected error metric.
    /// Also rescales `error_accept` to a fifth of the tolerance.
    pub fn with_max_error_tolerance(mut self, tolerance: Real) -> Self {
        self.max_error_tolerance = tolerance;
        self.error_accept = tolerance / 5.0;
        self
    }

    /// Override the early-accept threshold for retry loops.
    pub fn with_error_accept(mut self, error_accept: Real) -> Self {
        self.error_accept = error_accept;
        self
    }

    /// Judge fits by their max error instead of their rms error.
    pub fn with_use_max_error(mut self, use_max_error: bool) -> Self {
        self.use_max_error = use_max_error;
        self
    }

    /// Override the number of perturbed-guess attempts per node.
    pub fn with_max_guesses(mut self, max_guesses: usize) -> Self {
        self.max_guesses = max_guesses;
        self
    }

    /// Override the lower cutoff for usable shifted strikes.
    pub fn with_cutoff_strike(mut self, cutoff_strike: Real) -> Self {
        self.cutoff_strike = cutoff_strike;
        self
    }

    // ── Quote mutation ────────────────────────────────────────────────────────

    /// Overwrite one quoted vol spread and mark the cube stale.
    pub fn set_vol_spread(
        &mut self,
        option_idx: usize,
        swap_idx: usize,
        strike_idx: usize,
        spread: Spread,
    ) -> Result<()> {
        ensure!(
            option_idx < self.option_tenors.len(),
            "option index {} outside {} quoted tenors",
            option_idx,
            self.option_tenors.len()
        );
        ensure!(
            swap_idx < self.swap_tenors.len(),
            "swap index {} outside {} quoted tenors",
            swap_idx,
            self.swap_tenors.len()
        );
        ensure!(
            strike_idx < self.strike_spreads.len(),
            "strike index {} outside {} quoted spreads",
            strike_idx,
            self.strike_spreads.len()
        );
        let row = option_idx * self.swap_tenors.len() + swap_idx;
        self.vol_spreads[(row, strike_idx)] = spread;
        self.update();
        Ok(())
    }

    /// Overwrite one entry of the parameter guess and mark the cube stale.
    pub fn set_parameter_guess(
        &mut self,
        option_idx: usize,
        swap_idx: usize,
        param_idx: usize,
        value: Real,
    ) -> Result<()> {
        ensure!(param_idx < 4, "parameter index {} outside 0..4", param_idx);
        self.parameters_guess
            .set_element(param_idx, option_idx, swap_idx, value)?;
        self.parameters_guess.update_interpolators()?;
        self.update();
        Ok(())
    }

    /// Mark the cube stale. Owners of the ATM structure call this after
    /// bumping ATM quotes.
    pub fn mark_stale(&self) {
        self.lazy.calculated.set(false);
    }

    /// Whether the cached calibration is current.
    pub fn is_up_to_date(&self) -> bool {
        self.is_calculated()
    }

    // ── Surface queries ───────────────────────────────────────────────────────

    /// The smile at (option time, swap length), built from interpolated
    /// parameters. Recomputes the whole cube first when stale, so the first
    /// read after a quote change is expensive.
    pub fn smile_section(
        &self,
        option_time: Time,
        swap_length: Time,
    ) -> Result<Arc<dyn SmileSection>> {
        self.calculate()?;
        let source = if self.is_atm_calibrated {
            self.dense_parameters.borrow()
        } else {
            self.sparse_parameters.borrow()
        };
        let cube = source
            .as_ref()
            .ok_or_else(|| vcube_core::Error::Runtime("parameter cube not built".into()))?;
        let v = cube.value(option_time, swap_length);
        let params = SabrParameters {
            alpha: v[LAYER_ALPHA],
            beta: v[LAYER_BETA],
            nu: v[LAYER_NU],
            rho: v[LAYER_RHO],
        };
        let forward = v[LAYER_FORWARD];
        let shift = self.atm.shift(option_time, swap_length);
        Ok(self.model.smile(option_time, forward, params, shift))
    }

    /// Volatility at (option time, swap length, strike).
    pub fn volatility(
        &self,
        option_time: Time,
        swap_length: Time,
        strike: Rate,
    ) -> Result<Volatility> {
        Ok(self.smile_section(option_time, swap_length)?.volatility(strike))
    }

    // ── Inspectors ────────────────────────────────────────────────────────────

    /// Browse table of the market vol cube (ATM + spreads).
    pub fn market_vol_cube_browse(&self) -> Result<Matrix> {
        self.calculate()?;
        self.browse_of(&self.market_vol_cube, "market vol cube")
    }

    /// One strike layer of the market vol cube.
    pub fn market_vol_layer(&self, strike_idx: usize) -> Result<Matrix> {
        self.calculate()?;
        let cube = self.market_vol_cube.borrow();
        let cube = cube
            .as_ref()
            .ok_or_else(|| vcube_core::Error::Runtime("market vol cube not built".into()))?;
        Ok(cube.layer(strike_idx)?.clone())
    }

    /// Browse table of the sparse (quoted-node) SABR parameters.
    pub fn sparse_sabr_parameters(&self) -> Result<Matrix> {
        self.calculate()?;
        self.browse_of(&self.sparse_parameters, "sparse parameter cube")
    }

    /// Browse table of the dense (ATM-calibrated) SABR parameters.
    /// Only available in ATM-calibrated mode.
    pub fn dense_sabr_parameters(&self) -> Result<Matrix> {
        ensure!(
            self.is_atm_calibrated,
            "dense parameters exist only in ATM-calibrated mode"
        );
        self.calculate()?;
        self.browse_of(&self.dense_parameters, "dense parameter cube")
    }

    /// Browse table of the ATM-calibrated vol cube.
    pub fn vol_cube_atm_calibrated_browse(&self) -> Result<Matrix> {
        self.calculate()?;
        self.browse_of(&self.vol_cube_atm_calibrated, "ATM-calibrated vol cube")
    }

    fn browse_of(&self, slot: &RefCell<Option<Cube>>, what: &str) -> Result<Matrix> {
        let cube = slot.borrow();
        let cube = cube
            .as_ref()
            .ok_or_else(|| vcube_core::Error::Runtime(format!("{what} not built")))?;
        Ok(cube.browse())
    }

    // ── Recalibration ─────────────────────────────────────────────────────────

    /// Re-run the calibration of one swap-tenor column with beta pinned to a
    /// single value for every expiry.
    pub fn recalibrate_with_fixed_beta(&mut self, beta: Real, swap_tenor: Tenor) -> Result<()> {
        let betas = vec![beta; self.option_tenors.len()];
        self.recalibrate_with_beta_per_expiry(&betas, swap_tenor)
    }

    /// Re-run the calibration of one swap-tenor column with one pinned beta
    /// per quoted expiry.
    pub fn recalibrate_with_beta_per_expiry(
        &mut self,
        betas: &[Real],
        swap_tenor: Tenor,
    ) -> Result<()> {
        ensure!(
            betas.len() == self.option_tenors.len(),
            "got {} betas, expected one per option tenor ({})",
            betas.len(),
            self.option_tenors.len()
        );
        for &b in betas {
            ensure!((0.0..=1.0).contains(&b), "beta ({b}) must be in [0, 1]");
        }
        let column = self
            .swap_tenors
            .iter()
            .position(|&t| t == swap_tenor)
            .ok_or_else(|| {
                vcube_core::Error::InvalidArgument(format!(
                    "swap tenor {swap_tenor} is not part of the cube"
                ))
            })?;

        self.calculate()?;

        for (i, &b) in betas.iter().enumerate() {
            self.parameters_guess.set_element(LAYER_BETA, i, column, b)?;
        }
        self.parameters_guess.update_interpolators()?;

        // Refit the pinned column on the quoted market cube.
        {
            let market = self
                .market_vol_cube
                .borrow()
                .clone()
                .ok_or_else(|| vcube_core::Error::Runtime("market vol cube not built".into()))?;
            let mut sparse = self
                .sparse_parameters
                .borrow()
                .clone()
                .ok_or_else(|| vcube_core::Error::Runtime("sparse parameter cube not built".into()))?;
            self.sabr_calibration_section(&market, &mut sparse, swap_tenor)?;
            *self.sparse_parameters.borrow_mut() = Some(sparse);
            self.rebuild_sparse_smiles()?;
            *self.vol_cube_atm_calibrated.borrow_mut() = Some(market);
        }

        if self.is_atm_calibrated {
            let mut atm_calibrated = self
                .vol_cube_atm_calibrated
                .borrow()
                .clone()
                .ok_or_else(|| vcube_core::Error::Runtime("ATM-calibrated cube not built".into()))?;
            self.fill_volatility_cube(&mut atm_calibrated)?;
            let mut dense = self
                .dense_parameters
                .borrow()
                .clone()
                .ok_or_else(|| vcube_core::Error::Runtime("dense parameter cube not built".into()))?;
            self.sabr_calibration_section(&atm_calibrated, &mut dense, swap_tenor)?;
            *self.vol_cube_atm_calibrated.borrow_mut() = Some(atm_calibrated);
            *self.dense_parameters.borrow_mut() = Some(dense);
        }
        Ok(())
    }

    /// Re-run the calibration of one swap-tenor column with a beta term
    /// structure given at `beta_times`, linearly interpolated to the quoted
    /// expiries and held flat beyond the ends.
    pub fn recalibrate_with_beta_term_structure(
        &mut self,
        beta_times: &[Time],
        betas: &[Real],
        swap_tenor: Tenor,
    ) -> Result<()> {
        ensure!(
            beta_times.len() == betas.len(),
            "got {} beta times and {} betas",
            beta_times.len(),
            betas.len()
        );
        ensure!(!betas.is_empty(), "need at least one beta");
        let per_expiry: Vec<Real> = if betas.len() == 1 {
            vec![betas[0]; self.option_times.len()]
        } else {
            let interp = LinearInterpolation::new(beta_times, betas)?;
            self.option_times
                .iter()
                .map(|&t| interp.value_flat(t))
                .collect()
        };
        self.recalibrate_with_beta_per_expiry(&per_expiry, swap_tenor)
    }

    // ── Calibration pipeline ──────────────────────────────────────────────────

    /// Market vol at every quoted node: ATM vol plus the quoted spread.
    fn build_market_vol_cube(&self) -> Result<Cube> {
        let n_swaps = self.swap_tenors.len();
        let mut cube = Cube::new(
            self.option_dates.clone(),
            self.swap_tenors.clone(),
            self.option_times.clone(),
            self.swap_lengths.clone(),
            self.strike_spreads.len(),
            false,
        )?;
        for i in 0..self.option_times.len() {
            for j in 0..self.swap_lengths.len() {
                let atm_vol = self
                    .atm
                    .volatility(self.option_times[i], self.swap_lengths[j]);
                for k in 0..self.strike_spreads.len() {
                    let spread = self.vol_spreads[(i * n_swaps + j, k)];
                    cube.set_element(k, i, j, atm_vol + spread)?;
                }
            }
        }
        cube.update_interpolators()?;
        Ok(cube)
    }

    /// Fit one node of `market` and return the eight parameter-layer values.
    /// Escalates iteration exhaustion and tolerance breaches to hard errors
    /// carrying the node identity.
    fn fit_node(&self, market: &Cube, i: usize, j: usize) -> Result<[Real; N_PARAM_LAYERS]> {
        let t = market.option_times()[i];
        let l = market.swap_lengths()[j];
        let option_date = market.option_dates()[i];
        let swap_tenor = market.swap_tenors()[j];
        let forward = self.atm.forward(t, l);
        let shift = self.atm.shift(t, l);

        let mut strikes = Vec::with_capacity(self.strike_spreads.len());
        let mut vols = Vec::with_capacity(self.strike_spreads.len());
        for (k, &spread) in self.strike_spreads.iter().enumerate() {
            let strike = forward + spread;
            if strike + shift >= self.cutoff_strike {
                strikes.push(strike);
                vols.push(market.layer(k)?[(i, j)]);
            }
        }

        let guess_values = self.parameters_guess.value(t, l);
        let guess = [
            guess_values[0],
            guess_values[1],
            guess_values[2],
            guess_values[3],
        ];

        let input = SmileFitInput {
            strikes,
            vols,
            expiry_time: t,
            forward,
            shift,
            guess,
            is_fixed: self.is_parameter_fixed,
            vega_weighted: self.vega_weighted,
            end_criteria: self.end_criteria.clone(),
            error_accept: self.error_accept,
            use_max_error: self.use_max_error,
            max_guesses: self.max_guesses,
        };
        let fit = self.model.fit(&input).map_err(|e| {
            vcube_core::Error::Runtime(format!(
                "smile fit failed at option date {option_date}, swap tenor {swap_tenor}: {e}"
            ))
        })?;

        ensure_post!(
            fit.end_type != EndCriteriaType::MaxIterations,
            "smile fit ran out of iterations at option date {}, swap tenor {}: \
             alpha = {:.6}, beta = {:.6}, nu = {:.6}, rho = {:.6}, \
             rms error = {:.6}, max error = {:.6}",
            option_date,
            swap_tenor,
            fit.params.alpha,
            fit.params.beta,
            fit.params.nu,
            fit.params.rho,
            fit.rms_error,
            fit.max_error
        );
        let metric = if self.use_max_error {
            fit.max_error
        } else {
            fit.rms_error
        };
        ensure_post!(
            metric <= self.max_error_tolerance,
            "smile calibration at option date {}, swap tenor {} exceeds tolerance {:.6}: \
             alpha = {:.6}, beta = {:.6}, nu = {:.6}, rho = {:.6}, \
             rms error = {:.6}, max error = {:.6}",
            option_date,
            swap_tenor,
            self.max_error_tolerance,
            fit.params.alpha,
            fit.params.beta,
            fit.params.nu,
            fit.params.rho,
            fit.rms_error,
            fit.max_error
        );

        Ok([
            fit.params.alpha,
            fit.params.beta,
            fit.params.nu,
            fit.params.rho,
            fit.forward,
            fit.rms_error,
            fit.max_error,
            end_criteria_code(fit.end_type),
        ])
    }

    /// Fit every node of `market` into a fresh eight-layer parameter cube.
    fn sabr_calibration(&self, market: &Cube) -> Result<Cube> {
        let mut params = Cube::new(
            market.option_dates().to_vec(),
            market.swap_tenors().to_vec(),
            market.option_times().to_vec(),
            market.swap_lengths().to_vec(),
            N_PARAM_LAYERS,
            self.backward_flat,
        )?;
        for i in 0..market.option_times().len() {
            for j in 0..market.swap_lengths().len() {
                let values = self.fit_node(market, i, j)?;
                for (k, &v) in values.iter().enumerate() {
                    params.set_element(k, i, j, v)?;
                }
            }
        }
        params.update_interpolators()?;
        Ok(params)
    }

    /// Refit only the nodes of one swap-tenor column of `market`, writing
    /// the results into `target` node by node.
    fn sabr_calibration_section(
        &self,
        market: &Cube,
        target: &mut Cube,
        swap_tenor: Tenor,
    ) -> Result<()> {
        let j = market
            .swap_tenors()
            .iter()
            .position(|&t| t == swap_tenor)
            .ok_or_else(|| {
                vcube_core::Error::InvalidArgument(format!(
                    "swap tenor {swap_tenor} is not part of the cube"
                ))
            })?;
        for i in 0..market.option_times().len() {
            let values = self.fit_node(market, i, j)?;
            target.set_point(
                market.option_dates()[i],
                swap_tenor,
                market.option_times()[i],
                market.swap_lengths()[j],
                &values,
            )?;
            target.update_interpolators()?;
        }
        Ok(())
    }

    /// Build the per-node smile sections from the sparse parameter cube.
    fn rebuild_sparse_smiles(&self) -> Result<()> {
        let sparse = self.sparse_parameters.borrow();
        let sparse = sparse
            .as_ref()
            .ok_or_else(|| vcube_core::Error::Runtime("sparse parameter cube not built".into()))?;
        let mut smiles = Vec::with_capacity(sparse.option_times().len());
        for i in 0..sparse.option_times().len() {
            let t = sparse.option_times()[i];
            let mut row = Vec::with_capacity(sparse.swap_lengths().len());
            for j in 0..sparse.swap_lengths().len() {
                let l = sparse.swap_lengths()[j];
                let params = SabrParameters {
                    alpha: sparse.layer(LAYER_ALPHA)?[(i, j)],
                    beta: sparse.layer(LAYER_BETA)?[(i, j)],
                    nu: sparse.layer(LAYER_NU)?[(i, j)],
                    rho: sparse.layer(LAYER_RHO)?[(i, j)],
                };
                let forward = sparse.layer(LAYER_FORWARD)?[(i, j)];
                let shift = self.atm.shift(t, l);
                row.push(self.model.smile(t, forward, params, shift));
            }
            smiles.push(row);
        }
        *self.sparse_smiles.borrow_mut() = smiles;
        Ok(())
    }

    /// Densify `atm_calibrated` to the union of the quoted axes and the ATM
    /// structure's axes, filling every new node by moneyness-preserving
    /// spread interpolation over the sparse smiles.
    fn fill_volatility_cube(&self, atm_calibrated: &mut Cube) -> Result<()> {
        let quoted_times = self.option_times.clone();
        let quoted_lengths = self.swap_lengths.clone();

        let mut times: Vec<(Date, Time)> = self
            .option_dates
            .iter()
            .copied()
            .zip(self.option_times.iter().copied())
            .collect();
        for (&d, &t) in self
            .atm
            .option_dates()
            .iter()
            .zip(self.atm.option_times())
        {
            if !quoted_times.iter().any(|&q| q == t) {
                times.push((d, t));
            }
        }
        times.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut lengths: Vec<(Tenor, Time)> = self
            .swap_tenors
            .iter()
            .copied()
            .zip(self.swap_lengths.iter().copied())
            .collect();
        for (&tn, &l) in self.atm.swap_tenors().iter().zip(self.atm.swap_lengths()) {
            if !quoted_lengths.iter().any(|&q| q == l) {
                lengths.push((tn, l));
            }
        }
        lengths.sort_by(|a, b| a.1.total_cmp(&b.1));

        for &(date, t) in &times {
            for &(tenor, l) in &lengths {
                let quoted = quoted_times.iter().any(|&q| q == t)
                    && quoted_lengths.iter().any(|&q| q == l);
                if quoted {
                    continue;
                }
                let vols = self.spread_vol_interpolation(t, l)?;
                atm_calibrated.set_point(date, tenor, t, l, &vols)?;
            }
        }
        atm_calibrated.update_interpolators()?;
        Ok(())
    }

    /// Vol at every strike spread for an unquoted node, built as the target
    /// ATM vol plus a spread bilinearly interpolated over the enclosing 2x2
    /// rectangle of sparse smiles. Moneyness against the shifted forward is
    /// preserved when reading the corner smiles. The corner ATM vols come
    /// from the ATM surface rather than the corner smiles, a small
    /// approximation kept from the reference data setup.
    fn spread_vol_interpolation(&self, option_time: Time, swap_length: Time) -> Result<Vec<Volatility>> {
        let sparse = self.sparse_parameters.borrow();
        let sparse = sparse
            .as_ref()
            .ok_or_else(|| vcube_core::Error::Runtime("sparse parameter cube not built".into()))?;
        let smiles = self.sparse_smiles.borrow();

        let times = sparse.option_times();
        let lengths = sparse.swap_lengths();
        ensure!(
            times.len() >= 2 && lengths.len() >= 2,
            "cannot densify: need at least a 2x2 grid of calibrated smiles"
        );
        // Nodes below the first quoted expiry or tenor fall into the first
        // rectangle; nodes beyond the last one have no bracket at all.
        ensure!(
            option_time <= times[times.len() - 1],
            "cannot densify at option time {}: past the last quoted expiry ({})",
            option_time,
            times[times.len() - 1]
        );
        ensure!(
            swap_length <= lengths[lengths.len() - 1],
            "cannot densify at swap length {}: past the last quoted tenor ({})",
            swap_length,
            lengths[lengths.len() - 1]
        );
        let i0 = bracket(times, option_time);
        let j0 = bracket(lengths, swap_length);

        let atm_forward = self.atm.forward(option_time, swap_length);
        let atm_vol = self.atm.volatility(option_time, swap_length);
        let shift = self.atm.shift(option_time, swap_length);

        let mut vols = Vec::with_capacity(self.strike_spreads.len());
        for &spread in &self.strike_spreads {
            let strike = (atm_forward + spread).max(self.cutoff_strike - shift);
            let moneyness = (atm_forward + shift) / (strike + shift);

            let mut local = Cube::new(
                vec![sparse.option_dates()[i0], sparse.option_dates()[i0 + 1]],
                vec![sparse.swap_tenors()[j0], sparse.swap_tenors()[j0 + 1]],
                vec![times[i0], times[i0 + 1]],
                vec![lengths[j0], lengths[j0 + 1]],
                1,
                false,
            )?;
            for (di, ii) in [i0, i0 + 1].into_iter().enumerate() {
                for (dj, jj) in [j0, j0 + 1].into_iter().enumerate() {
                    let corner_fwd = sparse.layer(LAYER_FORWARD)?[(ii, jj)];
                    let corner_shift = self.atm.shift(times[ii], lengths[jj]);
                    let corner_strike = (corner_fwd + corner_shift) / moneyness - corner_shift;
                    let corner_atm_vol = self.atm.volatility(times[ii], lengths[jj]);
                    let corner_spread =
                        smiles[ii][jj].volatility(corner_strike) - corner_atm_vol;
                    local.set_element(0, di, dj, corner_spread)?;
                }
            }
            local.update_interpolators()?;
            let vol = atm_vol + local.value(option_time, swap_length)[0];
            ensure_post!(
                vol > 0.0,
                "densified vol ({:.6}) is not positive at option time {}, swap length {}, \
                 strike {:.6}",
                vol,
                option_time,
                swap_length,
                strike
            );
            vols.push(vol);
        }
        Ok(vols)
    }
}

impl LazyObject for SwaptionVolCube {
    fn calculated_flag(&self) -> &std::cell::Cell<bool> {
        &self.lazy.calculated
    }

    fn perform_calculations(&self) -> Result<()> {
        let market = self.build_market_vol_cube()?;
        let sparse = self.sabr_calibration(&market)?;

        *self.market_vol_cube.borrow_mut() = Some(market.clone());
        *self.sparse_parameters.borrow_mut() = Some(sparse);
        self.rebuild_sparse_smiles()?;

        let mut atm_calibrated = market;
        if self.is_atm_calibrated {
            self.fill_volatility_cube(&mut atm_calibrated)?;
            let dense = self.sabr_calibration(&atm_calibrated)?;
            *self.dense_parameters.borrow_mut() = Some(dense);
        }
        *self.vol_cube_atm_calibrated.borrow_mut() = Some(atm_calibrated);
        Ok(())
    }
}
