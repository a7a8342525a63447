//! End-to-end tests of the calibration pipeline: quoted spreads in, SABR
//! parameter cubes out, densified to the ATM structure's axes.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use vcube_core::{Date, Rate, Real, Tenor};
use vcube_math::optimization::EndCriteria;
use vcube_math::sabr::{sabr_volatility, SabrParameters};
use vcube_math::Matrix;
use vcube_vol::atm::{year_fraction, AtmVolMatrix, AtmVolStructure};
use vcube_vol::smile_fit::SabrModel;
use vcube_vol::SwaptionVolCube;

const FORWARD: Rate = 0.04;

fn reference_date() -> Date {
    Date::from_ymd_opt(2025, 6, 16).unwrap()
}

fn true_params() -> SabrParameters {
    SabrParameters {
        alpha: 0.05,
        beta: 0.5,
        nu: 0.4,
        rho: -0.3,
    }
}

/// ATM surface on a finer grid than the cube quotes, so ATM calibration has
/// nodes to densify. All data generated from one global SABR smile.
fn atm_surface() -> AtmVolMatrix {
    let option_tenors = [Tenor::years(1), Tenor::years(2), Tenor::years(5)];
    let swap_tenors = [Tenor::years(2), Tenor::years(5), Tenor::years(10)];
    let reference = reference_date();
    let mut vols = Matrix::zeros(3, 3);
    for (i, &ot) in option_tenors.iter().enumerate() {
        let t = year_fraction(reference, ot.advance(reference));
        let v = sabr_volatility(FORWARD, FORWARD, t, &true_params());
        for j in 0..3 {
            vols[(i, j)] = v;
        }
    }
    let forwards = Matrix::from_element(3, 3, FORWARD);
    AtmVolMatrix::new(reference, &option_tenors, &swap_tenors, vols, forwards, 0.0).unwrap()
}

fn strike_spreads() -> Vec<Real> {
    vec![-0.02, -0.01, 0.0, 0.01, 0.02]
}

/// Quoted smile spreads over the ATM vol, generated from the same smile.
fn vol_spreads(atm: &AtmVolMatrix, option_tenors: &[Tenor], swap_tenors: &[Tenor]) -> Matrix {
    let spreads = strike_spreads();
    let mut m = Matrix::zeros(option_tenors.len() * swap_tenors.len(), spreads.len());
    for (i, &ot) in option_tenors.iter().enumerate() {
        let t = atm.time_from_reference(atm.option_date_from_tenor(ot));
        let atm_vol = sabr_volatility(FORWARD, FORWARD, t, &true_params());
        for j in 0..swap_tenors.len() {
            for (k, &spread) in spreads.iter().enumerate() {
                m[(i * swap_tenors.len() + j, k)] =
                    sabr_volatility(FORWARD, FORWARD + spread, t, &true_params()) - atm_vol;
            }
        }
    }
    m
}

fn parameter_guess(n_options: usize, n_swaps: usize) -> Vec<Matrix> {
    vec![
        Matrix::from_element(n_options, n_swaps, 0.04),
        Matrix::from_element(n_options, n_swaps, 0.5),
        Matrix::from_element(n_options, n_swaps, 0.3),
        Matrix::from_element(n_options, n_swaps, -0.1),
    ]
}

fn build_cube(is_atm_calibrated: bool) -> SwaptionVolCube {
    let option_tenors = [Tenor::years(1), Tenor::years(5)];
    let swap_tenors = [Tenor::years(2), Tenor::years(10)];
    let atm = atm_surface();
    let spreads = vol_spreads(&atm, &option_tenors, &swap_tenors);
    SwaptionVolCube::new(
        Arc::new(atm),
        Arc::new(SabrModel::new()),
        &option_tenors,
        &swap_tenors,
        &strike_spreads(),
        spreads,
        false,
        parameter_guess(2, 2),
        [false, true, false, false],
        is_atm_calibrated,
        false,
    )
    .unwrap()
}

#[test]
fn sparse_round_trip_on_quoted_nodes() {
    let cube = build_cube(false);
    let atm = atm_surface();
    let t = atm.time_from_reference(atm.option_date_from_tenor(Tenor::years(1)));
    for strike in [0.02, 0.03, 0.04, 0.05, 0.06] {
        let v = cube.volatility(t, 2.0, strike).unwrap();
        let expected = sabr_volatility(FORWARD, strike, t, &true_params());
        assert!(
            (v - expected).abs() < 2e-3,
            "strike {strike}: {v} vs {expected}"
        );
    }
}

#[test]
fn densification_covers_the_atm_axes() {
    let cube = build_cube(true);
    let dense = cube.dense_sabr_parameters().unwrap();
    // Union axes: 3 option times x 3 swap lengths, 8 parameter layers.
    assert_eq!(dense.rows(), 9);
    assert_eq!(dense.cols(), 10);
    // Every dense node carries a positive alpha and the pinned beta.
    for row in 0..dense.rows() {
        assert!(dense[(row, 2)] > 0.0, "alpha at row {row}");
        assert_abs_diff_eq!(dense[(row, 3)], 0.5, epsilon = 1e-12);
    }
}

#[test]
fn densified_nodes_preserve_atm_vol() {
    let cube = build_cube(true);
    let atm = atm_surface();
    // 2Y expiry and 5Y swap length are ATM-structure nodes the cube never
    // quoted; the dense calibration has to reproduce the ATM vol there.
    let t = atm.time_from_reference(atm.option_date_from_tenor(Tenor::years(2)));
    for l in [2.0, 5.0, 10.0] {
        let atm_vol = atm.volatility(t, l);
        let cube_vol = cube.volatility(t, l, FORWARD).unwrap();
        assert!(
            (cube_vol - atm_vol).abs() < 1e-3,
            "length {l}: {cube_vol} vs {atm_vol}"
        );
    }
}

#[test]
fn atm_calibrated_browse_is_densified() {
    let cube = build_cube(true);
    let table = cube.vol_cube_atm_calibrated_browse().unwrap();
    // 3 times x 3 lengths, 5 strike layers.
    assert_eq!(table.rows(), 9);
    assert_eq!(table.cols(), 7);
    let market = cube.market_vol_cube_browse().unwrap();
    // The market cube keeps the quoted axes only.
    assert_eq!(market.rows(), 4);
}

#[test]
fn all_strikes_cut_off_is_a_hard_error() {
    let cube = build_cube(false).with_cutoff_strike(1.0);
    let err = cube.volatility(1.0, 2.0, 0.04).unwrap_err();
    assert!(
        err.to_string().contains("no usable strikes"),
        "unexpected message: {err}"
    );
    // The failure left the cube stale, so the next read retries.
    assert!(!cube.is_up_to_date());
}

#[test]
fn tolerance_breach_names_the_node() {
    let option_tenors = [Tenor::years(1), Tenor::years(5)];
    let swap_tenors = [Tenor::years(2), Tenor::years(10)];
    let atm = atm_surface();
    // A sawtooth smile no SABR section can follow.
    let mut spreads = vol_spreads(&atm, &option_tenors, &swap_tenors);
    for k in 0..strike_spreads().len() {
        spreads[(0, k)] += if k % 2 == 0 { 0.05 } else { -0.05 };
    }
    let cube = SwaptionVolCube::new(
        Arc::new(atm),
        Arc::new(SabrModel::new()),
        &option_tenors,
        &swap_tenors,
        &strike_spreads(),
        spreads,
        false,
        parameter_guess(2, 2),
        [false, true, false, false],
        false,
        false,
    )
    .unwrap();
    let err = cube.volatility(1.0, 2.0, 0.04).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("exceeds tolerance"), "unexpected message: {msg}");
    assert!(msg.contains("swap tenor 2Y"), "node missing from: {msg}");
}

#[test]
fn iteration_exhaustion_names_the_node() {
    // A 2-iteration budget with zero epsilons can only ever stop on the
    // iteration count, which escalates to a hard error.
    let cube = build_cube(false)
        .with_end_criteria(EndCriteria::new(2, 1000, 0.0, 0.0))
        .with_error_accept(0.0);
    let err = cube.volatility(1.0, 2.0, 0.04).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("ran out of iterations"),
        "unexpected message: {msg}"
    );
    assert!(msg.contains("swap tenor 2Y"), "node missing from: {msg}");
    assert!(!cube.is_up_to_date());
}

#[test]
fn densification_beyond_the_quoted_hull_is_a_hard_error() {
    // ATM structure quoting a 10Y expiry that the cube's {1Y, 5Y} smiles
    // cannot bracket.
    let option_tenors = [Tenor::years(1), Tenor::years(2), Tenor::years(10)];
    let swap_tenors = [Tenor::years(2), Tenor::years(5), Tenor::years(10)];
    let reference = reference_date();
    let mut vols = Matrix::zeros(3, 3);
    for (i, &ot) in option_tenors.iter().enumerate() {
        let t = year_fraction(reference, ot.advance(reference));
        let v = sabr_volatility(FORWARD, FORWARD, t, &true_params());
        for j in 0..3 {
            vols[(i, j)] = v;
        }
    }
    let forwards = Matrix::from_element(3, 3, FORWARD);
    let atm =
        AtmVolMatrix::new(reference, &option_tenors, &swap_tenors, vols, forwards, 0.0).unwrap();

    let quoted_options = [Tenor::years(1), Tenor::years(5)];
    let quoted_swaps = [Tenor::years(2), Tenor::years(10)];
    let spreads = vol_spreads(&atm, &quoted_options, &quoted_swaps);
    let cube = SwaptionVolCube::new(
        Arc::new(atm),
        Arc::new(SabrModel::new()),
        &quoted_options,
        &quoted_swaps,
        &strike_spreads(),
        spreads,
        false,
        parameter_guess(2, 2),
        [false, true, false, false],
        true,
        false,
    )
    .unwrap();
    let err = cube.dense_sabr_parameters().unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("past the last quoted expiry"),
        "unexpected message: {msg}"
    );
    assert!(!cube.is_up_to_date());
}

#[test]
fn mark_stale_forces_recomputation() {
    let cube = build_cube(false);
    cube.volatility(1.0, 2.0, 0.04).unwrap();
    assert!(cube.is_up_to_date());
    cube.mark_stale();
    assert!(!cube.is_up_to_date());
    cube.volatility(1.0, 2.0, 0.04).unwrap();
    assert!(cube.is_up_to_date());
}

#[test]
fn backward_flat_parameter_interpolation() {
    let option_tenors = [Tenor::years(1), Tenor::years(5)];
    let swap_tenors = [Tenor::years(2), Tenor::years(10)];
    let atm = atm_surface();
    let spreads = vol_spreads(&atm, &option_tenors, &swap_tenors);
    let t1 = atm.time_from_reference(atm.option_date_from_tenor(Tenor::years(1)));
    let t5 = atm.time_from_reference(atm.option_date_from_tenor(Tenor::years(5)));
    let cube = SwaptionVolCube::new(
        Arc::new(atm),
        Arc::new(SabrModel::new()),
        &option_tenors,
        &swap_tenors,
        &strike_spreads(),
        spreads,
        false,
        parameter_guess(2, 2),
        [false, true, false, false],
        false,
        true,
    )
    .unwrap();
    // Between quoted expiries the parameters hold the later node's values,
    // so the smile section between t1 and t5 matches the one at t5 except
    // for the expiry time itself.
    let mid = 0.5 * (t1 + t5);
    let s_mid = cube.smile_section(mid, 2.0).unwrap();
    let s_t5 = cube.smile_section(t5, 2.0).unwrap();
    assert_abs_diff_eq!(s_mid.atm_level(), s_t5.atm_level(), epsilon = 1e-12);
    let sparse = cube.sparse_sabr_parameters().unwrap();
    // Alpha at the later expiry of the 2Y column.
    let alpha_t5 = sparse[(1, 2)];
    let mid_vol = s_mid.volatility(FORWARD);
    let expected = sabr_volatility(
        FORWARD,
        FORWARD,
        mid,
        &SabrParameters {
            alpha: alpha_t5,
            beta: sparse[(1, 3)],
            nu: sparse[(1, 4)],
            rho: sparse[(1, 5)],
        },
    );
    assert_abs_diff_eq!(mid_vol, expected, epsilon = 1e-12);
}
