//! The dynamically growing cube grid.
//!
//! A [`Cube`] holds several layers of values over a shared
//! (option time, swap length) grid, one `(nTimes x nLengths)` matrix per
//! layer, and interpolates each layer in 2D with flat extrapolation.
//! Mutations are cheap; interpolators are rebuilt explicitly via
//! [`Cube::update_interpolators`] after a batch of writes. Queries between
//! a write and the rebuild see the previous surface.

use vcube_core::{ensure, Date, Real, Result, Tenor, Time};
use vcube_math::interpolation2d::{
    BackwardflatLinearInterpolation, BilinearInterpolation, FlatExtrapolator2D, Interpolation2D,
};
use vcube_math::Matrix;

/// Number of leading layers that switch to backward-flat time interpolation
/// when the flag is set (the five SABR parameter/forward layers).
const BACKWARD_FLAT_LAYERS: usize = 5;

#[derive(Debug, Clone)]
enum LayerInterp {
    Bilinear(FlatExtrapolator2D<BilinearInterpolation>),
    BackwardFlat(FlatExtrapolator2D<BackwardflatLinearInterpolation>),
}

impl LayerInterp {
    fn value(&self, x: Real, y: Real) -> Real {
        match self {
            LayerInterp::Bilinear(i) => i.value(x, y),
            LayerInterp::BackwardFlat(i) => i.value(x, y),
        }
    }
}

/// A multi-layer surface over (option time, swap length).
#[derive(Debug, Clone)]
pub struct Cube {
    option_dates: Vec<Date>,
    swap_tenors: Vec<Tenor>,
    option_times: Vec<Time>,
    swap_lengths: Vec<Time>,
    n_layers: usize,
    backward_flat: bool,
    /// One `(nTimes x nLengths)` matrix per layer.
    points: Vec<Matrix>,
    interpolators: Vec<LayerInterp>,
}

impl Cube {
    /// Create a zero-filled cube.
    ///
    /// `option_dates` pairs with `option_times` and `swap_tenors` with
    /// `swap_lengths`; both time axes must be strictly ascending with at
    /// least two entries.
    pub fn new(
        option_dates: Vec<Date>,
        swap_tenors: Vec<Tenor>,
        option_times: Vec<Time>,
        swap_lengths: Vec<Time>,
        n_layers: usize,
        backward_flat: bool,
    ) -> Result<Self> {
        ensure!(n_layers >= 1, "cube needs at least one layer");
        ensure!(
            option_dates.len() == option_times.len(),
            "option dates ({}) and times ({}) must pair up",
            option_dates.len(),
            option_times.len()
        );
        ensure!(
            swap_tenors.len() == swap_lengths.len(),
            "swap tenors ({}) and lengths ({}) must pair up",
            swap_tenors.len(),
            swap_lengths.len()
        );
        ensure!(option_times.len() >= 2, "need at least 2 option times");
        ensure!(swap_lengths.len() >= 2, "need at least 2 swap lengths");
        ensure!(
            option_times.windows(2).all(|w| w[0] < w[1]),
            "option times must be strictly ascending"
        );
        ensure!(
            swap_lengths.windows(2).all(|w| w[0] < w[1]),
            "swap lengths must be strictly ascending"
        );

        let points =
            vec![Matrix::zeros(option_times.len(), swap_lengths.len()); n_layers];
        let mut cube = Self {
            option_dates,
            swap_tenors,
            option_times,
            swap_lengths,
            n_layers,
            backward_flat,
            points,
            interpolators: Vec::new(),
        };
        cube.update_interpolators()?;
        Ok(cube)
    }

    /// Quoted expiry dates, ascending.
    pub fn option_dates(&self) -> &[Date] {
        &self.option_dates
    }

    /// Quoted swap tenors, ascending.
    pub fn swap_tenors(&self) -> &[Tenor] {
        &self.swap_tenors
    }

    /// Expiry times, ascending.
    pub fn option_times(&self) -> &[Time] {
        &self.option_times
    }

    /// Swap lengths, ascending.
    pub fn swap_lengths(&self) -> &[Time] {
        &self.swap_lengths
    }

    /// Number of layers.
    pub fn n_layers(&self) -> usize {
        self.n_layers
    }

    /// One layer's `(nTimes x nLengths)` value matrix.
    pub fn layer(&self, layer: usize) -> Result<&Matrix> {
        ensure!(
            layer < self.n_layers,
            "layer {} outside cube with {} layers",
            layer,
            self.n_layers
        );
        Ok(&self.points[layer])
    }

    /// All layers.
    pub fn points(&self) -> &[Matrix] {
        &self.points
    }

    /// Write one cell. Does not rebuild the interpolators.
    pub fn set_element(&mut self, layer: usize, row: usize, col: usize, value: Real) -> Result<()> {
        ensure!(
            layer < self.n_layers,
            "layer {} outside cube with {} layers",
            layer,
            self.n_layers
        );
        ensure!(
            row < self.option_times.len(),
            "row {} outside cube with {} option times",
            row,
            self.option_times.len()
        );
        ensure!(
            col < self.swap_lengths.len(),
            "column {} outside cube with {} swap lengths",
            col,
            self.swap_lengths.len()
        );
        self.points[layer][(row, col)] = value;
        Ok(())
    }

    /// Replace one layer's matrix. Does not rebuild the interpolators.
    pub fn set_layer(&mut self, layer: usize, values: Matrix) -> Result<()> {
        ensure!(
            layer < self.n_layers,
            "layer {} outside cube with {} layers",
            layer,
            self.n_layers
        );
        ensure!(
            values.rows() == self.option_times.len()
                && values.cols() == self.swap_lengths.len(),
            "layer matrix is {}x{}, expected {}x{}",
            values.rows(),
            values.cols(),
            self.option_times.len(),
            self.swap_lengths.len()
        );
        self.points[layer] = values;
        Ok(())
    }

    /// Replace every layer. Does not rebuild the interpolators.
    pub fn set_points(&mut self, points: Vec<Matrix>) -> Result<()> {
        ensure!(
            points.len() == self.n_layers,
            "got {} layers, expected {}",
            points.len(),
            self.n_layers
        );
        for (k, m) in points.into_iter().enumerate() {
            self.set_layer(k, m)?;
        }
        Ok(())
    }

    /// Write the values of every layer at one node, growing the grid if the
    /// coordinates are new. Does not rebuild the interpolators.
    pub fn set_point(
        &mut self,
        option_date: Date,
        swap_tenor: Tenor,
        option_time: Time,
        swap_length: Time,
        values: &[Real],
    ) -> Result<()> {
        ensure!(
            values.len() == self.n_layers,
            "got {} values, expected one per layer ({})",
            values.len(),
            self.n_layers
        );

        let (i, expand_times) = match self
            .option_times
            .binary_search_by(|t| t.total_cmp(&option_time))
        {
            Ok(i) => (i, false),
            Err(i) => (i, true),
        };
        let (j, expand_lengths) = match self
            .swap_lengths
            .binary_search_by(|l| l.total_cmp(&swap_length))
        {
            Ok(j) => (j, false),
            Err(j) => (j, true),
        };
        self.expand_layers(i, expand_times, j, expand_lengths)?;

        self.option_times[i] = option_time;
        self.option_dates[i] = option_date;
        self.swap_lengths[j] = swap_length;
        self.swap_tenors[j] = swap_tenor;
        for (k, &v) in values.iter().enumerate() {
            self.points[k][(i, j)] = v;
        }
        Ok(())
    }

    /// Insert a zero-filled row at `i` and/or column at `j` into every layer,
    /// together with placeholder axis labels. Callers overwrite the labels.
    fn expand_layers(
        &mut self,
        i: usize,
        expand_times: bool,
        j: usize,
        expand_lengths: bool,
    ) -> Result<()> {
        ensure!(
            i <= self.option_times.len(),
            "row insertion point {} past {} option times",
            i,
            self.option_times.len()
        );
        ensure!(
            j <= self.swap_lengths.len(),
            "column insertion point {} past {} swap lengths",
            j,
            self.swap_lengths.len()
        );
        if expand_times {
            self.option_times.insert(i, 0.0);
            self.option_dates.insert(i, Date::default());
        }
        if expand_lengths {
            self.swap_lengths.insert(j, 0.0);
            self.swap_tenors.insert(j, Tenor::years(0));
        }
        if expand_times || expand_lengths {
            for layer in &mut self.points {
                let mut grown = Matrix::zeros(self.option_times.len(), self.swap_lengths.len());
                for r in 0..layer.rows() {
                    let rr = if expand_times && r >= i { r + 1 } else { r };
                    for c in 0..layer.cols() {
                        let cc = if expand_lengths && c >= j { c + 1 } else { c };
                        grown[(rr, cc)] = layer[(r, c)];
                    }
                }
                *layer = grown;
            }
        }
        Ok(())
    }

    /// Rebuild the per-layer interpolators from the current points and axes.
    ///
    /// Layers `0..=4` interpolate backward flat in time when the cube was
    /// built with the flag set; every other layer is bilinear. All layers
    /// extrapolate flat.
    pub fn update_interpolators(&mut self) -> Result<()> {
        let mut interpolators = Vec::with_capacity(self.n_layers);
        for (k, layer) in self.points.iter().enumerate() {
            // z[j * nx + i] = layer[(i-th time, j-th length)]
            let mut z = Vec::with_capacity(self.option_times.len() * self.swap_lengths.len());
            for j in 0..self.swap_lengths.len() {
                for i in 0..self.option_times.len() {
                    z.push(layer[(i, j)]);
                }
            }
            let interp = if self.backward_flat && k < BACKWARD_FLAT_LAYERS {
                LayerInterp::BackwardFlat(FlatExtrapolator2D::new(
                    BackwardflatLinearInterpolation::new(
                        &self.option_times,
                        &self.swap_lengths,
                        &z,
                    )?,
                ))
            } else {
                LayerInterp::Bilinear(FlatExtrapolator2D::new(BilinearInterpolation::new(
                    &self.option_times,
                    &self.swap_lengths,
                    &z,
                )?))
            };
            interpolators.push(interp);
        }
        self.interpolators = interpolators;
        Ok(())
    }

    /// Interpolated value of every layer at (option time, swap length).
    /// Queries outside the grid extrapolate flat.
    pub fn value(&self, option_time: Time, swap_length: Time) -> Vec<Real> {
        self.interpolators
            .iter()
            .map(|interp| interp.value(option_time, swap_length))
            .collect()
    }

    /// A flat table of the cube contents: one row per (tenor, expiry) pair,
    /// columns `[swap length, option time, layer 0, layer 1, ...]`.
    pub fn browse(&self) -> Matrix {
        let n_times = self.option_times.len();
        let n_lengths = self.swap_lengths.len();
        let mut table = Matrix::zeros(n_times * n_lengths, 2 + self.n_layers);
        for i in 0..n_lengths {
            for j in 0..n_times {
                let row = i * n_times + j;
                table[(row, 0)] = self.swap_lengths[i];
                table[(row, 1)] = self.option_times[j];
                for k in 0..self.n_layers {
                    table[(row, 2 + k)] = self.points[k][(j, i)];
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn dates(times: &[Time]) -> Vec<Date> {
        let reference = Date::from_ymd_opt(2025, 6, 16).unwrap();
        times
            .iter()
            .map(|&t| reference + chrono::Duration::days((t * 365.0).round() as i64))
            .collect()
    }

    fn tenors(lengths: &[Time]) -> Vec<Tenor> {
        lengths.iter().map(|&l| Tenor::years(l.round() as i32)).collect()
    }

    fn sample_cube(n_layers: usize, backward_flat: bool) -> Cube {
        let times = vec![1.0, 2.0, 5.0];
        let lengths = vec![1.0, 5.0];
        Cube::new(
            dates(&times),
            tenors(&lengths),
            times,
            lengths,
            n_layers,
            backward_flat,
        )
        .unwrap()
    }

    #[test]
    fn grid_node_reproduced_exactly() {
        let mut cube = sample_cube(3, false);
        cube.set_element(0, 0, 0, 0.20).unwrap();
        cube.update_interpolators().unwrap();
        assert_eq!(cube.value(1.0, 1.0).len(), 3);
        assert_abs_diff_eq!(cube.value(1.0, 1.0)[0], 0.20, epsilon = 1e-12);
        // Below the first expiry the flat extrapolation holds the node value.
        assert_abs_diff_eq!(cube.value(0.5, 1.0)[0], 0.20, epsilon = 1e-12);
    }

    #[test]
    fn bounds_are_checked() {
        let mut cube = sample_cube(2, false);
        assert!(cube.set_element(2, 0, 0, 1.0).is_err());
        assert!(cube.set_element(0, 3, 0, 1.0).is_err());
        assert!(cube.set_element(0, 0, 2, 1.0).is_err());
        assert!(cube.layer(2).is_err());
        assert!(cube
            .set_layer(0, Matrix::zeros(2, 2))
            .is_err());
    }

    #[test]
    fn rejects_degenerate_axes() {
        let times = vec![1.0, 2.0];
        let lengths = vec![1.0];
        assert!(Cube::new(
            dates(&times),
            tenors(&lengths),
            times,
            lengths,
            1,
            false
        )
        .is_err());
        let times = vec![2.0, 1.0];
        let lengths = vec![1.0, 5.0];
        assert!(Cube::new(
            dates(&times),
            tenors(&lengths),
            times.clone(),
            lengths,
            1,
            false
        )
        .is_err());
    }

    #[test]
    fn set_point_grows_the_grid() {
        let mut cube = sample_cube(1, false);
        let new_date = Date::from_ymd_opt(2028, 6, 16).unwrap();
        cube.set_point(new_date, Tenor::years(1), 3.0, 1.0, &[0.30]).unwrap();
        cube.update_interpolators().unwrap();

        assert_eq!(cube.option_times(), &[1.0, 2.0, 3.0, 5.0]);
        assert_eq!(cube.option_dates()[2], new_date);
        assert_abs_diff_eq!(cube.value(3.0, 1.0)[0], 0.30, epsilon = 1e-12);
        // Existing cells kept their position.
        assert_abs_diff_eq!(cube.value(5.0, 5.0)[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn set_point_on_existing_node_does_not_grow() {
        let mut cube = sample_cube(1, false);
        let d = cube.option_dates()[1];
        let t = cube.swap_tenors()[0];
        cube.set_point(d, t, 2.0, 1.0, &[0.25]).unwrap();
        cube.set_point(d, t, 2.0, 1.0, &[0.26]).unwrap();
        assert_eq!(cube.option_times().len(), 3);
        assert_eq!(cube.swap_lengths().len(), 2);
        cube.update_interpolators().unwrap();
        assert_abs_diff_eq!(cube.value(2.0, 1.0)[0], 0.26, epsilon = 1e-12);
    }

    #[test]
    fn queries_are_stale_until_rebuild() {
        let mut cube = sample_cube(1, false);
        cube.set_element(0, 0, 0, 0.20).unwrap();
        // The interpolators still see the zero-filled grid.
        assert_abs_diff_eq!(cube.value(1.0, 1.0)[0], 0.0, epsilon = 1e-12);
        cube.update_interpolators().unwrap();
        assert_abs_diff_eq!(cube.value(1.0, 1.0)[0], 0.20, epsilon = 1e-12);
    }

    #[test]
    fn extrapolation_is_flat() {
        let mut cube = sample_cube(1, false);
        cube.set_element(0, 2, 1, 0.40).unwrap();
        cube.update_interpolators().unwrap();
        assert_abs_diff_eq!(cube.value(50.0, 50.0)[0], 0.40, epsilon = 1e-12);
        assert_abs_diff_eq!(
            cube.value(0.0, 0.5)[0],
            cube.value(1.0, 1.0)[0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn backward_flat_applies_to_leading_layers() {
        let mut cube = sample_cube(6, true);
        for k in 0..6 {
            cube.set_element(k, 0, 0, 0.1).unwrap();
            cube.set_element(k, 1, 0, 0.2).unwrap();
            cube.set_element(k, 2, 0, 0.5).unwrap();
            cube.set_element(k, 0, 1, 0.1).unwrap();
            cube.set_element(k, 1, 1, 0.2).unwrap();
            cube.set_element(k, 2, 1, 0.5).unwrap();
        }
        cube.update_interpolators().unwrap();
        let v = cube.value(1.5, 1.0);
        // Layers 0..=4 hold the value at the next node back; layer 5 is linear.
        for k in 0..5 {
            assert_abs_diff_eq!(v[k], 0.2, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(v[5], 0.15, epsilon = 1e-12);
    }

    #[test]
    fn browse_layout() {
        let mut cube = sample_cube(2, false);
        cube.set_element(0, 1, 0, 0.25).unwrap();
        cube.set_element(1, 1, 0, 0.9).unwrap();
        let table = cube.browse();
        assert_eq!(table.rows(), 6);
        assert_eq!(table.cols(), 4);
        // Row i*nTimes+j: here length index 0, time index 1.
        assert_abs_diff_eq!(table[(1, 0)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table[(1, 1)], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table[(1, 2)], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(table[(1, 3)], 0.9, epsilon = 1e-12);
    }

    #[test]
    fn clones_share_no_state() {
        let mut cube = sample_cube(1, false);
        cube.set_element(0, 0, 0, 0.20).unwrap();
        cube.update_interpolators().unwrap();
        let mut copy = cube.clone();
        copy.set_element(0, 0, 0, 0.99).unwrap();
        copy.update_interpolators().unwrap();
        assert_abs_diff_eq!(cube.value(1.0, 1.0)[0], 0.20, epsilon = 1e-12);
        assert_abs_diff_eq!(copy.value(1.0, 1.0)[0], 0.99, epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn axes_stay_sorted_under_insertions(
            new_times in proptest::collection::vec(0.1f64..30.0, 1..6),
            new_lengths in proptest::collection::vec(0.5f64..30.0, 1..6),
        ) {
            let mut cube = sample_cube(1, false);
            let d = Date::from_ymd_opt(2030, 1, 1).unwrap();
            for (&t, &l) in new_times.iter().zip(new_lengths.iter().cycle()) {
                cube.set_point(d, Tenor::years(1), t, l, &[0.2]).unwrap();
            }
            prop_assert!(cube.option_times().windows(2).all(|w| w[0] < w[1]));
            prop_assert!(cube.swap_lengths().windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(cube.option_times().len(), cube.option_dates().len());
            prop_assert_eq!(cube.swap_lengths().len(), cube.swap_tenors().len());
        }
    }
}
