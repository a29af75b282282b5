//! Least-squares piecewise-linear lookup tables, e.g. for calibration curves.
//!
//! Every sample lying between two breakpoints contributes one row to a banded design
//! matrix holding its two interpolation weights. Those rows are folded into the
//! `K × K` normal equations as they are read, so memory does not grow with the sample
//! count. The breakpoint values are the minimum-norm least-squares solution, so
//! breakpoints no sample constrains come out as zero instead of failing the solve.

use crate::error::{CompensationError, Result};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::LeastSquaresSvd;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Piecewise-linear curve through `(breakpoints[i], values[i])`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PiecewiseLutRaw")]
pub struct PiecewiseLut {
    breakpoints: Vec<f64>,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct PiecewiseLutRaw {
    breakpoints: Vec<f64>,
    values: Vec<f64>,
}

impl TryFrom<PiecewiseLutRaw> for PiecewiseLut {
    type Error = CompensationError;

    fn try_from(raw: PiecewiseLutRaw) -> Result<Self> {
        Self::new(raw.breakpoints, raw.values)
    }
}

impl PiecewiseLut {
    /// # Errors
    /// `InputShape` if the lengths differ, fewer than two breakpoints are given, or the
    /// breakpoints are not finite and strictly increasing
    pub fn new(breakpoints: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        validate_breakpoints(&breakpoints)?;
        if values.len() != breakpoints.len() {
            return Err(CompensationError::input_shape(format!(
                "Got {} values for {} breakpoints",
                values.len(),
                breakpoints.len()
            )));
        }
        Ok(Self {
            breakpoints,
            values,
        })
    }

    pub fn breakpoints(&self) -> &[f64] {
        &self.breakpoints
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Interpolate at `x`
    ///
    /// Outside the breakpoint range the first or last segment is extended linearly.
    pub fn evaluate(&self, x: f64) -> f64 {
        let last_segment = self.breakpoints.len() - 2;
        // Index of the segment [xi[j], xi[j + 1]] containing x
        let segment = self
            .breakpoints
            .partition_point(|&b| b <= x)
            .saturating_sub(1)
            .min(last_segment);

        let (x0, x1) = (self.breakpoints[segment], self.breakpoints[segment + 1]);
        let (y0, y1) = (self.values[segment], self.values[segment + 1]);
        let t = (x - x0) / (x1 - x0);
        y0 + t * (y1 - y0)
    }

    pub fn evaluate_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.evaluate(x)).collect()
    }
}

/// Fit breakpoint values minimizing the squared error of the interpolated curve
///
/// # Arguments
/// * `x` - Sample positions
/// * `y` - Sample values, same length as `x`
/// * `breakpoints` - Strictly increasing breakpoints (at least two)
///
/// # Returns
/// One fitted value per breakpoint
///
/// # Binning
/// Bin `j` covers `[XI[j-1], XI[j])`; the last bin also includes its upper edge.
/// Samples outside `[XI[0], XI[last]]` are ignored.
pub fn fit_piecewise_lut(x: &[f64], y: &[f64], breakpoints: &[f64]) -> Result<Array1<f64>> {
    if x.len() != y.len() {
        return Err(CompensationError::input_shape(format!(
            "x has {} samples but y has {}",
            x.len(),
            y.len()
        )));
    }
    validate_breakpoints(breakpoints)?;

    let equations = NormalEquations::accumulate(x, y, breakpoints);
    if equations.n_rows == 0 {
        debug!("No samples inside the breakpoint range, returning the minimum-norm solution");
        return Ok(Array1::zeros(breakpoints.len()));
    }

    // pinv(AᵀA)·Aᵀy equals pinv(A)·y, so unconstrained breakpoints still come out as zero
    let solution = equations.gram.least_squares(&equations.rhs)?;

    debug!(
        samples = equations.n_rows,
        breakpoints = breakpoints.len(),
        rank = solution.rank,
        "Fitted piecewise LUT"
    );

    Ok(solution.solution)
}

/// Fit and wrap the result as a [`PiecewiseLut`]
pub fn fit_lut(x: &[f64], y: &[f64], breakpoints: &[f64]) -> Result<PiecewiseLut> {
    let values = fit_piecewise_lut(x, y, breakpoints)?;
    PiecewiseLut::new(breakpoints.to_vec(), values.to_vec())
}

/// [`fit_piecewise_lut`] for column vectors (`N × 1` matrices)
///
/// # Errors
/// `InputShape` if either input has more than one column
pub fn fit_piecewise_lut_columns(
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    breakpoints: &[f64],
) -> Result<Array1<f64>> {
    let x = column_vector(x, "x")?;
    let y = column_vector(y, "y")?;
    fit_piecewise_lut(&x.to_vec(), &y.to_vec(), breakpoints)
}

fn column_vector<'a>(matrix: ArrayView2<'a, f64>, name: &str) -> Result<ArrayView1<'a, f64>> {
    if matrix.ncols() != 1 {
        return Err(CompensationError::input_shape(format!(
            "{} must be a single column, got {}x{}",
            name,
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    Ok(matrix.index_axis_move(Axis(1), 0))
}

fn validate_breakpoints(breakpoints: &[f64]) -> Result<()> {
    if breakpoints.len() < 2 {
        return Err(CompensationError::input_shape(format!(
            "Need at least 2 breakpoints, got {}",
            breakpoints.len()
        )));
    }
    if breakpoints.iter().any(|b| !b.is_finite()) {
        return Err(CompensationError::input_shape("Breakpoints must be finite"));
    }
    if !breakpoints.iter().tuple_windows().all(|(a, b)| b > a) {
        return Err(CompensationError::input_shape("Breakpoints must be strictly increasing"));
    }
    Ok(())
}

/// Normal equations `AᵀA · YI = Aᵀy` of the banded design matrix
///
/// Each sample's row of `A` has at most two non-zero weights in adjacent columns, so
/// `AᵀA` is tridiagonal and both sides are summed directly from those weights without
/// materializing `A`.
struct NormalEquations {
    n_rows: usize,
    gram: Array2<f64>,
    rhs: Array1<f64>,
}

impl NormalEquations {
    fn accumulate(x: &[f64], y: &[f64], breakpoints: &[f64]) -> Self {
        let n = breakpoints.len();
        let mut gram = Array2::zeros((n, n));
        let mut rhs = Array1::zeros(n);
        let mut filled = vec![false; n - 1];
        let mut n_rows = 0;

        for (&xv, &yv) in x.iter().zip(y) {
            let Some(bin) = locate_bin(breakpoints, xv) else {
                continue;
            };
            let (lo, hi) = (breakpoints[bin], breakpoints[bin + 1]);
            let t = (xv - lo) / (hi - lo);
            let (w0, w1) = (1.0 - t, t);

            gram[[bin, bin]] += w0 * w0;
            gram[[bin, bin + 1]] += w0 * w1;
            gram[[bin + 1, bin]] += w0 * w1;
            gram[[bin + 1, bin + 1]] += w1 * w1;
            rhs[bin] += w0 * yv;
            rhs[bin + 1] += w1 * yv;

            filled[bin] = true;
            n_rows += 1;
        }

        let empty_bins = filled.iter().filter(|&&f| !f).count();
        if empty_bins > 0 {
            debug!(empty_bins, "LUT has bins without samples");
        }

        Self { n_rows, gram, rhs }
    }
}

/// Segment index `j` with `x` in `[XI[j], XI[j+1])`, or the closed last segment
fn locate_bin(breakpoints: &[f64], x: f64) -> Option<usize> {
    let last = breakpoints.len() - 1;
    if !(x >= breakpoints[0] && x <= breakpoints[last]) {
        return None;
    }
    let bin = breakpoints.partition_point(|&b| b <= x) - 1;
    Some(bin.min(last - 1))
}
