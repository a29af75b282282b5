//! Linear compensation: solve `K · X_real = X_observed` for `X_real`.
//!
//! The coefficient matrix is LU-factorized once and every event is solved against the
//! factors; nothing here forms an explicit inverse.

use crate::error::{CompensationError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis, OwnedRepr};
use ndarray_linalg::{Factorize, LUFactorized, ReciprocalConditionNum, Solve};
use serde::{Deserialize, Serialize};
use tracing::debug;

type LuFactors = LUFactorized<OwnedRepr<f64>>;

/// Matrices with a reciprocal condition number below this are treated as singular
pub const MIN_RCOND: f64 = f64::EPSILON;

const IDENTITY_TOLERANCE: f64 = 1e-12;

/// Compensate channel-major data
///
/// # Arguments
/// * `data` - `C × N` observed data, one row per channel
/// * `coefficients` - `C × C` coefficient matrix
///
/// # Returns
/// `C × N` compensated data
///
/// # Errors
/// * `InputShape` if the matrix is not square or its size differs from the channel count
/// * `SingularMatrix` if the matrix is singular or too ill-conditioned to solve against
pub fn compensate(data: &Array2<f64>, coefficients: &Array2<f64>) -> Result<Array2<f64>> {
    validate_shapes(data.nrows(), coefficients)?;

    if is_identity(coefficients) {
        debug!("Identity coefficient matrix, bypassing compensation");
        return Ok(data.clone());
    }

    let factors = factorize_checked(coefficients)?;
    let mut events = data.t().as_standard_layout().into_owned();
    solve_events_inplace(&factors, &mut events)?;

    Ok(events.reversed_axes())
}

/// Compensate event-major data (`N × C`, the layout acquisition frames use)
pub fn compensate_events(
    events: &Array2<f64>,
    coefficients: &Array2<f64>,
) -> Result<Array2<f64>> {
    validate_shapes(events.ncols(), coefficients)?;

    if is_identity(coefficients) {
        debug!("Identity coefficient matrix, bypassing compensation");
        return Ok(events.clone());
    }

    let factors = factorize_checked(coefficients)?;
    let mut compensated = events.as_standard_layout().into_owned();
    solve_events_inplace(&factors, &mut compensated)?;

    Ok(compensated)
}

/// Check whether a matrix is the identity
#[must_use]
pub fn is_identity(matrix: &Array2<f64>) -> bool {
    matrix.is_square()
        && matrix.indexed_iter().all(|((i, j), &value)| {
            let expected = if i == j { 1.0 } else { 0.0 };
            (value - expected).abs() <= IDENTITY_TOLERANCE
        })
}

fn validate_shapes(n_channels: usize, coefficients: &Array2<f64>) -> Result<()> {
    if !coefficients.is_square() {
        return Err(CompensationError::input_shape(format!(
            "Coefficient matrix must be square, got {}x{}",
            coefficients.nrows(),
            coefficients.ncols()
        )));
    }
    if coefficients.nrows() != n_channels {
        return Err(CompensationError::input_shape(format!(
            "Data has {} channels but the coefficient matrix is {}x{}",
            n_channels,
            coefficients.nrows(),
            coefficients.ncols()
        )));
    }
    Ok(())
}

/// LU-factorize a coefficient matrix, rejecting singular and ill-conditioned ones
pub(crate) fn factorize_checked(coefficients: &Array2<f64>) -> Result<LuFactors> {
    let factors = coefficients.factorize().map_err(|e| {
        CompensationError::singular_matrix(format!("LU factorization failed: {}", e))
    })?;

    let rcond = factors.rcond()?;
    if !rcond.is_finite() || rcond < MIN_RCOND {
        return Err(CompensationError::singular_matrix(format!(
            "Reciprocal condition number {:.3e} is below {:.3e}",
            rcond, MIN_RCOND
        )));
    }

    Ok(factors)
}

/// Solve every row of an event-major matrix in place against `factors`
pub(crate) fn solve_events_inplace(factors: &LuFactors, events: &mut Array2<f64>) -> Result<()> {
    for mut event in events.axis_iter_mut(Axis(0)) {
        factors.solve_inplace(&mut event)?;
    }
    Ok(())
}

/// Immutable compensation model: coefficient matrix plus autofluorescence intercepts
///
/// Produced once per panel by the spillover fit (or built from an externally supplied
/// spillover matrix) and applied to any number of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CompensationMappingRaw")]
pub struct CompensationMapping {
    coefficients: Array2<f64>,
    intercepts: Array1<f64>,
}

/// Unvalidated wire form of [`CompensationMapping`]
#[derive(Deserialize)]
struct CompensationMappingRaw {
    coefficients: Array2<f64>,
    intercepts: Array1<f64>,
}

impl TryFrom<CompensationMappingRaw> for CompensationMapping {
    type Error = CompensationError;

    fn try_from(raw: CompensationMappingRaw) -> Result<Self> {
        Self::new(raw.coefficients, raw.intercepts)
    }
}

impl CompensationMapping {
    /// # Errors
    /// `InputShape` if the matrix is not square, its diagonal is not 1, or the intercept
    /// length differs from the matrix size
    pub fn new(coefficients: Array2<f64>, intercepts: Array1<f64>) -> Result<Self> {
        if !coefficients.is_square() {
            return Err(CompensationError::input_shape(format!(
                "Coefficient matrix must be square, got {}x{}",
                coefficients.nrows(),
                coefficients.ncols()
            )));
        }
        if intercepts.len() != coefficients.nrows() {
            return Err(CompensationError::input_shape(format!(
                "Got {} intercepts for a {}x{} coefficient matrix",
                intercepts.len(),
                coefficients.nrows(),
                coefficients.ncols()
            )));
        }
        if let Some((i, value)) = coefficients
            .diag()
            .iter()
            .enumerate()
            .find(|&(_, &v)| (v - 1.0).abs() > IDENTITY_TOLERANCE)
        {
            return Err(CompensationError::input_shape(format!(
                "Coefficient matrix diagonal must be 1, entry {} is {}",
                i, value
            )));
        }

        Ok(Self {
            coefficients,
            intercepts,
        })
    }

    /// Mapping from a spillover matrix with no autofluorescence correction
    pub fn from_coefficients(coefficients: Array2<f64>) -> Result<Self> {
        let n = coefficients.nrows();
        Self::new(coefficients, Array1::zeros(n))
    }

    pub fn identity(n_channels: usize) -> Self {
        Self {
            coefficients: Array2::eye(n_channels),
            intercepts: Array1::zeros(n_channels),
        }
    }

    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    pub fn intercepts(&self) -> &Array1<f64> {
        &self.intercepts
    }

    pub fn n_channels(&self) -> usize {
        self.coefficients.nrows()
    }

    /// Solve against the coefficient matrix only (`C × N` data)
    pub fn compensate(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        compensate(data, &self.coefficients)
    }

    /// Subtract the intercepts, then solve (`C × N` data)
    ///
    /// This is the full correction the spillover fit models.
    pub fn apply(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        validate_shapes(data.nrows(), &self.coefficients)?;
        let shifted = data - &self.intercepts.view().insert_axis(Axis(1));
        compensate(&shifted, &self.coefficients)
    }

    /// Subtract the intercepts, then solve (`N × C` data)
    pub fn apply_events(&self, events: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        validate_shapes(events.ncols(), &self.coefficients)?;
        let shifted = &events - &self.intercepts;
        compensate_events(&shifted, &self.coefficients)
    }
}
