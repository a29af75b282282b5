//! Error types for spillover estimation, compensation and LUT fitting.
//!
//! Structural problems (`InputShape`), empty datasets (`DegenerateData`) and bad models
//! (`SingularMatrix`) are kept apart so callers can tell "bad input" from "bad model".
//! Non-convergence of the joint fit is not an error: see [`ConvergenceWarning`].

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompensationError {
    /// Dimension or count mismatch between channels, controls, matrices or LUT inputs
    #[error("Input shape error: {message}")]
    InputShape { message: String },

    /// A dataset the computation depends on is empty
    #[error("Degenerate data: {message}")]
    DegenerateData { message: String },

    /// The coefficient matrix cannot be used for a linear solve
    #[error("Singular coefficient matrix: {message}")]
    SingularMatrix { message: String },

    /// The minimizer failed for a reason other than running out of iterations
    #[error("Minimizer failure: {message}")]
    Minimizer { message: String },

    /// LAPACK failure that is neither a shape nor a singularity problem
    #[error("Linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

impl CompensationError {
    pub fn input_shape(message: impl Into<String>) -> Self {
        Self::InputShape {
            message: message.into(),
        }
    }

    pub fn degenerate_data(message: impl Into<String>) -> Self {
        Self::DegenerateData {
            message: message.into(),
        }
    }

    pub fn singular_matrix(message: impl Into<String>) -> Self {
        Self::SingularMatrix {
            message: message.into(),
        }
    }

    pub fn minimizer(message: impl Into<String>) -> Self {
        Self::Minimizer {
            message: message.into(),
        }
    }

    /// True for errors caused by the caller's input rather than by the model
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InputShape { .. } | Self::DegenerateData { .. })
    }
}

impl From<ndarray::ShapeError> for CompensationError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::input_shape(err.to_string())
    }
}

impl From<argmin::core::Error> for CompensationError {
    fn from(err: argmin::core::Error) -> Self {
        Self::minimizer(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CompensationError>;

/// Raised alongside a usable estimate when the joint minimizer ran out of iterations
///
/// The best parameters found are still returned; callers decide whether to retry
/// from different initial conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceWarning {
    /// Iterations spent before the budget ran out
    pub iterations: u64,
    /// Objective value at the best parameters found
    pub objective: f64,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "spillover fit did not converge after {} iterations (objective {:.6e})",
            self.iterations, self.objective
        )
    }
}
