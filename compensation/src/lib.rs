//! Spillover compensation for flow cytometry
//!
//! This crate learns a linear bleed-through model from single-color controls and
//! applies it to acquired data. It also provides a least-squares piecewise-linear
//! LUT fitter for calibration curves.
//!
//! All numerics run in linear space on in-memory matrices. Loading FCS files,
//! display transforms and plotting belong to other crates.
//!
//! # Quick Start
//!
//! ```no_run
//! use flow_compensation::{ChannelSet, SpilloverFitConfig, compensate, compute_coefficients};
//! use ndarray::array;
//!
//! let channels = ChannelSet::new(["FITC", "PE"])?;
//! let controls = vec![
//!     array![[100.0, 5.0], [200.0, 8.0], [150.0, 6.0]],
//!     array![[6.0, 110.0], [5.0, 95.0], [7.0, 130.0]],
//! ];
//!
//! let fit = compute_coefficients(&controls, &channels, &SpilloverFitConfig::default())?;
//! if let Some(warning) = &fit.warning {
//!     eprintln!("{warning}");
//! }
//!
//! // Channels are rows, events are columns
//! let observed = array![[120.0], [10.0]];
//! let compensated = compensate(&observed, fit.coefficients())?;
//! # Ok::<(), flow_compensation::CompensationError>(())
//! ```
//!
//! # Pipeline
//!
//! 1. [`qc::filter_controls`] drops events that cannot be bleed-through
//! 2. [`qc::equalize_controls`] subsamples every control to the same event count
//! 3. [`fit::fit_prepared_controls`] fits the coefficient matrix and intercepts jointly
//! 4. [`compensate()`] or [`CompensationMapping::apply`] corrects new data
//!
//! [`compute_coefficients`] runs steps 1-3.

pub mod compensate;
pub mod controls;
pub mod error;
pub mod fit;
pub mod lut;
pub mod qc;

pub use compensate::{CompensationMapping, compensate, compensate_events, is_identity};
pub use controls::{ChannelSet, ControlDataset};
pub use error::{CompensationError, ConvergenceWarning, Result};
pub use fit::{
    FitDiagnostics, FitRenderer, LogicleParams, Minimizer, MinimizerOutcome, NelderMeadMinimizer,
    ResidualFunction, SpilloverFit, SpilloverFitConfig, compute_coefficients,
    compute_coefficients_with, fit_prepared_controls,
};
pub use lut::{PiecewiseLut, fit_lut, fit_piecewise_lut, fit_piecewise_lut_columns};
pub use qc::{
    OUTLIER_RATIO, OutlierResult, SubsampleConfig, detect_bleed_outliers, equalize_controls,
    filter_controls, remove_bleed_outliers,
};
