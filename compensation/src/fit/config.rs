use crate::qc::SubsampleConfig;
use serde::{Deserialize, Serialize};

/// Reduction applied to the off-target compensated values of each control
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub enum ResidualFunction {
    /// Sum of squared values
    #[default]
    SumOfSquares,
    /// Sum of absolute values, less sensitive to residual outliers
    SumOfAbsolute,
    /// Caller-supplied reduction
    #[serde(skip)]
    Custom(fn(&[f64]) -> f64),
}

impl ResidualFunction {
    pub fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            ResidualFunction::SumOfSquares => values.iter().map(|v| v * v).sum(),
            ResidualFunction::SumOfAbsolute => values.iter().map(|v| v.abs()).sum(),
            ResidualFunction::Custom(f) => f(values),
        }
    }
}

/// Logicle display parameters handed to the rendering collaborator
///
/// Never used by the fit itself. Defaults match FlowJo's biexponential defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogicleParams {
    /// Top of scale value (262144 for 18-bit data)
    pub top_of_scale: f64,
    /// Width basis parameter
    pub width: f64,
    /// Number of positive decades
    pub positive_decades: f64,
    /// Number of additional negative decades
    pub negative_decades: f64,
}

impl Default for LogicleParams {
    fn default() -> Self {
        Self {
            top_of_scale: 262144.0,
            width: 0.5,
            positive_decades: 4.5,
            negative_decades: 0.0,
        }
    }
}

/// Spillover fit configuration
///
/// Only `min_func`, the initial guesses and `subsample` affect the numbers; the plotting
/// options are passed through to the rendering collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpilloverFitConfig {
    /// Residual reduction per control
    pub min_func: ResidualFunction,

    /// Starting autofluorescence intercept for every channel
    pub initial_intercept: f64,

    /// Starting value for every off-diagonal coefficient
    pub initial_coefficient: f64,

    /// Compute fit diagnostics and hand them to the renderer
    pub plots_on: bool,

    /// Ask the renderer for linear rather than logicle axes
    pub plot_lin: bool,

    /// Ask the renderer to label axes in MEF units
    pub do_mef: bool,

    /// Display transform parameters for the renderer
    pub logicle_params: LogicleParams,

    /// Control equalization settings
    pub subsample: SubsampleConfig,
}

impl Default for SpilloverFitConfig {
    fn default() -> Self {
        Self {
            min_func: ResidualFunction::SumOfSquares,
            initial_intercept: 10.0,
            initial_coefficient: 0.0,
            plots_on: false,
            plot_lin: false,
            do_mef: false,
            logicle_params: LogicleParams::default(),
            subsample: SubsampleConfig::default(),
        }
    }
}
