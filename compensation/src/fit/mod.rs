//! Joint estimation of the spillover coefficient matrix and autofluorescence intercepts.
//!
//! All `C` intercepts and `C² − C` off-diagonal coefficients are optimized together:
//! each coefficient shifts the compensated values used to judge every other one, so
//! the channels cannot be fit pair by pair.

pub mod config;
pub mod diagnostics;
pub mod minimizer;
mod objective;

pub use config::{LogicleParams, ResidualFunction, SpilloverFitConfig};
pub use diagnostics::{BinResidual, ChannelPairResiduals, FitDiagnostics, FitRenderer};
pub use minimizer::{Minimizer, MinimizerOutcome, NelderMeadMinimizer};

use crate::compensate::CompensationMapping;
use crate::controls::{ChannelSet, ControlDataset};
use crate::error::{ConvergenceWarning, Result};
use crate::qc::{equalize_controls, filter_controls};
use ndarray::{Array1, Array2};
use objective::SpilloverObjective;
use tracing::{info, warn};

/// Result of a spillover fit
#[derive(Debug, Clone)]
pub struct SpilloverFit {
    /// Fitted coefficient matrix and intercept vector
    pub mapping: CompensationMapping,

    /// Final objective value
    pub objective: f64,

    /// Minimizer iterations spent
    pub iterations: u64,

    /// Set when the minimizer ran out of iterations; `mapping` is still the best estimate
    pub warning: Option<ConvergenceWarning>,

    /// Present when plotting was requested and a renderer was supplied
    pub diagnostics: Option<FitDiagnostics>,
}

impl SpilloverFit {
    pub fn coefficients(&self) -> &Array2<f64> {
        self.mapping.coefficients()
    }

    pub fn intercepts(&self) -> &Array1<f64> {
        self.mapping.intercepts()
    }

    pub fn converged(&self) -> bool {
        self.warning.is_none()
    }
}

/// Fit a compensation model from raw single-color controls
///
/// Runs outlier removal, control equalization and the joint fit with the default
/// Nelder–Mead minimizer.
///
/// # Arguments
/// * `controls` - One `N_c × C` matrix per channel, in `channels` order
/// * `channels` - Channel names
/// * `config` - Fit configuration
///
/// # Errors
/// * `InputShape` if the control count or any column count disagrees with `channels`
/// * `DegenerateData` if a control is empty, before or after outlier removal
pub fn compute_coefficients(
    controls: &[Array2<f64>],
    channels: &ChannelSet,
    config: &SpilloverFitConfig,
) -> Result<SpilloverFit> {
    let dataset = ControlDataset::new(channels.clone(), controls.to_vec())?;
    compute_coefficients_with(&dataset, config, &NelderMeadMinimizer::default(), None)
}

/// Full pipeline with a caller-chosen minimizer and optional renderer
pub fn compute_coefficients_with(
    dataset: &ControlDataset,
    config: &SpilloverFitConfig,
    minimizer: &dyn Minimizer,
    renderer: Option<&dyn FitRenderer>,
) -> Result<SpilloverFit> {
    dataset.ensure_non_empty()?;
    let filtered = filter_controls(dataset)?;
    let equalized = equalize_controls(&filtered, &config.subsample)?;
    fit_prepared_controls(&equalized, config, minimizer, renderer)
}

/// Joint fit on controls that are already filtered and equalized
///
/// # Algorithm
/// For a candidate (K, A), every control is compensated by solving
/// `K · x = event − A` per event. A single-color control should then read zero in
/// every channel but its own, so the control's residual is `min_func` over those
/// off-target values. The objective is the sum over controls, minimized from
/// `(initial_intercept, initial_coefficient)`.
pub fn fit_prepared_controls(
    dataset: &ControlDataset,
    config: &SpilloverFitConfig,
    minimizer: &dyn Minimizer,
    renderer: Option<&dyn FitRenderer>,
) -> Result<SpilloverFit> {
    dataset.ensure_non_empty()?;

    let objective = SpilloverObjective::new(dataset, config.min_func);
    let initial = objective.initial_params(config.initial_intercept, config.initial_coefficient);

    info!(
        channels = dataset.n_channels(),
        events_per_control = ?dataset.row_counts(),
        parameters = objective.n_params(),
        "Starting spillover fit"
    );

    let outcome = minimizer.minimize(&|params: &[f64]| objective.evaluate(params), &initial)?;

    let (coefficients, intercepts) = objective.unpack(&outcome.params);
    let mapping = CompensationMapping::new(coefficients, intercepts)?;

    let warning = if outcome.converged {
        None
    } else {
        let warning = ConvergenceWarning {
            iterations: outcome.iterations,
            objective: outcome.cost,
        };
        warn!("{}", warning);
        Some(warning)
    };

    info!(
        objective = outcome.cost,
        iterations = outcome.iterations,
        converged = outcome.converged,
        "Finished spillover fit"
    );

    let diagnostics = match renderer {
        Some(renderer) if config.plots_on => {
            let diagnostics = FitDiagnostics::compute(dataset, &mapping, outcome.cost)?;
            renderer.render(&diagnostics, config);
            Some(diagnostics)
        }
        _ => None,
    };

    Ok(SpilloverFit {
        mapping,
        objective: outcome.cost,
        iterations: outcome.iterations,
        warning,
        diagnostics,
    })
}
