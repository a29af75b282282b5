//! Derivative-free minimization behind a small trait, so the spillover fit does not
//! depend on one optimizer implementation.

use crate::error::{CompensationError, Result};
use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;

/// Result of a minimization run
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizerOutcome {
    /// Best parameters found
    pub params: Vec<f64>,
    /// Objective value at `params`
    pub cost: f64,
    /// Iterations spent
    pub iterations: u64,
    /// False when the iteration budget ran out before the tolerance was met
    pub converged: bool,
}

/// Unconstrained minimizer that only needs objective values
pub trait Minimizer {
    /// Minimize `objective` starting from `initial`
    ///
    /// Running out of iterations is not an error: the best estimate is returned with
    /// `converged == false`.
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        initial: &[f64],
    ) -> Result<MinimizerOutcome>;
}

/// Relative perturbation of non-zero entries for the initial simplex
const SIMPLEX_RELATIVE_STEP: f64 = 0.05;
/// Perturbation used for entries that start at zero
const SIMPLEX_ZERO_STEP: f64 = 0.00025;
/// Default iterations per parameter per run
const ITERATIONS_PER_PARAM: u64 = 200;

/// Nelder–Mead simplex search (argmin), restarted from the best vertex to avoid
/// premature simplex collapse
#[derive(Debug, Clone)]
pub struct NelderMeadMinimizer {
    /// Total iteration budget across restarts; defaults to
    /// `200 × parameters × (restarts + 1)`
    pub max_iterations: Option<u64>,

    /// Standard deviation of simplex costs at which a run stops, relative to
    /// `max(|initial cost|, 1)`
    pub sd_tolerance: f64,

    /// Fresh-simplex restarts after a converged run
    pub restarts: usize,
}

impl Default for NelderMeadMinimizer {
    fn default() -> Self {
        Self {
            max_iterations: None,
            sd_tolerance: 1e-12,
            restarts: 2,
        }
    }
}

impl NelderMeadMinimizer {
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Starting simplex around `initial`: each vertex perturbs one coordinate
    pub fn initial_simplex(initial: &[f64]) -> Vec<Vec<f64>> {
        let mut simplex = Vec::with_capacity(initial.len() + 1);
        simplex.push(initial.to_vec());
        for i in 0..initial.len() {
            let mut vertex = initial.to_vec();
            vertex[i] = if vertex[i] == 0.0 {
                SIMPLEX_ZERO_STEP
            } else {
                vertex[i] * (1.0 + SIMPLEX_RELATIVE_STEP)
            };
            simplex.push(vertex);
        }
        simplex
    }

    fn run(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        start: &[f64],
        max_iterations: u64,
        tolerance: f64,
    ) -> Result<MinimizerOutcome> {
        let solver = NelderMead::new(Self::initial_simplex(start)).with_sd_tolerance(tolerance)?;

        let result = Executor::new(ObjectiveProblem { objective }, solver)
            .configure(|state| state.max_iters(max_iterations))
            .run()?;

        let state = result.state();
        let params = state
            .get_best_param()
            .cloned()
            .unwrap_or_else(|| start.to_vec());
        let converged = matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );

        Ok(MinimizerOutcome {
            params,
            cost: state.get_best_cost(),
            iterations: state.get_iter(),
            converged,
        })
    }
}

impl Minimizer for NelderMeadMinimizer {
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        initial: &[f64],
    ) -> Result<MinimizerOutcome> {
        if initial.is_empty() {
            return Err(CompensationError::minimizer("No parameters to optimize"));
        }

        let budget = self.max_iterations.unwrap_or(
            ITERATIONS_PER_PARAM * initial.len() as u64 * (self.restarts as u64 + 1),
        );
        let initial_cost = objective(initial);
        let scale = if initial_cost.is_finite() {
            initial_cost.abs().max(1.0)
        } else {
            1.0
        };
        let tolerance = self.sd_tolerance * scale;

        let mut best = self.run(objective, initial, budget, tolerance)?;
        let mut spent = best.iterations;

        for _ in 0..self.restarts {
            if !best.converged || spent >= budget {
                break;
            }
            let candidate = self.run(objective, &best.params, budget - spent, tolerance)?;
            spent += candidate.iterations;

            let improvement = best.cost - candidate.cost;
            if candidate.cost < best.cost {
                best = candidate;
            }
            if improvement <= tolerance {
                break;
            }
        }

        best.iterations = spent;
        Ok(best)
    }
}

struct ObjectiveProblem<'a> {
    objective: &'a dyn Fn(&[f64]) -> f64,
}

impl CostFunction for ObjectiveProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok((self.objective)(param))
    }
}
