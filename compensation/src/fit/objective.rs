//! Joint spillover objective.
//!
//! Parameter layout: the `C` intercepts first, then the `C² − C` off-diagonal
//! coefficients in row-major order with the diagonal skipped.

use super::config::ResidualFunction;
use crate::compensate::solve_events_inplace;
use crate::controls::ControlDataset;
use crate::error::Result;
use ndarray::{Array1, Array2};
use ndarray_linalg::Factorize;
use std::cell::RefCell;

pub(crate) struct SpilloverObjective {
    controls: Vec<Array2<f64>>,
    /// Per-control working copies, standard layout so each event row solves in place
    scratch: RefCell<Vec<Array2<f64>>>,
    n_channels: usize,
    min_func: ResidualFunction,
}

impl SpilloverObjective {
    pub(crate) fn new(dataset: &ControlDataset, min_func: ResidualFunction) -> Self {
        let controls: Vec<Array2<f64>> = dataset
            .controls()
            .iter()
            .map(|control| control.as_standard_layout().into_owned())
            .collect();
        Self {
            scratch: RefCell::new(controls.clone()),
            controls,
            n_channels: dataset.n_channels(),
            min_func,
        }
    }

    pub(crate) fn n_params(&self) -> usize {
        self.n_channels * self.n_channels
    }

    pub(crate) fn initial_params(&self, intercept: f64, coefficient: f64) -> Vec<f64> {
        let n = self.n_channels;
        let mut params = vec![intercept; n];
        params.resize(self.n_params(), coefficient);
        params
    }

    /// Split a parameter vector into the coefficient matrix and intercept vector
    pub(crate) fn unpack(&self, params: &[f64]) -> (Array2<f64>, Array1<f64>) {
        let n = self.n_channels;
        let intercepts = Array1::from(params[..n].to_vec());

        let mut off_diagonal = params[n..].iter();
        let coefficients = Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                1.0
            } else {
                off_diagonal.next().copied().unwrap_or(0.0)
            }
        });

        (coefficients, intercepts)
    }

    /// Objective value, or `+∞` where the candidate matrix cannot be solved against
    pub(crate) fn evaluate(&self, params: &[f64]) -> f64 {
        match self.try_evaluate(params) {
            Ok(value) if value.is_finite() => value,
            _ => f64::INFINITY,
        }
    }

    fn try_evaluate(&self, params: &[f64]) -> Result<f64> {
        let (coefficients, intercepts) = self.unpack(params);
        let factors = coefficients.factorize()?;

        let mut total = 0.0;
        let mut off_target = Vec::new();
        let mut scratch = self.scratch.borrow_mut();

        let buffers = self.controls.iter().zip(scratch.iter_mut());
        for (channel, (control, events)) in buffers.enumerate() {
            events.assign(control);
            *events -= &intercepts;
            solve_events_inplace(&factors, events)?;

            // A single-color control should compensate to zero everywhere but its own channel
            off_target.clear();
            off_target.extend(
                events
                    .indexed_iter()
                    .filter(|&((_, j), _)| j != channel)
                    .map(|(_, &value)| value),
            );
            total += self.min_func.reduce(&off_target);
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn dataset() -> ControlDataset {
        ControlDataset::from_named([
            ("FITC", array![[100.0, 5.0], [200.0, 8.0]]),
            ("PE", array![[6.0, 110.0], [5.0, 95.0]]),
        ])
        .unwrap()
    }

    #[test]
    fn test_unpack_layout() {
        let dataset = ControlDataset::from_named([
            ("A", Array2::zeros((1, 3))),
            ("B", Array2::zeros((1, 3))),
            ("C", Array2::zeros((1, 3))),
        ])
        .unwrap();
        let objective = SpilloverObjective::new(&dataset, ResidualFunction::SumOfSquares);
        assert_eq!(objective.n_params(), 9);

        let params = [1.0, 2.0, 3.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let (k, a) = objective.unpack(&params);
        assert_eq!(a, array![1.0, 2.0, 3.0]);
        assert_eq!(
            k,
            array![[1.0, 0.1, 0.2], [0.3, 1.0, 0.4], [0.5, 0.6, 1.0]]
        );
    }

    #[test]
    fn test_initial_params() {
        let objective = SpilloverObjective::new(&dataset(), ResidualFunction::SumOfSquares);
        assert_eq!(objective.initial_params(10.0, 0.0), vec![10.0, 10.0, 0.0, 0.0]);
    }

    #[test]
    fn test_objective_excludes_own_channel() {
        // Identity model with zero intercepts: residual is just the off-target raw values
        let objective = SpilloverObjective::new(&dataset(), ResidualFunction::SumOfSquares);
        let value = objective.evaluate(&[0.0, 0.0, 0.0, 0.0]);
        let expected = 5.0_f64.powi(2) + 8.0_f64.powi(2) + 6.0_f64.powi(2) + 5.0_f64.powi(2);
        assert_abs_diff_eq!(value, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_objective_zero_at_exact_model() {
        // FITC bleeds 0.05 into PE, PE bleeds 0.1 into FITC, no baseline
        let k = array![[1.0, 0.1], [0.05, 1.0]];
        let fitc_true = array![[100.0, 0.0], [300.0, 0.0]];
        let pe_true = array![[0.0, 50.0], [0.0, 80.0]];
        let dataset = ControlDataset::from_named([
            ("FITC", fitc_true.dot(&k.t())),
            ("PE", pe_true.dot(&k.t())),
        ])
        .unwrap();

        let objective = SpilloverObjective::new(&dataset, ResidualFunction::SumOfSquares);
        let value = objective.evaluate(&[0.0, 0.0, 0.1, 0.05]);
        assert_abs_diff_eq!(value, 0.0, epsilon = 1e-18);
    }

    #[test]
    fn test_repeated_evaluation_is_stable() {
        // Working buffers are refilled from the controls on every call
        let objective = SpilloverObjective::new(&dataset(), ResidualFunction::SumOfSquares);
        let params = [3.0, 4.0, 0.05, 0.02];
        let first = objective.evaluate(&params);
        objective.evaluate(&[0.0, 0.0, 0.5, 0.5]);
        assert_eq!(objective.evaluate(&params), first);
    }

    #[test]
    fn test_singular_candidate_is_infinite() {
        let objective = SpilloverObjective::new(&dataset(), ResidualFunction::SumOfSquares);
        assert_eq!(objective.evaluate(&[0.0, 0.0, 1.0, 1.0]), f64::INFINITY);
    }
}
