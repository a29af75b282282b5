//! Fit diagnostics for the rendering collaborator.
//!
//! Nothing here draws: the values are computed in linear space and handed to a
//! [`FitRenderer`], which owns display transforms and plotting.

use super::config::SpilloverFitConfig;
use crate::compensate::CompensationMapping;
use crate::controls::{ChannelSet, ControlDataset};
use crate::error::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Log10 bins per decade of control signal
pub const BINS_PER_DECADE: f64 = 10.0;

/// Mean compensated signal of one bin of control events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinResidual {
    /// Lower edge of the bin in the control's own channel (inclusive)
    pub lower: f64,
    /// Upper edge of the bin in the control's own channel (exclusive)
    pub upper: f64,
    /// Events in the bin
    pub count: usize,
    /// Mean compensated value in the detector channel; ideally zero
    pub mean_residual: f64,
}

/// Residual profile of one control in one other channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPairResiduals {
    /// Channel whose single-color control was binned
    pub control_channel: String,
    /// Channel the residual was measured in
    pub detector_channel: String,
    pub bins: Vec<BinResidual>,
}

/// Everything a renderer needs to draw fit overlays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub channels: ChannelSet,
    pub coefficients: Array2<f64>,
    pub intercepts: Array1<f64>,
    pub objective: f64,
    pub residuals: Vec<ChannelPairResiduals>,
}

/// External collaborator that draws fit overlays
pub trait FitRenderer {
    fn render(&self, diagnostics: &FitDiagnostics, config: &SpilloverFitConfig);
}

impl FitDiagnostics {
    /// Compensate each control with the fitted mapping and bin the off-target residuals
    ///
    /// Events with a non-positive value in the control's own channel have no place on a
    /// log axis and are left out of the bins.
    pub fn compute(
        dataset: &ControlDataset,
        mapping: &CompensationMapping,
        objective: f64,
    ) -> Result<Self> {
        let channels = dataset.channels();
        let mut residuals = Vec::with_capacity(channels.len() * (channels.len() - 1));

        for (control_index, (control_name, control)) in dataset.iter().enumerate() {
            let compensated = mapping.apply_events(control.view())?;

            // bin index -> (event count, per-channel sums)
            let mut bins: BTreeMap<i64, (usize, Vec<f64>)> = BTreeMap::new();
            for (raw, corrected) in control.rows().into_iter().zip(compensated.rows()) {
                let signal = raw[control_index];
                if signal <= 0.0 || !signal.is_finite() {
                    continue;
                }
                let bin = (signal.log10() * BINS_PER_DECADE).floor() as i64;
                let entry = bins
                    .entry(bin)
                    .or_insert_with(|| (0, vec![0.0; channels.len()]));
                entry.0 += 1;
                for (sum, value) in entry.1.iter_mut().zip(corrected.iter()) {
                    *sum += value;
                }
            }

            for (detector_index, detector_name) in channels.iter().enumerate() {
                if detector_index == control_index {
                    continue;
                }
                let pair_bins = bins
                    .iter()
                    .map(|(&bin, (count, sums))| BinResidual {
                        lower: 10f64.powf(bin as f64 / BINS_PER_DECADE),
                        upper: 10f64.powf((bin + 1) as f64 / BINS_PER_DECADE),
                        count: *count,
                        mean_residual: sums[detector_index] / *count as f64,
                    })
                    .collect();

                residuals.push(ChannelPairResiduals {
                    control_channel: control_name.to_string(),
                    detector_channel: detector_name.to_string(),
                    bins: pair_bins,
                });
            }
        }

        Ok(Self {
            channels: channels.clone(),
            coefficients: mapping.coefficients().clone(),
            intercepts: mapping.intercepts().clone(),
            objective,
            residuals,
        })
    }

    /// Residual profile for a control/detector pair
    pub fn pair(
        &self,
        control_channel: &str,
        detector_channel: &str,
    ) -> Option<&ChannelPairResiduals> {
        self.residuals.iter().find(|pair| {
            pair.control_channel == control_channel && pair.detector_channel == detector_channel
        })
    }
}
