use crate::controls::ControlDataset;
use crate::error::Result;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for control equalization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsampleConfig {
    /// Seed for the subsampling RNG; `None` seeds from the operating system
    pub seed: Option<u64>,
}

impl SubsampleConfig {
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

/// Subsample every control down to the smallest control's event count
///
/// Sampling is uniform and without replacement, so the joint fit weights every
/// channel equally. Kept events stay in acquisition order.
///
/// # Errors
/// `DegenerateData` if any control has no events
pub fn equalize_controls(
    dataset: &ControlDataset,
    config: &SubsampleConfig,
) -> Result<ControlDataset> {
    dataset.ensure_non_empty()?;

    let target = dataset
        .controls()
        .iter()
        .map(Array2::nrows)
        .min()
        .unwrap_or(0);

    let mut rng = config.rng();

    let equalized: Vec<Array2<f64>> = dataset
        .controls()
        .iter()
        .map(|control| {
            if control.nrows() == target {
                return control.clone();
            }
            let mut picked = index::sample(&mut rng, control.nrows(), target).into_vec();
            picked.sort_unstable();
            control.select(Axis(0), &picked)
        })
        .collect();

    debug!(
        events_per_control = target,
        original = ?dataset.row_counts(),
        "equalized controls"
    );

    dataset.with_controls(equalized)
}
