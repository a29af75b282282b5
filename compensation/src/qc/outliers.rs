use crate::controls::ControlDataset;
use crate::error::{CompensationError, Result};
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::debug;

/// An event is dropped when any non-bleed channel exceeds this multiple of `|bleed channel|`
pub const OUTLIER_RATIO: f64 = 10.0;

/// Result of bleed outlier detection on one control
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierResult {
    /// Boolean mask indicating which events to keep (true = keep, false = remove)
    pub mask: Vec<bool>,

    /// Number of events removed
    pub n_removed: usize,

    /// Percentage of events removed
    pub percentage_removed: f64,
}

/// Flag events of a single-color control that cannot be bleed-through
///
/// Events whose signal in some other channel is more than [`OUTLIER_RATIO`] times the
/// magnitude of the bleed channel are tube-to-tube carryover or acquisition artifacts,
/// and would drag the linear fit.
///
/// # Arguments
/// * `control` - `N × C` event matrix of the control expressing `bleed_channel`
/// * `bleed_channel` - Column index of the control's own fluorophore
pub fn detect_bleed_outliers(
    control: ArrayView2<'_, f64>,
    bleed_channel: usize,
) -> Result<OutlierResult> {
    if bleed_channel >= control.ncols() {
        return Err(CompensationError::input_shape(format!(
            "Bleed channel index {} out of range for {} columns",
            bleed_channel,
            control.ncols()
        )));
    }

    let mask: Vec<bool> = control
        .rows()
        .into_iter()
        .map(|row| {
            let threshold = OUTLIER_RATIO * row[bleed_channel].abs();
            !row
                .iter()
                .enumerate()
                .any(|(j, &value)| j != bleed_channel && value > threshold)
        })
        .collect();

    let n_removed = mask.iter().filter(|&&keep| !keep).count();
    let percentage_removed = if mask.is_empty() {
        0.0
    } else {
        (n_removed as f64 / mask.len() as f64) * 100.0
    };

    Ok(OutlierResult {
        mask,
        n_removed,
        percentage_removed,
    })
}

/// Drop bleed outliers from one control, keeping the remaining events in order
///
/// # Errors
/// `DegenerateData` if no events survive
pub fn remove_bleed_outliers(
    control: ArrayView2<'_, f64>,
    bleed_channel: usize,
) -> Result<Array2<f64>> {
    let result = detect_bleed_outliers(control, bleed_channel)?;

    let kept: Vec<usize> = result
        .mask
        .iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect();

    if kept.is_empty() {
        return Err(CompensationError::degenerate_data(format!(
            "All {} events of the control for channel {} were removed as outliers",
            control.nrows(),
            bleed_channel
        )));
    }

    Ok(control.select(Axis(0), &kept))
}

/// Remove bleed outliers from every control of a dataset
///
/// Channels are independent here, so they are filtered in parallel.
pub fn filter_controls(dataset: &ControlDataset) -> Result<ControlDataset> {
    let filtered = dataset
        .controls()
        .par_iter()
        .enumerate()
        .map(|(channel, control)| {
            remove_bleed_outliers(control.view(), channel).map_err(|err| match err {
                CompensationError::DegenerateData { .. } => {
                    CompensationError::degenerate_data(format!(
                        "Control for '{}' is empty after outlier removal",
                        dataset.channels().name(channel).unwrap_or("?")
                    ))
                }
                other => other,
            })
        })
        .collect::<Result<Vec<Array2<f64>>>>()?;

    for ((name, before), after) in dataset.iter().zip(&filtered) {
        debug!(
            channel = name,
            removed = before.nrows() - after.nrows(),
            kept = after.nrows(),
            "bleed outlier filter"
        );
    }

    dataset.with_controls(filtered)
}
