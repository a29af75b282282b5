pub mod outliers;
pub mod subsample;

pub use outliers::{
    OUTLIER_RATIO, OutlierResult, detect_bleed_outliers, filter_controls, remove_bleed_outliers,
};
pub use subsample::{SubsampleConfig, equalize_controls};
