//! Channel bookkeeping and per-channel single-color control data.
//!
//! A [`ControlDataset`] binds one control matrix to each entry of a [`ChannelSet`] and
//! checks the count and column agreement once, at construction.

use crate::error::{CompensationError, Result};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Ordered, distinct detection channel names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ChannelSetRaw")]
pub struct ChannelSet {
    names: Vec<String>,
}

/// Unvalidated wire form of [`ChannelSet`]
#[derive(Deserialize)]
struct ChannelSetRaw {
    names: Vec<String>,
}

impl TryFrom<ChannelSetRaw> for ChannelSet {
    type Error = CompensationError;

    fn try_from(raw: ChannelSetRaw) -> Result<Self> {
        Self::new(raw.names)
    }
}

impl ChannelSet {
    /// Create a channel set
    ///
    /// # Errors
    /// `InputShape` if fewer than two channels are given or a name repeats
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        if names.len() < 2 {
            return Err(CompensationError::input_shape(format!(
                "Compensation needs at least 2 channels, got {}",
                names.len()
            )));
        }

        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(CompensationError::input_shape(format!(
                    "Channel '{}' appears more than once",
                    name
                )));
            }
        }

        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Single-color controls, one `N_c × C` matrix per channel
///
/// Row counts may differ per channel until the controls are equalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlDataset {
    channels: ChannelSet,
    controls: Vec<Array2<f64>>,
}

impl ControlDataset {
    /// Bind control matrices to channels, in channel order
    ///
    /// # Errors
    /// `InputShape` if the number of controls differs from the channel count, any
    /// control has a column count other than the channel count, or a control holds a
    /// NaN or infinite value
    pub fn new(channels: ChannelSet, controls: Vec<Array2<f64>>) -> Result<Self> {
        if controls.len() != channels.len() {
            return Err(CompensationError::input_shape(format!(
                "Got {} control datasets for {} channels",
                controls.len(),
                channels.len()
            )));
        }

        for (name, control) in channels.iter().zip(&controls) {
            if control.ncols() != channels.len() {
                return Err(CompensationError::input_shape(format!(
                    "Control for '{}' has {} columns, expected {}",
                    name,
                    control.ncols(),
                    channels.len()
                )));
            }
            if let Some(((row, col), value)) =
                control.indexed_iter().find(|(_, value)| !value.is_finite())
            {
                return Err(CompensationError::input_shape(format!(
                    "Control for '{}' has non-finite value {} at event {}, channel {}",
                    name, value, row, col
                )));
            }
        }

        Ok(Self { channels, controls })
    }

    /// Build from `(channel name, control)` pairs
    pub fn from_named<I, S>(named: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Array2<f64>)>,
        S: Into<String>,
    {
        let (names, controls): (Vec<String>, Vec<Array2<f64>>) = named
            .into_iter()
            .map(|(name, control)| (name.into(), control))
            .unzip();
        Self::new(ChannelSet::new(names)?, controls)
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn controls(&self) -> &[Array2<f64>] {
        &self.controls
    }

    pub fn control(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        self.controls.get(index).map(|control| control.view())
    }

    /// Control for a named channel
    pub fn get(&self, channel: &str) -> Option<ArrayView2<'_, f64>> {
        self.channels
            .index_of(channel)
            .and_then(|index| self.control(index))
    }

    pub fn row_counts(&self) -> Vec<usize> {
        self.controls.iter().map(Array2::nrows).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array2<f64>)> {
        self.channels.iter().zip(self.controls.iter())
    }

    /// Replace the controls while keeping the channel binding
    ///
    /// Used by the preprocessing steps, which never change column counts.
    pub(crate) fn with_controls(&self, controls: Vec<Array2<f64>>) -> Result<Self> {
        Self::new(self.channels.clone(), controls)
    }

    /// Fail with `DegenerateData` naming the first channel whose control has no rows
    pub(crate) fn ensure_non_empty(&self) -> Result<()> {
        match self.iter().find(|(_, control)| control.nrows() == 0) {
            Some((name, _)) => Err(CompensationError::degenerate_data(format!(
                "Control for '{}' has no events",
                name
            ))),
            None => Ok(()),
        }
    }
}
