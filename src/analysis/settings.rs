use serde::Deserialize;

use crate::error::{Result, VisualizerError};
use crate::render::palette::PaletteName;

pub const DEFAULT_FFT_POWER: u32 = 12;
pub const DEFAULT_LOG_BASE: f64 = 1.0;

pub const MIN_TRANSFORM_SIZE: usize = 32;
pub const MAX_TRANSFORM_SIZE: usize = 32768;

/// Settings for one analysis pass. Changing any field restarts the analysis.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Samples per frame; a power of two.
    pub transform_size: usize,
    pub palette: PaletteName,
    /// 1 for a linear frequency axis.
    pub log_base: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            transform_size: 1 << DEFAULT_FFT_POWER,
            palette: PaletteName::default(),
            log_base: DEFAULT_LOG_BASE,
        }
    }
}

impl AnalysisConfig {
    pub fn with_fft_power(mut self, power: u32) -> Self {
        self.transform_size = 1usize.checked_shl(power).unwrap_or(0);
        self
    }

    pub fn with_palette(mut self, palette: PaletteName) -> Self {
        self.palette = palette;
        self
    }

    pub fn with_log_base(mut self, log_base: f64) -> Self {
        self.log_base = log_base;
        self
    }

    /// Usable magnitude bins per frame.
    pub fn bin_count(&self) -> usize {
        self.transform_size / 2
    }

    /// Columns needed to cover `frame_count` samples, the last one zero-padded.
    pub fn total_frames(&self, frame_count: usize) -> usize {
        frame_count.div_ceil(self.transform_size)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.transform_size.is_power_of_two()
            || !(MIN_TRANSFORM_SIZE..=MAX_TRANSFORM_SIZE).contains(&self.transform_size)
        {
            return Err(VisualizerError::Analysis(format!(
                "transform size {} must be a power of two between {} and {}",
                self.transform_size, MIN_TRANSFORM_SIZE, MAX_TRANSFORM_SIZE
            )));
        }
        if !self.log_base.is_finite() || self.log_base < 1.0 {
            return Err(VisualizerError::Analysis(format!(
                "log base {} must be a finite number no less than 1",
                self.log_base
            )));
        }
        Ok(())
    }
}
