//! Spectrogram analysis for complete audio files.
//!
//! A [`Visualizer`] decodes one audio blob, runs a windowed frequency transform
//! over every channel, and streams the coloured result into one raster surface
//! per channel while publishing a [`VisualizationState`].

pub mod analysis;
pub mod audio;
pub mod cancel;
pub mod encode;
pub mod error;
pub mod render;
pub mod visualizer;

pub use analysis::settings::AnalysisConfig;
pub use audio::decode::{Blob, DecodedAudio};
pub use error::{Result, VisualizerError};
pub use render::palette::{get_palette, PaletteName};
pub use render::surface::{RasterSurface, SurfaceSet};
pub use visualizer::{AudioInfo, VisualizationState, Visualizer};
