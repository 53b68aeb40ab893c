use anyhow::{Context, Result};
use image::RgbaImage;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::analysis::settings::AnalysisConfig;
use crate::render::axis::{frequency_ticks, time_ticks, FrequencyTick, TimeTick};
use crate::render::palette::PaletteName;
use crate::render::surface::{RasterSurface, SurfaceSet};
use crate::visualizer::AudioInfo;

/// Everything an overlay renderer needs to label the written images.
#[derive(Debug, Serialize)]
pub struct Manifest {
    pub channels: usize,
    pub sample_rate: u32,
    /// Audio length in seconds.
    pub duration: f64,
    pub transform_size: usize,
    pub bin_count: usize,
    pub total_frames: usize,
    pub palette: PaletteName,
    pub log_base: f64,
    /// Wall-clock analysis time in seconds.
    pub analysis_seconds: f64,
    pub images: Vec<String>,
    pub frequency_ticks: Vec<FrequencyTick>,
    pub time_ticks: Vec<TimeTick>,
}

impl Manifest {
    pub fn new(
        info: AudioInfo,
        config: AnalysisConfig,
        surfaces: &SurfaceSet,
        analysis_seconds: f64,
        images: Vec<String>,
    ) -> Self {
        let (width, height) = surfaces
            .channel(0)
            .map_or((0, 0), |s| (s.width(), s.height()));
        Self {
            channels: info.channels,
            sample_rate: info.sample_rate,
            duration: info.duration,
            transform_size: config.transform_size,
            bin_count: config.bin_count(),
            total_frames: width,
            palette: config.palette,
            log_base: config.log_base,
            analysis_seconds,
            images,
            frequency_ticks: frequency_ticks(
                0.0,
                info.sample_rate as f64 / 2.0,
                config.log_base,
                height as f64,
            ),
            time_ticks: time_ticks(info.duration, width as f64),
        }
    }
}

/// Writes channel surfaces as `<stem>_ch<N>.png` and the manifest as `<stem>.json`.
pub struct PngWriter {
    dir: PathBuf,
    stem: String,
}

impl PngWriter {
    pub fn new(dir: &Path, stem: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
        })
    }

    pub fn channel_path(&self, channel: usize) -> PathBuf {
        self.dir.join(format!("{}_ch{}.png", self.stem, channel))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.stem))
    }

    /// Returns the paths written. Empty surfaces are skipped.
    pub fn write_surfaces(&self, surfaces: &SurfaceSet) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(surfaces.len());
        for (channel, surface) in surfaces.iter().enumerate() {
            if surface.width() == 0 || surface.height() == 0 {
                log::warn!("Channel {} has no columns, skipping image", channel);
                continue;
            }
            let path = self.channel_path(channel);
            write_png(surface, &path)?;
            log::info!(
                "Wrote {} ({}x{})",
                path.display(),
                surface.width(),
                surface.height()
            );
            written.push(path);
        }
        Ok(written)
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<PathBuf> {
        let path = self.manifest_path();
        let json = serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
        Ok(path)
    }
}

fn write_png(surface: &RasterSurface, path: &Path) -> Result<()> {
    let img = RgbaImage::from_raw(
        surface.width() as u32,
        surface.height() as u32,
        surface.to_rgba_bytes(),
    )
    .context("Surface dimensions do not match its pixel data")?;
    img.save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}
