use serde::Deserialize;
use std::path::{Path, PathBuf};

use spectrovis::PaletteName;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisSection {
    #[serde(default = "default_fft_power")]
    pub fft_power: u32,
    #[serde(default = "default_log_base")]
    pub log_base: f64,
    #[serde(default)]
    pub palette: PaletteName,
}

#[derive(Debug, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            fft_power: default_fft_power(),
            log_base: default_log_base(),
            palette: PaletteName::default(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self { dir: default_dir() }
    }
}

fn default_fft_power() -> u32 { spectrovis::analysis::settings::DEFAULT_FFT_POWER }
fn default_log_base() -> f64 { spectrovis::analysis::settings::DEFAULT_LOG_BASE }
fn default_dir() -> PathBuf { PathBuf::from(".") }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Invalid config {}: {}", path.display(), e);
            None
        }
    }
}

/// `--config`, then `./spectrovis.toml`, then the per-user config locations.
pub fn discover(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("spectrovis.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("spectrovis").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("spectrovis").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
