use clap::Parser;
use std::path::PathBuf;

use spectrovis::PaletteName;

#[derive(Parser, Debug)]
#[command(name = "spectrovis", about = "Per-channel spectrogram renderer for audio files")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG, AAC)
    pub input: Option<PathBuf>,

    /// Directory for the channel images and manifest
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Transform size as a power of two (10-14 is typical)
    #[arg(short = 'f', long, default_value_t = 12)]
    pub fft_power: u32,

    /// Logarithmic frequency axis base; 1 is linear
    #[arg(short, long, default_value_t = 1.0)]
    pub log_base: f64,

    /// Color palette
    #[arg(short, long, value_enum, default_value_t = PaletteName::Sox)]
    pub palette: PaletteName,

    /// Config file (defaults to ./spectrovis.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print every state change as a JSON line on stdout
    #[arg(long)]
    pub json: bool,
}
