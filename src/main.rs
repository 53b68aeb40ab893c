mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::Path;

use cli::Cli;
use spectrovis::analysis::settings::{DEFAULT_FFT_POWER, DEFAULT_LOG_BASE};
use spectrovis::encode::png::{Manifest, PngWriter};
use spectrovis::{AnalysisConfig, Blob, PaletteName, VisualizationState, Visualizer};

/// Progress bar resolution.
const PROGRESS_STEPS: u64 = 1000;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    if let Some(path) = config::discover(cli.config.as_deref()) {
        if let Some(cfg) = config::load_config(&path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.fft_power == DEFAULT_FFT_POWER { cli.fft_power = cfg.analysis.fft_power; }
            if cli.log_base == DEFAULT_LOG_BASE { cli.log_base = cfg.analysis.log_base; }
            if cli.palette == PaletteName::default() { cli.palette = cfg.analysis.palette; }
            if cli.output == Path::new(".") { cli.output = cfg.output.dir; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let input = cli.input.as_ref().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    let config = AnalysisConfig::default()
        .with_fft_power(cli.fft_power)
        .with_palette(cli.palette)
        .with_log_base(cli.log_base);
    config.validate().context("Invalid analysis settings")?;

    log::info!("spectrovis - spectrogram renderer");
    log::info!("Input: {}", input.display());
    log::info!("Output: {}", cli.output.display());
    log::info!(
        "Transform: {} samples, palette {}, log base {}",
        config.transform_size,
        config.palette,
        config.log_base
    );

    let pb = if cli.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(PROGRESS_STEPS)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")?
            .progress_chars("=>-"),
    );

    let mut visualizer = Visualizer::new(config);
    let listener_pb = pb.clone();
    let json_lines = cli.json;
    visualizer.on_state_changed(move |state| {
        match state {
            VisualizationState::Decoding => listener_pb.set_message("decoding"),
            VisualizationState::Analysing { progress } => {
                listener_pb.set_message("analysing");
                listener_pb.set_position((progress * PROGRESS_STEPS as f64) as u64);
            }
            VisualizationState::Finished { .. } => listener_pb.set_position(PROGRESS_STEPS),
            VisualizationState::Inited | VisualizationState::Errored { .. } => {}
        }
        if json_lines {
            println!("{}", state_json(state));
        }
    });

    visualizer.set_blob(Some(Blob::from_path(input)));

    match visualizer.wait().clone() {
        VisualizationState::Finished { duration } => {
            pb.finish_with_message(format!("analysed in {:.2}s", duration));

            let surfaces = visualizer.surfaces().context("Analysis finished without surfaces")?;
            let info = visualizer.audio_info().context("Analysis finished without audio")?;
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("spectrogram");

            let writer = PngWriter::new(&cli.output, stem)?;
            let images = writer
                .write_surfaces(&surfaces)?
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            let manifest = Manifest::new(info, visualizer.config(), &surfaces, duration, images);
            let manifest_path = writer.write_manifest(&manifest)?;

            log::info!(
                "Done! {} channel(s), {:.1}s of audio, manifest: {}",
                info.channels,
                info.duration,
                manifest_path.display()
            );
            Ok(())
        }
        VisualizationState::Errored { error } => {
            pb.abandon_with_message("failed");
            anyhow::bail!("{}", error)
        }
        other => anyhow::bail!("Visualizer stopped while {}", other.name()),
    }
}

fn state_json(state: &VisualizationState) -> serde_json::Value {
    match state {
        VisualizationState::Analysing { progress } => {
            json!({ "state": state.name(), "progress": progress })
        }
        VisualizationState::Finished { duration } => {
            json!({ "state": state.name(), "duration": duration })
        }
        VisualizationState::Errored { error } => {
            json!({ "state": state.name(), "error": error.to_string() })
        }
        VisualizationState::Inited | VisualizationState::Decoding => json!({ "state": state.name() }),
    }
}
