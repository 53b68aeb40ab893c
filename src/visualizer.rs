//! The spectrogram state machine
//!
//! `Visualizer` owns the current input blob, the decode in flight, the decoded
//! buffer and the active analysis run. Every change to the blob or to the
//! analysis settings bumps a shared epoch and replaces the affected work; runs
//! compare their own generation against the epoch before each surface write.
//! Observers see a single `VisualizationState` derived from decode and run status.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::analysis::engine::{AnalysisRun, RunStatus};
use crate::analysis::settings::AnalysisConfig;
use crate::audio::decode::{Blob, DecodeTask, DecodedAudio};
use crate::error::{Result, VisualizerError};
use crate::render::palette::PaletteName;
use crate::render::surface::SurfaceSet;

/// What observers see.
#[derive(Clone, Debug)]
pub enum VisualizationState {
    Inited,
    Decoding,
    Analysing { progress: f64 },
    /// `duration` is analysis wall-clock time in seconds.
    Finished { duration: f64 },
    Errored { error: Arc<VisualizerError> },
}

impl VisualizationState {
    pub fn name(&self) -> &'static str {
        match self {
            VisualizationState::Inited => "inited",
            VisualizationState::Decoding => "decoding",
            VisualizationState::Analysing { .. } => "analysing",
            VisualizationState::Finished { .. } => "finished",
            VisualizationState::Errored { .. } => "errored",
        }
    }

    /// Nothing further happens without new input.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            VisualizationState::Inited
                | VisualizationState::Finished { .. }
                | VisualizationState::Errored { .. }
        )
    }
}

impl PartialEq for VisualizationState {
    fn eq(&self, other: &Self) -> bool {
        use VisualizationState::*;
        match (self, other) {
            (Inited, Inited) | (Decoding, Decoding) => true,
            (Analysing { progress: a }, Analysing { progress: b }) => a == b,
            (Finished { duration: a }, Finished { duration: b }) => a == b,
            (Errored { error: a }, Errored { error: b }) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for VisualizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisualizationState::Inited => f.write_str("Waiting for audio"),
            VisualizationState::Decoding => f.write_str("Decoding audio"),
            VisualizationState::Analysing { progress } => {
                write!(f, "Analysing ({:.0}%)", progress * 100.0)
            }
            VisualizationState::Finished { duration } => {
                write!(f, "Finished in {:.2}s", duration)
            }
            VisualizationState::Errored { error } => write!(f, "{}", error),
        }
    }
}

/// Channel count, sample rate and length of the decoded buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioInfo {
    pub channels: usize,
    pub sample_rate: u32,
    /// Sample-accurate, in seconds.
    pub duration: f64,
}

type StateListener = Box<dyn FnMut(&VisualizationState) + Send>;

pub struct Visualizer {
    config: AnalysisConfig,
    blob: Option<Blob>,
    decode: Option<DecodeTask>,
    audio: Option<Arc<DecodedAudio>>,
    decode_error: Option<Arc<VisualizerError>>,
    run: Option<AnalysisRun>,
    epoch: Arc<AtomicU64>,
    state: VisualizationState,
    listener: Option<StateListener>,
}

impl Visualizer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            blob: None,
            decode: None,
            audio: None,
            decode_error: None,
            run: None,
            epoch: Arc::new(AtomicU64::new(0)),
            state: VisualizationState::Inited,
            listener: None,
        }
    }

    /// Called once for every distinct state, on the thread driving the visualizer.
    pub fn on_state_changed(&mut self, listener: impl FnMut(&VisualizationState) + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn state(&self) -> &VisualizationState {
        &self.state
    }

    pub fn config(&self) -> AnalysisConfig {
        self.config
    }

    pub fn audio_info(&self) -> Option<AudioInfo> {
        self.audio.as_ref().map(|audio| AudioInfo {
            channels: audio.channel_count(),
            sample_rate: audio.sample_rate(),
            duration: audio.duration(),
        })
    }

    /// Surfaces of the current run; readable while it is still being written.
    pub fn surfaces(&self) -> Option<Arc<SurfaceSet>> {
        self.run.as_ref().map(AnalysisRun::surfaces)
    }

    /// Replace the input. Anything decoded or analysed for the previous blob is
    /// discarded before this returns.
    pub fn set_blob(&mut self, blob: Option<Blob>) {
        self.supersede();
        if let Some(task) = self.decode.take() {
            task.cancel();
        }
        self.audio = None;
        self.decode_error = None;
        self.blob = blob;

        if let Some(blob) = &self.blob {
            match blob.path() {
                Some(path) => log::info!("Decoding {}", path.display()),
                None => log::info!("Decoding in-memory audio"),
            }
            match DecodeTask::spawn(blob.clone()) {
                Ok(task) => self.decode = Some(task),
                Err(e) => self.decode_error = Some(Arc::new(e)),
            }
        }
        self.publish();
    }

    /// Replace the analysis settings. Restarts the analysis only if they changed.
    pub fn set_config(&mut self, config: AnalysisConfig) {
        if config == self.config {
            return;
        }
        self.config = config;
        self.restart_analysis();
    }

    pub fn set_transform_size(&mut self, transform_size: usize) {
        self.set_config(AnalysisConfig {
            transform_size,
            ..self.config
        });
    }

    pub fn set_fft_power(&mut self, power: u32) {
        self.set_config(self.config.with_fft_power(power));
    }

    pub fn set_palette(&mut self, palette: PaletteName) {
        self.set_config(self.config.with_palette(palette));
    }

    pub fn set_log_base(&mut self, log_base: f64) {
        self.set_config(self.config.with_log_base(log_base));
    }

    /// Process whatever decode and analysis work is ready without blocking.
    pub fn poll(&mut self) -> &VisualizationState {
        if let Some(result) = self.decode.as_ref().and_then(DecodeTask::try_result) {
            self.finish_decode(result);
        }
        while let Some(run) = self.run.as_mut() {
            if !run.try_update() {
                break;
            }
            self.publish();
        }
        &self.state
    }

    /// Block until the visualizer settles, publishing every state on the way.
    pub fn wait(&mut self) -> &VisualizationState {
        if let Some(task) = self.decode.as_ref() {
            let result = task.wait();
            self.finish_decode(result);
        }
        while let Some(run) = self.run.as_mut() {
            if !run.next_update() {
                break;
            }
            self.publish();
        }
        &self.state
    }

    fn finish_decode(&mut self, result: Result<DecodedAudio>) {
        self.decode = None;
        match result {
            Ok(audio) => {
                self.audio = Some(Arc::new(audio));
                self.restart_analysis();
            }
            // only a superseded decode is cancelled, and that one was already dropped
            Err(VisualizerError::Cancelled) => {}
            Err(e) => {
                log::error!("{}", e);
                self.decode_error = Some(Arc::new(e));
                self.publish();
            }
        }
    }

    /// Retire the current run. No write from it is observable after this returns.
    fn supersede(&mut self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(mut run) = self.run.take() {
            run.cancel();
        }
    }

    fn restart_analysis(&mut self) {
        self.supersede();
        if let Some(audio) = &self.audio {
            self.run = Some(AnalysisRun::start(audio.clone(), self.config, self.epoch.clone()));
        }
        self.publish();
    }

    fn derive_state(&self) -> VisualizationState {
        if self.blob.is_none() {
            return VisualizationState::Inited;
        }
        if let Some(error) = &self.decode_error {
            return VisualizationState::Errored {
                error: error.clone(),
            };
        }
        if self.decode.is_some() {
            return VisualizationState::Decoding;
        }
        match self.run.as_ref().map(AnalysisRun::status) {
            Some(RunStatus::Running { progress }) => VisualizationState::Analysing {
                progress: *progress,
            },
            Some(RunStatus::Finished { elapsed }) => VisualizationState::Finished {
                duration: elapsed.as_secs_f64(),
            },
            Some(RunStatus::Errored(error)) => VisualizationState::Errored {
                error: error.clone(),
            },
            // superseded runs are never kept, so this only covers a run torn down by hand
            Some(RunStatus::Cancelled) | None => VisualizationState::Inited,
        }
    }

    fn publish(&mut self) {
        let state = self.derive_state();
        if state == self.state {
            return;
        }
        log::debug!("State: {} -> {}", self.state.name(), state.name());
        self.state = state;
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.state);
        }
    }
}

impl Drop for Visualizer {
    fn drop(&mut self) {
        self.supersede();
        if let Some(task) = self.decode.take() {
            task.cancel();
        }
    }
}
