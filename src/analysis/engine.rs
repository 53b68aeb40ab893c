//! Spectrum analysis runs
//!
//! An `AnalysisRun` owns one pass over a decoded buffer. A worker thread plays
//! the part of the audio scheduler: it analyses frames strictly in order and
//! hands each one over a bounded channel, then reports completion on a second
//! channel. The owning thread consumes frames, colours them, and writes columns
//! into the run's surfaces. Completion is only declared once both the last
//! frame has been written and the worker has said it is done, in either order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use rayon::prelude::*;
use rustfft::FftPlanner;

use crate::audio::decode::DecodedAudio;
use crate::cancel::CancelToken;
use crate::error::{Result, VisualizerError};
use crate::render::index_map::{build_index_map, source_bin};
use crate::render::palette::{get_palette, PaletteTable};
use crate::render::surface::SurfaceSet;

use super::analyser::Analyser;
use super::settings::AnalysisConfig;

/// Frames the worker may run ahead of the consumer.
const FRAME_QUEUE_DEPTH: usize = 8;

/// Worker body: hands frames over in order and returns true once all of them are sent.
type Producer = fn(&DecodedAudio, usize, usize, &Sender<FrameBatch>, &Receiver<Vec<u8>>, &CancelToken) -> bool;

/// Byte levels for every channel of one frame.
struct FrameBatch {
    index: usize,
    levels: Vec<Vec<u8>>,
}

enum Event {
    Frame(Option<FrameBatch>),
    Done(Option<Result<()>>),
}

#[derive(Clone, Debug)]
pub enum RunStatus {
    Running { progress: f64 },
    /// `elapsed` is wall-clock analysis time, not audio length.
    Finished { elapsed: Duration },
    Errored(Arc<VisualizerError>),
    Cancelled,
}

pub struct AnalysisRun {
    generation: u64,
    epoch: Arc<AtomicU64>,
    total_frames: usize,
    bin_count: usize,
    frame_index: usize,
    palette: &'static PaletteTable,
    index_map: Option<Vec<usize>>,
    surfaces: Arc<SurfaceSet>,
    column: Vec<u32>,
    frames_rx: Option<Receiver<FrameBatch>>,
    done_rx: Option<Receiver<Result<()>>>,
    recycle_tx: Sender<Vec<u8>>,
    stop: CancelToken,
    worker: Option<JoinHandle<()>>,
    started: Instant,
    pipeline_completed: bool,
    status: RunStatus,
}

impl AnalysisRun {
    /// Start analysing `audio` with `config`.
    ///
    /// The run belongs to the current value of `epoch`; once the epoch moves on it
    /// stops writing. An unsupported configuration yields a run that is already
    /// `Errored`.
    pub fn start(audio: Arc<DecodedAudio>, config: AnalysisConfig, epoch: Arc<AtomicU64>) -> Self {
        Self::start_with(audio, config, epoch, produce_frames)
    }

    fn start_with(
        audio: Arc<DecodedAudio>,
        config: AnalysisConfig,
        epoch: Arc<AtomicU64>,
        produce: Producer,
    ) -> Self {
        let generation = epoch.load(Ordering::Acquire);
        let channels = audio.channel_count();
        let (recycle_tx, recycle_rx) = bounded(channels * (FRAME_QUEUE_DEPTH + 2));

        let mut run = Self {
            generation,
            epoch,
            total_frames: 0,
            bin_count: 0,
            frame_index: 0,
            palette: get_palette(config.palette),
            index_map: None,
            surfaces: Arc::new(SurfaceSet::new(0, 0, 0)),
            column: Vec::new(),
            frames_rx: None,
            done_rx: None,
            recycle_tx,
            stop: CancelToken::new(),
            worker: None,
            started: Instant::now(),
            pipeline_completed: false,
            status: RunStatus::Running { progress: 0.0 },
        };

        if let Err(e) = config.validate() {
            log::warn!("Refusing to analyse: {}", e);
            run.status = RunStatus::Errored(Arc::new(e));
            return run;
        }

        run.total_frames = config.total_frames(audio.frame_count());
        run.bin_count = config.bin_count();
        run.index_map = build_index_map(config.log_base, run.bin_count);
        run.surfaces = Arc::new(SurfaceSet::new(channels, run.total_frames, run.bin_count));
        run.column = vec![0; run.bin_count];

        log::info!(
            "Analysing {} frame(s) x {} channel(s): {}-point transform, {} bins, palette={}, log base={}",
            run.total_frames,
            channels,
            config.transform_size,
            run.bin_count,
            config.palette,
            config.log_base
        );

        let (frames_tx, frames_rx) = bounded(FRAME_QUEUE_DEPTH);
        let (done_tx, done_rx) = bounded(1);
        let stop = run.stop.clone();
        let total_frames = run.total_frames;
        let size = config.transform_size;

        let spawned = thread::Builder::new()
            .name(format!("analysis-{generation}"))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    produce(&audio, size, total_frames, &frames_tx, &recycle_rx, &stop)
                }));
                drop(frames_tx);
                match outcome {
                    Ok(true) => {
                        let _ = done_tx.send(Ok(()));
                    }
                    // stopped; the consumer either cancelled or sees the channel close
                    Ok(false) => {}
                    Err(payload) => {
                        let _ = done_tx.send(Err(VisualizerError::Analysis(format!(
                            "analysis worker panicked: {}",
                            panic_message(&*payload)
                        ))));
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                run.worker = Some(handle);
                run.frames_rx = Some(frames_rx);
                run.done_rx = Some(done_rx);
            }
            Err(e) => {
                run.status = RunStatus::Errored(Arc::new(VisualizerError::Analysis(format!(
                    "failed to start analysis worker: {e}"
                ))));
            }
        }
        run
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Running { .. })
    }

    pub fn surfaces(&self) -> Arc<SurfaceSet> {
        self.surfaces.clone()
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Next column to be written.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Handle everything that is ready without blocking. Returns whether anything happened.
    pub fn poll(&mut self) -> bool {
        let mut progressed = false;
        while self.step(false) {
            progressed = true;
        }
        progressed
    }

    /// Handle at most one ready event without blocking.
    pub fn try_update(&mut self) -> bool {
        self.step(false)
    }

    /// Block until one more event has been handled. Returns false if the run is
    /// no longer running.
    pub fn next_update(&mut self) -> bool {
        self.step(true)
    }

    /// Block until the run settles.
    pub fn wait(&mut self) -> &RunStatus {
        while self.step(true) {}
        &self.status
    }

    fn step(&mut self, block: bool) -> bool {
        if !self.is_running() {
            return false;
        }
        // a step that delivered the last frame reports it before the run settles
        if self.settle() {
            return true;
        }

        let no_frames = never();
        let no_done = never();
        let frames_rx = self.frames_rx.as_ref().unwrap_or(&no_frames);
        let done_rx = self.done_rx.as_ref().unwrap_or(&no_done);

        let event = if block {
            select! {
                recv(frames_rx) -> msg => Event::Frame(msg.ok()),
                recv(done_rx) -> msg => Event::Done(msg.ok()),
            }
        } else {
            select! {
                recv(frames_rx) -> msg => Event::Frame(msg.ok()),
                recv(done_rx) -> msg => Event::Done(msg.ok()),
                default => return false,
            }
        };

        match event {
            Event::Frame(Some(batch)) => {
                self.apply(batch);
                if self.frame_index == self.total_frames {
                    return true;
                }
            }
            Event::Frame(None) => self.frames_rx = None,
            Event::Done(Some(Ok(()))) => {
                self.pipeline_completed = true;
                self.done_rx = None;
            }
            Event::Done(Some(Err(e))) => self.fail(e),
            Event::Done(None) => {
                self.done_rx = None;
                if !self.pipeline_completed {
                    self.fail(VisualizerError::Analysis(
                        "analysis pipeline stopped before completing".into(),
                    ));
                }
            }
        }
        self.settle();
        true
    }

    fn apply(&mut self, batch: FrameBatch) {
        if self.epoch.load(Ordering::Acquire) != self.generation {
            log::debug!("Analysis run {} superseded at frame {}", self.generation, batch.index);
            self.cancel();
            return;
        }
        assert_eq!(batch.index, self.frame_index, "analysis frames arrived out of order");

        let ymax = self.bin_count - 1;
        for (channel, levels) in batch.levels.into_iter().enumerate() {
            assert_eq!(levels.len(), self.bin_count, "magnitude buffer has the wrong length");
            for (row, pixel) in self.column.iter_mut().enumerate() {
                *pixel = self
                    .palette
                    .color(levels[source_bin(self.index_map.as_deref(), row, ymax)]);
            }
            if let Some(surface) = self.surfaces.channel(channel) {
                surface.write_column(batch.index, &self.column);
            }
            // a full pool just means the buffer is dropped
            let _ = self.recycle_tx.try_send(levels);
        }

        self.frame_index += 1;
        self.status = RunStatus::Running {
            progress: self.frame_index as f64 / self.total_frames as f64,
        };
    }

    /// Leave `Running` once the pipeline has completed. Returns whether it did.
    fn settle(&mut self) -> bool {
        if !self.is_running() || !self.pipeline_completed {
            return false;
        }
        if self.frame_index == self.total_frames {
            let elapsed = self.started.elapsed();
            log::info!("Analysis finished in {:.3}s", elapsed.as_secs_f64());
            self.status = RunStatus::Finished { elapsed };
            self.frames_rx = None;
            self.join_worker();
            true
        } else if self.frames_rx.is_none() {
            self.fail(VisualizerError::Analysis(format!(
                "analysis pipeline completed after {} of {} frames",
                self.frame_index, self.total_frames
            )));
            true
        } else {
            false
        }
    }

    fn fail(&mut self, error: VisualizerError) {
        log::error!("{}", error);
        self.status = RunStatus::Errored(Arc::new(error));
        self.stop.cancel();
        self.frames_rx = None;
        self.done_rx = None;
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Analysis worker {} panicked", self.generation);
            }
        }
    }

    /// Stop the worker and wait for it to exit. Nothing is written after this
    /// returns. Idempotent.
    pub fn cancel(&mut self) {
        self.stop.cancel();
        // dropping the receivers unblocks a worker waiting on a full queue
        self.frames_rx = None;
        self.done_rx = None;
        self.join_worker();
        if !matches!(self.status, RunStatus::Cancelled) {
            log::debug!("Analysis run {} cancelled at frame {}", self.generation, self.frame_index);
            self.status = RunStatus::Cancelled;
        }
    }
}

impl Drop for AnalysisRun {
    fn drop(&mut self) {
        self.stop.cancel();
        self.frames_rx = None;
        self.done_rx = None;
        self.join_worker();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn produce_frames(
    audio: &DecodedAudio,
    size: usize,
    total_frames: usize,
    frames_tx: &Sender<FrameBatch>,
    recycle_rx: &Receiver<Vec<u8>>,
    stop: &CancelToken,
) -> bool {
    let channels = audio.channel_count();
    let bins = size / 2;
    let mut planner = FftPlanner::new();
    let mut analysers: Vec<Analyser> = (0..channels).map(|_| Analyser::new(&mut planner, size)).collect();

    for index in 0..total_frames {
        if stop.is_cancelled() {
            return false;
        }

        let mut levels: Vec<Vec<u8>> = (0..channels)
            .map(|_| recycle_rx.try_recv().unwrap_or_else(|_| vec![0; bins]))
            .collect();

        let start = index * size;
        analysers
            .par_iter_mut()
            .zip(levels.par_iter_mut())
            .enumerate()
            .for_each(|(channel, (analyser, out))| {
                analyser.byte_frequency_data(audio.channel(channel), start, out);
            });

        if frames_tx.send(FrameBatch { index, levels }).is_err() {
            return false;
        }
    }
    !stop.is_cancelled()
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;
    use crate::render::palette::PaletteName;

    fn silence(channels: usize, sample_rate: u32, frames: usize) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio::new(sample_rate, vec![vec![0.0; frames]; channels]))
    }

    fn mono_config(fft_power: u32) -> AnalysisConfig {
        AnalysisConfig::default()
            .with_fft_power(fft_power)
            .with_palette(PaletteName::Mono)
    }

    fn epoch() -> Arc<AtomicU64> {
        Arc::new(AtomicU64::new(1))
    }

    #[test]
    fn silent_stereo_renders_black() {
        let mut run = AnalysisRun::start(silence(2, 44100, 88200), mono_config(11), epoch());
        assert_eq!(run.total_frames(), 44);
        assert_eq!(run.bin_count(), 1024);

        assert!(matches!(run.wait(), RunStatus::Finished { .. }));
        assert_eq!(run.frame_index(), 44);
        let surfaces = run.surfaces();
        assert_eq!(surfaces.len(), 2);
        for surface in surfaces.iter() {
            assert_eq!((surface.width(), surface.height()), (44, 1024));
            assert!(surface.snapshot().iter().all(|&p| p == 0xFF00_0000));
        }
    }

    #[test]
    fn progress_is_monotonic_and_reaches_one() {
        let mut run = AnalysisRun::start(silence(1, 8000, 8000), mono_config(10), epoch());
        let mut seen = Vec::new();
        while run.next_update() {
            if let RunStatus::Running { progress } = run.status() {
                seen.push(*progress);
            }
        }
        assert!(matches!(run.status(), RunStatus::Finished { .. }));
        assert_eq!(run.frame_index(), run.total_frames());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[test]
    fn every_frame_is_reported_before_finishing() {
        // short runs so the completion signal often races the last frame
        for _ in 0..50 {
            let mut run = AnalysisRun::start(silence(1, 8000, 320), mono_config(5), epoch());
            let mut seen = Vec::new();
            while run.next_update() {
                if let RunStatus::Running { progress } = run.status() {
                    if *progress > 0.0 && seen.last() != Some(progress) {
                        seen.push(*progress);
                    }
                }
            }
            assert!(matches!(run.status(), RunStatus::Finished { .. }));
            let expected: Vec<f64> = (1..=10).map(|i| i as f64 / 10.0).collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn tone_lights_up_its_row_in_its_channel_only() {
        let size = 1024;
        let bin = 64;
        let tone: Vec<f32> = (0..size * 3)
            .map(|n| (2.0 * PI * bin as f32 * n as f32 / size as f32).sin())
            .collect();
        let audio = Arc::new(DecodedAudio::new(44100, vec![tone, vec![0.0; size * 3]]));
        let mut run = AnalysisRun::start(audio, mono_config(10), epoch());
        assert!(matches!(run.wait(), RunStatus::Finished { .. }));

        let surfaces = run.surfaces();
        let left = surfaces.channel(0).unwrap();
        let right = surfaces.channel(1).unwrap();
        // Nyquist is row 0, so bin 64 of 512 is row 511 - 64
        let row = 511 - bin;
        for x in 0..3 {
            assert!(left.pixel(x, row) & 0xFF > 200);
            assert!(left.pixel(x, row) & 0xFF > left.pixel(x, 0) & 0xFF);
            assert_eq!(right.pixel(x, row), 0xFF00_0000);
        }
    }

    #[test]
    fn partial_final_frame_is_zero_padded() {
        // 2.5 frames of full-scale DC
        let audio = Arc::new(DecodedAudio::new(8000, vec![vec![1.0; 1024 * 2 + 512]]));
        let mut run = AnalysisRun::start(audio, mono_config(10), epoch());
        assert!(matches!(run.wait(), RunStatus::Finished { .. }));
        assert_eq!(run.total_frames(), 3);
        let surface = run.surfaces();
        let surface = surface.channel(0).unwrap();
        // the DC bin is the bottom row
        assert!(surface.pixel(2, 511) & 0xFF > 0);
    }

    #[test]
    fn log_axis_keeps_nyquist_on_top_and_dc_at_the_bottom() {
        let audio = Arc::new(DecodedAudio::new(8000, vec![vec![1.0; 1024]]));
        let config = mono_config(10).with_log_base(20.0);
        let mut run = AnalysisRun::start(audio, config, epoch());
        assert!(matches!(run.wait(), RunStatus::Finished { .. }));
        let surfaces = run.surfaces();
        let surface = surfaces.channel(0).unwrap();
        // DC energy shows at the bottom, and the top row is as dark as the linear one
        assert!(surface.pixel(0, 511) & 0xFF > surface.pixel(0, 0) & 0xFF);
    }

    #[test]
    fn unsupported_config_errors_without_running() {
        let config = AnalysisConfig {
            transform_size: 1000,
            ..AnalysisConfig::default()
        };
        let mut run = AnalysisRun::start(silence(1, 8000, 4000), config, epoch());
        match run.wait() {
            RunStatus::Errored(e) => assert!(matches!(**e, VisualizerError::Analysis(_))),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(run.surfaces().is_empty());
    }

    #[test]
    fn empty_audio_finishes_with_no_columns() {
        let mut run = AnalysisRun::start(silence(1, 8000, 0), mono_config(10), epoch());
        assert!(matches!(run.wait(), RunStatus::Finished { .. }));
        assert_eq!(run.total_frames(), 0);
    }

    #[test]
    fn cancelled_run_writes_nothing_more() {
        // 2000 frames of loud noise-like signal
        let signal: Vec<f32> = (0..32 * 2000).map(|n| ((n * 7919) % 97) as f32 / 97.0).collect();
        let audio = Arc::new(DecodedAudio::new(8000, vec![signal]));
        let mut run = AnalysisRun::start(audio, mono_config(5), epoch());
        for _ in 0..3 {
            run.next_update();
        }
        run.cancel();
        assert!(matches!(run.status(), RunStatus::Cancelled));

        let surfaces = run.surfaces();
        let before = surfaces.channel(0).unwrap().snapshot();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!run.poll());
        assert_eq!(surfaces.channel(0).unwrap().snapshot(), before);
        let written = run.frame_index();
        assert!(written <= 3);
        // columns past the cancel point were never touched
        assert!((written..run.total_frames()).all(|x| surfaces.channel(0).unwrap().pixel(x, 0) == 0));

        run.cancel();
        assert!(matches!(run.status(), RunStatus::Cancelled));
    }

    #[test]
    fn stale_epoch_stops_writes() {
        let epoch = epoch();
        let mut run = AnalysisRun::start(silence(1, 8000, 32 * 100), mono_config(5), epoch.clone());
        epoch.fetch_add(1, Ordering::AcqRel);
        run.wait();
        assert!(matches!(run.status(), RunStatus::Cancelled));
        assert_eq!(run.frame_index(), 0);
        assert!(run.surfaces().channel(0).unwrap().snapshot().iter().all(|&p| p == 0));
    }

    fn stop_after_five(
        audio: &DecodedAudio,
        size: usize,
        total_frames: usize,
        frames_tx: &Sender<FrameBatch>,
        recycle_rx: &Receiver<Vec<u8>>,
        stop: &CancelToken,
    ) -> bool {
        produce_frames(audio, size, total_frames.min(5), frames_tx, recycle_rx, stop);
        false
    }

    fn complete_after_five(
        audio: &DecodedAudio,
        size: usize,
        total_frames: usize,
        frames_tx: &Sender<FrameBatch>,
        recycle_rx: &Receiver<Vec<u8>>,
        stop: &CancelToken,
    ) -> bool {
        produce_frames(audio, size, total_frames.min(5), frames_tx, recycle_rx, stop)
    }

    fn panic_after_three(
        audio: &DecodedAudio,
        size: usize,
        total_frames: usize,
        frames_tx: &Sender<FrameBatch>,
        recycle_rx: &Receiver<Vec<u8>>,
        stop: &CancelToken,
    ) -> bool {
        produce_frames(audio, size, total_frames.min(3), frames_tx, recycle_rx, stop);
        panic!("fft backend exploded");
    }

    /// Columns before the failure point keep their colours, the rest are untouched.
    fn assert_partial_and_frozen(run: &mut AnalysisRun, max_written: usize) {
        let surfaces = run.surfaces();
        let surface = surfaces.channel(0).unwrap();
        let written = run.frame_index();
        assert!(written <= max_written, "{written} columns written");
        for x in 0..surface.width() {
            let expected = if x < written { 0xFF00_0000 } else { 0 };
            assert_eq!(surface.pixel(x, 0), expected, "column {x}");
        }
        let frozen = surface.snapshot();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!run.poll());
        assert_eq!(surface.snapshot(), frozen);
        assert_eq!(run.frame_index(), written);
    }

    #[test]
    fn worker_stopping_early_is_an_analysis_error() {
        let mut run = AnalysisRun::start_with(silence(1, 8000, 32 * 100), mono_config(5), epoch(), stop_after_five);
        match run.wait() {
            RunStatus::Errored(e) => assert!(matches!(**e, VisualizerError::Analysis(_)), "{e}"),
            other => panic!("unexpected status {other:?}"),
        }
        assert_partial_and_frozen(&mut run, 5);
    }

    #[test]
    fn completion_short_of_all_frames_is_an_analysis_error() {
        let mut run =
            AnalysisRun::start_with(silence(1, 8000, 32 * 100), mono_config(5), epoch(), complete_after_five);
        match run.wait() {
            RunStatus::Errored(e) => assert!(e.to_string().contains("5 of 100 frames"), "{e}"),
            other => panic!("unexpected status {other:?}"),
        }
        assert_partial_and_frozen(&mut run, 5);
    }

    #[test]
    fn worker_panic_is_reported_as_analysis_error() {
        let mut run = AnalysisRun::start_with(silence(1, 8000, 32 * 100), mono_config(5), epoch(), panic_after_three);
        match run.wait() {
            RunStatus::Errored(e) => {
                assert!(matches!(**e, VisualizerError::Analysis(_)));
                assert!(e.to_string().contains("fft backend exploded"), "{e}");
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert_partial_and_frozen(&mut run, 3);
    }
}
