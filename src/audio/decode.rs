use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::cancel::CancelToken;
use crate::error::{Result, VisualizerError};

/// One complete audio file, either already in memory or on disk.
#[derive(Clone, Debug)]
pub enum Blob {
    Bytes(Arc<[u8]>),
    File(PathBuf),
}

impl Blob {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Blob::File(path.into())
    }

    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Blob::Bytes(bytes.into())
    }

    /// Read the whole blob into memory.
    fn read(&self) -> Result<Arc<[u8]>> {
        match self {
            Blob::Bytes(bytes) => Ok(bytes.clone()),
            Blob::File(path) => Ok(std::fs::read(path)?.into()),
        }
    }

    fn hint(&self) -> Hint {
        let mut hint = Hint::new();
        if let Blob::File(path) = self {
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                hint.with_extension(ext);
            }
        }
        hint
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Blob::File(path) => Some(path),
            Blob::Bytes(_) => None,
        }
    }
}

/// Decoded PCM, one sample vector per channel. Immutable once built.
#[derive(Debug)]
pub struct DecodedAudio {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        debug_assert!(!channels.is_empty());
        debug_assert!(channels.windows(2).all(|w| w[0].len() == w[1].len()));
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Sample-accurate length in seconds.
    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Read `blob` and decode its first audio track into per-channel PCM.
///
/// Checks `cancel` between packets; a cancelled decode returns `Cancelled`.
pub fn decode(blob: &Blob, cancel: &CancelToken) -> Result<DecodedAudio> {
    let bytes = blob.read()?;
    if cancel.is_cancelled() {
        return Err(VisualizerError::Cancelled);
    }
    let byte_len = bytes.len();

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&blob.hint(), mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| VisualizerError::Decode(format!("unrecognised audio format ({e})")))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| VisualizerError::Decode("no audio tracks found".into()))?;

    let track_id = track.id;
    let mut channel_count = track.codec_params.channels.map(|c| c.count());
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| VisualizerError::Decode(format!("unsupported codec ({e})")))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Err(VisualizerError::Cancelled);
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let count = spec.channels.count();
        if channels.is_empty() {
            channels = vec![Vec::new(); count];
            channel_count = Some(count);
            sample_rate.get_or_insert(spec.rate);
        } else if channels.len() != count {
            return Err(VisualizerError::Decode(format!(
                "channel count changed mid-stream ({} -> {})",
                channels.len(),
                count
            )));
        }

        let num_frames = decoded.frames();
        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        for frame in sample_buf.samples().chunks_exact(count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
    }

    let channel_count = channel_count
        .filter(|&c| c > 0)
        .ok_or_else(|| VisualizerError::Decode("audio has no channels".into()))?;
    let sample_rate = sample_rate
        .filter(|&r| r > 0)
        .ok_or_else(|| VisualizerError::Decode("unknown sample rate".into()))?;
    if channels.is_empty() {
        channels = vec![Vec::new(); channel_count];
    }

    let audio = DecodedAudio::new(sample_rate, channels);
    log::info!(
        "Decoded {} bytes: {} channel(s), {} samples, {}Hz, {:.1}s",
        byte_len,
        audio.channel_count(),
        audio.frame_count(),
        audio.sample_rate(),
        audio.duration()
    );
    Ok(audio)
}

/// A decode running on its own thread.
///
/// Dropping the task cancels it; the thread notices at its next packet and exits
/// without reporting.
pub struct DecodeTask {
    cancel: CancelToken,
    result_rx: Receiver<Result<DecodedAudio>>,
}

impl DecodeTask {
    pub fn spawn(blob: Blob) -> Result<Self> {
        let cancel = CancelToken::new();
        let (result_tx, result_rx) = bounded(1);
        let thread_cancel = cancel.clone();

        thread::Builder::new()
            .name("decoder".to_string())
            .spawn(move || {
                let result = decode(&blob, &thread_cancel);
                if !thread_cancel.is_cancelled() {
                    let _ = result_tx.send(result);
                }
            })
            .map_err(|e| VisualizerError::Decode(format!("failed to spawn decoder thread: {e}")))?;

        Ok(Self { cancel, result_rx })
    }

    /// Non-blocking; `None` while the decode is still running.
    pub fn try_result(&self) -> Option<Result<DecodedAudio>> {
        match self.result_rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.lost())),
        }
    }

    pub fn wait(&self) -> Result<DecodedAudio> {
        self.result_rx.recv().unwrap_or_else(|_| Err(self.lost()))
    }

    fn lost(&self) -> VisualizerError {
        if self.cancel.is_cancelled() {
            VisualizerError::Cancelled
        } else {
            VisualizerError::Decode("decoder stopped without a result".into())
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DecodeTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::make_wav;

    #[test]
    fn decode_wav_stereo_keeps_channels_apart() {
        // left ramps up, right is constant
        let samples: Vec<i16> = (0..2000)
            .flat_map(|i| [(i * 10) as i16, -1000])
            .collect();
        let audio = decode(&Blob::from_bytes(make_wav(44100, 2, &samples)), &CancelToken::new()).unwrap();

        assert_eq!(audio.channel_count(), 2);
        assert_eq!(audio.sample_rate(), 44100);
        assert_eq!(audio.frame_count(), 2000);
        assert!((audio.channel(0)[100] - 1000.0 / 32768.0).abs() < 1e-4);
        assert!(audio.channel(1).iter().all(|&s| (s + 1000.0 / 32768.0).abs() < 1e-4));
    }

    #[test]
    fn duration_is_sample_accurate() {
        let audio = decode(
            &Blob::from_bytes(make_wav(8000, 1, &vec![0i16; 12000])),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(audio.frame_count(), 12000);
        assert!((audio.duration() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn random_bytes_are_a_decode_error() {
        // 7-bit bytes never form a frame sync word
        let noise: Vec<u8> = (0..4096u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8 & 0x7F)
            .collect();
        let err = decode(&Blob::from_bytes(noise), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, VisualizerError::Decode(_)), "{err}");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let blob = Blob::from_path(dir.path().join("missing.wav"));
        let err = decode(&blob, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, VisualizerError::Read(_)), "{err}");
    }

    #[test]
    fn decodes_from_a_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::write(&path, make_wav(22050, 1, &[0, 1000, 2000, 3000])).unwrap();
        let audio = decode(&Blob::from_path(&path), &CancelToken::new()).unwrap();
        assert_eq!(audio.frame_count(), 4);
        assert_eq!(audio.sample_rate(), 22050);
    }

    #[test]
    fn cancelled_decode_reports_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = decode(&Blob::from_bytes(make_wav(44100, 1, &[0; 64])), &cancel).unwrap_err();
        assert!(matches!(err, VisualizerError::Cancelled));
    }

    #[test]
    fn task_delivers_its_result() {
        let task = DecodeTask::spawn(Blob::from_bytes(make_wav(44100, 2, &[0; 512]))).unwrap();
        let audio = task.wait().unwrap();
        assert_eq!(audio.channel_count(), 2);
        assert_eq!(audio.frame_count(), 256);
    }

    #[test]
    fn cancelled_task_reports_nothing_useful() {
        let task = DecodeTask::spawn(Blob::from_bytes(make_wav(44100, 1, &[0; 512]))).unwrap();
        task.cancel();
        match task.wait() {
            // the decode may have finished before the flag was seen
            Ok(audio) => assert_eq!(audio.frame_count(), 512),
            Err(err) => assert!(matches!(err, VisualizerError::Cancelled)),
        }
    }
}
