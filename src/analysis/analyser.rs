use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Level 0 of the byte output.
pub const MIN_DECIBELS: f32 = -120.0;
/// Level 255 of the byte output.
pub const MAX_DECIBELS: f32 = 0.0;

/// Per-channel frequency analyser: Blackman window, FFT, and dB quantisation to
/// one byte per bin. Each call is independent of the previous one.
pub struct Analyser {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Analyser {
    pub fn new(planner: &mut FftPlanner<f32>, size: usize) -> Self {
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            size,
            fft,
            window: blackman_window(size),
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.size / 2
    }

    /// Analyse `samples[start..start + size]`, treating anything past the end as
    /// silence, and write one level per bin into `out`.
    pub fn byte_frequency_data(&mut self, samples: &[f32], start: usize, out: &mut [u8]) {
        assert_eq!(out.len(), self.bin_count(), "magnitude buffer has the wrong length");

        let available = samples.len().saturating_sub(start).min(self.size);
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let s = if i < available { samples[start + i] } else { 0.0 };
            *slot = Complex::new(s * self.window[i], 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 1.0 / self.size as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        for (level, bin) in out.iter_mut().zip(&self.buffer) {
            let db = 20.0 * (bin.norm() * scale).log10();
            // -inf (silence) and NaN both end up at 0
            *level = (255.0 * (db - MIN_DECIBELS) / range).floor().clamp(0.0, 255.0) as u8;
        }
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;
    (0..size)
        .map(|n| {
            let x = 2.0 * PI * n as f32 / size as f32;
            A0 - A1 * x.cos() + A2 * (2.0 * x).cos()
        })
        .collect()
}
