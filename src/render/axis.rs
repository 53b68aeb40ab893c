//! Tick geometry for the frequency and time axes drawn around a channel surface.
//!
//! Only positions and labels are computed here; drawing them is up to the caller.

use serde::Serialize;

/// Roughly one frequency label per this many pixels.
const FREQ_TICK_SPACING: f64 = 30.0;
/// Minimum spacing in pixels before finer time steps are used.
const TIME_TICK_MIN_SPACING: f64 = 45.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrequencyTick {
    pub khz: u32,
    /// Distance from the top edge, in pixels.
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimeTick {
    pub seconds: u64,
    /// Distance from the left edge, in pixels.
    pub x: f64,
    pub label: String,
}

fn next_power_of_two(x: f64) -> f64 {
    if x <= 1.0 {
        1.0
    } else {
        x.log2().ceil().exp2()
    }
}

/// Vertical offset of a point `exp` (0 at the top, 1 at the bottom) after the log warp.
fn warp(exp: f64, log_base: f64) -> f64 {
    if log_base == 1.0 {
        exp
    } else {
        (log_base.powf(exp) - 1.0) / (log_base - 1.0)
    }
}

/// Whole-kHz ticks between `min_freq` and `max_freq` over an axis `height` pixels tall.
pub fn frequency_ticks(min_freq: f64, max_freq: f64, log_base: f64, height: f64) -> Vec<FrequencyTick> {
    if height <= 0.0 || max_freq <= min_freq {
        return Vec::new();
    }
    let min = (min_freq / 1000.0).ceil().max(0.0) as u32;
    let max = (max_freq / 1000.0).floor().max(0.0) as u32;
    if max < min {
        return Vec::new();
    }
    let step = next_power_of_two((max - min) as f64 * FREQ_TICK_SPACING / height) as u32;

    (min..=max)
        .step_by(step.max(1) as usize)
        .map(|khz| {
            let exp = (max_freq - khz as f64 * 1000.0) / (max_freq - min_freq);
            FrequencyTick {
                khz,
                y: warp(exp, log_base) * height,
            }
        })
        .collect()
}

/// Ticks strictly inside `(0, duration)` seconds over an axis `width` pixels wide.
pub fn time_ticks(duration: f64, width: f64) -> Vec<TimeTick> {
    if duration <= 0.0 || width <= 0.0 {
        return Vec::new();
    }
    let mut step = next_power_of_two(duration * 5.0 / width) as u64 * 15;
    if step == 15 {
        let pixels_per_second = width / duration;
        if pixels_per_second * 10.0 > TIME_TICK_MIN_SPACING {
            step = 10;
        }
        if pixels_per_second * 5.0 > TIME_TICK_MIN_SPACING {
            step = 5;
        }
    }

    (1..)
        .map(|i| i * step)
        .take_while(|&s| (s as f64) < duration)
        .map(|seconds| TimeTick {
            seconds,
            x: seconds as f64 * width / duration,
            label: format!("{:02}:{:02}", seconds / 60, seconds % 60),
        })
        .collect()
}
