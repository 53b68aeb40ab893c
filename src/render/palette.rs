use std::f64::consts::PI;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Named color palettes for the spectrogram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PaletteName {
    #[default]
    Sox,
    Mono,
    Spectrum,
}

impl PaletteName {
    pub const ALL: [PaletteName; 3] = [PaletteName::Sox, PaletteName::Mono, PaletteName::Spectrum];

    pub fn as_str(self) -> &'static str {
        match self {
            PaletteName::Sox => "sox",
            PaletteName::Mono => "mono",
            PaletteName::Spectrum => "spectrum",
        }
    }
}

impl fmt::Display for PaletteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 256-entry lookup from an 8-bit magnitude level to a packed pixel.
///
/// Entries are `(A << 24) | (B << 16) | (G << 8) | R`, so `to_le_bytes()` of an
/// entry is the pixel in RGBA byte order.
pub struct PaletteTable([u32; 256]);

impl PaletteTable {
    fn generate(f: impl Fn(f64) -> [u32; 3]) -> Self {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let [r, g, b] = f(i as f64 / 255.0);
            *entry = pack(r, g, b);
        }
        Self(table)
    }

    #[inline(always)]
    pub fn color(&self, level: u8) -> u32 {
        self.0[level as usize]
    }

    pub fn entries(&self) -> &[u32; 256] {
        &self.0
    }
}

#[inline]
fn pack(r: u32, g: u32, b: u32) -> u32 {
    (0xFF << 24) | (b << 16) | (g << 8) | r
}

/// Channel intensity in [0, 1] to a byte.
fn to_byte(x: f64) -> u32 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u32
}

fn mono(level: f64) -> [u32; 3] {
    let v = to_byte(level);
    [v, v, v]
}

fn sox(level: f64) -> [u32; 3] {
    let r = if level >= 0.73 {
        1.0
    } else if level >= 0.13 {
        (((level - 0.13) / 0.6) * PI / 2.0).sin()
    } else {
        0.0
    };

    let g = if level >= 0.91 {
        1.0
    } else if level >= 0.6 {
        (((level - 0.6) / 0.31) * PI / 2.0).sin()
    } else {
        0.0
    };

    let b = if level < 0.6 {
        0.5 * (level / 0.6 * PI).sin()
    } else if level >= 0.78 {
        (level - 0.78) / 0.22
    } else {
        0.0
    };

    [to_byte(r), to_byte(g), to_byte(b)]
}

fn spectrum(level: f64) -> [u32; 3] {
    let level = level * 0.6625;
    let (r, g, b) = if level < 0.15 {
        ((0.15 - level) / (0.15 + 0.075), 0.0, 1.0)
    } else if level < 0.275 {
        (0.0, (level - 0.15) / (0.275 - 0.15), 1.0)
    } else if level < 0.325 {
        (0.0, 1.0, (0.325 - level) / (0.325 - 0.275))
    } else if level < 0.5 {
        ((level - 0.325) / (0.5 - 0.325), 1.0, 0.0)
    } else if level < 0.6625 {
        (1.0, (0.6625 - level) / (0.6625 - 0.5), 0.0)
    } else {
        (0.0, 0.0, 0.0)
    };

    // Fade in from black over the bottom of the range.
    let cf = if level < 0.1 { level / 0.1 } else { 1.0 } * 255.0;
    // The +0.5 bias can push a saturated channel to 256; keep it a byte.
    let byte = |c: f64| ((c * cf + 0.5).round() as u32).min(255);
    [byte(r), byte(g), byte(b)]
}

static SOX: OnceLock<PaletteTable> = OnceLock::new();
static MONO: OnceLock<PaletteTable> = OnceLock::new();
static SPECTRUM: OnceLock<PaletteTable> = OnceLock::new();

/// Lookup table for `name`, built on first use and kept for the process lifetime.
pub fn get_palette(name: PaletteName) -> &'static PaletteTable {
    match name {
        PaletteName::Sox => SOX.get_or_init(|| PaletteTable::generate(sox)),
        PaletteName::Mono => MONO.get_or_init(|| PaletteTable::generate(mono)),
        PaletteName::Spectrum => SPECTRUM.get_or_init(|| PaletteTable::generate(spectrum)),
    }
}
