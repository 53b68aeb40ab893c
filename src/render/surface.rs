use parking_lot::RwLock;

/// One channel's spectrogram image: a column per analysis frame, a row per bin.
///
/// Pixels are packed palette colors (see `PaletteTable`), stored row-major.
/// Readers may take a snapshot at any time, including mid-run.
pub struct RasterSurface {
    width: usize,
    height: usize,
    pixels: RwLock<Vec<u32>>,
}

impl RasterSurface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: RwLock::new(vec![0; width * height]),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Overwrite column `x` with `column`, top row first.
    pub(crate) fn write_column(&self, x: usize, column: &[u32]) {
        assert!(x < self.width, "column {x} outside surface of width {}", self.width);
        assert_eq!(column.len(), self.height, "column height mismatch");
        let mut pixels = self.pixels.write();
        for (y, &color) in column.iter().enumerate() {
            pixels[y * self.width + x] = color;
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.pixels.read()[y * self.width + x]
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.pixels.read().clone()
    }

    /// Pixels as RGBA bytes, row-major.
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        self.pixels
            .read()
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect()
    }
}

/// The per-channel surfaces written by one analysis run.
pub struct SurfaceSet {
    surfaces: Vec<RasterSurface>,
}

impl SurfaceSet {
    pub fn new(channels: usize, width: usize, height: usize) -> Self {
        Self {
            surfaces: (0..channels).map(|_| RasterSurface::new(width, height)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn channel(&self, index: usize) -> Option<&RasterSurface> {
        self.surfaces.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RasterSurface> {
        self.surfaces.iter()
    }
}
