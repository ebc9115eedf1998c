//! Host collaborators for the render path.
//!
//! A compositing host asks for one rectangular region at a time, possibly
//! from many worker threads. Each call brings its own source and sink; only
//! the coordinator is shared.

use dlc_core::{ImageTile, TileError, TileShape};

/// Pixel rectangle `[x, r) x [y, t)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub r: u32,
    pub t: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, r: u32, t: u32) -> Self {
        Self { x, y, r, t }
    }

    pub fn width(&self) -> u32 {
        self.r.saturating_sub(self.x)
    }

    pub fn height(&self) -> u32 {
        self.t.saturating_sub(self.y)
    }

    pub fn shape(&self, channels: u32) -> TileShape {
        TileShape::new(self.width(), self.height(), channels)
    }
}

/// Supplies input tiles, one per model input slot.
pub trait TileSource {
    fn input_tile(&mut self, input: usize, region: &Region) -> Result<ImageTile, TileError>;
}

/// Receives the inference result for a region.
pub trait TileSink {
    /// Shape the sink can accept for `region`.
    fn expected_shape(&self, region: &Region) -> TileShape;

    /// Only called with a tile of [`TileSink::expected_shape`].
    fn write_tile(&mut self, region: &Region, tile: &ImageTile);
}

/// Host frame buffer with interleaved samples (`(y * width + x) * channels + c`).
///
/// Serves as the source of every model input and receives the output in
/// place. Regions are clipped to the image bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct InterleavedImage {
    width: u32,
    height: u32,
    channels: u32,
    samples: Vec<f32>,
}

impl InterleavedImage {
    pub fn new(
        width: u32,
        height: u32,
        channels: u32,
        samples: Vec<f32>,
    ) -> Result<Self, TileError> {
        let shape = TileShape::new(width, height, channels);
        let expected = shape.sample_count().ok_or(TileError::Overflow {
            width,
            height,
            channels,
        })?;
        if samples.len() != expected {
            return Err(TileError::SampleCount {
                shape,
                expected,
                got: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            samples,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// `region` clipped to the image; an inverted region becomes empty.
    fn clip(&self, region: &Region) -> Region {
        let x = region.x.min(self.width);
        let y = region.y.min(self.height);
        Region::new(x, y, region.r.clamp(x, self.width), region.t.clamp(y, self.height))
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize
    }
}

impl TileSource for InterleavedImage {
    fn input_tile(&mut self, _input: usize, region: &Region) -> Result<ImageTile, TileError> {
        let region = self.clip(region);
        let mut crop = Vec::with_capacity(region.shape(self.channels).sample_count().unwrap_or(0));
        for y in region.y..region.t {
            let start = self.offset(region.x, y);
            crop.extend_from_slice(&self.samples[start..self.offset(region.r, y)]);
        }
        ImageTile::from_interleaved(region.shape(self.channels), &crop)
    }
}

impl TileSink for InterleavedImage {
    fn expected_shape(&self, region: &Region) -> TileShape {
        self.clip(region).shape(self.channels)
    }

    fn write_tile(&mut self, region: &Region, tile: &ImageTile) {
        let region = self.clip(region);
        let channels = self.channels as usize;
        for row in 0..region.height() {
            let base = self.offset(region.x, region.y + row);
            for c in 0..self.channels {
                let Some(src) = tile.row(row, c) else {
                    continue;
                };
                for (i, &v) in src.iter().enumerate() {
                    self.samples[base + i * channels + c as usize] = v;
                }
            }
        }
    }
}
