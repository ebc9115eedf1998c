//! Image tiles exchanged with the server.
//!
//! Samples are stored channel-major (planar): sample `(x, y, c)` lives at
//! `c * width * height + y * width + x`. This is also the on-wire order.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TileError {
    #[error("tile dimensions overflow: {width}x{height}x{channels}")]
    Overflow {
        width: u32,
        height: u32,
        channels: u32,
    },
    #[error("tile {shape} needs {expected} samples, got {got}")]
    SampleCount {
        shape: TileShape,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl TileShape {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Number of samples, or `None` if it does not fit in `usize`.
    pub fn sample_count(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels as usize)
    }
}

impl fmt::Display for TileShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageTile {
    shape: TileShape,
    pixels: Vec<f32>,
}

/// The server's answer has the same layout as an input tile.
pub type InferenceResult = ImageTile;

impl ImageTile {
    pub fn new(shape: TileShape, pixels: Vec<f32>) -> Result<Self, TileError> {
        let expected = shape.sample_count().ok_or(TileError::Overflow {
            width: shape.width,
            height: shape.height,
            channels: shape.channels,
        })?;
        if pixels.len() != expected {
            return Err(TileError::SampleCount {
                shape,
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self { shape, pixels })
    }

    pub fn filled(shape: TileShape, value: f32) -> Result<Self, TileError> {
        let n = shape.sample_count().ok_or(TileError::Overflow {
            width: shape.width,
            height: shape.height,
            channels: shape.channels,
        })?;
        Ok(Self {
            shape,
            pixels: vec![value; n],
        })
    }

    /// Build a tile from interleaved (channel-minor) samples, as most hosts store rows.
    pub fn from_interleaved(shape: TileShape, samples: &[f32]) -> Result<Self, TileError> {
        let mut tile = Self::filled(shape, 0.0)?;
        if samples.len() != tile.pixels.len() {
            return Err(TileError::SampleCount {
                shape,
                expected: tile.pixels.len(),
                got: samples.len(),
            });
        }
        let (w, h, c) = (
            shape.width as usize,
            shape.height as usize,
            shape.channels as usize,
        );
        for y in 0..h {
            for x in 0..w {
                for ch in 0..c {
                    tile.pixels[ch * w * h + y * w + x] = samples[(y * w + x) * c + ch];
                }
            }
        }
        Ok(tile)
    }

    pub fn shape(&self) -> TileShape {
        self.shape
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn channels(&self) -> u32 {
        self.shape.channels
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn sample(&self, x: u32, y: u32, c: u32) -> Option<f32> {
        if x >= self.shape.width || y >= self.shape.height || c >= self.shape.channels {
            return None;
        }
        let (w, h) = (self.shape.width as usize, self.shape.height as usize);
        self.pixels
            .get(c as usize * w * h + y as usize * w + x as usize)
            .copied()
    }

    /// One row of one channel, `width` samples long.
    pub fn row(&self, y: u32, c: u32) -> Option<&[f32]> {
        if y >= self.shape.height || c >= self.shape.channels {
            return None;
        }
        let (w, h) = (self.shape.width as usize, self.shape.height as usize);
        let start = c as usize * w * h + y as usize * w;
        self.pixels.get(start..start + w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_sample_count() {
        let shape = TileShape::new(4, 4, 1);
        assert!(ImageTile::new(shape, vec![0.0; 16]).is_ok());
        let err = ImageTile::new(shape, vec![0.0; 15]).unwrap_err();
        assert_eq!(
            err,
            TileError::SampleCount {
                shape,
                expected: 16,
                got: 15
            }
        );
    }

    #[test]
    fn interleaved_input_is_stored_planar() {
        // 2x1 RGB: (r0,g0,b0),(r1,g1,b1)
        let shape = TileShape::new(2, 1, 3);
        let t = ImageTile::from_interleaved(shape, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(t.pixels(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t.sample(1, 0, 2), Some(6.0));
        assert_eq!(t.row(0, 1), Some(&[2.0, 5.0][..]));
        assert_eq!(t.sample(2, 0, 0), None);
    }
}
