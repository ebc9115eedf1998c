//! dlc-bench: shared fixtures for the criterion benches.

use dlc_core::{ImageTile, OptionSnapshot, TileShape};

/// Constant tile of `size x size x channels` samples.
pub fn make_tile(size: u32, channels: u32) -> ImageTile {
    let shape = TileShape::new(size, size, channels);
    let n = shape.sample_count().unwrap_or(0);
    let pixels = (0..n).map(|i| (i % 256) as f32 / 255.0).collect();
    ImageTile::new(shape, pixels).unwrap_or_else(|e| panic!("bench tile {shape}: {e}"))
}

/// One option of every kind, as a typical model would send.
pub fn make_options() -> OptionSnapshot {
    OptionSnapshot {
        bools: vec![("clamp".to_string(), true)],
        ints: vec![("passes".to_string(), 2)],
        floats: vec![
            ("mix".to_string(), 0.5),
            ("threshold".to_string(), 0.8),
        ],
        strings: vec![("label".to_string(), "bench".to_string())],
    }
}

/// Tile edge lengths benchmarked by default.
pub const TILE_SIZES: [u32; 3] = [16, 64, 256];
