//! dlc-core: endpoint, model catalog types, image tiles, option store and configuration.

pub mod config;
pub mod model;
pub mod options;
pub mod tile;

pub use config::{Config, ConfigError};
pub use model::{
    Catalog, Endpoint, EndpointError, ModelDescriptor, OptionField, OptionKind, OptionValue,
};
pub use options::{OptionSnapshot, OptionStore, UnknownOption};
pub use tile::{ImageTile, InferenceResult, TileError, TileShape};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
