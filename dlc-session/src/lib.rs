//! dlc-session: thread-safe session coordinator and host render path.
//!
//! One [`SessionCoordinator`] is shared by every render thread of a host.
//! It owns the transport session, the cached catalog, the model selection
//! and the option store.

pub mod coordinator;
pub mod error;
pub mod host;

pub use coordinator::{SessionCoordinator, SessionState};
pub use error::SessionError;
pub use host::{InterleavedImage, Region, TileSink, TileSource};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");


#[cfg(test)]
mod coordinator_tests;
