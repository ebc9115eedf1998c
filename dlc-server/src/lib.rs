//! dlc-server: reference inference server for the DL client protocol.
//!
//! Used by the integration tests and by `dlc serve`.

pub mod models;
pub mod server;

pub use models::{builtin_models, ModelHandler};
pub use server::{DemoServer, ServerError, ServerHandle};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
