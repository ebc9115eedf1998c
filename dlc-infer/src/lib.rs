//! dlc-infer: wire protocol and blocking client for remote deep-learning inference.
//!
//! Layers, bottom-up: [`frame`] (length-delimited messages), [`codec`]
//! (binary payloads), [`transport`] (one stream connection), then the two
//! exchanges built on it: [`catalog`] and [`inference`].

pub mod catalog;
pub mod codec;
pub mod error;
pub mod frame;
pub mod inference;
pub mod protocol;
pub mod stats;
pub mod transport;

pub use catalog::fetch_catalog;
pub use error::{
    ClientError, ConnectError, FramingError, InvalidState, ProtocolError, TransportError,
};
pub use inference::{run_inference, InferenceCall};
pub use stats::{ExchangeKind, ExchangeStats, ExchangeStatsSnapshot, LatencySummary};
pub use transport::{Connector, TcpConnector, TransportSession};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
