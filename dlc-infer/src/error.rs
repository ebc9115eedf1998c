//! Error taxonomy of the client protocol layer.
//!
//! Every family except [`dlc_core::UnknownOption`] is surfaced to the caller.
//! Connect, transport and framing failures, as well as malformed responses,
//! leave the connection in an unknown position and must be followed by a
//! fresh handshake; see [`ClientError::tears_down_session`].

use std::io;

use thiserror::Error;

use dlc_core::{EndpointError, TileError, TileShape};

use crate::codec::DecodeError;
use crate::frame::FrameError;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cannot resolve {endpoint}: {reason}")]
    ResolutionFailed { endpoint: String, reason: String },
    #[error("server {endpoint} unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server disconnected")]
    Disconnected,
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("socket error: {0}")]
    Io(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("stream ended inside a frame: read {got} of {expected} bytes")]
    Truncated { expected: usize, got: usize },
    #[error("frame length {len} exceeds limit {max}")]
    Oversized { len: u64, max: u32 },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] DecodeError),
    #[error("output tile is {got}, caller expects {expected}")]
    ShapeMismatch { expected: TileShape, got: TileShape },
    #[error("server error: {0}")]
    Server(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidState {
    #[error("no model selected")]
    NoModelSelected,
    #[error("model index {index} is stale for the current catalog of {catalog_len} models")]
    StaleModelIndex { index: usize, catalog_len: usize },
    #[error("options of model {model:?} were built for a schema the server no longer offers")]
    StaleOptions { model: String },
    #[error("model {model:?} takes {expected} inputs, got {got}")]
    InputCount {
        model: String,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    InvalidState(#[from] InvalidState),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Tile(#[from] TileError),
}

impl From<DecodeError> for ClientError {
    fn from(e: DecodeError) -> Self {
        ClientError::Protocol(ProtocolError::MalformedResponse(e))
    }
}

impl ClientError {
    /// Whether the session must be dropped and re-handshaken after this error.
    pub fn tears_down_session(&self) -> bool {
        matches!(
            self,
            ClientError::Connect(_)
                | ClientError::Transport(_)
                | ClientError::Framing(_)
                | ClientError::Protocol(ProtocolError::MalformedResponse(_))
        )
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, ClientError::Transport(TransportError::Disconnected))
    }
}

/// Map a socket-level failure into the transport/framing families.
pub(crate) fn from_frame_error(e: FrameError) -> ClientError {
    match e {
        FrameError::Io(e) => from_io_error(e),
        FrameError::Closed => TransportError::Disconnected.into(),
        FrameError::Truncated { expected, got } => {
            FramingError::Truncated { expected, got }.into()
        }
        FrameError::TooLarge { len, max } => FramingError::Oversized { len, max }.into(),
    }
}

pub(crate) fn from_io_error(e: io::Error) -> ClientError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => TransportError::Disconnected.into(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout.into(),
        _ => TransportError::Io(e).into(),
    }
}
