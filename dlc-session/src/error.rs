use thiserror::Error;

use dlc_core::{ConfigError, TileError};
use dlc_infer::{
    ClientError, ConnectError, FramingError, InvalidState, ProtocolError, TransportError,
};
use dlc_logging::NdjsonError;

/// Everything a coordinator call can fail with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    EventLog(#[from] NdjsonError),
}

macro_rules! via_client {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for SessionError {
                fn from(e: $t) -> Self {
                    SessionError::Client(ClientError::from(e))
                }
            }
        )*
    };
}

via_client!(
    ConnectError,
    TransportError,
    FramingError,
    ProtocolError,
    InvalidState,
    TileError,
);

impl SessionError {
    /// Whether this failure left the coordinator `Disconnected`.
    pub fn tears_down_session(&self) -> bool {
        matches!(self, SessionError::Client(e) if e.tears_down_session())
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, SessionError::Client(e) if e.is_disconnect())
    }

    pub fn client(&self) -> Option<&ClientError> {
        match self {
            SessionError::Client(e) => Some(e),
            _ => None,
        }
    }

    pub fn invalid_state(&self) -> Option<&InvalidState> {
        match self {
            SessionError::Client(ClientError::InvalidState(e)) => Some(e),
            _ => None,
        }
    }
}
