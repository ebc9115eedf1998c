//! Transport Session: one stream connection to one endpoint.
//!
//! The session never retries. Any failure is reported upward and leaves the
//! session closed, so a caller cannot keep using a stream whose framing
//! position is unknown.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;

use dlc_core::config::ServerConfig;
use dlc_core::Endpoint;

use crate::error::{from_frame_error, ClientError, ConnectError, TransportError};
use crate::frame::{read_frame_with_limit, write_frame_with_limit, MAX_FRAME_LEN};

/// Opens byte streams to an endpoint.
///
/// Production code uses [`TcpConnector`]; tests plug in in-memory streams.
pub trait Connector: Send + Sync {
    type Stream: Read + Write + Send;

    fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream, ConnectError>;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
    /// Applies to the blocking read of a response.
    pub read_timeout: Option<Duration>,
    /// Applies to writing a request.
    pub write_timeout: Option<Duration>,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl TcpConnector {
    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self {
            connect_timeout: cfg.connect_timeout(),
            read_timeout: cfg.read_timeout(),
            write_timeout: cfg.write_timeout(),
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
        let addrs: Vec<SocketAddr> = (endpoint.host(), endpoint.port())
            .to_socket_addrs()
            .map_err(|e| ConnectError::ResolutionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectError::ResolutionFailed {
                endpoint: endpoint.to_string(),
                reason: "no addresses".to_string(),
            });
        }

        // Each resolved address is tried once, in resolver order.
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    let configured = stream
                        .set_read_timeout(self.read_timeout)
                        .and_then(|()| stream.set_write_timeout(self.write_timeout));
                    if let Err(e) = configured {
                        last_err = Some(e);
                        continue;
                    }
                    debug!(%endpoint, %addr, "tcp connected");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(%endpoint, %addr, error = %e, "tcp connect failed");
                    last_err = Some(e);
                }
            }
        }
        Err(ConnectError::Unreachable {
            endpoint: endpoint.to_string(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "no usable address")
            }),
        })
    }
}

#[derive(Debug)]
pub struct TransportSession<S> {
    endpoint: Endpoint,
    stream: Option<S>,
    max_frame_len: u32,
}

impl<S: Read + Write> TransportSession<S> {
    pub fn connect<C>(connector: &C, endpoint: Endpoint) -> Result<Self, ConnectError>
    where
        C: Connector<Stream = S>,
    {
        let stream = connector.connect(&endpoint)?;
        Ok(Self::from_stream(endpoint, stream))
    }

    pub fn from_stream(endpoint: Endpoint, stream: S) -> Self {
        Self {
            endpoint,
            stream: Some(stream),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max: u32) -> Self {
        self.max_frame_len = max;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn send_message(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        let max = self.max_frame_len;
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;
        let r = write_frame_with_limit(stream, payload, max).map_err(from_frame_error);
        if r.is_err() {
            self.close();
        } else {
            debug!(endpoint = %self.endpoint, len = payload.len(), "frame sent");
        }
        r
    }

    pub fn receive_message(&mut self) -> Result<Vec<u8>, ClientError> {
        let max = self.max_frame_len;
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;
        let r = read_frame_with_limit(stream, max).map_err(from_frame_error);
        match &r {
            Ok(p) => debug!(endpoint = %self.endpoint, len = p.len(), "frame received"),
            Err(_) => self.close(),
        }
        r
    }

    /// One request/response round trip. Returns the response and its latency.
    pub fn exchange(&mut self, payload: &[u8]) -> Result<(Vec<u8>, Duration), ClientError> {
        let t0 = Instant::now();
        self.send_message(payload)?;
        let resp = self.receive_message()?;
        Ok((resp, t0.elapsed()))
    }

    /// Close the session if `err` leaves the stream unusable, then hand
    /// `err` back.
    pub fn fail(&mut self, err: ClientError) -> ClientError {
        if err.tears_down_session() {
            self.close();
        }
        err
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if let Some(mut s) = self.stream.take() {
            let _ = s.flush();
            debug!(endpoint = %self.endpoint, "transport closed");
        }
    }
}
