//! dlc-logging: NDJSON session events + tracing setup.
//!
//! The event log is append-only, one JSON object per line, meant for
//! post-mortems of a host session (which endpoint, which catalog, which
//! exchanges failed and why).

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Session event schema version.
pub const SESSION_EVENT_VERSION: u32 = 1;

pub fn now_ms() -> u64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    d.as_millis() as u64
}

/// One line of the session event log.
///
/// `event` is one of `connect`, `catalog`, `inference`, `teardown`. Fields
/// that do not apply to an event are omitted from the JSON.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEventV1 {
    pub event: &'static str,
    pub v: u32,
    pub ts_ms: u64,
    pub endpoint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<u64>,
    /// Output tile as `WxHxC`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_us: Option<u64>,

    /// Set on failure; for `teardown` it is the reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionEventV1 {
    fn base(event: &'static str, endpoint: impl Into<String>) -> Self {
        Self {
            event,
            v: SESSION_EVENT_VERSION,
            ts_ms: now_ms(),
            endpoint: endpoint.into(),
            catalog_generation: None,
            models: None,
            model: None,
            inputs: None,
            output: None,
            latency_us: None,
            error: None,
        }
    }

    pub fn connect(endpoint: impl Into<String>, error: Option<String>) -> Self {
        Self {
            error,
            ..Self::base("connect", endpoint)
        }
    }

    pub fn catalog(endpoint: impl Into<String>, generation: u64, models: usize) -> Self {
        Self {
            catalog_generation: Some(generation),
            models: Some(models as u64),
            ..Self::base("catalog", endpoint)
        }
    }

    pub fn inference(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        inputs: usize,
        outcome: Result<(String, u64), String>,
    ) -> Self {
        let mut e = Self {
            model: Some(model.into()),
            inputs: Some(inputs as u64),
            ..Self::base("inference", endpoint)
        };
        match outcome {
            Ok((shape, latency_us)) => {
                e.output = Some(shape);
                e.latency_us = Some(latency_us);
            }
            Err(msg) => e.error = Some(msg),
        }
        e
    }

    pub fn teardown(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::base("teardown", endpoint)
        }
    }
}

#[derive(Debug, Error)]
pub enum NdjsonError {
    #[error("event log io: {0}")]
    Io(#[from] io::Error),
    #[error("event log json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only NDJSON writer.
///
/// Contract: each call writes exactly one JSON object followed by a newline.
pub struct NdjsonWriter {
    w: BufWriter<File>,
    lines_since_flush: u64,
    flush_every_lines: u64,
}

impl NdjsonWriter {
    /// Open a file for append. Creates it if it doesn't exist.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, NdjsonError> {
        Self::open_append_with_flush(path, 0)
    }

    /// `flush_every_lines=0` disables periodic flushing.
    pub fn open_append_with_flush(
        path: impl AsRef<Path>,
        flush_every_lines: u64,
    ) -> Result<Self, NdjsonError> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            w: BufWriter::new(f),
            lines_since_flush: 0,
            flush_every_lines,
        })
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<(), NdjsonError> {
        let mut buf = serde_json::to_vec(event)?;
        buf.push(b'\n');
        self.w.write_all(&buf)?;
        self.lines_since_flush += 1;
        if self.flush_every_lines > 0 && self.lines_since_flush >= self.flush_every_lines {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), NdjsonError> {
        self.w.flush()?;
        self.lines_since_flush = 0;
        Ok(())
    }
}

impl std::fmt::Debug for NdjsonWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonWriter")
            .field("lines_since_flush", &self.lines_since_flush)
            .field("flush_every_lines", &self.flush_every_lines)
            .finish()
    }
}

/// Build the filter for [`init_tracing`]. `RUST_LOG` wins over `filter`;
/// `verbose` forces `debug`.
pub fn tracing_filter(filter: &str, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a compact stderr subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init_tracing(filter: &str, verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_filter(filter, verbose))
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .try_init();
}
