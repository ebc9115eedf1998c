//! Server endpoint and the catalog types a server advertises at handshake time.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("host must not be empty")]
    EmptyHost,
    #[error("port must be in 1..=65535")]
    InvalidPort,
    #[error("invalid endpoint {0:?} (expected HOST:PORT)")]
    Malformed(String),
}

/// Address of one inference server. Immutable once a session uses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, EndpointError> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(EndpointError::EmptyHost);
        }
        if port == 0 {
            return Err(EndpointError::InvalidPort);
        }
        Ok(Self { host, port })
    }

    /// Parse `host:port` or `[v6addr]:port`.
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (h, p) = rest
                .split_once("]:")
                .ok_or_else(|| EndpointError::Malformed(s.to_string()))?;
            (h, p)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| EndpointError::Malformed(s.to_string()))?
        };
        let port: u16 = port
            .parse()
            .map_err(|_| EndpointError::Malformed(s.to_string()))?;
        Self::new(host, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Type of a dynamic, server-declared model option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Bool,
    Int,
    Float,
    String,
}

impl OptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OptionKind::Bool => "bool",
            OptionKind::Int => "int",
            OptionKind::Float => "float",
            OptionKind::String => "string",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    String(String),
}

impl OptionValue {
    pub fn kind(&self) -> OptionKind {
        match self {
            OptionValue::Bool(_) => OptionKind::Bool,
            OptionValue::Int(_) => OptionKind::Int,
            OptionValue::Float(_) => OptionKind::Float,
            OptionValue::String(_) => OptionKind::String,
        }
    }

    /// Parse a textual value for a field of the given kind (CLI / config input).
    pub fn parse_as(kind: OptionKind, s: &str) -> Option<Self> {
        match kind {
            OptionKind::Bool => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(OptionValue::Bool(true)),
                "0" | "false" | "no" | "off" => Some(OptionValue::Bool(false)),
                _ => None,
            },
            OptionKind::Int => s.trim().parse().ok().map(OptionValue::Int),
            OptionKind::Float => s.trim().parse().ok().map(OptionValue::Float),
            OptionKind::String => Some(OptionValue::String(s.to_string())),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{v}"),
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Float(v) => write!(f, "{v}"),
            OptionValue::String(v) => write!(f, "{v:?}"),
        }
    }
}

/// One entry of a model's option schema. Names are unique per model only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionField {
    pub name: String,
    pub default: OptionValue,
}

impl OptionField {
    pub fn new(name: impl Into<String>, default: OptionValue) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }

    pub fn kind(&self) -> OptionKind {
        self.default.kind()
    }
}

/// Client-side record of one server-offered model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub input_names: Vec<String>,
    pub option_schema: Vec<OptionField>,
}

impl ModelDescriptor {
    pub fn num_inputs(&self) -> usize {
        self.input_names.len()
    }
}

/// One catalog response: the models a server offers, in server order.
///
/// `generation` increases every time a session fetches a catalog, so a model
/// index chosen against an older catalog can be told apart.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Catalog {
    pub generation: u64,
    pub models: Vec<ModelDescriptor>,
}

impl Catalog {
    pub fn new(generation: u64, models: Vec<ModelDescriptor>) -> Self {
        Self { generation, models }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ModelDescriptor> {
        self.models.get(index)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.models.iter().position(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_rejects_empty_host_and_zero_port() {
        assert_eq!(Endpoint::new("  ", 80), Err(EndpointError::EmptyHost));
        assert_eq!(Endpoint::new("localhost", 0), Err(EndpointError::InvalidPort));
    }

    #[test]
    fn endpoint_parse_accepts_names_and_v6() {
        let e = Endpoint::parse("render-box:55555").unwrap();
        assert_eq!(e.host(), "render-box");
        assert_eq!(e.port(), 55555);

        let v6 = Endpoint::parse("[::1]:9000").unwrap();
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.to_string(), "[::1]:9000");

        assert!(matches!(
            Endpoint::parse("no-port"),
            Err(EndpointError::Malformed(_))
        ));
        assert!(matches!(
            Endpoint::parse("host:notaport"),
            Err(EndpointError::Malformed(_))
        ));
    }

    #[test]
    fn option_value_parse_follows_kind() {
        assert_eq!(
            OptionValue::parse_as(OptionKind::Bool, "on"),
            Some(OptionValue::Bool(true))
        );
        assert_eq!(
            OptionValue::parse_as(OptionKind::Int, " 3 "),
            Some(OptionValue::Int(3))
        );
        assert_eq!(
            OptionValue::parse_as(OptionKind::Float, "0.8"),
            Some(OptionValue::Float(0.8))
        );
        assert_eq!(OptionValue::parse_as(OptionKind::Int, "x"), None);
    }
}
