//! Protocol v1 messages exchanged with the inference server.
//!
//! Two message families travel inside frames: the catalog exchange (info
//! request / info response) and the inference exchange (inference request /
//! inference response). Either request may instead be answered with an
//! error response.

use dlc_core::{ImageTile, ModelDescriptor, OptionSnapshot};

/// Protocol version carried in every payload header.
pub const PROTOCOL_VERSION: u32 = 1;

/// Payload header: u32 version + u8 kind + u8 flags + u16 reserved.
pub const PAYLOAD_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    InfoRequest = 1,
    InfoResponse = 2,
    InferenceRequest = 3,
    InferenceResponse = 4,
    ErrorResponse = 5,
}

impl MsgKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(MsgKind::InfoRequest),
            2 => Some(MsgKind::InfoResponse),
            3 => Some(MsgKind::InferenceRequest),
            4 => Some(MsgKind::InferenceResponse),
            5 => Some(MsgKind::ErrorResponse),
            _ => None,
        }
    }
}

/// Wire tags for option kinds.
pub mod option_tag {
    pub const BOOL: u8 = 0;
    pub const INT: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const STRING: u8 = 3;
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    /// Name of the chosen model, as advertised in the catalog.
    pub model: String,
    /// Full option snapshot; the server keeps no state between requests.
    pub options: OptionSnapshot,
    /// One tile per model input, in input order.
    pub inputs: Vec<ImageTile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResponse {
    /// The first tile is the logical output.
    pub outputs: Vec<ImageTile>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Info,
    Inference(InferenceRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Info(Vec<ModelDescriptor>),
    Inference(InferenceResponse),
    Error(String),
}
