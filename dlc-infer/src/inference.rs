//! Inference Client: the per-request exchange.
//!
//! Not safe to retry blindly. If the exchange fails after the request went
//! out, the session has been closed and the caller must reconnect (and
//! re-handshake) before trying again.

use std::io::{Read, Write};
use std::time::Duration;

use tracing::debug;

use dlc_core::{Catalog, ImageTile, InferenceResult, ModelDescriptor, OptionSnapshot, TileShape};

use crate::codec::{decode_response, encode_inference_request, DecodeError};
use crate::error::{ClientError, InvalidState, ProtocolError};
use crate::protocol::{MsgKind, Response};
use crate::transport::TransportSession;

/// Everything one inference exchange needs, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct InferenceCall<'a> {
    /// Catalog the model index refers to.
    pub catalog: &'a Catalog,
    pub model_index: Option<usize>,
    /// Model the option snapshot was built for. A different model at
    /// `model_index`, or the same model with another option schema, means
    /// the catalog changed under the selection.
    pub options_model: Option<&'a ModelDescriptor>,
    pub options: &'a OptionSnapshot,
    pub inputs: &'a [ImageTile],
    /// Shape the caller's sink can accept, if it constrains one.
    pub expected_output: Option<TileShape>,
}

/// Check the call against the catalog without touching the wire.
pub fn validate<'a>(call: &InferenceCall<'a>) -> Result<&'a ModelDescriptor, InvalidState> {
    let index = call.model_index.ok_or(InvalidState::NoModelSelected)?;
    let stale = InvalidState::StaleModelIndex {
        index,
        catalog_len: call.catalog.len(),
    };
    let model = call.catalog.get(index).ok_or_else(|| stale.clone())?;
    if let Some(bound) = call.options_model {
        if bound.name != model.name {
            return Err(stale);
        }
        if bound.option_schema != model.option_schema {
            return Err(InvalidState::StaleOptions {
                model: model.name.clone(),
            });
        }
    }
    if call.inputs.len() != model.num_inputs() {
        return Err(InvalidState::InputCount {
            model: model.name.clone(),
            expected: model.num_inputs(),
            got: call.inputs.len(),
        });
    }
    Ok(model)
}

/// Send one inference request and wait for its response.
///
/// Nothing is written to the session if validation fails.
pub fn run_inference<S: Read + Write>(
    session: &mut TransportSession<S>,
    call: &InferenceCall<'_>,
) -> Result<(InferenceResult, Duration), ClientError> {
    let model = validate(call)?;
    let payload = encode_inference_request(&model.name, call.options, call.inputs);
    debug!(
        model = %model.name,
        options = call.options.len(),
        inputs = call.inputs.len(),
        bytes = payload.len(),
        "sending inference request"
    );

    let (resp, dt) = session.exchange(&payload)?;
    let decoded = decode_response(&resp).map_err(|e| session.fail(e.into()))?;
    let mut outputs = match decoded {
        Response::Inference(r) => r.outputs,
        Response::Error(msg) => return Err(ProtocolError::Server(msg).into()),
        Response::Info(_) => {
            return Err(session.fail(
                DecodeError::UnexpectedKind {
                    got: MsgKind::InfoResponse,
                    expected: "an inference response",
                }
                .into(),
            ))
        }
    };
    if outputs.len() > 1 {
        debug!(
            model = %model.name,
            extra = outputs.len() - 1,
            "ignoring extra output tiles"
        );
    }
    // decode_response guarantees at least one tile.
    let output = outputs.swap_remove(0);

    if let Some(expected) = call.expected_output {
        if output.shape() != expected {
            return Err(ProtocolError::ShapeMismatch {
                expected,
                got: output.shape(),
            }
            .into());
        }
    }
    Ok((output, dt))
}
