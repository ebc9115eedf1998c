//! Catalog Client: the capability-discovery exchange.

use std::io::{Read, Write};
use std::time::Duration;

use tracing::info;

use dlc_core::Catalog;

use crate::codec::{decode_response, encode_info_request, DecodeError};
use crate::error::{ClientError, ProtocolError};
use crate::protocol::{MsgKind, Response};
use crate::transport::TransportSession;

/// Ask the server for its models and their option schemas.
///
/// Idempotent: it can be repeated on the same session at any time.
/// `generation` is stamped on the returned catalog.
pub fn fetch_catalog<S: Read + Write>(
    session: &mut TransportSession<S>,
    generation: u64,
) -> Result<(Catalog, Duration), ClientError> {
    let (payload, dt) = session.exchange(&encode_info_request())?;
    let resp = decode_response(&payload).map_err(|e| session.fail(e.into()))?;
    match resp {
        Response::Info(models) => {
            info!(
                endpoint = %session.endpoint(),
                models = models.len(),
                generation,
                "catalog received"
            );
            Ok((Catalog::new(generation, models), dt))
        }
        Response::Error(msg) => Err(ProtocolError::Server(msg).into()),
        Response::Inference(_) => Err(session.fail(
            DecodeError::UnexpectedKind {
                got: MsgKind::InferenceResponse,
                expected: "an info response",
            }
            .into(),
        )),
    }
}
