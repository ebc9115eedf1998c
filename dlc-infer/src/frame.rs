//! Length-delimited framing (u32 big-endian length prefix).
//!
//! Decoding is all-or-nothing: a frame is returned only once its header and
//! the full declared payload have been read, however the underlying stream
//! fragments them.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Width of the length header in bytes.
pub const HEADER_LEN: usize = 4;

pub const MAX_FRAME_LEN: u32 = dlc_core::config::DEFAULT_MAX_FRAME_LEN;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame too large: {len} > {max}")]
    TooLarge { len: u64, max: u32 },
    /// The stream ended cleanly before the first header byte.
    #[error("stream closed before a frame started")]
    Closed,
    /// The stream ended inside a header or payload.
    #[error("unexpected EOF inside frame: read {got} of {expected} bytes")]
    Truncated { expected: usize, got: usize },
}

/// Prepend the length header to `payload`.
pub fn encode_frame(payload: &[u8], max: u32) -> Result<Vec<u8>, FrameError> {
    let len = checked_len(payload, max)?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    write_frame_with_limit(w, payload, MAX_FRAME_LEN)
}

pub fn write_frame_with_limit<W: Write>(
    w: &mut W,
    payload: &[u8],
    max: u32,
) -> Result<(), FrameError> {
    let len = checked_len(payload, max)?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>, FrameError> {
    read_frame_with_limit(r, MAX_FRAME_LEN)
}

pub fn read_frame_with_limit<R: Read>(r: &mut R, max: u32) -> Result<Vec<u8>, FrameError> {
    let mut len_bytes = [0u8; HEADER_LEN];
    match read_full(r, &mut len_bytes)? {
        0 => return Err(FrameError::Closed),
        HEADER_LEN => {}
        got => {
            return Err(FrameError::Truncated {
                expected: HEADER_LEN,
                got,
            })
        }
    }
    let len = u32::from_be_bytes(len_bytes);
    if len > max {
        return Err(FrameError::TooLarge {
            len: u64::from(len),
            max,
        });
    }
    let mut payload = vec![0u8; len as usize];
    let got = read_full(r, &mut payload)?;
    if got < payload.len() {
        return Err(FrameError::Truncated {
            expected: payload.len(),
            got,
        });
    }
    Ok(payload)
}

fn checked_len(payload: &[u8], max: u32) -> Result<u32, FrameError> {
    match u32::try_from(payload.len()) {
        Ok(len) if len <= max => Ok(len),
        _ => Err(FrameError::TooLarge {
            len: payload.len() as u64,
            max,
        }),
    }
}

/// Fill `buf`, looping on short reads. Returns fewer bytes only on EOF.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize, FrameError> {
    let mut off = 0usize;
    while off < buf.len() {
        match r.read(&mut buf[off..]) {
            Ok(0) => break,
            Ok(n) => off += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(off)
}
