//! Binary codec for protocol v1 (payload inside a length-delimited frame).
//!
//! All integers and floats are big-endian. Strings are a u32 byte length
//! followed by UTF-8. Both the client side (requests out, responses in) and
//! the server side (requests in, responses out) live here.

use thiserror::Error;

use dlc_core::{
    ImageTile, ModelDescriptor, OptionField, OptionSnapshot, OptionValue, TileError, TileShape,
};

use crate::protocol::{
    option_tag, InferenceRequest, InferenceResponse, MsgKind, Request, Response,
    PAYLOAD_HEADER_LEN, PROTOCOL_VERSION,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("payload too short")]
    TooShort,
    #[error("unsupported protocol version: {0}")]
    BadVersion(u32),
    #[error("unknown message kind: {0}")]
    BadKind(u8),
    #[error("unexpected message kind {got:?} (expected {expected})")]
    UnexpectedKind { got: MsgKind, expected: &'static str },
    #[error("invalid utf-8 in string field")]
    BadUtf8,
    #[error("invalid boolean byte: {0}")]
    BadBool(u8),
    #[error("unknown option kind tag: {0}")]
    BadOptionKind(u8),
    #[error("model {model:?} declares {declared} inputs but names {got}")]
    InputCountMismatch {
        model: String,
        declared: u32,
        got: u32,
    },
    #[error("bad tile: {0}")]
    BadTile(#[from] TileError),
    #[error("inference response carries no output tile")]
    NoOutputs,
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

// ---------------------------------------------------------------------------
// Client side: requests out, responses in.

pub fn encode_info_request() -> Vec<u8> {
    let mut out = Vec::with_capacity(PAYLOAD_HEADER_LEN);
    put_header(&mut out, MsgKind::InfoRequest);
    out
}

pub fn encode_inference_request(
    model: &str,
    options: &OptionSnapshot,
    inputs: &[ImageTile],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(encode_inference_request_len(model, options, inputs));
    encode_inference_request_into(&mut out, model, options, inputs);
    out
}

pub fn encode_inference_request_len(
    model: &str,
    options: &OptionSnapshot,
    inputs: &[ImageTile],
) -> usize {
    let names: usize = options.bools.iter().map(|(n, _)| 4 + n.len() + 1).sum::<usize>()
        + options.ints.iter().map(|(n, _)| 4 + n.len() + 4).sum::<usize>()
        + options.floats.iter().map(|(n, _)| 4 + n.len() + 4).sum::<usize>()
        + options
            .strings
            .iter()
            .map(|(n, v)| 4 + n.len() + 4 + v.len())
            .sum::<usize>();
    let tiles: usize = inputs.iter().map(|t| 16 + t.pixels().len() * 4).sum();
    // header + model string + 4 list counts + tile count
    PAYLOAD_HEADER_LEN + 4 + model.len() + 16 + names + 4 + tiles
}

pub fn encode_inference_request_into(
    out: &mut Vec<u8>,
    model: &str,
    options: &OptionSnapshot,
    inputs: &[ImageTile],
) {
    out.clear();
    out.reserve(encode_inference_request_len(model, options, inputs));

    put_header(out, MsgKind::InferenceRequest);
    put_str(out, model);
    put_snapshot(out, options);
    put_u32(out, inputs.len() as u32);
    for t in inputs {
        put_tile(out, t);
    }
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, DecodeError> {
    let mut c = Cursor::new(bytes);
    let kind = c.read_header()?;
    let resp = match kind {
        MsgKind::InfoResponse => {
            let n = c.read_count(4)?;
            let mut models = Vec::with_capacity(n);
            for _ in 0..n {
                models.push(c.read_model()?);
            }
            Response::Info(models)
        }
        MsgKind::InferenceResponse => {
            let n = c.read_count(16)?;
            if n == 0 {
                return Err(DecodeError::NoOutputs);
            }
            let mut outputs = Vec::with_capacity(n);
            for _ in 0..n {
                outputs.push(c.read_tile()?);
            }
            Response::Inference(InferenceResponse { outputs })
        }
        MsgKind::ErrorResponse => Response::Error(c.read_str()?),
        other => {
            return Err(DecodeError::UnexpectedKind {
                got: other,
                expected: "a response",
            })
        }
    };
    c.finish()?;
    Ok(resp)
}

// ---------------------------------------------------------------------------
// Server side: requests in, responses out.

pub fn decode_request(bytes: &[u8]) -> Result<Request, DecodeError> {
    let mut c = Cursor::new(bytes);
    let kind = c.read_header()?;
    let req = match kind {
        MsgKind::InfoRequest => Request::Info,
        MsgKind::InferenceRequest => {
            let model = c.read_str()?;
            let options = c.read_snapshot()?;
            let n = c.read_count(16)?;
            let mut inputs = Vec::with_capacity(n);
            for _ in 0..n {
                inputs.push(c.read_tile()?);
            }
            Request::Inference(InferenceRequest {
                model,
                options,
                inputs,
            })
        }
        other => {
            return Err(DecodeError::UnexpectedKind {
                got: other,
                expected: "a request",
            })
        }
    };
    c.finish()?;
    Ok(req)
}

pub fn encode_info_response(models: &[ModelDescriptor]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    put_header(&mut out, MsgKind::InfoResponse);
    put_u32(&mut out, models.len() as u32);
    for m in models {
        put_str(&mut out, &m.name);
        put_u32(&mut out, m.input_names.len() as u32);
        put_u32(&mut out, m.input_names.len() as u32);
        for name in &m.input_names {
            put_str(&mut out, name);
        }
        put_u32(&mut out, m.option_schema.len() as u32);
        for f in &m.option_schema {
            put_str(&mut out, &f.name);
            put_value(&mut out, &f.default);
        }
    }
    out
}

pub fn encode_inference_response(outputs: &[ImageTile]) -> Vec<u8> {
    let samples: usize = outputs.iter().map(|t| 16 + t.pixels().len() * 4).sum();
    let mut out = Vec::with_capacity(PAYLOAD_HEADER_LEN + 4 + samples);
    put_header(&mut out, MsgKind::InferenceResponse);
    put_u32(&mut out, outputs.len() as u32);
    for t in outputs {
        put_tile(&mut out, t);
    }
    out
}

pub fn encode_error_response(message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(PAYLOAD_HEADER_LEN + 4 + message.len());
    put_header(&mut out, MsgKind::ErrorResponse);
    put_str(&mut out, message);
    out
}

// ---------------------------------------------------------------------------
// Writers.

fn put_header(out: &mut Vec<u8>, kind: MsgKind) {
    out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    out.push(kind as u8);
    out.push(0); // flags
    out.extend_from_slice(&[0, 0]); // reserved
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn put_value(out: &mut Vec<u8>, v: &OptionValue) {
    match v {
        OptionValue::Bool(b) => {
            out.push(option_tag::BOOL);
            out.push(u8::from(*b));
        }
        OptionValue::Int(i) => {
            out.push(option_tag::INT);
            out.extend_from_slice(&i.to_be_bytes());
        }
        OptionValue::Float(f) => {
            out.push(option_tag::FLOAT);
            out.extend_from_slice(&f.to_be_bytes());
        }
        OptionValue::String(s) => {
            out.push(option_tag::STRING);
            put_str(out, s);
        }
    }
}

fn put_snapshot(out: &mut Vec<u8>, s: &OptionSnapshot) {
    put_u32(out, s.bools.len() as u32);
    for (n, v) in &s.bools {
        put_str(out, n);
        out.push(u8::from(*v));
    }
    put_u32(out, s.ints.len() as u32);
    for (n, v) in &s.ints {
        put_str(out, n);
        out.extend_from_slice(&v.to_be_bytes());
    }
    put_u32(out, s.floats.len() as u32);
    for (n, v) in &s.floats {
        put_str(out, n);
        out.extend_from_slice(&v.to_be_bytes());
    }
    put_u32(out, s.strings.len() as u32);
    for (n, v) in &s.strings {
        put_str(out, n);
        put_str(out, v);
    }
}

fn put_tile(out: &mut Vec<u8>, t: &ImageTile) {
    put_u32(out, t.width());
    put_u32(out, t.height());
    put_u32(out, t.channels());
    put_u32(out, t.pixels().len() as u32);
    for &f in t.pixels() {
        out.extend_from_slice(&f.to_be_bytes());
    }
}

// ---------------------------------------------------------------------------
// Reader.

struct Cursor<'a> {
    bytes: &'a [u8],
    off: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, off: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.off
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::TooShort);
        }
        let s = &self.bytes[self.off..self.off + n];
        self.off += n;
        Ok(s)
    }

    fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, DecodeError> {
        let b = self.take(4)?;
        Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(DecodeError::BadBool(b)),
        }
    }

    fn read_str(&mut self) -> Result<String, DecodeError> {
        let n = self.read_u32()? as usize;
        let b = self.take(n)?;
        std::str::from_utf8(b)
            .map(str::to_string)
            .map_err(|_| DecodeError::BadUtf8)
    }

    /// Element count, rejected early if the rest of the payload cannot hold
    /// `count` elements of at least `min_elem` bytes each.
    fn read_count(&mut self, min_elem: usize) -> Result<usize, DecodeError> {
        let n = self.read_u32()? as usize;
        if n.saturating_mul(min_elem) > self.remaining() {
            return Err(DecodeError::TooShort);
        }
        Ok(n)
    }

    fn read_header(&mut self) -> Result<MsgKind, DecodeError> {
        let version = self.read_u32()?;
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let kind = self.read_u8()?;
        let kind = MsgKind::from_u8(kind).ok_or(DecodeError::BadKind(kind))?;
        let _flags = self.read_u8()?;
        self.take(2)?;
        Ok(kind)
    }

    fn read_value(&mut self) -> Result<OptionValue, DecodeError> {
        match self.read_u8()? {
            option_tag::BOOL => Ok(OptionValue::Bool(self.read_bool()?)),
            option_tag::INT => Ok(OptionValue::Int(self.read_i32()?)),
            option_tag::FLOAT => Ok(OptionValue::Float(self.read_f32()?)),
            option_tag::STRING => Ok(OptionValue::String(self.read_str()?)),
            tag => Err(DecodeError::BadOptionKind(tag)),
        }
    }

    fn read_model(&mut self) -> Result<ModelDescriptor, DecodeError> {
        let name = self.read_str()?;
        let num_inputs = self.read_u32()?;
        let n_names = self.read_count(4)?;
        if n_names as u64 != u64::from(num_inputs) {
            return Err(DecodeError::InputCountMismatch {
                model: name,
                declared: num_inputs,
                got: n_names as u32,
            });
        }
        let mut input_names = Vec::with_capacity(n_names);
        for _ in 0..n_names {
            input_names.push(self.read_str()?);
        }
        let n_opts = self.read_count(5)?;
        let mut option_schema = Vec::with_capacity(n_opts);
        for _ in 0..n_opts {
            let name = self.read_str()?;
            let default = self.read_value()?;
            option_schema.push(OptionField { name, default });
        }
        Ok(ModelDescriptor {
            name,
            input_names,
            option_schema,
        })
    }

    fn read_snapshot(&mut self) -> Result<OptionSnapshot, DecodeError> {
        let mut s = OptionSnapshot::default();
        let n = self.read_count(5)?;
        for _ in 0..n {
            s.bools.push((self.read_str()?, self.read_bool()?));
        }
        let n = self.read_count(8)?;
        for _ in 0..n {
            s.ints.push((self.read_str()?, self.read_i32()?));
        }
        let n = self.read_count(8)?;
        for _ in 0..n {
            s.floats.push((self.read_str()?, self.read_f32()?));
        }
        let n = self.read_count(8)?;
        for _ in 0..n {
            s.strings.push((self.read_str()?, self.read_str()?));
        }
        Ok(s)
    }

    fn read_tile(&mut self) -> Result<ImageTile, DecodeError> {
        let shape = TileShape::new(self.read_u32()?, self.read_u32()?, self.read_u32()?);
        let n = self.read_count(4)?;
        let raw = self.take(n * 4)?;
        let pixels = raw
            .chunks_exact(4)
            .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(ImageTile::new(shape, pixels)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_detect() -> ModelDescriptor {
        ModelDescriptor {
            name: "edge-detect".to_string(),
            input_names: vec!["src".to_string()],
            option_schema: vec![OptionField::new("threshold", OptionValue::Float(0.5))],
        }
    }

    #[test]
    fn info_request_is_header_only() {
        let b = encode_info_request();
        assert_eq!(b, [0, 0, 0, 1, MsgKind::InfoRequest as u8, 0, 0, 0]);
        assert_eq!(decode_request(&b).unwrap(), Request::Info);
    }

    #[test]
    fn info_response_preserves_schema() {
        let models = vec![
            edge_detect(),
            ModelDescriptor {
                name: "blend".to_string(),
                input_names: vec!["a".to_string(), "b".to_string()],
                option_schema: vec![
                    OptionField::new("clamp", OptionValue::Bool(true)),
                    OptionField::new("passes", OptionValue::Int(-2)),
                    OptionField::new("mode", OptionValue::String("över".to_string())),
                    OptionField::new("mix", OptionValue::Float(0.25)),
                ],
            },
        ];
        let b = encode_info_response(&models);
        assert_eq!(decode_response(&b).unwrap(), Response::Info(models));
    }

    #[test]
    fn inference_request_carries_snapshot_and_tiles() {
        let snap = OptionSnapshot {
            bools: vec![("clamp".to_string(), false)],
            ints: vec![],
            floats: vec![("threshold".to_string(), 0.8)],
            strings: vec![("label".to_string(), String::new())],
        };
        let t0 = ImageTile::new(TileShape::new(2, 2, 1), vec![0.0, 0.25, 0.5, 1.0]).unwrap();
        let t1 = ImageTile::filled(TileShape::new(1, 1, 3), -1.5).unwrap();
        let b = encode_inference_request("blend", &snap, &[t0.clone(), t1.clone()]);
        assert_eq!(
            b.len(),
            encode_inference_request_len("blend", &snap, &[t0.clone(), t1.clone()])
        );
        match decode_request(&b).unwrap() {
            Request::Inference(req) => {
                assert_eq!(req.model, "blend");
                assert_eq!(req.options, snap);
                assert_eq!(req.inputs, vec![t0, t1]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn encode_into_reuses_buffer() {
        let snap = OptionSnapshot::default();
        let t = ImageTile::filled(TileShape::new(3, 3, 1), 0.0).unwrap();
        let mut buf = encode_inference_request("m", &snap, &[t.clone()]);
        encode_inference_request_into(&mut buf, "m", &snap, &[]);
        assert_eq!(buf, encode_inference_request("m", &snap, &[]));
    }

    #[test]
    fn input_name_count_must_match_declared_inputs() {
        let mut b = encode_info_response(&[edge_detect()]);
        // header(8) + model count(4) + name(4 + 11) -> numInputs field
        let at = 8 + 4 + 4 + "edge-detect".len();
        b[at..at + 4].copy_from_slice(&2u32.to_be_bytes());
        match decode_response(&b).unwrap_err() {
            DecodeError::InputCountMismatch {
                model,
                declared,
                got,
            } => {
                assert_eq!(model, "edge-detect");
                assert_eq!(declared, 2);
                assert_eq!(got, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tile_sample_count_must_match_shape() {
        let t = ImageTile::filled(TileShape::new(2, 2, 1), 1.0).unwrap();
        let mut b = encode_inference_response(&[t]);
        // Overwrite width 2 -> 3: shape needs 6 samples but carries 4.
        let at = 8 + 4;
        b[at..at + 4].copy_from_slice(&3u32.to_be_bytes());
        assert!(matches!(
            decode_response(&b),
            Err(DecodeError::BadTile(TileError::SampleCount { .. }))
        ));
    }

    #[test]
    fn empty_inference_response_is_rejected() {
        let b = encode_inference_response(&[]);
        assert_eq!(decode_response(&b), Err(DecodeError::NoOutputs));
    }

    #[test]
    fn hostile_counts_fail_without_allocating() {
        let mut b = Vec::new();
        put_header(&mut b, MsgKind::InfoResponse);
        put_u32(&mut b, u32::MAX);
        assert_eq!(decode_response(&b), Err(DecodeError::TooShort));
    }

    #[test]
    fn header_checks() {
        let mut b = encode_error_response("boom");
        assert_eq!(
            decode_response(&b).unwrap(),
            Response::Error("boom".to_string())
        );

        b[3] = 9;
        assert_eq!(decode_response(&b), Err(DecodeError::BadVersion(9)));

        let mut b = encode_error_response("boom");
        b[4] = 42;
        assert_eq!(decode_response(&b), Err(DecodeError::BadKind(42)));

        // A request is not a response.
        assert!(matches!(
            decode_response(&encode_info_request()),
            Err(DecodeError::UnexpectedKind { .. })
        ));
        assert!(matches!(
            decode_request(&encode_error_response("x")),
            Err(DecodeError::UnexpectedKind { .. })
        ));
    }

    #[test]
    fn trailing_and_truncated_payloads_are_rejected() {
        let mut b = encode_info_response(&[edge_detect()]);
        b.push(0);
        assert_eq!(decode_response(&b), Err(DecodeError::TrailingBytes(1)));
        b.truncate(b.len() - 3);
        assert_eq!(decode_response(&b), Err(DecodeError::TooShort));
    }
}
