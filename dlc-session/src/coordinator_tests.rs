use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use dlc_core::{
    Endpoint, ImageTile, ModelDescriptor, OptionField, OptionKind, OptionValue, TileError,
    TileShape,
};
use dlc_infer::codec::{
    decode_request, encode_error_response, encode_inference_response, encode_info_response,
};
use dlc_infer::frame::{encode_frame, HEADER_LEN, MAX_FRAME_LEN};
use dlc_infer::protocol::Request;
use dlc_infer::{ClientError, ConnectError, Connector, InvalidState, TransportError};

use crate::coordinator::{SessionCoordinator, SessionState};
use crate::host::{Region, TileSink, TileSource};

fn echo_model() -> ModelDescriptor {
    ModelDescriptor {
        name: "echo".to_string(),
        input_names: vec!["src".to_string()],
        option_schema: vec![
            OptionField::new("scale", OptionValue::Float(2.0)),
            OptionField::new("enabled", OptionValue::Bool(true)),
        ],
    }
}

fn pair_model(name: &str) -> ModelDescriptor {
    ModelDescriptor {
        name: name.to_string(),
        input_names: vec!["a".to_string(), "b".to_string()],
        option_schema: vec![OptionField::new("passes", OptionValue::Int(1))],
    }
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    requests: AtomicUsize,
}

/// In-memory server. Panics if a request starts before the previous
/// response was read in full, which is what interleaved callers would do.
struct MockStream {
    models: Arc<Mutex<Vec<ModelDescriptor>>>,
    counters: Arc<Counters>,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    /// Leave this request (counted across connections) unanswered.
    hang_up_at: Option<usize>,
}

impl MockStream {
    fn respond(&self, payload: &[u8]) -> Vec<u8> {
        let models = self.models.lock().unwrap().clone();
        match decode_request(payload).unwrap() {
            Request::Info => encode_info_response(&models),
            Request::Inference(req) => {
                if req.model != "echo" {
                    return encode_error_response("only echo runs here");
                }
                let scale = req.options.floats[0].1;
                let src = &req.inputs[0];
                let px = src.pixels().iter().map(|v| v * scale).collect();
                encode_inference_response(&[ImageTile::new(src.shape(), px).unwrap()])
            }
        }
    }

    fn drain_requests(&mut self) {
        while self.inbound.len() >= HEADER_LEN {
            let mut len = [0u8; HEADER_LEN];
            len.copy_from_slice(&self.inbound[..HEADER_LEN]);
            let len = u32::from_be_bytes(len) as usize;
            if self.inbound.len() < HEADER_LEN + len {
                return;
            }
            let payload: Vec<u8> = self.inbound.drain(..HEADER_LEN + len).skip(HEADER_LEN).collect();
            assert!(
                self.outbound.is_empty(),
                "second request arrived before the first response was read"
            );
            let nth = self.counters.requests.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hang_up_at == Some(nth) {
                continue;
            }
            let resp = self.respond(&payload);
            self.outbound
                .extend(encode_frame(&resp, MAX_FRAME_LEN).unwrap());
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        assert!(
            self.outbound.is_empty(),
            "request bytes written while a response is unread"
        );
        self.inbound.extend_from_slice(buf);
        self.drain_requests();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Short reads, with a yield to invite other threads in.
        thread::yield_now();
        let n = buf.len().min(self.outbound.len()).min(7);
        for (dst, b) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *dst = b;
        }
        Ok(n)
    }
}

#[derive(Clone)]
struct MockConnector {
    models: Arc<Mutex<Vec<ModelDescriptor>>>,
    counters: Arc<Counters>,
    hang_up_at: Option<usize>,
    refuse: bool,
}

impl MockConnector {
    fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            models: Arc::new(Mutex::new(models)),
            counters: Arc::new(Counters::default()),
            hang_up_at: None,
            refuse: false,
        }
    }

    fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }

    fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Stream = MockStream;

    fn connect(&self, endpoint: &Endpoint) -> Result<MockStream, ConnectError> {
        if self.refuse {
            return Err(ConnectError::Unreachable {
                endpoint: endpoint.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockStream {
            models: Arc::clone(&self.models),
            counters: Arc::clone(&self.counters),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            hang_up_at: self.hang_up_at,
        })
    }
}

fn endpoint() -> Endpoint {
    Endpoint::new("mock", 1).unwrap()
}

fn tile(v: f32) -> ImageTile {
    ImageTile::filled(TileShape::new(3, 2, 1), v).unwrap()
}

#[test]
fn starts_disconnected_and_connects_lazily() {
    let conn = MockConnector::new(vec![echo_model()]);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    assert_eq!(coord.state(), SessionState::Disconnected);
    assert_eq!(conn.connects(), 0);

    let cat = coord.list_models().unwrap();
    assert_eq!(cat.len(), 1);
    assert_eq!(cat.generation, 1);
    assert_eq!(coord.state(), SessionState::ConnectedWithCatalog);

    // Cached: no second handshake.
    let again = coord.ensure_ready(&endpoint()).unwrap();
    assert!(Arc::ptr_eq(&cat, &again));
    assert_eq!(conn.connects(), 1);
    assert_eq!(conn.requests(), 1);
}

#[test]
fn refresh_fetches_a_new_generation_on_the_same_connection() {
    let conn = MockConnector::new(vec![echo_model()]);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    coord.list_models().unwrap();
    let cat = coord.refresh_catalog().unwrap();
    assert_eq!(cat.generation, 2);
    assert_eq!(conn.connects(), 1);
    assert_eq!(conn.requests(), 2);
}

#[test]
fn select_model_resets_options() {
    let conn = MockConnector::new(vec![echo_model(), pair_model("pair")]);
    let coord = SessionCoordinator::new(conn, endpoint());

    let m = coord.select_model(0).unwrap();
    assert_eq!(m.name, "echo");
    assert_eq!(
        coord.option_fields(),
        vec![
            (OptionKind::Bool, "enabled".to_string()),
            (OptionKind::Float, "scale".to_string()),
        ]
    );
    assert!(coord.set_option("scale", OptionValue::Float(3.0)));
    let schema_gen = coord.schema_generation();

    coord.select_model(1).unwrap();
    assert!(coord.schema_generation() > schema_gen);
    assert!(coord
        .get_option(OptionKind::Float, "scale")
        .is_err());
    assert_eq!(
        coord.get_option(OptionKind::Int, "passes").unwrap(),
        OptionValue::Int(1)
    );
    // Unknown names are ignored, not fatal.
    assert!(!coord.set_option("scale", OptionValue::Float(1.0)));
    assert_eq!(coord.option_kind("passes"), Some(OptionKind::Int));

    let err = coord.select_model(9).unwrap_err();
    assert_eq!(
        err.invalid_state(),
        Some(&InvalidState::StaleModelIndex {
            index: 9,
            catalog_len: 2
        })
    );
    assert_eq!(coord.selected_model(), Some(1));
}

#[test]
fn inference_uses_current_option_values() {
    let conn = MockConnector::new(vec![echo_model()]);
    let coord = SessionCoordinator::new(conn, endpoint());
    coord.select_model(0).unwrap();

    let out = coord.run_inference(&[tile(1.5)], None).unwrap();
    assert!(out.pixels().iter().all(|&v| v == 3.0));

    coord.set_option("scale", OptionValue::Float(0.5));
    let out = coord
        .run_inference(&[tile(1.5)], Some(TileShape::new(3, 2, 1)))
        .unwrap();
    assert!(out.pixels().iter().all(|&v| v == 0.75));

    let s = coord.stats_snapshot();
    assert_eq!(s.connects, 1);
    assert_eq!(s.catalogs, 1);
    assert_eq!(s.sent, 3);
    assert_eq!(s.received, 3);
    assert_eq!(s.errors, 0);
}

#[test]
fn concurrent_callers_never_interleave() {
    let conn = MockConnector::new(vec![echo_model()]);
    let coord = Arc::new(SessionCoordinator::new(conn.clone(), endpoint()));
    coord.select_model(0).unwrap();

    let threads = 8;
    let per_thread = 25;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let coord = Arc::clone(&coord);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let v = (t * 100 + i) as f32;
                    let out = coord.run_inference(&[tile(v)], None).unwrap();
                    // Each caller gets the response to its own request.
                    assert!(out.pixels().iter().all(|&p| p == v * 2.0));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(conn.requests(), 1 + threads * per_thread);
    assert_eq!(conn.connects(), 1);
    let s = coord.stats_snapshot();
    assert_eq!(s.received as usize, 1 + threads * per_thread);
    assert_eq!(s.catalog_latency.count, 1);
    assert_eq!(s.inference_latency.count as usize, threads * per_thread);
}

#[test]
fn stale_selection_fails_without_sending() {
    let conn = MockConnector::new(vec![echo_model(), pair_model("pair")]);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    coord.select_model(1).unwrap();

    // The server drops a model; index 1 no longer exists.
    *conn.models.lock().unwrap() = vec![echo_model()];
    coord.refresh_catalog().unwrap();
    let before = conn.requests();
    let err = coord
        .run_inference(&[tile(0.0), tile(0.0)], None)
        .unwrap_err();
    assert_eq!(
        err.invalid_state(),
        Some(&InvalidState::StaleModelIndex {
            index: 1,
            catalog_len: 1
        })
    );
    assert_eq!(conn.requests(), before);
    assert_eq!(coord.state(), SessionState::ConnectedWithCatalog);
}

#[test]
fn renamed_model_at_selected_index_is_stale() {
    let conn = MockConnector::new(vec![echo_model(), pair_model("pair")]);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    coord.select_model(1).unwrap();

    *conn.models.lock().unwrap() = vec![echo_model(), pair_model("other")];
    coord.refresh_catalog().unwrap();
    let before = conn.requests();
    let err = coord
        .run_inference(&[tile(0.0), tile(0.0)], None)
        .unwrap_err();
    assert!(matches!(
        err.invalid_state(),
        Some(InvalidState::StaleModelIndex { index: 1, .. })
    ));
    assert_eq!(conn.requests(), before);
}

#[test]
fn changed_schema_under_same_name_resets_options() {
    let conn = MockConnector::new(vec![echo_model()]);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    coord.select_model(0).unwrap();
    coord.set_option("scale", OptionValue::Float(0.5));
    let schema_gen = coord.schema_generation();

    // The server redefines "echo" with a different option set.
    let mut redefined = echo_model();
    redefined.option_schema = vec![OptionField::new("gain", OptionValue::Float(3.0))];
    *conn.models.lock().unwrap() = vec![redefined];
    coord.refresh_catalog().unwrap();

    assert_eq!(coord.option_fields(), vec![(OptionKind::Float, "gain".to_string())]);
    assert_eq!(coord.schema_generation(), schema_gen + 1);
    assert_eq!(coord.selected_model(), Some(0));
    assert!(coord.get_option(OptionKind::Float, "scale").is_err());

    // Only the new option goes out, at its default.
    let out = coord.run_inference(&[tile(1.0)], None).unwrap();
    assert!(out.pixels().iter().all(|&v| v == 3.0));
}

#[test]
fn unchanged_catalog_keeps_option_values() {
    let conn = MockConnector::new(vec![echo_model()]);
    let coord = SessionCoordinator::new(conn, endpoint());
    coord.select_model(0).unwrap();
    coord.set_option("scale", OptionValue::Float(0.5));
    let schema_gen = coord.schema_generation();

    coord.refresh_catalog().unwrap();
    assert_eq!(coord.schema_generation(), schema_gen);
    assert_eq!(
        coord.get_option(OptionKind::Float, "scale").unwrap(),
        OptionValue::Float(0.5)
    );
}

#[test]
fn no_selection_and_wrong_input_count() {
    let conn = MockConnector::new(vec![echo_model()]);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    let err = coord.run_inference(&[tile(0.0)], None).unwrap_err();
    assert_eq!(err.invalid_state(), Some(&InvalidState::NoModelSelected));

    coord.select_model(0).unwrap();
    let before = conn.requests();
    let err = coord
        .run_inference(&[tile(0.0), tile(1.0)], None)
        .unwrap_err();
    assert!(matches!(
        err.invalid_state(),
        Some(InvalidState::InputCount {
            expected: 1,
            got: 2,
            ..
        })
    ));
    assert_eq!(conn.requests(), before);
}

#[test]
fn hang_up_disconnects_and_next_call_reconnects() {
    let mut conn = MockConnector::new(vec![echo_model()]);
    // Request 1 is the catalog, request 2 the first inference.
    conn.hang_up_at = Some(2);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    coord.select_model(0).unwrap();

    let err = coord.run_inference(&[tile(1.0)], None).unwrap_err();
    assert!(err.is_disconnect(), "got {err:?}");
    assert!(err.tears_down_session());
    assert_eq!(coord.state(), SessionState::Disconnected);
    assert!(coord.catalog().is_none());

    // Selection survives; the catalog is fetched again on the new connection.
    let out = coord.run_inference(&[tile(1.0)], None).unwrap();
    assert!(out.pixels().iter().all(|&v| v == 2.0));
    assert_eq!(conn.connects(), 2);
    assert_eq!(coord.catalog().map(|c| c.generation), Some(2));

    let s = coord.stats_snapshot();
    assert_eq!(s.teardowns, 1);
    assert_eq!(s.errors, 1);
}

#[test]
fn server_error_keeps_the_session() {
    let conn = MockConnector::new(vec![pair_model("pair")]);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    coord.select_model(0).unwrap();
    let err = coord
        .run_inference(&[tile(0.0), tile(0.0)], None)
        .unwrap_err();
    assert!(matches!(
        err.client(),
        Some(ClientError::Protocol(dlc_infer::ProtocolError::Server(_)))
    ));
    assert!(!err.tears_down_session());
    assert_eq!(coord.state(), SessionState::ConnectedWithCatalog);
    assert_eq!(conn.connects(), 1);
}

#[test]
fn connect_failure_is_reported() {
    let mut conn = MockConnector::new(vec![echo_model()]);
    conn.refuse = true;
    let coord = SessionCoordinator::new(conn, endpoint());
    let err = coord.list_models().unwrap_err();
    assert!(matches!(
        err.client(),
        Some(ClientError::Connect(ConnectError::Unreachable { .. }))
    ));
    assert_eq!(coord.state(), SessionState::Disconnected);
}

#[test]
fn endpoint_change_and_close_disconnect() {
    let conn = MockConnector::new(vec![echo_model()]);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    coord.list_models().unwrap();

    coord.set_endpoint(endpoint());
    assert_eq!(coord.state(), SessionState::ConnectedWithCatalog);

    let other = Endpoint::new("mock", 2).unwrap();
    coord.set_endpoint(other.clone());
    assert_eq!(coord.state(), SessionState::Disconnected);
    assert_eq!(coord.endpoint(), other);

    coord.ensure_ready(&other).unwrap();
    assert_eq!(conn.connects(), 2);
    coord.close();
    assert_eq!(coord.state(), SessionState::Disconnected);
    coord.close();
    assert_eq!(coord.stats_snapshot().teardowns, 2);
}

struct ConstSource(f32);

impl TileSource for ConstSource {
    fn input_tile(&mut self, _input: usize, region: &Region) -> Result<ImageTile, TileError> {
        ImageTile::filled(region.shape(1), self.0)
    }
}

#[derive(Default)]
struct RecordingSink {
    channels: u32,
    written: Vec<(Region, ImageTile)>,
}

impl TileSink for RecordingSink {
    fn expected_shape(&self, region: &Region) -> TileShape {
        region.shape(self.channels)
    }

    fn write_tile(&mut self, region: &Region, tile: &ImageTile) {
        self.written.push((*region, tile.clone()));
    }
}

#[test]
fn render_writes_sink_only_on_success() {
    let conn = MockConnector::new(vec![echo_model()]);
    let coord = SessionCoordinator::new(conn, endpoint());
    let region = Region::new(0, 0, 4, 2);

    let mut sink = RecordingSink {
        channels: 1,
        ..RecordingSink::default()
    };
    let err = coord
        .render(&region, &mut ConstSource(1.0), &mut sink)
        .unwrap_err();
    assert_eq!(err.invalid_state(), Some(&InvalidState::NoModelSelected));

    coord.select_model(0).unwrap();
    coord
        .render(&region, &mut ConstSource(1.0), &mut sink)
        .unwrap();
    assert_eq!(sink.written.len(), 1);
    assert_eq!(sink.written[0].1.shape(), TileShape::new(4, 2, 1));

    // A sink expecting three channels rejects the single-channel result.
    let mut rgb = RecordingSink {
        channels: 3,
        ..RecordingSink::default()
    };
    let err = coord
        .render(&region, &mut ConstSource(1.0), &mut rgb)
        .unwrap_err();
    assert!(matches!(
        err.client(),
        Some(ClientError::Protocol(
            dlc_infer::ProtocolError::ShapeMismatch { .. }
        ))
    ));
    assert!(rgb.written.is_empty());
}

#[test]
fn transport_error_is_not_retried() {
    let mut conn = MockConnector::new(vec![echo_model()]);
    conn.hang_up_at = Some(2);
    let coord = SessionCoordinator::new(conn.clone(), endpoint());
    coord.select_model(0).unwrap();
    let err = coord.run_inference(&[tile(1.0)], None).unwrap_err();
    assert!(matches!(
        err.client(),
        Some(ClientError::Transport(TransportError::Disconnected))
    ));
    // Exactly one inference request went out.
    assert_eq!(conn.requests(), 2);
    assert_eq!(conn.connects(), 1);
}
