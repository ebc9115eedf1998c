//! Session Coordinator: one shared session per host.
//!
//! State lives behind two locks taken in a fixed order, `inner` then
//! `options`. `inner` owns the socket and is held for a whole
//! request/response round trip, so concurrent callers never interleave
//! frames on the wire. `stats` and `events` are leaf locks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use dlc_core::{
    Catalog, Config, Endpoint, ImageTile, InferenceResult, ModelDescriptor, OptionKind,
    OptionStore, OptionValue, TileShape, UnknownOption,
};
use dlc_infer::frame::MAX_FRAME_LEN;
use dlc_infer::inference::validate;
use dlc_infer::{
    fetch_catalog, run_inference, ClientError, Connector, ExchangeKind, ExchangeStats,
    ExchangeStatsSnapshot, InferenceCall, InvalidState, TcpConnector, TransportError,
    TransportSession,
};
use dlc_logging::{NdjsonWriter, SessionEventV1};

use crate::error::SessionError;
use crate::host::{Region, TileSink, TileSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    ConnectedNoCatalog,
    ConnectedWithCatalog,
}

struct SessionInner<S> {
    endpoint: Endpoint,
    transport: Option<TransportSession<S>>,
    catalog: Option<Arc<Catalog>>,
    selected: Option<usize>,
    /// Stamped on every fetched catalog.
    generation: u64,
}

impl<S> SessionInner<S> {
    fn state(&self) -> SessionState {
        match (&self.transport, &self.catalog) {
            (None, _) => SessionState::Disconnected,
            (Some(_), None) => SessionState::ConnectedNoCatalog,
            (Some(_), Some(_)) => SessionState::ConnectedWithCatalog,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SessionCoordinator<C: Connector = TcpConnector> {
    connector: C,
    max_frame_len: u32,
    inner: Mutex<SessionInner<C::Stream>>,
    options: Mutex<OptionStore>,
    stats: Mutex<ExchangeStats>,
    events: Option<Mutex<NdjsonWriter>>,
}

impl SessionCoordinator<TcpConnector> {
    /// TCP coordinator for the configured endpoint, with the event log
    /// opened if `logging.events_path` is set.
    pub fn from_config(config: &Config) -> Result<Self, SessionError> {
        let endpoint = config.endpoint()?;
        let mut coord = Self::new(TcpConnector::from_config(&config.server), endpoint)
            .with_max_frame_len(config.server.max_frame_len);
        if let Some(path) = &config.logging.events_path {
            let w = NdjsonWriter::open_append_with_flush(path, config.logging.flush_every_lines)?;
            coord = coord.with_event_log(w);
        }
        Ok(coord)
    }
}

impl<C: Connector> SessionCoordinator<C> {
    /// Starts `Disconnected`; nothing touches the network until first use.
    pub fn new(connector: C, endpoint: Endpoint) -> Self {
        Self {
            connector,
            max_frame_len: MAX_FRAME_LEN,
            inner: Mutex::new(SessionInner {
                endpoint,
                transport: None,
                catalog: None,
                selected: None,
                generation: 0,
            }),
            options: Mutex::new(OptionStore::new()),
            stats: Mutex::new(ExchangeStats::default()),
            events: None,
        }
    }

    pub fn with_max_frame_len(mut self, max: u32) -> Self {
        self.max_frame_len = max;
        self
    }

    pub fn with_event_log(mut self, writer: NdjsonWriter) -> Self {
        self.events = Some(Mutex::new(writer));
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        lock(&self.inner).endpoint.clone()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state()
    }

    /// Switch to another server. A different endpoint drops the session and
    /// its catalog; the selection and option values stay until the next
    /// `select_model`.
    pub fn set_endpoint(&self, endpoint: Endpoint) {
        let mut inner = lock(&self.inner);
        self.switch_endpoint(&mut inner, &endpoint);
    }

    /// Connect and fetch the catalog unless already ready for `endpoint`.
    pub fn ensure_ready(&self, endpoint: &Endpoint) -> Result<Arc<Catalog>, SessionError> {
        let mut inner = lock(&self.inner);
        self.switch_endpoint(&mut inner, endpoint);
        self.ready_locked(&mut inner)
    }

    /// The catalog of the configured endpoint, reconnecting if needed.
    pub fn list_models(&self) -> Result<Arc<Catalog>, SessionError> {
        let mut inner = lock(&self.inner);
        self.ready_locked(&mut inner)
    }

    /// The cached catalog, without touching the network.
    pub fn catalog(&self) -> Option<Arc<Catalog>> {
        lock(&self.inner).catalog.clone()
    }

    /// Discard the cached catalog and fetch a new one.
    pub fn refresh_catalog(&self) -> Result<Arc<Catalog>, SessionError> {
        let mut inner = lock(&self.inner);
        inner.catalog = None;
        self.ready_locked(&mut inner)
    }

    /// Select the model at `index` and reset the options to its defaults.
    pub fn select_model(&self, index: usize) -> Result<ModelDescriptor, SessionError> {
        let mut inner = lock(&self.inner);
        let catalog = self.ready_locked(&mut inner)?;
        let model = catalog.get(index).ok_or(InvalidState::StaleModelIndex {
            index,
            catalog_len: catalog.len(),
        })?;
        inner.selected = Some(index);
        let mut options = lock(&self.options);
        options.reset_for_model(model);
        info!(
            model = %model.name,
            index,
            schema_generation = options.schema_generation(),
            "model selected"
        );
        Ok(model.clone())
    }

    pub fn selected_model(&self) -> Option<usize> {
        lock(&self.inner).selected
    }

    /// Set an option of the selected model. Unknown names are logged and
    /// ignored; the return value says whether the value was stored.
    pub fn set_option(&self, name: &str, value: OptionValue) -> bool {
        match lock(&self.options).set(name, value) {
            Ok(()) => true,
            Err(UnknownOption { kind, name }) => {
                warn!(%kind, %name, "ignoring unknown option");
                false
            }
        }
    }

    pub fn get_option(&self, kind: OptionKind, name: &str) -> Result<OptionValue, UnknownOption> {
        lock(&self.options).get(kind, name)
    }

    /// `(kind, name)` of every option of the selected model.
    pub fn option_fields(&self) -> Vec<(OptionKind, String)> {
        lock(&self.options).fields()
    }

    pub fn option_kind(&self, name: &str) -> Option<OptionKind> {
        lock(&self.options).kind_of(name)
    }

    /// Increases whenever the option schema was replaced.
    pub fn schema_generation(&self) -> u64 {
        lock(&self.options).schema_generation()
    }

    /// Run the selected model on `inputs`.
    ///
    /// Blocks for the whole exchange. A transport-level failure leaves the
    /// coordinator `Disconnected` and is returned as is; the next call
    /// reconnects.
    pub fn run_inference(
        &self,
        inputs: &[ImageTile],
        expected_output: Option<TileShape>,
    ) -> Result<InferenceResult, SessionError> {
        let mut inner = lock(&self.inner);
        let catalog = self.ready_locked(&mut inner)?;
        let (options, options_model) = {
            let store = lock(&self.options);
            (store.snapshot(), store.model().cloned())
        };
        let call = InferenceCall {
            catalog: &catalog,
            model_index: inner.selected,
            options_model: options_model.as_ref(),
            options: &options,
            inputs,
            expected_output,
        };
        let model = validate(&call)?.name.clone();

        let endpoint = inner.endpoint.to_string();
        let transport = inner
            .transport
            .as_mut()
            .ok_or(ClientError::Transport(TransportError::Disconnected))?;
        lock(&self.stats).on_sent();
        match run_inference(transport, &call) {
            Ok((out, dt)) => {
                lock(&self.stats).on_received(ExchangeKind::Inference, dt);
                debug!(%model, output = %out.shape(), latency_us = dt.as_micros() as u64, "inference done");
                self.emit(SessionEventV1::inference(
                    endpoint,
                    model,
                    inputs.len(),
                    Ok((out.shape().to_string(), dt.as_micros() as u64)),
                ));
                Ok(out)
            }
            Err(e) => {
                lock(&self.stats).on_error();
                self.emit(SessionEventV1::inference(
                    endpoint,
                    model,
                    inputs.len(),
                    Err(e.to_string()),
                ));
                if e.tears_down_session() {
                    self.teardown(&mut inner, &e.to_string());
                }
                Err(e.into())
            }
        }
    }

    /// Fill `sink` for `region` from the selected model.
    ///
    /// The sink is only written when the whole exchange succeeded with a tile
    /// of the expected shape.
    pub fn render<Src, Snk>(
        &self,
        region: &Region,
        source: &mut Src,
        sink: &mut Snk,
    ) -> Result<(), SessionError>
    where
        Src: TileSource + ?Sized,
        Snk: TileSink + ?Sized,
    {
        let num_inputs = {
            let catalog = self.list_models()?;
            let index = self
                .selected_model()
                .ok_or(InvalidState::NoModelSelected)?;
            catalog
                .get(index)
                .ok_or(InvalidState::StaleModelIndex {
                    index,
                    catalog_len: catalog.len(),
                })?
                .num_inputs()
        };
        let inputs = (0..num_inputs)
            .map(|i| source.input_tile(i, region))
            .collect::<Result<Vec<_>, _>>()?;
        let expected = sink.expected_shape(region);
        let out = self.run_inference(&inputs, Some(expected))?;
        sink.write_tile(region, &out);
        Ok(())
    }

    /// Drop the session. The next call reconnects.
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        self.teardown(&mut inner, "closed");
    }

    pub fn stats_snapshot(&self) -> ExchangeStatsSnapshot {
        lock(&self.stats).snapshot()
    }

    fn switch_endpoint(&self, inner: &mut SessionInner<C::Stream>, endpoint: &Endpoint) {
        if inner.endpoint != *endpoint {
            info!(from = %inner.endpoint, to = %endpoint, "endpoint changed");
            self.teardown(inner, "endpoint changed");
            inner.endpoint = endpoint.clone();
        }
    }

    fn ready_locked(
        &self,
        inner: &mut SessionInner<C::Stream>,
    ) -> Result<Arc<Catalog>, SessionError> {
        if inner.transport.is_none() {
            let endpoint = inner.endpoint.clone();
            match TransportSession::connect(&self.connector, endpoint.clone()) {
                Ok(t) => {
                    info!(%endpoint, "connected");
                    lock(&self.stats).on_connect();
                    self.emit(SessionEventV1::connect(endpoint.to_string(), None));
                    inner.transport = Some(t.with_max_frame_len(self.max_frame_len));
                    inner.catalog = None;
                }
                Err(e) => {
                    warn!(%endpoint, error = %e, "connect failed");
                    lock(&self.stats).on_error();
                    self.emit(SessionEventV1::connect(
                        endpoint.to_string(),
                        Some(e.to_string()),
                    ));
                    return Err(e.into());
                }
            }
        }
        if let Some(catalog) = &inner.catalog {
            return Ok(Arc::clone(catalog));
        }

        let generation = inner.generation + 1;
        let transport = inner
            .transport
            .as_mut()
            .ok_or(ClientError::Transport(TransportError::Disconnected))?;
        lock(&self.stats).on_sent();
        match fetch_catalog(transport, generation) {
            Ok((catalog, dt)) => {
                {
                    let mut stats = lock(&self.stats);
                    stats.on_received(ExchangeKind::Catalog, dt);
                    stats.on_catalog();
                }
                self.emit(SessionEventV1::catalog(
                    inner.endpoint.to_string(),
                    generation,
                    catalog.len(),
                ));
                inner.generation = generation;
                self.rebind_options(inner.selected, &catalog);
                let catalog = Arc::new(catalog);
                inner.catalog = Some(Arc::clone(&catalog));
                Ok(catalog)
            }
            Err(e) => {
                lock(&self.stats).on_error();
                if e.tears_down_session() {
                    self.teardown(inner, &e.to_string());
                }
                Err(e.into())
            }
        }
    }

    /// The selected model came back under the same name with another option
    /// schema: start over from the new defaults. A different model at the
    /// index is left for `validate` to reject.
    fn rebind_options(&self, selected: Option<usize>, catalog: &Catalog) {
        let Some(model) = selected.and_then(|i| catalog.get(i)) else {
            return;
        };
        let mut options = lock(&self.options);
        if options.model_name() == Some(model.name.as_str()) && !options.is_bound_to(model) {
            options.reset_for_model(model);
            info!(
                model = %model.name,
                schema_generation = options.schema_generation(),
                "option schema changed, options reset to defaults"
            );
        }
    }

    fn teardown(&self, inner: &mut SessionInner<C::Stream>, reason: &str) {
        let had_catalog = inner.catalog.take().is_some();
        if let Some(mut t) = inner.transport.take() {
            t.close();
            warn!(endpoint = %inner.endpoint, reason, "session torn down");
            lock(&self.stats).on_teardown();
            self.emit(SessionEventV1::teardown(inner.endpoint.to_string(), reason));
        } else if had_catalog {
            debug!(endpoint = %inner.endpoint, "cached catalog dropped");
        }
    }

    fn emit(&self, event: SessionEventV1) {
        if let Some(events) = &self.events {
            if let Err(e) = lock(events).write_event(&event) {
                warn!(error = %e, "event log write failed");
            }
        }
    }
}
