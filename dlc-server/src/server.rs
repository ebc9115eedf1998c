//! Blocking TCP server: one thread per connection, one request at a time.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info, warn};

use dlc_core::ModelDescriptor;
use dlc_infer::codec::{
    decode_request, encode_error_response, encode_inference_response, encode_info_response,
};
use dlc_infer::frame::{read_frame, write_frame, FrameError};
use dlc_infer::protocol::{InferenceRequest, Request};

use crate::models::{builtin_models, ModelHandler};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("server io: {0}")]
    Io(#[from] io::Error),
}

struct Registry {
    handlers: Vec<Box<dyn ModelHandler>>,
    descriptors: Vec<ModelDescriptor>,
}

impl Registry {
    fn new(handlers: Vec<Box<dyn ModelHandler>>) -> Self {
        let descriptors = handlers.iter().map(|h| h.descriptor()).collect();
        Self {
            handlers,
            descriptors,
        }
    }

    fn respond(&self, payload: &[u8]) -> Vec<u8> {
        match decode_request(payload) {
            Ok(Request::Info) => encode_info_response(&self.descriptors),
            Ok(Request::Inference(req)) => match self.infer(&req) {
                Ok(outputs) => encode_inference_response(&outputs),
                Err(msg) => {
                    debug!(model = %req.model, error = %msg, "inference rejected");
                    encode_error_response(&msg)
                }
            },
            Err(e) => encode_error_response(&format!("bad request: {e}")),
        }
    }

    fn infer(&self, req: &InferenceRequest) -> Result<Vec<dlc_core::ImageTile>, String> {
        let i = self
            .descriptors
            .iter()
            .position(|d| d.name == req.model)
            .ok_or_else(|| format!("unknown model {:?}", req.model))?;
        let expected = self.descriptors[i].num_inputs();
        if req.inputs.len() != expected {
            return Err(format!(
                "model {:?} takes {expected} inputs, got {}",
                req.model,
                req.inputs.len()
            ));
        }
        self.handlers[i].run(&req.options, &req.inputs)
    }
}

/// Reference inference server.
pub struct DemoServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    shutdown: Arc<AtomicBool>,
}

impl DemoServer {
    /// Bind with the built-in models.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self, ServerError> {
        Self::bind_with_models(addr, builtin_models())
    }

    pub fn bind_with_models(
        addr: impl ToSocketAddrs + std::fmt::Display,
        models: Vec<Box<dyn ModelHandler>>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new(models)),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.registry.descriptors
    }

    /// Accept connections until shut down. Blocks the calling thread.
    pub fn serve(&self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, models = self.models().len(), "serving");
        for conn in self.listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let sock = match conn {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let registry = Arc::clone(&self.registry);
            thread::spawn(move || handle_conn(sock, &registry));
        }
        Ok(())
    }

    /// Serve on a background thread.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let addr = self.local_addr()?;
        let shutdown = Arc::clone(&self.shutdown);
        let join = thread::spawn(move || {
            if let Err(e) = self.serve() {
                warn!(error = %e, "server stopped");
            }
        });
        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

/// A server running on a background thread. Stops on drop.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting. Connections already being served finish on their own.
    pub fn shutdown(&mut self) {
        if let Some(join) = self.join.take() {
            self.shutdown.store(true, Ordering::SeqCst);
            // Wake the blocking accept.
            let _ = TcpStream::connect(self.addr);
            let _ = join.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn handle_conn(mut sock: TcpStream, registry: &Registry) {
    let peer = sock.peer_addr().ok();
    debug!(?peer, "connection accepted");
    loop {
        let payload = match read_frame(&mut sock) {
            Ok(p) => p,
            Err(FrameError::Closed) => break,
            Err(e) => {
                debug!(?peer, error = %e, "read failed");
                break;
            }
        };
        let resp = registry.respond(&payload);
        if let Err(e) = write_frame(&mut sock, &resp) {
            debug!(?peer, error = %e, "write failed");
            break;
        }
    }
    debug!(?peer, "connection closed");
}
