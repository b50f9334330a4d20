//! Server loop and lifecycle
//!
//! The listening socket is owned by an explicit state machine:
//! `Stopped → Starting → Running → Stopping → Stopped`, every transition
//! taken under a mutex so a `stop` racing `serve` cannot corrupt the
//! lifecycle. The accept loop is fully synchronous: one connection is
//! handled start-to-finish before the next is accepted, which serializes
//! every store operation without further locking.
//!
//! A blocking accept cannot be interrupted from another thread, so
//! stopping connects to the server's own listening address and sends the
//! stop-now sentinel; the next accept receives that self-connection and
//! the loop exits. The public `stop` then waits on a bounded channel the
//! loop signals once it has transitioned to `Stopped` - no fixed sleeps.

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{info, warn};

use crate::error::{Result, ServiceError};
use crate::handler::{self, Outcome};
use crate::metrics::Metrics;
use crate::protocol::STOP_NOW_TOKEN;
use crate::store::RecordStore;
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// How long `stop` waits for the accept loop to acknowledge.
const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_file: PathBuf::from("data/records.csv"),
        }
    }
}

/// The record service server. Methods take `&self`; wrap in an `Arc` to
/// drive `serve` and `stop` from different threads.
pub struct DataServer {
    config: ServerConfig,
    store: RecordStore,
    metrics: Metrics,
    state: Mutex<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    stopped_tx: Sender<()>,
    stopped_rx: Receiver<()>,
}

impl DataServer {
    pub fn new(config: ServerConfig) -> Self {
        let store = RecordStore::new(config.data_file.clone());
        let (stopped_tx, stopped_rx) = bounded(1);
        Self {
            config,
            store,
            metrics: Metrics::new(),
            state: Mutex::new(ServerState::Stopped),
            local_addr: Mutex::new(None),
            stopped_tx,
            stopped_rx,
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    /// The bound address while the server is up, None otherwise.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Bind and run the accept loop until a stop is observed.
    ///
    /// Binding failure is fatal and propagates; there is no retry. Each
    /// accepted connection is handled synchronously and its outcome
    /// drives the loop: a graceful stop initiates the handshake and
    /// keeps accepting (draining any queued clients until the sentinel
    /// arrives), the stop-now sentinel closes the listener.
    pub fn serve(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ServerState::Stopped {
                return Err(ServiceError::AlreadyRunning);
            }
            *state = ServerState::Starting;
        }
        // discard a stale acknowledgment from a previous run
        while self.stopped_rx.try_recv().is_ok() {}

        let listener = match TcpListener::bind((self.config.host.as_str(), self.config.port)) {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.lock().unwrap() = ServerState::Stopped;
                return Err(e.into());
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                *self.state.lock().unwrap() = ServerState::Stopped;
                return Err(e.into());
            }
        };
        *self.local_addr.lock().unwrap() = Some(addr);

        {
            let mut state = self.state.lock().unwrap();
            if *state == ServerState::Stopping {
                // a stop raced startup; never start accepting
                drop(state);
                return self.finish();
            }
            *state = ServerState::Running;
        }
        info!(%addr, "server listening");

        loop {
            let (mut stream, peer) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            match handler::handle_connection(&mut stream, peer, &self.store, &self.metrics) {
                Outcome::Continue => {}
                Outcome::GracefulStop => self.initiate_stop(),
                Outcome::StopNow => break,
            }
        }

        drop(listener);
        self.finish()
    }

    /// Stop the server and wait until the accept loop has exited.
    ///
    /// Idempotent: stopping a stopped server is a no-op. Otherwise the
    /// stop handshake is initiated (at most once) and the call blocks on
    /// the loop's acknowledgment, bounded by a timeout.
    pub fn stop(&self) -> Result<()> {
        if *self.state.lock().unwrap() == ServerState::Stopped {
            return Ok(());
        }
        self.initiate_stop();
        match self.stopped_rx.recv_timeout(STOP_ACK_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(_) => {
                // the acknowledgment may have been consumed by a
                // concurrent stop; trust the state over the channel
                if *self.state.lock().unwrap() == ServerState::Stopped {
                    Ok(())
                } else {
                    Err(ServiceError::StopTimeout)
                }
            }
        }
    }

    /// Transition to `Stopping` and unblock the accept loop by sending
    /// the stop-now sentinel to our own listening address. Does nothing
    /// if a stop is already underway.
    fn initiate_stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ServerState::Running | ServerState::Starting => *state = ServerState::Stopping,
                ServerState::Stopping | ServerState::Stopped => return,
            }
        }
        let addr = *self.local_addr.lock().unwrap();
        let Some(addr) = addr else {
            // bind not finished yet; serve() observes Stopping and exits
            return;
        };
        info!("stopping server");
        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                if let Err(e) = stream.write_all(STOP_NOW_TOKEN.as_bytes()) {
                    warn!(error = %e, "failed to send stop sentinel");
                }
            }
            Err(e) => warn!(error = %e, "failed to dial stop handshake"),
        }
    }

    /// Final transition back to `Stopped`; releases anyone blocked in
    /// `stop` and logs a request summary.
    fn finish(&self) -> Result<()> {
        *self.local_addr.lock().unwrap() = None;
        *self.state.lock().unwrap() = ServerState::Stopped;
        let snapshot = self.metrics.snapshot();
        info!(
            requests = snapshot.request_count,
            posts = snapshot.post_count,
            gets = snapshot.get_count,
            invalid = snapshot.invalid_count,
            p50_ms = snapshot.latency_p50_ms,
            "server stopped"
        );
        let _ = self.stopped_tx.try_send(());
        Ok(())
    }
}
