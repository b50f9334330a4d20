//! Per-connection request handling
//!
//! Turns one received buffer into at most one outbound response and
//! reports the lifecycle action the accept loop must take. Every path
//! is terminal for the connection; no error escapes to the loop.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::metrics::Metrics;
use crate::protocol::{
    parse_command, parse_record, Command, ParseError, Reply, REQUEST_BUFFER_SIZE, SHUTDOWN_TOKEN,
    STOP_NOW_TOKEN,
};
use crate::store::RecordStore;

/// What the accept loop must do after this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep accepting.
    Continue,
    /// A client asked for a graceful stop; initiate the stop handshake.
    GracefulStop,
    /// The stop-now sentinel arrived; close the listener and stop.
    StopNow,
}

/// Handle one accepted connection: read, dispatch, answer, close.
///
/// Exactly one response is written per request, except for the stop-now
/// sentinel, which is the server's own control message and gets none.
pub fn handle_connection(
    stream: &mut TcpStream,
    peer: SocketAddr,
    store: &RecordStore,
    metrics: &Metrics,
) -> Outcome {
    let mut buf = [0u8; REQUEST_BUFFER_SIZE];
    let len = match stream.read(&mut buf) {
        Ok(len) => len,
        Err(e) => {
            warn!(%peer, error = %e, "failed to read request");
            return Outcome::Continue;
        }
    };

    let text = match std::str::from_utf8(&buf[..len]) {
        Ok(text) => text.trim(),
        Err(_) => {
            respond(stream, peer, &Reply::InvalidData);
            return Outcome::Continue;
        }
    };

    if text == STOP_NOW_TOKEN {
        return Outcome::StopNow;
    }

    info!(%peer, "connection");

    if text == SHUTDOWN_TOKEN {
        respond(stream, peer, &Reply::ShuttingDown);
        metrics.record("Shutdown", 0);
        return Outcome::GracefulStop;
    }

    let start = Instant::now();
    let (operation, reply) = match parse_command(text) {
        Ok(Command::Post { data }) => ("Post", post(store, &data)),
        Ok(Command::Get { phone }) => ("Get", get(store, &phone)),
        Err(ParseError::Malformed) => ("Invalid", Reply::InvalidData),
        Err(ParseError::UnknownCommand) => ("Invalid", Reply::InvalidCall),
    };
    respond(stream, peer, &reply);
    metrics.record(operation, start.elapsed().as_millis() as u64);
    Outcome::Continue
}

/// Dispatch a `post`: validate, then upsert. Storage failures are
/// answered with the generic invalid-call error so one bad request can
/// never take the loop down.
fn post(store: &RecordStore, data: &str) -> Reply {
    match parse_record(data) {
        Some(record) => match store.upsert(&record) {
            Ok(()) => Reply::Ok,
            Err(e) => {
                error!(error = %e, "upsert failed");
                Reply::InvalidCall
            }
        },
        None => Reply::InvalidData,
    }
}

/// Dispatch a `get`: scan by phone set.
fn get(store: &RecordStore, phones: &[String]) -> Reply {
    match store.search(phones) {
        Ok(records) => Reply::Records(records),
        Err(e) => {
            error!(error = %e, "search failed");
            Reply::InvalidCall
        }
    }
}

fn respond(stream: &mut TcpStream, peer: SocketAddr, reply: &Reply) {
    if let Err(e) = stream.write_all(&reply.to_bytes()) {
        warn!(%peer, error = %e, "failed to write response");
    }
}
