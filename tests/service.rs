//! Integration tests: the full service over real TCP.
//!
//! Each test boots a server on an ephemeral port with a temp-dir table,
//! drives it from plain client sockets (one request per connection, as
//! the protocol requires), and shuts it down through the same command
//! surface a client would use.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;

use contactdb::{DataServer, ServerConfig, ServerState, ServiceError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct TestServer {
    _dir: TempDir,
    server: Arc<DataServer>,
    handle: thread::JoinHandle<()>,
    addr: SocketAddr,
}

fn start_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let server = Arc::new(DataServer::new(ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        data_file: dir.path().join("records.csv"),
    }));

    let handle = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.serve().unwrap())
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    let addr = loop {
        if let Some(addr) = server.local_addr() {
            break addr;
        }
        assert!(Instant::now() < deadline, "server did not start in time");
        thread::sleep(Duration::from_millis(5));
    };

    TestServer {
        _dir: dir,
        server,
        handle,
        addr,
    }
}

/// One request, one response: connect, send, read until the server
/// closes the connection.
fn send(addr: SocketAddr, payload: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(payload.as_bytes()).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

fn post(addr: SocketAddr, data: &str) -> String {
    send(
        addr,
        &serde_json::json!({"command": "post", "data": data}).to_string(),
    )
}

fn get(addr: SocketAddr, phones: &[&str]) -> String {
    send(
        addr,
        &serde_json::json!({"command": "get", "phone": phones}).to_string(),
    )
}

impl TestServer {
    fn shutdown(self) {
        self.server.stop().unwrap();
        self.handle.join().unwrap();
    }
}

// ---------------------------------------------------------------------------
// Tests: command round trips
// ---------------------------------------------------------------------------

#[test]
fn post_then_get_round_trip() {
    let ts = start_server();

    assert_eq!(post(ts.addr, "joao,joao@x.com,01234567891,30"), "Ok");

    let response = get(ts.addr, &["01234567891"]);
    let value: Value = serde_json::from_str(&response).unwrap();
    let data = value["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(
        data[0],
        serde_json::json!({
            "name": "joao",
            "email": "joao@x.com",
            "phone": "01234567891",
            "age": "30",
        })
    );

    ts.shutdown();
}

#[test]
fn get_multiple_phones_in_table_order() {
    let ts = start_server();

    assert_eq!(post(ts.addr, "joao,joao@x.com,01234567891,30"), "Ok");
    assert_eq!(post(ts.addr, "maria,maria@x.com,01234567892,31"), "Ok");
    assert_eq!(post(ts.addr, "jose,jose@x.com,01234567893,32"), "Ok");

    let response = get(ts.addr, &["01234567892", "01234567891"]);
    let value: Value = serde_json::from_str(&response).unwrap();
    let data = value["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["name"], "joao");
    assert_eq!(data[1]["name"], "maria");

    ts.shutdown();
}

#[test]
fn upsert_over_the_wire_updates_in_place() {
    let ts = start_server();

    assert_eq!(post(ts.addr, "joao,joao@x.com,01234567891,30"), "Ok");
    assert_eq!(post(ts.addr, "joao,joao@x.com,01234567891,31"), "Ok");

    let response = get(ts.addr, &["01234567891"]);
    let value: Value = serde_json::from_str(&response).unwrap();
    let data = value["data"].as_array().unwrap();
    assert_eq!(data.len(), 1, "second post must update, not append");
    assert_eq!(data[0]["age"], "31");

    ts.shutdown();
}

#[test]
fn get_with_no_matches_returns_empty_data() {
    let ts = start_server();

    let response = get(ts.addr, &["00000000000"]);
    let value: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(value["data"].as_array().unwrap().len(), 0);

    ts.shutdown();
}

// ---------------------------------------------------------------------------
// Tests: rejection paths
// ---------------------------------------------------------------------------

#[test]
fn invalid_post_data_is_rejected() {
    let ts = start_server();

    assert_eq!(post(ts.addr, "invalid,data"), "Error: Invalid data format");

    ts.shutdown();
}

#[test]
fn get_without_phone_is_rejected() {
    let ts = start_server();

    assert_eq!(
        send(ts.addr, r#"{"command": "get"}"#),
        "Error: Invalid data format"
    );

    ts.shutdown();
}

#[test]
fn malformed_json_is_rejected_not_fatal() {
    let ts = start_server();

    assert_eq!(send(ts.addr, r#"{"command":"#), "Error: Invalid data format");

    // the server must still be serving
    assert_eq!(post(ts.addr, "joao,joao@x.com,01234567891,30"), "Ok");

    ts.shutdown();
}

#[test]
fn unknown_command_is_invalid_call() {
    let ts = start_server();

    assert_eq!(
        send(ts.addr, r#"{"command": "delete", "data": "x"}"#),
        "Error: invalid call"
    );
    assert_eq!(send(ts.addr, r#"{"data": "x"}"#), "Error: invalid call");

    ts.shutdown();
}

// ---------------------------------------------------------------------------
// Tests: lifecycle
// ---------------------------------------------------------------------------

#[test]
fn shutdown_command_stops_the_server() {
    let ts = start_server();

    assert_eq!(send(ts.addr, "shutdown"), "Shutting down server");

    ts.handle.join().unwrap();
    assert_eq!(ts.server.state(), ServerState::Stopped);
    assert!(
        TcpStream::connect(ts.addr).is_err(),
        "server must not accept connections after shutdown"
    );
}

#[test]
fn external_stop_unblocks_accept() {
    let ts = start_server();

    ts.server.stop().unwrap();
    ts.handle.join().unwrap();
    assert_eq!(ts.server.state(), ServerState::Stopped);
}

#[test]
fn stop_is_idempotent() {
    let ts = start_server();

    ts.server.stop().unwrap();
    ts.handle.join().unwrap();

    // stopping again is a no-op
    ts.server.stop().unwrap();
    assert_eq!(ts.server.state(), ServerState::Stopped);
}

#[test]
fn second_serve_while_running_is_refused() {
    let ts = start_server();

    match ts.server.serve() {
        Err(ServiceError::AlreadyRunning) => {}
        other => panic!("expected AlreadyRunning, got {:?}", other),
    }

    ts.shutdown();
}

#[test]
fn records_survive_across_requests() {
    let ts = start_server();

    for i in 0..5 {
        let data = format!("user{i},user{i}@x.com,0123456789{i},2{i}");
        assert_eq!(post(ts.addr, &data), "Ok");
    }

    let response = get(ts.addr, &["01234567893"]);
    let value: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(value["data"][0]["email"], "user3@x.com");

    let snapshot = ts.server.metrics().snapshot();
    assert_eq!(snapshot.post_count, 5);
    assert_eq!(snapshot.get_count, 1);

    ts.shutdown();
}
