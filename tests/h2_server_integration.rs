//! HTTP/2 server integration tests
//!
//! These run `H2Server` on a loopback socket and talk to it with the raw
//! frame client over a plain `TcpStream`.

mod common;

use common::{init_tracing, Client, Received};
use h2channel::http::h2::error::{Error, ErrorCode};
use h2channel::http::h2::settings::{Settings, SettingsBuilder};
use h2channel::http::h2::{ConnectionConfig, H2Server};
use h2channel::http::{HttpRequest, HttpResponse, Status};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn echo(request: &HttpRequest) -> HttpResponse {
    HttpResponse::builder()
        .status(Status::OK)
        .header("x-method", request.method().as_str())
        .body(format!("{} {}", request.path(), request.body().len()).into_bytes())
        .build()
}

/// Serve one connection on a background thread
fn spawn_server(config: ConnectionConfig) -> (std::net::SocketAddr, JoinHandle<Result<(), Error>>) {
    init_tracing();
    let server = H2Server::bind("127.0.0.1:0", config).unwrap();
    let addr = server.local_addr().unwrap();
    let handle = thread::spawn(move || server.serve_connection(Arc::new(echo)));
    (addr, handle)
}

fn dial(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

/// Read frames until `done` holds for what has arrived, or the server closes
fn read_until(stream: &mut TcpStream, client: &mut Client, done: impl Fn(&[Received]) -> bool) -> Vec<Received> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    while !done(&received) {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend(client.read(&buf[..n])),
        }
    }
    received
}

fn stream_finished(stream_id: u32) -> impl Fn(&[Received]) -> bool {
    move |received: &[Received]| {
        received.iter().any(|r| match r {
            Received::Data {
                stream_id: id,
                end_stream,
                ..
            } => *id == stream_id && *end_stream,
            Received::Headers {
                stream_id: id,
                end_stream,
                ..
            } => *id == stream_id && *end_stream,
            _ => false,
        })
    }
}

fn body(received: &[Received], stream_id: u32) -> Vec<u8> {
    received
        .iter()
        .filter_map(|r| match r {
            Received::Data { stream_id: id, data, .. } if *id == stream_id => Some(data.to_vec()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn test_server_binds_ephemeral_port() {
    let config = ConnectionConfig::builder()
        .idle_timeout(Some(Duration::from_secs(30)))
        .max_concurrent_streams(10)
        .build()
        .unwrap();
    let server = H2Server::builder().config(config.clone()).backlog(16).bind("127.0.0.1:0").unwrap();

    let addr = server.local_addr().unwrap();
    assert!(addr.ip().is_loopback());
    assert_ne!(addr.port(), 0);
    assert_eq!(server.config(), &config);
}

#[test]
fn test_bind_rejects_invalid_settings() {
    let config = ConnectionConfig {
        settings: Settings {
            max_frame_size: Some(1000),
            ..Settings::server_defaults()
        },
        ..ConnectionConfig::default()
    };

    let result = H2Server::builder().config(config).bind("127.0.0.1:0");
    assert!(matches!(result, Err(Error::InvalidSettings(_))));
}

#[test]
fn test_request_over_tcp() {
    let (addr, server) = spawn_server(ConnectionConfig::default());
    let mut stream = dial(addr);
    let mut client = Client::new();

    let mut out = client.preface(Settings::new());
    out.extend_from_slice(&client.request(1, "POST", "/echo", &[("content-length", "5")], false));
    out.extend_from_slice(&Client::data(1, b"hello", true));
    stream.write_all(&out).unwrap();

    let received = read_until(&mut stream, &mut client, stream_finished(1));
    assert!(received.contains(&Received::Settings { ack: false }));
    assert!(received.contains(&Received::Settings { ack: true }));

    let headers = received
        .iter()
        .find(|r| matches!(r, Received::Headers { stream_id: 1, .. }))
        .unwrap();
    assert_eq!(headers.status(), Some("200"));
    if let Received::Headers { fields, .. } = headers {
        assert!(fields.contains(&("x-method".to_string(), "POST".to_string())));
    }
    assert_eq!(body(&received, 1), b"/echo 5");

    stream.write_all(&Client::goaway(0, ErrorCode::NoError)).unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn test_multiplexed_requests_over_tcp() {
    let (addr, server) = spawn_server(ConnectionConfig::default());
    let mut stream = dial(addr);
    let mut client = Client::new();

    let mut out = client.preface(Settings::new());
    for id in [1, 3, 5] {
        out.extend_from_slice(&client.request(id, "GET", &format!("/r{}", id), &[], true));
    }
    stream.write_all(&out).unwrap();

    let received = read_until(&mut stream, &mut client, |received| {
        [1, 3, 5].iter().all(|id| stream_finished(*id)(received))
    });
    assert_eq!(body(&received, 1), b"/r1 0");
    assert_eq!(body(&received, 3), b"/r3 0");
    assert_eq!(body(&received, 5), b"/r5 0");

    drop(stream);
    server.join().unwrap().unwrap();
}

#[test]
fn test_protocol_error_closes_socket() {
    let (addr, server) = spawn_server(ConnectionConfig::default());
    let mut stream = dial(addr);
    let mut client = Client::new();

    let mut out = client.preface(Settings::new());
    out.extend_from_slice(&Client::data(0, b"oops", false));
    stream.write_all(&out).unwrap();

    // read to EOF: the server closes right after its GOAWAY
    let received = read_until(&mut stream, &mut client, |_| false);
    assert_eq!(
        received.last(),
        Some(&Received::GoAway {
            last_stream_id: 0,
            error_code: ErrorCode::ProtocolError,
        })
    );
    server.join().unwrap().unwrap();
}

#[test]
fn test_peer_disconnect_ends_session() {
    let (addr, server) = spawn_server(ConnectionConfig::default());
    let mut stream = dial(addr);
    let mut client = Client::new();

    stream.write_all(&client.preface(Settings::new())).unwrap();
    read_until(&mut stream, &mut client, |received| {
        received.contains(&Received::Settings { ack: true })
    });
    drop(stream);

    server.join().unwrap().unwrap();
}

#[test]
fn test_unread_output_aborts_instead_of_blocking() {
    let (addr, server) = spawn_server(ConnectionConfig::default());
    let mut stream = dial(addr);
    stream.set_write_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut client = Client::new();
    stream.write_all(&client.preface(Settings::new())).unwrap();

    // every PING gets an ACK and none of the ACKs are read
    let batch: Vec<u8> = (0..4096u32)
        .flat_map(|i| Client::ping(i.to_be_bytes().repeat(2).try_into().unwrap()).to_vec())
        .collect();
    let deadline = Instant::now() + Duration::from_secs(20);
    while !server.is_finished() && Instant::now() < deadline {
        if stream.write_all(&batch).is_err() {
            break;
        }
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while !server.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(server.is_finished(), "server blocked on a peer that never reads");
    server.join().unwrap().unwrap();
}

#[test]
fn test_slow_reader_gets_whole_response() {
    const LARGE: usize = 8 * 1024 * 1024;
    const WINDOW: u32 = 1 << 30;

    init_tracing();
    let server = H2Server::bind("127.0.0.1:0", ConnectionConfig::default()).unwrap();
    let addr = server.local_addr().unwrap();
    let large = |_: &HttpRequest| HttpResponse::builder().body(vec![b'z'; LARGE]).build();
    let handle = thread::spawn(move || server.serve_connection(Arc::new(large)));

    let mut stream = dial(addr);
    let mut client = Client::new();
    let settings = SettingsBuilder::new().initial_window_size(WINDOW).build().unwrap();
    let mut out = client.preface(settings);
    out.extend_from_slice(&Client::window_update(0, WINDOW));
    out.extend_from_slice(&client.request(1, "GET", "/large", &[], true));
    stream.write_all(&out).unwrap();

    // let the server fill the socket and pause before anything is read
    thread::sleep(Duration::from_millis(300));
    let received = read_until(&mut stream, &mut client, stream_finished(1));
    assert_eq!(body(&received, 1).len(), LARGE);

    stream.write_all(&Client::goaway(0, ErrorCode::NoError)).unwrap();
    handle.join().unwrap().unwrap();
}
