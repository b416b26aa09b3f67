//! Raw HTTP/2 client and recording consumers shared by the integration tests

#![allow(dead_code)]

use bytes::Bytes;
use h2channel::http::h2::codec::FrameCodec;
use h2channel::http::h2::error::{Error, ErrorCode};
use h2channel::http::h2::frames::*;
use h2channel::http::h2::settings::Settings;
use h2channel::http::h2::{
    BufferedTransport, ConnectionConfig, H2Connection, RequestConsumer, RequestFactory, StreamId, StreamIo,
    CONNECTION_PREFACE,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Route library logs to the test output; filter with RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A frame the client decoded from server output
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Headers {
        stream_id: StreamId,
        fields: Vec<(String, String)>,
        end_stream: bool,
    },
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    Reset {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    Other(FrameType),
}

impl Received {
    pub fn status(&self) -> Option<&str> {
        match self {
            Received::Headers { fields, .. } => fields
                .iter()
                .find(|(name, _)| name == ":status")
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }
}

/// Minimal HTTP/2 client speaking raw frames
pub struct Client {
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    codec: FrameCodec,
    pending_headers: Option<(StreamId, Vec<u8>, bool)>,
}

impl Client {
    pub fn new() -> Self {
        Client {
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            codec: FrameCodec::new(),
            pending_headers: None,
        }
    }

    /// Connection preface followed by our SETTINGS
    pub fn preface(&self, settings: Settings) -> Vec<u8> {
        let mut out = CONNECTION_PREFACE.to_vec();
        out.extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(settings)));
        out
    }

    pub fn request(
        &mut self,
        stream_id: StreamId,
        method: &str,
        path: &str,
        extra: &[(&str, &str)],
        end_stream: bool,
    ) -> Bytes {
        self.request_with_priority(stream_id, method, path, extra, end_stream, None)
    }

    pub fn request_with_priority(
        &mut self,
        stream_id: StreamId,
        method: &str,
        path: &str,
        extra: &[(&str, &str)],
        end_stream: bool,
        priority: Option<PrioritySpec>,
    ) -> Bytes {
        let mut fields: Vec<(&[u8], &[u8])> = vec![
            (&b":method"[..], method.as_bytes()),
            (&b":scheme"[..], &b"http"[..]),
            (&b":path"[..], path.as_bytes()),
            (&b":authority"[..], &b"example.com"[..]),
        ];
        fields.extend(extra.iter().map(|(name, value)| (name.as_bytes(), value.as_bytes())));
        let block = Bytes::from(self.encoder.encode(fields));

        let mut frame = HeadersFrame::new(stream_id, block, end_stream, true);
        if let Some(priority) = priority {
            frame = frame.with_priority(priority);
        }
        FrameCodec::encode_headers_frame(&frame)
    }

    pub fn data(stream_id: StreamId, data: &[u8], end_stream: bool) -> Bytes {
        FrameCodec::encode_data_frame(&DataFrame::new(stream_id, Bytes::copy_from_slice(data), end_stream))
    }

    pub fn window_update(stream_id: StreamId, increment: u32) -> Bytes {
        FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(stream_id, increment))
    }

    pub fn reset(stream_id: StreamId, error_code: ErrorCode) -> Bytes {
        FrameCodec::encode_rst_stream_frame(&RstStreamFrame { stream_id, error_code })
    }

    pub fn priority(stream_id: StreamId, depends_on: StreamId, exclusive: bool, weight: u8) -> Bytes {
        FrameCodec::encode_priority_frame(&PriorityFrame {
            stream_id,
            priority: PrioritySpec::new(depends_on, exclusive, weight),
        })
    }

    pub fn ping(data: [u8; 8]) -> Bytes {
        FrameCodec::encode_ping_frame(&PingFrame::new(data))
    }

    pub fn goaway(last_stream_id: StreamId, error_code: ErrorCode) -> Bytes {
        FrameCodec::encode_goaway_frame(&GoawayFrame::new(last_stream_id, error_code, Bytes::new()))
    }

    /// Decode whatever complete frames `bytes` finishes
    pub fn read(&mut self, bytes: &[u8]) -> Vec<Received> {
        self.codec.feed(bytes);
        let mut received = Vec::new();
        while let Some(frame) = self.codec.next_frame(16_777_215).unwrap() {
            if let Some(item) = self.decode(frame) {
                received.push(item);
            }
        }
        received
    }

    fn decode(&mut self, frame: Frame) -> Option<Received> {
        let item = match frame.frame_type {
            FrameType::Headers => {
                let headers = FrameCodec::decode_headers(&frame).unwrap();
                let pending = (headers.stream_id, headers.header_block.to_vec(), headers.end_stream);
                if !headers.end_headers {
                    self.pending_headers = Some(pending);
                    return None;
                }
                self.finish_headers(pending)
            }
            FrameType::Continuation => {
                let continuation = FrameCodec::decode_continuation(&frame).unwrap();
                let mut pending = self.pending_headers.take().expect("CONTINUATION without HEADERS");
                pending.1.extend_from_slice(&continuation.header_block);
                if !continuation.end_headers {
                    self.pending_headers = Some(pending);
                    return None;
                }
                self.finish_headers(pending)
            }
            FrameType::Data => {
                let data = FrameCodec::decode_data(&frame).unwrap();
                Received::Data {
                    stream_id: data.stream_id,
                    data: data.data,
                    end_stream: data.end_stream,
                }
            }
            FrameType::RstStream => {
                let rst = FrameCodec::decode_rst_stream(&frame).unwrap();
                Received::Reset {
                    stream_id: rst.stream_id,
                    error_code: rst.error_code,
                }
            }
            FrameType::Settings => Received::Settings {
                ack: frame.flags.is_ack(),
            },
            FrameType::WindowUpdate => {
                let update = FrameCodec::decode_window_update(&frame).unwrap();
                Received::WindowUpdate {
                    stream_id: update.stream_id,
                    increment: update.size_increment,
                }
            }
            FrameType::Goaway => {
                let goaway = FrameCodec::decode_goaway(&frame).unwrap();
                Received::GoAway {
                    last_stream_id: goaway.last_stream_id,
                    error_code: goaway.error_code,
                }
            }
            FrameType::Ping => {
                let ping = FrameCodec::decode_ping(&frame).unwrap();
                Received::Ping {
                    ack: ping.ack,
                    data: ping.data,
                }
            }
            other => Received::Other(other),
        };
        Some(item)
    }

    fn finish_headers(&mut self, (stream_id, block, end_stream): (StreamId, Vec<u8>, bool)) -> Received {
        let fields = self
            .decoder
            .decode(&block)
            .unwrap()
            .into_iter()
            .map(|(name, value)| (String::from_utf8(name).unwrap(), String::from_utf8(value).unwrap()))
            .collect();
        Received::Headers {
            stream_id,
            fields,
            end_stream,
        }
    }
}

/// Everything a recording consumer saw for one stream
#[derive(Debug, Default, Clone)]
pub struct StreamLog {
    pub headers: Vec<(String, String)>,
    pub length: Option<Option<u64>>,
    pub chunks: Vec<Bytes>,
    pub requests: Vec<(String, String, String)>,
    pub lost: Vec<String>,
}

impl StreamLog {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Vec<u8> {
        self.chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }
}

pub type Logs = Rc<RefCell<HashMap<StreamId, StreamLog>>>;

pub type RequestHook = Rc<dyn Fn(&mut StreamIo<'_>)>;
pub type ChunkHook = Rc<dyn Fn(&mut StreamIo<'_>, &Bytes)>;

/// Consumer that logs every callback and runs optional hooks
pub struct Recorder {
    stream_id: StreamId,
    logs: Logs,
    on_request: Option<RequestHook>,
    on_chunk: Option<ChunkHook>,
}

impl Recorder {
    fn log(&self, f: impl FnOnce(&mut StreamLog)) {
        f(self.logs.borrow_mut().entry(self.stream_id).or_default());
    }
}

impl RequestConsumer for Recorder {
    fn add_header(&mut self, name: &str, value: &str) {
        self.log(|log| log.headers.push((name.to_string(), value.to_string())));
    }

    fn got_length(&mut self, length: Option<u64>) {
        self.log(|log| log.length = Some(length));
    }

    fn handle_content_chunk(&mut self, io: &mut StreamIo<'_>, data: Bytes) {
        self.log(|log| log.chunks.push(data.clone()));
        if let Some(hook) = &self.on_chunk {
            hook(io, &data);
        }
    }

    fn request_received(&mut self, io: &mut StreamIo<'_>, method: &str, path: &str, version: &str) {
        self.log(|log| {
            log.requests
                .push((method.to_string(), path.to_string(), version.to_string()))
        });
        if let Some(hook) = &self.on_request {
            hook(io);
        }
    }

    fn connection_lost(&mut self, reason: &Error) {
        self.log(|log| log.lost.push(reason.to_string()));
    }
}

/// Factory building [`Recorder`]s that share `logs`
pub fn recorder_factory(
    logs: Logs,
    on_request: Option<RequestHook>,
    on_chunk: Option<ChunkHook>,
) -> impl RequestFactory {
    move |stream_id: StreamId, _queued: bool| -> Box<dyn RequestConsumer> {
        Box::new(Recorder {
            stream_id,
            logs: Rc::clone(&logs),
            on_request: on_request.clone(),
            on_chunk: on_chunk.clone(),
        })
    }
}

pub type TestConnection = H2Connection<BufferedTransport>;

/// Connection past the handshake, with the client's settings applied
pub fn connect_with(
    factory: impl RequestFactory + 'static,
    config: ConnectionConfig,
    client_settings: Settings,
) -> (TestConnection, Client) {
    init_tracing();
    let mut client = Client::new();
    let mut connection = H2Connection::new(BufferedTransport::new(), factory, config);
    connection.connection_made();

    let preface = client.preface(client_settings);
    connection.data_received(&preface);
    connection.run_pending();

    let handshake = client.read(&connection.transport_mut().take_written());
    assert!(handshake.contains(&Received::Settings { ack: false }));
    assert!(handshake.contains(&Received::Settings { ack: true }));
    (connection, client)
}

pub fn connect(factory: impl RequestFactory + 'static) -> (TestConnection, Client) {
    connect_with(factory, ConnectionConfig::default(), Settings::new())
}

/// Feed `bytes`, run due tasks and decode the server's output
pub fn exchange(connection: &mut TestConnection, client: &mut Client, bytes: &[u8]) -> Vec<Received> {
    connection.data_received(bytes);
    pump(connection, client)
}

/// Run due tasks and decode the server's output
pub fn pump(connection: &mut TestConnection, client: &mut Client) -> Vec<Received> {
    connection.run_pending();
    client.read(&connection.transport_mut().take_written())
}

/// Concatenated DATA payload for a stream, and whether it ended
pub fn body_of(received: &[Received], stream_id: StreamId) -> (Vec<u8>, bool) {
    let mut body = Vec::new();
    let mut ended = false;
    for item in received {
        match item {
            Received::Data {
                stream_id: id,
                data,
                end_stream,
            } if *id == stream_id => {
                body.extend_from_slice(data);
                ended |= *end_stream;
            }
            Received::Headers {
                stream_id: id,
                end_stream,
                ..
            } if *id == stream_id => ended |= *end_stream,
            _ => {}
        }
    }
    (body, ended)
}
