//! Server-side HTTP/2 protocol engine
//!
//! A sans-IO state machine: raw bytes go in through
//! [`ProtocolEngine::receive_data`] and come back as a list of [`Event`]s;
//! commands such as [`ProtocolEngine::send_headers`] queue encoded frames
//! that the caller collects with [`ProtocolEngine::data_to_send`]. The
//! engine never touches a socket and never schedules anything.
//!
//! Error handling follows RFC 7540 Section 5.4. Stream errors reset one
//! stream and surface as [`Event::StreamReset`]; connection errors queue a
//! GOAWAY and are returned from `receive_data`, after which the engine
//! ignores further input.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::{FlowControlWindow, WindowManager};
use super::frames::*;
use super::settings::Settings;
use super::state::StreamTable;
use super::{StreamId, CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE};
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

/// Something the peer did, in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A complete request header block opened a stream
    RequestReceived {
        stream_id: StreamId,
        headers: Vec<(String, String)>,
    },
    /// Body bytes arrived; `flow_controlled_length` includes padding
    DataReceived {
        stream_id: StreamId,
        data: Bytes,
        flow_controlled_length: usize,
    },
    /// The peer will send nothing more on this stream
    StreamEnded { stream_id: StreamId },
    /// The stream was reset, by the peer or by the engine
    StreamReset {
        stream_id: StreamId,
        error_code: ErrorCode,
        remote_reset: bool,
    },
    /// Send credit grew, on one stream or (`None`) on all of them
    WindowUpdated { stream_id: Option<StreamId>, delta: u32 },
    /// The peer gave a stream a new place in the dependency tree
    PriorityUpdated {
        stream_id: StreamId,
        depends_on: StreamId,
        weight: u16,
        exclusive: bool,
    },
    /// The peer sent GOAWAY
    ConnectionTerminated {
        error_code: ErrorCode,
        last_stream_id: StreamId,
        additional_data: Bytes,
    },
}

/// Header block being reassembled from HEADERS + CONTINUATION
struct PendingHeaders {
    stream_id: StreamId,
    block: BytesMut,
    end_stream: bool,
    priority: Option<PrioritySpec>,
}

/// Server-side HTTP/2 connection state
pub struct ProtocolEngine {
    local_settings: Settings,
    remote_settings: Settings,
    codec: FrameCodec,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    send_window: FlowControlWindow,
    recv_window: WindowManager,
    streams: StreamTable,
    outbound: BytesMut,
    pending_headers: Option<PendingHeaders>,
    preface_received: bool,
    settings_received: bool,
    goaway_sent: bool,
    failed: bool,
}

impl ProtocolEngine {
    /// Create an engine that will advertise `local_settings`
    pub fn new(local_settings: Settings) -> Self {
        let streams = StreamTable::new(local_settings.get_max_concurrent_streams());
        ProtocolEngine {
            local_settings,
            remote_settings: Settings::new(),
            codec: FrameCodec::new(),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            send_window: FlowControlWindow::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE),
            recv_window: WindowManager::new(DEFAULT_INITIAL_WINDOW_SIZE),
            streams,
            outbound: BytesMut::with_capacity(4096),
            pending_headers: None,
            preface_received: false,
            settings_received: false,
            goaway_sent: false,
            failed: false,
        }
    }

    /// Queue our SETTINGS frame
    pub fn initiate_connection(&mut self) {
        let frame = SettingsFrame::new(self.local_settings.clone());
        self.push(FrameCodec::encode_settings_frame(&frame));
    }

    /// Take everything queued for the wire
    pub fn data_to_send(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    /// Settings we advertised
    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    /// Settings the peer has sent so far
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Highest stream id the peer has opened
    pub fn last_stream_id(&self) -> StreamId {
        self.streams.highest_inbound_id()
    }

    /// Whether a connection error has ended this engine
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Feed received bytes and return the resulting events
    ///
    /// On a connection error a GOAWAY carrying the error's code is queued,
    /// events produced by this call are discarded, and the error is returned.
    pub fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>> {
        if self.failed {
            return Ok(Vec::new());
        }

        self.codec.feed(data);
        let mut events = Vec::new();

        match self.process_input(&mut events) {
            Ok(()) => Ok(events),
            Err(err) => {
                self.connection_error(&err);
                Err(err)
            }
        }
    }

    fn process_input(&mut self, events: &mut Vec<Event>) -> Result<()> {
        if !self.preface_received {
            let buffered = self.codec.buffered();
            let n = buffered.len().min(CONNECTION_PREFACE.len());
            if buffered[..n] != CONNECTION_PREFACE[..n] {
                return Err(Error::MissingPreface);
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(());
            }
            self.codec.consume(CONNECTION_PREFACE.len());
            self.preface_received = true;
        }

        let max_frame_size = self.local_settings.get_max_frame_size();
        while let Some(frame) = self.codec.next_frame(max_frame_size)? {
            self.handle_frame(frame, events)?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame, events: &mut Vec<Event>) -> Result<()> {
        debug!(
            frame_type = frame.frame_type.name(),
            stream_id = frame.stream_id,
            length = frame.payload_len(),
            flags = frame.flags.as_u8(),
            "frame received"
        );

        if !self.settings_received && (frame.frame_type != FrameType::Settings || frame.flags.is_ack()) {
            return Err(Error::Protocol(format!(
                "First frame must be SETTINGS, got {}",
                frame.frame_type
            )));
        }

        if let Some(pending) = &self.pending_headers {
            if frame.frame_type != FrameType::Continuation || frame.stream_id != pending.stream_id {
                return Err(Error::Protocol(format!(
                    "Expected CONTINUATION on stream {}, got {} on stream {}",
                    pending.stream_id, frame.frame_type, frame.stream_id
                )));
            }
        }

        if frame.frame_type.is_connection_scoped() {
            if frame.stream_id != 0 {
                return Err(Error::InvalidStreamId(frame.stream_id));
            }
        } else if frame.stream_id == 0 && frame.frame_type != FrameType::WindowUpdate {
            return Err(Error::InvalidStreamId(0));
        }

        match frame.frame_type {
            FrameType::Data => self.recv_data(&frame, events),
            FrameType::Headers => self.recv_headers(&frame, events),
            FrameType::Continuation => self.recv_continuation(&frame, events),
            FrameType::Priority => self.recv_priority(&frame, events),
            FrameType::RstStream => self.recv_rst_stream(&frame, events),
            FrameType::Settings => self.recv_settings(&frame, events),
            FrameType::PushPromise => Err(Error::Protocol("Client sent PUSH_PROMISE".to_string())),
            FrameType::Ping => self.recv_ping(&frame),
            FrameType::Goaway => self.recv_goaway(&frame, events),
            FrameType::WindowUpdate => self.recv_window_update(&frame, events),
        }
    }

    fn recv_data(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let data = FrameCodec::decode_data(frame)?;
        let stream_id = data.stream_id;
        let length = data.flow_controlled_length();

        if self.streams.is_idle(stream_id) {
            return Err(Error::Protocol(format!("DATA on idle stream {}", stream_id)));
        }
        self.recv_window.window_consumed(length)?;

        let result = match self.streams.get_mut(stream_id) {
            Some(stream) => stream.recv_data(length, data.end_stream),
            None => {
                // Closed stream: give the credit back so the connection keeps moving
                self.acknowledge_connection(length);
                return Ok(());
            }
        };

        if let Err(err) = result {
            self.acknowledge_connection(length);
            return self.stream_error(stream_id, err, events);
        }

        events.push(Event::DataReceived {
            stream_id,
            data: data.data,
            flow_controlled_length: length,
        });
        if data.end_stream {
            events.push(Event::StreamEnded { stream_id });
            self.streams.remove_if_closed(stream_id);
        }
        Ok(())
    }

    fn recv_headers(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let headers = FrameCodec::decode_headers(frame)?;
        let pending = PendingHeaders {
            stream_id: headers.stream_id,
            block: BytesMut::from(&headers.header_block[..]),
            end_stream: headers.end_stream,
            priority: headers.priority,
        };

        if headers.end_headers {
            self.finish_headers(pending, events)
        } else {
            self.pending_headers = Some(pending);
            Ok(())
        }
    }

    fn recv_continuation(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let mut pending = self
            .pending_headers
            .take()
            .ok_or_else(|| Error::Protocol("CONTINUATION without HEADERS".to_string()))?;
        let continuation = FrameCodec::decode_continuation(frame)?;

        pending.block.extend_from_slice(&continuation.header_block);
        if let Some(limit) = self.local_settings.get_max_header_list_size() {
            if pending.block.len() > limit as usize {
                return Err(Error::Protocol(format!(
                    "Header block of {} bytes exceeds {}",
                    pending.block.len(),
                    limit
                )));
            }
        }

        if continuation.end_headers {
            self.finish_headers(pending, events)
        } else {
            self.pending_headers = Some(pending);
            Ok(())
        }
    }

    fn finish_headers(&mut self, pending: PendingHeaders, events: &mut Vec<Event>) -> Result<()> {
        let stream_id = pending.stream_id;

        // Always decode: the HPACK context must track every block the peer sent
        let decoded = self
            .decoder
            .decode(&pending.block)
            .map_err(|e| Error::Compression(format!("{:?}", e)))?;
        let fields = decode_fields(decoded);

        if !self.streams.is_idle(stream_id) {
            let result = match self.streams.get_mut(stream_id) {
                Some(stream) => stream.recv_trailers(pending.end_stream),
                None => return Ok(()),
            };
            return match result {
                Ok(()) => {
                    events.push(Event::StreamEnded { stream_id });
                    self.streams.remove_if_closed(stream_id);
                    Ok(())
                }
                Err(err) => self.stream_error(stream_id, err, events),
            };
        }

        let send_window = self.remote_settings.get_initial_window_size();
        let recv_window = self.local_settings.get_initial_window_size();
        match self.streams.open_inbound(stream_id, send_window, recv_window) {
            Ok(stream) => stream.recv_headers(pending.end_stream)?,
            Err(Error::TooManyStreams) => {
                debug!(stream_id, "refusing stream over concurrency limit");
                self.push_rst(stream_id, ErrorCode::RefusedStream);
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        if self.goaway_sent {
            self.streams.remove(stream_id);
            self.push_rst(stream_id, ErrorCode::RefusedStream);
            return Ok(());
        }

        if let Some(priority) = pending.priority {
            if priority.stream_dependency == stream_id {
                let err = Error::Protocol(format!("Stream {} depends on itself", stream_id));
                return self.stream_error(stream_id, err, events);
            }
        }

        let fields = match fields.and_then(|fields| validate_request_headers(&fields).map(|_| fields)) {
            Ok(fields) => fields,
            Err(err) => return self.stream_error(stream_id, err, events),
        };

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.set_surfaced();
        }
        events.push(Event::RequestReceived {
            stream_id,
            headers: fields,
        });
        if let Some(priority) = pending.priority {
            events.push(Event::PriorityUpdated {
                stream_id,
                depends_on: priority.stream_dependency,
                weight: priority.effective_weight(),
                exclusive: priority.exclusive,
            });
        }
        if pending.end_stream {
            events.push(Event::StreamEnded { stream_id });
        }
        Ok(())
    }

    fn recv_priority(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let priority = FrameCodec::decode_priority(frame)?;
        let stream_id = priority.stream_id;
        let spec = priority.priority;

        if spec.stream_dependency == stream_id {
            let err = Error::Protocol(format!("Stream {} depends on itself", stream_id));
            return self.stream_error(stream_id, err, events);
        }

        // Idle streams may be prioritized ahead of their HEADERS; closed ones are ignored
        if self.streams.is_idle(stream_id) || self.streams.get(stream_id).is_some() {
            events.push(Event::PriorityUpdated {
                stream_id,
                depends_on: spec.stream_dependency,
                weight: spec.effective_weight(),
                exclusive: spec.exclusive,
            });
        }
        Ok(())
    }

    fn recv_rst_stream(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let rst = FrameCodec::decode_rst_stream(frame)?;

        if self.streams.is_idle(rst.stream_id) {
            return Err(Error::Protocol(format!("RST_STREAM on idle stream {}", rst.stream_id)));
        }

        if let Some(stream) = self.streams.remove(rst.stream_id) {
            if stream.is_surfaced() {
                events.push(Event::StreamReset {
                    stream_id: rst.stream_id,
                    error_code: rst.error_code,
                    remote_reset: true,
                });
            }
        }
        Ok(())
    }

    fn recv_settings(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let settings = FrameCodec::decode_settings(frame)?;
        if settings.ack {
            return Ok(());
        }
        self.settings_received = true;

        if let Some(new_size) = settings.settings.initial_window_size {
            let old_size = self.remote_settings.get_initial_window_size();
            for stream in self.streams.iter_mut() {
                stream.send_window_mut().update_initial_size(new_size)?;
            }
            if new_size > old_size {
                events.push(Event::WindowUpdated {
                    stream_id: None,
                    delta: new_size - old_size,
                });
            }
        }

        // The encoder never inserts into its dynamic table, so a smaller
        // HEADER_TABLE_SIZE from the peer needs no action.
        self.remote_settings.merge(&settings.settings);
        self.push(FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
        Ok(())
    }

    fn recv_ping(&mut self, frame: &Frame) -> Result<()> {
        let ping = FrameCodec::decode_ping(frame)?;
        if !ping.ack {
            self.push(FrameCodec::encode_ping_frame(&PingFrame::ack(ping.data)));
        }
        Ok(())
    }

    fn recv_goaway(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let goaway = FrameCodec::decode_goaway(frame)?;
        events.push(Event::ConnectionTerminated {
            error_code: goaway.error_code,
            last_stream_id: goaway.last_stream_id,
            additional_data: goaway.debug_data,
        });
        Ok(())
    }

    fn recv_window_update(&mut self, frame: &Frame, events: &mut Vec<Event>) -> Result<()> {
        let update = FrameCodec::decode_window_update(frame)?;
        let stream_id = update.stream_id;
        let increment = update.size_increment;

        if stream_id == 0 {
            if increment == 0 {
                return Err(Error::Protocol("Connection WINDOW_UPDATE of 0".to_string()));
            }
            self.send_window.increase(increment)?;
            events.push(Event::WindowUpdated {
                stream_id: None,
                delta: increment,
            });
            return Ok(());
        }

        if self.streams.is_idle(stream_id) {
            return Err(Error::Protocol(format!("WINDOW_UPDATE on idle stream {}", stream_id)));
        }

        let result = match self.streams.get_mut(stream_id) {
            Some(stream) => stream.send_window_mut().increase(increment),
            None => return Ok(()),
        };
        match result {
            Ok(_) => {
                events.push(Event::WindowUpdated {
                    stream_id: Some(stream_id),
                    delta: increment,
                });
                Ok(())
            }
            Err(err) => self.stream_error(stream_id, err, events),
        }
    }

    fn stream_error(&mut self, stream_id: StreamId, err: Error, events: &mut Vec<Event>) -> Result<()> {
        let error_code = err.code();
        warn!(stream_id, error = %err, code = %error_code, "resetting stream");

        self.push_rst(stream_id, error_code);
        if let Some(stream) = self.streams.remove(stream_id) {
            if stream.is_surfaced() {
                events.push(Event::StreamReset {
                    stream_id,
                    error_code,
                    remote_reset: false,
                });
            }
        }
        Ok(())
    }

    fn connection_error(&mut self, err: &Error) {
        let error_code = err.code();
        warn!(error = %err, code = %error_code, "connection error");

        self.failed = true;
        self.pending_headers = None;
        if !self.goaway_sent {
            self.goaway_sent = true;
            let frame = GoawayFrame::new(self.streams.highest_inbound_id(), error_code, Bytes::new());
            self.push(FrameCodec::encode_goaway_frame(&frame));
        }
    }

    fn acknowledge_connection(&mut self, size: usize) {
        if let Some(increment) = self.recv_window.process_bytes(size) {
            self.push(FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(0, increment)));
        }
    }

    fn push_rst(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        self.push(FrameCodec::encode_rst_stream_frame(&RstStreamFrame { stream_id, error_code }));
    }

    fn push(&mut self, frame: Bytes) {
        self.outbound.extend_from_slice(&frame);
    }

    fn require_stream(&self, stream_id: StreamId) -> Error {
        if self.streams.is_idle(stream_id) {
            Error::StreamNotFound(stream_id)
        } else {
            Error::StreamClosed(stream_id)
        }
    }

    /// Send a header block on a stream
    ///
    /// Field names are lowercased. Blocks larger than the peer's
    /// MAX_FRAME_SIZE continue in CONTINUATION frames.
    pub fn send_headers(&mut self, stream_id: StreamId, headers: &[(String, String)], end_stream: bool) -> Result<()> {
        if self.failed {
            return Err(Error::ConnectionClosed);
        }
        match self.streams.get_mut(stream_id) {
            Some(stream) => stream.send_headers(end_stream)?,
            None => return Err(self.require_stream(stream_id)),
        }

        let fields: Vec<(Vec<u8>, Vec<u8>)> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase().into_bytes(), value.as_bytes().to_vec()))
            .collect();
        let block = Bytes::from(
            self.encoder
                .encode(fields.iter().map(|(n, v)| (n.as_slice(), v.as_slice()))),
        );

        let max = self.max_outbound_frame_size() as usize;
        let first_len = block.len().min(max);
        let first = HeadersFrame::new(stream_id, block.slice(..first_len), end_stream, first_len == block.len());
        self.push(FrameCodec::encode_headers_frame(&first));

        let mut offset = first_len;
        while offset < block.len() {
            let end = (offset + max).min(block.len());
            let continuation = ContinuationFrame {
                stream_id,
                header_block: block.slice(offset..end),
                end_headers: end == block.len(),
            };
            self.push(FrameCodec::encode_continuation_frame(&continuation));
            offset = end;
        }

        debug!(stream_id, fields = headers.len(), end_stream, "headers sent");
        self.streams.remove_if_closed(stream_id);
        Ok(())
    }

    /// Send one DATA frame
    ///
    /// `data` must fit in a single frame and in both flow-control windows.
    pub fn send_data(&mut self, stream_id: StreamId, data: Bytes, end_stream: bool) -> Result<()> {
        if self.failed {
            return Err(Error::ConnectionClosed);
        }
        let max = self.max_outbound_frame_size() as usize;
        if data.len() > max {
            return Err(Error::FrameSize(format!(
                "DATA of {} bytes exceeds frame size {}",
                data.len(),
                max
            )));
        }
        if !self.send_window.can_send(data.len()) {
            return Err(Error::FlowControl(format!(
                "DATA of {} bytes exceeds connection window {}",
                data.len(),
                self.send_window.size()
            )));
        }

        match self.streams.get_mut(stream_id) {
            Some(stream) => stream.send_data(data.len(), end_stream)?,
            None => return Err(self.require_stream(stream_id)),
        }
        self.send_window.reserve(data.len())?;

        self.push(FrameCodec::encode_data_frame(&DataFrame::new(stream_id, data, end_stream)));
        self.streams.remove_if_closed(stream_id);
        Ok(())
    }

    /// End our side of a stream with an empty DATA frame
    pub fn end_stream(&mut self, stream_id: StreamId) -> Result<()> {
        self.send_data(stream_id, Bytes::new(), true)
    }

    /// Reset a stream; resetting a closed stream does nothing
    pub fn reset_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) -> Result<()> {
        if self.streams.remove(stream_id).is_some() {
            self.push_rst(stream_id, error_code);
            return Ok(());
        }
        if self.streams.is_idle(stream_id) {
            return Err(Error::StreamNotFound(stream_id));
        }
        Ok(())
    }

    /// Send GOAWAY naming the last stream the peer opened
    pub fn close_connection(&mut self, error_code: ErrorCode) {
        self.goaway_sent = true;
        let frame = GoawayFrame::new(self.streams.highest_inbound_id(), error_code, Bytes::new());
        self.push(FrameCodec::encode_goaway_frame(&frame));
    }

    /// Report `size` received bytes as processed
    ///
    /// The connection window is always credited; the stream window only
    /// while the peer may still send on it.
    pub fn acknowledge_received_data(&mut self, size: usize, stream_id: StreamId) -> Result<()> {
        self.acknowledge_connection(size);

        let increment = match self.streams.get_mut(stream_id) {
            Some(stream) if stream.state().can_receive() => stream.recv_window_mut().process_bytes(size),
            _ => None,
        };
        if let Some(increment) = increment {
            self.push(FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(stream_id, increment)));
        }
        Ok(())
    }

    /// Bytes we may send on a stream right now
    pub fn local_flow_control_window(&self, stream_id: StreamId) -> Result<i64> {
        let stream = self
            .streams
            .get(stream_id)
            .ok_or_else(|| self.require_stream(stream_id))?;
        Ok(self.send_window.size().min(stream.send_window().size()))
    }

    /// Largest DATA payload the peer accepts
    pub fn max_outbound_frame_size(&self) -> u32 {
        self.remote_settings.get_max_frame_size()
    }

    /// Streams the peer opened that are not yet closed
    pub fn open_inbound_streams(&self) -> usize {
        self.streams.active_stream_count()
    }

    /// Streams we opened; a server that never pushes has none
    pub fn open_outbound_streams(&self) -> usize {
        0
    }
}

/// Turn decoded HPACK fields into strings, rejecting non-UTF-8 input
fn decode_fields(decoded: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<(String, String)>> {
    decoded
        .into_iter()
        .map(|(name, value)| {
            let name = String::from_utf8(name).map_err(|_| Error::InvalidHeader("Non-UTF-8 field name".to_string()))?;
            let value =
                String::from_utf8(value).map_err(|_| Error::InvalidHeader(format!("Non-UTF-8 value for {}", name)))?;
            Ok((name, value))
        })
        .collect()
}

const CONNECTION_SPECIFIC: &[&str] = &["connection", "keep-alive", "proxy-connection", "transfer-encoding", "upgrade"];

/// Check a request header list (RFC 7540 Section 8.1.2)
fn validate_request_headers(fields: &[(String, String)]) -> Result<()> {
    let mut seen_regular = false;
    let mut method = None;
    let mut path = None;
    let mut seen_pseudo: Vec<&str> = Vec::new();

    for (name, value) in fields {
        if name.is_empty() {
            return Err(Error::InvalidHeader("Empty field name".to_string()));
        }
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::InvalidHeader(format!("Uppercase field name {}", name)));
        }

        if let Some(pseudo) = name.strip_prefix(':') {
            if seen_regular {
                return Err(Error::InvalidHeader(format!("Pseudo-header {} after regular field", name)));
            }
            if seen_pseudo.contains(&pseudo) {
                return Err(Error::InvalidHeader(format!("Duplicate pseudo-header {}", name)));
            }
            match pseudo {
                "method" => method = Some(value.as_str()),
                "path" => path = Some(value.as_str()),
                "scheme" | "authority" => {}
                _ => return Err(Error::InvalidHeader(format!("Unknown pseudo-header {}", name))),
            }
            seen_pseudo.push(pseudo);
            continue;
        }

        seen_regular = true;
        if CONNECTION_SPECIFIC.contains(&name.as_str()) {
            return Err(Error::InvalidHeader(format!("Connection-specific field {}", name)));
        }
        if name == "te" && value != "trailers" {
            return Err(Error::InvalidHeader(format!("TE value {}", value)));
        }
    }

    let method = method.ok_or_else(|| Error::InvalidHeader("Missing :method".to_string()))?;
    if method != "CONNECT" && path.map_or(true, str::is_empty) {
        return Err(Error::InvalidHeader("Missing :path".to_string()));
    }
    Ok(())
}
