//! HTTP/2 streams as seen by request handlers
//!
//! An [`H2Stream`] pairs the per-stream state the connection keeps (inbound
//! buffer, producer registration) with the [`RequestConsumer`] built for the
//! request. Consumers and producers never hold the stream or the
//! connection; every callback receives a [`StreamIo`] instead, which is the
//! transport-like face of one stream.

use super::connection::Core;
use super::error::{Error, Result};
use super::producer::{Producer, RegisteredProducer};
use super::reactor::CallId;
use super::request::RequestConsumer;
use super::transport::Transport;
use super::StreamId;
use crate::http::HTTP2_VERSION;
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// Interval between pulls of a non-streaming producer
pub const PULL_INTERVAL: Duration = Duration::from_millis(1);

/// Inbound item waiting for the consumer to resume
#[derive(Debug)]
enum Inbound {
    Chunk { data: Bytes, flow_controlled_length: usize },
    End,
}

/// State of one stream that callbacks may change through [`StreamIo`]
pub(crate) struct StreamControl {
    stream_id: StreamId,
    method: String,
    path: String,
    producing: bool,
    inbound: VecDeque<Inbound>,
    producer: Option<RegisteredProducer>,
    has_producer: bool,
    streaming: bool,
    producer_active: bool,
    producer_epoch: u64,
    pending_pause: bool,
    pull_call: Option<CallId>,
    lost: bool,
}

impl StreamControl {
    fn new(stream_id: StreamId) -> Self {
        StreamControl {
            stream_id,
            method: String::new(),
            path: String::new(),
            producing: true,
            inbound: VecDeque::new(),
            producer: None,
            has_producer: false,
            streaming: false,
            producer_active: false,
            producer_epoch: 0,
            pending_pause: false,
            pull_call: None,
            lost: false,
        }
    }
}

/// What header conversion made of a new request
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HeaderCheck {
    Accepted,
    BadContentLength,
}

/// One request/response exchange on a connection
pub struct H2Stream {
    control: StreamControl,
    consumer: Box<dyn RequestConsumer>,
}

impl H2Stream {
    pub(crate) fn new(stream_id: StreamId, consumer: Box<dyn RequestConsumer>) -> Self {
        H2Stream {
            control: StreamControl::new(stream_id),
            consumer,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.control.stream_id
    }

    /// Request method, empty until headers are converted
    pub fn method(&self) -> &str {
        &self.control.method
    }

    pub fn path(&self) -> &str {
        &self.control.path
    }

    /// Whether inbound data goes straight to the consumer
    pub fn is_producing(&self) -> bool {
        self.control.producing
    }

    /// Inbound items held back while paused, end marker included
    pub fn buffered_items(&self) -> usize {
        self.control.inbound.len()
    }

    pub fn has_producer(&self) -> bool {
        self.control.has_producer
    }

    /// Whether the registered producer is currently allowed to write
    pub fn is_producer_active(&self) -> bool {
        self.control.producer_active
    }

    pub(crate) fn io<'a>(&'a mut self, core: &'a mut Core, transport: &'a mut dyn Transport) -> StreamIo<'a> {
        StreamIo {
            core,
            transport,
            control: &mut self.control,
        }
    }

    /// Feed the request headers to the consumer
    ///
    /// `:authority` becomes `host`, and a missing `content-length` is implied
    /// for GET and HEAD. An `expect: 100-continue` request gets an interim
    /// response straight away.
    pub(crate) fn convert_headers(
        &mut self,
        core: &mut Core,
        transport: &mut dyn Transport,
        headers: Vec<(String, String)>,
    ) -> HeaderCheck {
        let mut got_length = false;
        let mut expect: Option<String> = None;

        for (name, value) in headers {
            if !name.starts_with(':') {
                if name == "content-length" {
                    match value.trim().parse::<u64>() {
                        Ok(length) => {
                            self.consumer.add_header(&name, &value);
                            self.consumer.got_length(Some(length));
                            got_length = true;
                        }
                        Err(_) => return HeaderCheck::BadContentLength,
                    }
                    continue;
                }
                if name == "expect" && expect.is_none() {
                    expect = Some(value.clone());
                }
                self.consumer.add_header(&name, &value);
                continue;
            }

            match name.as_str() {
                ":method" => self.control.method = value,
                ":path" => self.control.path = value,
                ":authority" => self.consumer.add_header("host", &value),
                _ => {}
            }
        }

        if !got_length {
            let implied = match self.control.method.as_str() {
                "GET" | "HEAD" => Some(0),
                _ => None,
            };
            self.consumer.got_length(implied);
        }

        if expect.is_some_and(|value| value.eq_ignore_ascii_case("100-continue")) {
            core.send_continue(self.control.stream_id, transport);
        }
        HeaderCheck::Accepted
    }

    /// Body bytes from the peer
    pub(crate) fn receive_data_chunk(
        &mut self,
        core: &mut Core,
        transport: &mut dyn Transport,
        data: Bytes,
        flow_controlled_length: usize,
    ) {
        if !self.control.producing {
            self.control.inbound.push_back(Inbound::Chunk {
                data,
                flow_controlled_length,
            });
            return;
        }

        let stream_id = self.control.stream_id;
        let H2Stream { control, consumer } = &mut *self;
        let mut io = StreamIo {
            core: &mut *core,
            transport: &mut *transport,
            control,
        };
        consumer.handle_content_chunk(&mut io, data);
        core.open_stream_window(stream_id, flow_controlled_length, transport);
    }

    /// The peer finished sending the request
    pub(crate) fn request_complete(&mut self, core: &mut Core, transport: &mut dyn Transport) {
        if !self.control.producing {
            self.control.inbound.push_back(Inbound::End);
            return;
        }

        let H2Stream { control, consumer } = &mut *self;
        let method = control.method.clone();
        let path = control.path.clone();
        let mut io = StreamIo {
            core: &mut *core,
            transport: &mut *transport,
            control,
        };
        consumer.request_received(&mut io, &method, &path, HTTP2_VERSION);
    }

    /// Tell the consumer the stream or connection is gone; only the first call counts
    pub(crate) fn connection_lost(&mut self, reason: &Error) {
        if self.control.lost {
            return;
        }
        self.control.lost = true;
        self.consumer.connection_lost(reason);
    }

    /// The send window for this stream opened
    pub(crate) fn window_updated(&mut self, core: &mut Core, transport: &mut dyn Transport) {
        if !self.control.has_producer || self.control.producer_active {
            return;
        }
        if core.remaining_outbound_window(self.control.stream_id) <= 0 {
            return;
        }

        self.control.producer_active = true;
        self.io(core, transport)
            .call_producer(|producer, io| producer.resume_producing(io));
        self.arm_pull(core, Duration::ZERO);
    }

    /// Schedule the next pull of a non-streaming producer that may pull now
    fn arm_pull(&mut self, core: &mut Core, delay: Duration) {
        let pulling = matches!(
            &self.control.producer,
            Some(RegisteredProducer::Adapted(adapter)) if adapter.is_streaming() && !adapter.is_paused()
        );
        if pulling && self.control.pull_call.is_none() {
            self.control.pull_call = Some(core.schedule_pull(self.control.stream_id, delay));
        }
    }

    /// The send window for this stream is used up
    pub(crate) fn flow_control_blocked(&mut self) {
        self.control.flow_control_blocked();
    }

    /// Let inbound data through again, delivering what was held back
    ///
    /// The consumer may pause again from inside one of these deliveries;
    /// draining stops there and the rest stays buffered. The window is
    /// reopened by what was actually delivered.
    pub(crate) fn resume_producing(&mut self, core: &mut Core, transport: &mut dyn Transport) {
        self.control.producing = true;
        let mut consumed = 0;

        while self.control.producing {
            let Some(item) = self.control.inbound.pop_front() else {
                break;
            };
            match item {
                Inbound::Chunk {
                    data,
                    flow_controlled_length,
                } => {
                    consumed += flow_controlled_length;
                    let H2Stream { control, consumer } = &mut *self;
                    let mut io = StreamIo {
                        core: &mut *core,
                        transport: &mut *transport,
                        control,
                    };
                    consumer.handle_content_chunk(&mut io, data);
                }
                Inbound::End => self.request_complete(core, transport),
            }
        }

        core.open_stream_window(self.control.stream_id, consumed, transport);
    }

    pub(crate) fn pause_producing(&mut self) {
        self.control.producing = false;
    }

    /// One tick of the pull adapter
    pub(crate) fn pull(&mut self, core: &mut Core, transport: &mut dyn Transport) {
        self.control.pull_call = None;
        if !self.control.has_producer || self.control.streaming {
            return;
        }

        self.io(core, transport).call_producer(|producer, io| {
            if let RegisteredProducer::Adapted(adapter) = producer {
                adapter.pull(io);
            }
        });

        // a paused adapter is re-armed by window_updated
        self.arm_pull(core, PULL_INTERVAL);
    }

    /// Final cleanup once the connection dropped the stream
    pub(crate) fn teardown(&mut self, core: &mut Core) {
        if let Some(call) = self.control.pull_call.take() {
            core.cancel_call(call);
        }
        if let Some(mut producer) = self.control.producer.take() {
            debug!(stream_id = self.control.stream_id, "stopping producer of finished stream");
            producer.stop_producing();
        }
        self.control.has_producer = false;
        self.control.producer_active = false;
    }
}

impl StreamControl {
    fn flow_control_blocked(&mut self) {
        if !self.has_producer || !self.producer_active {
            return;
        }
        self.producer_active = false;
        match self.producer.as_mut() {
            Some(producer) => producer.pause_producing(),
            // the producer is running right now; pause it when it returns
            None => self.pending_pause = true,
        }
    }
}

/// Transport-like handle on one stream
///
/// Handed to every consumer and producer callback. Writes queue data for
/// the connection's sender loop; nothing here blocks.
pub struct StreamIo<'a> {
    pub(crate) core: &'a mut Core,
    pub(crate) transport: &'a mut dyn Transport,
    pub(crate) control: &'a mut StreamControl,
}

impl<'a> StreamIo<'a> {
    pub fn stream_id(&self) -> StreamId {
        self.control.stream_id
    }

    pub fn method(&self) -> &str {
        &self.control.method
    }

    pub fn path(&self) -> &str {
        &self.control.path
    }

    /// Queue response body bytes
    pub fn write(&mut self, data: impl Into<Bytes>) {
        let blocked = self
            .core
            .write_data(self.control.stream_id, data.into());
        if blocked {
            self.control.flow_control_blocked();
        }
    }

    /// Queue several chunks, in order
    pub fn write_sequence<I>(&mut self, chunks: I)
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        for chunk in chunks {
            self.write(chunk);
        }
    }

    /// Send the response headers; a stream that already closed drops them
    pub fn write_headers(&mut self, status: u16, headers: &[(String, String)]) -> Result<()> {
        self.core
            .write_headers(self.control.stream_id, status, headers, &mut *self.transport)
    }

    /// End the response once queued data has been sent
    pub fn finish(&mut self) {
        self.core.end_request(self.control.stream_id);
    }

    /// Same as [`finish`](StreamIo::finish)
    pub fn lose_connection(&mut self) {
        self.finish();
    }

    /// Reset the stream now, dropping anything still queued
    pub fn abort_connection(&mut self) {
        self.core
            .abort_request(self.control.stream_id, &mut *self.transport);
    }

    /// Send credit left once queued data is accounted for
    pub fn remaining_outbound_window(&self) -> i64 {
        self.core.remaining_outbound_window(self.control.stream_id)
    }

    /// Attach a producer for the response body
    pub fn register_producer(&mut self, producer: Producer) -> Result<()> {
        let stream_id = self.control.stream_id;
        if self.control.has_producer {
            return Err(Error::ProducerAlreadyRegistered(stream_id));
        }

        let streaming = producer.is_streaming();
        self.control.producer = Some(RegisteredProducer::from_producer(producer));
        self.control.has_producer = true;
        self.control.streaming = streaming;
        self.control.producer_active = true;
        self.control.pending_pause = false;
        self.control.producer_epoch += 1;

        if !streaming {
            self.control.pull_call = Some(self.core.schedule_pull(stream_id, Duration::ZERO));
        }
        debug!(stream_id, streaming, "producer registered");
        Ok(())
    }

    /// Detach the producer, stopping the pull loop of a non-streaming one
    pub fn unregister_producer(&mut self) {
        if self.control.has_producer && !self.control.streaming {
            if let Some(producer) = self.control.producer.as_mut() {
                producer.stop_streaming();
            }
            if let Some(call) = self.control.pull_call.take() {
                self.core.cancel_call(call);
            }
        }

        self.control.producer = None;
        self.control.has_producer = false;
        self.control.streaming = false;
        self.control.producer_active = false;
        self.control.pending_pause = false;
        self.control.producer_epoch += 1;
    }

    /// Hold inbound data back from the consumer
    pub fn pause_producing(&mut self) {
        self.control.producing = false;
    }

    /// Deliver inbound data again, starting with anything held back
    ///
    /// Buffered data is delivered once the current callback returns.
    pub fn resume_producing(&mut self) {
        self.control.producing = true;
        self.core.request_drain(self.control.stream_id);
    }

    /// Stop reading the request and reset the stream
    pub fn stop_producing(&mut self) {
        self.control.producing = false;
        self.abort_connection();
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.transport.peer()
    }

    pub fn host(&self) -> Option<SocketAddr> {
        self.transport.host()
    }

    pub fn is_secure(&self) -> bool {
        self.transport.is_secure()
    }

    /// Run `f` with the producer taken out of the stream
    ///
    /// If `f` unregisters or replaces the producer, the taken one is dropped.
    /// A pause requested while it was out is applied when it goes back.
    pub(crate) fn call_producer(&mut self, f: impl FnOnce(&mut RegisteredProducer, &mut StreamIo<'_>)) {
        let Some(mut producer) = self.control.producer.take() else {
            return;
        };
        let epoch = self.control.producer_epoch;

        f(&mut producer, self);

        if self.control.producer_epoch != epoch {
            return;
        }
        if std::mem::take(&mut self.control.pending_pause) {
            producer.pause_producing();
        }
        self.control.producer = Some(producer);
    }
}
