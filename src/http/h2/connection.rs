//! HTTP/2 server connection
//!
//! [`H2Connection`] sits between a byte [`Transport`] and the request
//! consumers of its streams. Inbound bytes go through the
//! [`ProtocolEngine`]; the resulting events open streams, feed request
//! bodies and move flow-control windows. Response data is queued per
//! stream and drained by the sender loop, one frame per reactor task, in
//! the order the [`PriorityTree`] picks.
//!
//! Nothing here blocks or spawns. Whoever owns the connection feeds it
//! bytes with [`H2Connection::data_received`] and runs its timers with
//! [`H2Connection::run_pending`] / [`H2Connection::advance`].
//!
//! Two kinds of backpressure are handled:
//!
//! - HTTP/2 flow control: a stream whose send window is used up is blocked
//!   in the priority tree and its producer paused until WINDOW_UPDATE.
//! - The transport's consumer: while it has paused us, DATA is held back
//!   and control frames are buffered, up to a ceiling past which the peer
//!   is assumed hostile and the connection is aborted.

use super::config::ConnectionConfig;
use super::engine::{Event, ProtocolEngine};
use super::error::{Error, ErrorCode, Result};
use super::priority::{PriorityError, PriorityTree, DEFAULT_WEIGHT};
use super::producer::Producer;
use super::reactor::{CallId, Reactor};
use super::request::RequestFactory;
use super::stream::{H2Stream, HeaderCheck, StreamIo};
use super::transport::Transport;
use super::StreamId;
use bytes::Bytes;
use futures::channel::oneshot;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Work queued on the connection's reactor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Task {
    /// One iteration of the sender loop
    Send,
    /// One pull of a non-streaming producer
    Pull(StreamId),
    IdleTimeout,
    ForceAbort,
}

/// Item in a stream's outbound queue
#[derive(Debug)]
enum Outbound {
    Data(Bytes),
    End,
}

/// What the connection has done to its transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Open,
    /// `lose_connection` was called
    Closing,
    /// `abort_connection` was called
    Aborted,
}

/// Connection state shared with stream callbacks
///
/// Stream callbacks reach this through [`StreamIo`]. Anything that needs
/// the stream map (dropping a stream, delivering buffered data, tearing
/// the connection down) is queued here and carried out by
/// `H2Connection::settle` once the callback returns.
pub(crate) struct Core {
    engine: ProtocolEngine,
    config: ConnectionConfig,
    priority: PriorityTree,
    queues: HashMap<StreamId, VecDeque<Outbound>>,
    completions: HashMap<StreamId, oneshot::Sender<StreamId>>,
    receivers: HashMap<StreamId, oneshot::Receiver<StreamId>>,
    reactor: Reactor<Task>,
    send_scheduled: bool,
    sender_parked: bool,
    sender_awaiting_resume: bool,
    control_frames: VecDeque<Bytes>,
    control_bytes: usize,
    still_producing: bool,
    consumer_paused: bool,
    idle_call: Option<CallId>,
    abort_call: Option<CallId>,
    state: TransportState,
    drains: VecDeque<StreamId>,
    removals: VecDeque<StreamId>,
    pending_loss: Option<Error>,
}

impl Core {
    fn new(config: ConnectionConfig) -> Self {
        Core {
            engine: ProtocolEngine::new(config.settings.clone()),
            config,
            priority: PriorityTree::new(),
            queues: HashMap::new(),
            completions: HashMap::new(),
            receivers: HashMap::new(),
            reactor: Reactor::new(),
            send_scheduled: false,
            sender_parked: false,
            sender_awaiting_resume: false,
            control_frames: VecDeque::new(),
            control_bytes: 0,
            still_producing: true,
            consumer_paused: false,
            idle_call: None,
            abort_call: None,
            state: TransportState::Open,
            drains: VecDeque::new(),
            removals: VecDeque::new(),
            pending_loss: None,
        }
    }

    fn open_stream(&mut self, stream_id: StreamId) {
        let (sender, receiver) = oneshot::channel();
        self.queues.insert(stream_id, VecDeque::new());
        self.completions.insert(stream_id, sender);
        self.receivers.insert(stream_id, receiver);
    }

    /// Whether the stream has not been torn down
    fn is_live(&self, stream_id: StreamId) -> bool {
        self.queues.contains_key(&stream_id)
    }

    /// A stream that has not been torn down yet
    fn live<'s>(&self, streams: &'s mut HashMap<StreamId, H2Stream>, stream_id: StreamId) -> Option<&'s mut H2Stream> {
        if !self.is_live(stream_id) {
            return None;
        }
        streams.get_mut(&stream_id)
    }

    fn has_queued(&self, stream_id: StreamId) -> bool {
        self.queues.get(&stream_id).is_some_and(|queue| !queue.is_empty())
    }

    pub(crate) fn schedule_pull(&mut self, stream_id: StreamId, delay: Duration) -> CallId {
        self.reactor.call_later(delay, Task::Pull(stream_id))
    }

    pub(crate) fn cancel_call(&mut self, call: CallId) {
        self.reactor.cancel(call);
    }

    pub(crate) fn request_drain(&mut self, stream_id: StreamId) {
        if !self.drains.contains(&stream_id) {
            self.drains.push_back(stream_id);
        }
    }

    fn schedule_send(&mut self) {
        if !self.send_scheduled {
            self.send_scheduled = true;
            self.reactor.call_later(Duration::ZERO, Task::Send);
        }
    }

    fn wake_sender(&mut self) {
        if self.sender_parked {
            self.sender_parked = false;
            self.schedule_send();
        }
    }

    fn reset_idle(&mut self) {
        if let (Some(call), Some(timeout)) = (self.idle_call, self.config.idle_timeout) {
            self.reactor.reset(call, timeout);
        }
    }

    fn write_transport(&mut self, transport: &mut dyn Transport, data: &[u8]) {
        if self.state != TransportState::Aborted && !data.is_empty() {
            transport.write(data);
        }
    }

    fn lose_transport(&mut self, transport: &mut dyn Transport) {
        if self.state == TransportState::Open {
            self.state = TransportState::Closing;
            transport.lose_connection();
        }
    }

    fn abort_transport(&mut self, transport: &mut dyn Transport) {
        if self.state != TransportState::Aborted {
            self.state = TransportState::Aborted;
            self.control_frames.clear();
            self.control_bytes = 0;
            transport.abort_connection();
        }
    }

    /// Write out whatever control frames the engine has queued
    ///
    /// While the transport's consumer is paused, or earlier frames are
    /// still waiting, frames join the backlog instead. Returns false if
    /// the connection is dead, including when this call tripped the
    /// backlog ceiling.
    pub(crate) fn flush_control(&mut self, transport: &mut dyn Transport) -> bool {
        let data = self.engine.data_to_send();
        if data.is_empty() {
            return true;
        }
        if self.state == TransportState::Aborted {
            return false;
        }

        if !self.consumer_paused && self.control_frames.is_empty() {
            transport.write(&data);
            return true;
        }

        self.control_bytes += data.len();
        self.control_frames.push_back(data);

        let limit = self.config.max_buffered_control_frame_bytes;
        if self.control_bytes >= limit {
            let buffered = self.control_bytes;
            error!(
                buffered,
                limit,
                peer = ?transport.peer(),
                "too many control frame bytes buffered, aborting connection"
            );
            self.abort_transport(transport);
            self.pending_loss
                .get_or_insert(Error::ExcessiveBuffering { buffered, limit });
            return false;
        }
        true
    }

    /// Drain the control frame backlog in order, stopping if paused again
    fn flush_buffered_control(&mut self, transport: &mut dyn Transport) {
        while !self.consumer_paused {
            let Some(frame) = self.control_frames.pop_front() else {
                break;
            };
            self.control_bytes -= frame.len();
            self.write_transport(transport, &frame);
        }
    }

    fn flush_data(&mut self, transport: &mut dyn Transport) {
        let data = self.engine.data_to_send();
        self.write_transport(transport, &data);
    }

    /// One iteration of the sender loop
    ///
    /// Returns a stream whose remaining window is used up, so its producer
    /// can be paused.
    fn send_step(&mut self, transport: &mut dyn Transport) -> Option<StreamId> {
        self.send_scheduled = false;
        if !self.still_producing {
            return None;
        }

        let stream_id = match self.priority.next() {
            Ok(stream_id) => stream_id,
            Err(_) => {
                self.sender_parked = true;
                return None;
            }
        };

        if self.consumer_paused {
            self.sender_awaiting_resume = true;
            return None;
        }

        self.reset_idle();

        let window = self.engine.local_flow_control_window(stream_id).unwrap_or(0);
        let max_frame_size = window
            .min(self.engine.max_outbound_frame_size() as i64)
            .max(0) as usize;

        let Some(item) = self.queues.get_mut(&stream_id).and_then(|queue| queue.pop_front()) else {
            // nothing queued; a stale unblock
            let _ = self.priority.block(stream_id);
            self.schedule_send();
            return None;
        };

        let mut blocked = None;
        match item {
            Outbound::End => {
                if let Err(err) = self.engine.end_stream(stream_id) {
                    debug!(stream_id, %err, "could not end stream");
                }
                self.flush_data(transport);
                self.teardown_stream(stream_id);
            }
            Outbound::Data(mut chunk) => {
                if chunk.len() > max_frame_size {
                    let rest = chunk.split_off(max_frame_size);
                    if let Some(queue) = self.queues.get_mut(&stream_id) {
                        queue.push_front(Outbound::Data(rest));
                    }
                }

                if !chunk.is_empty() {
                    let len = chunk.len();
                    match self.engine.send_data(stream_id, chunk, false) {
                        Ok(()) => debug!(stream_id, len, "data frame sent"),
                        Err(err) => warn!(stream_id, %err, "dropping data frame"),
                    }
                    self.flush_data(transport);
                }

                // an exhausted window waits for WINDOW_UPDATE rather than spinning
                if !self.has_queued(stream_id) || max_frame_size == 0 {
                    let _ = self.priority.block(stream_id);
                }
                if self.remaining_outbound_window(stream_id) <= 0 {
                    blocked = Some(stream_id);
                }
            }
        }

        self.schedule_send();
        blocked
    }

    /// Queue response bytes; returns true if the stream's window is now used up
    pub(crate) fn write_data(&mut self, stream_id: StreamId, data: Bytes) -> bool {
        let Some(queue) = self.queues.get_mut(&stream_id) else {
            debug!(stream_id, "write to finished stream dropped");
            return false;
        };
        queue.push_back(Outbound::Data(data));

        if self.engine.local_flow_control_window(stream_id).unwrap_or(0) > 0 {
            let _ = self.priority.unblock(stream_id);
            self.wake_sender();
        }
        self.remaining_outbound_window(stream_id) <= 0
    }

    pub(crate) fn end_request(&mut self, stream_id: StreamId) {
        let Some(queue) = self.queues.get_mut(&stream_id) else {
            return;
        };
        queue.push_back(Outbound::End);
        let _ = self.priority.unblock(stream_id);
        self.wake_sender();
    }

    /// Reset a live stream with CANCEL
    ///
    /// NO_ERROR would let the peer read the reset as a complete response,
    /// so an abort always reports CANCEL.
    pub(crate) fn abort_request(&mut self, stream_id: StreamId, transport: &mut dyn Transport) {
        if !self.is_live(stream_id) {
            return;
        }
        if let Err(err) = self.engine.reset_stream(stream_id, ErrorCode::Cancel) {
            debug!(stream_id, %err, "reset of unknown stream");
        }
        if self.flush_control(transport) {
            self.teardown_stream(stream_id);
        }
    }

    /// Send window minus what is already queued
    pub(crate) fn remaining_outbound_window(&self, stream_id: StreamId) -> i64 {
        let window = self.engine.local_flow_control_window(stream_id).unwrap_or(0);
        let queued: usize = self
            .queues
            .get(&stream_id)
            .map(|queue| {
                queue
                    .iter()
                    .map(|item| match item {
                        Outbound::Data(data) => data.len(),
                        Outbound::End => 0,
                    })
                    .sum()
            })
            .unwrap_or(0);
        window - queued as i64
    }

    pub(crate) fn open_stream_window(&mut self, stream_id: StreamId, increment: usize, transport: &mut dyn Transport) {
        if let Err(err) = self.engine.acknowledge_received_data(increment, stream_id) {
            warn!(stream_id, %err, "could not acknowledge received data");
        }
        self.flush_control(transport);
    }

    pub(crate) fn write_headers(
        &mut self,
        stream_id: StreamId,
        status: u16,
        headers: &[(String, String)],
        transport: &mut dyn Transport,
    ) -> Result<()> {
        let mut fields = Vec::with_capacity(headers.len() + 1);
        fields.push((":status".to_string(), status.to_string()));
        fields.extend(headers.iter().cloned());

        match self.engine.send_headers(stream_id, &fields, false) {
            Ok(()) => {
                self.flush_control(transport);
                Ok(())
            }
            Err(Error::StreamClosed(_)) | Err(Error::ConnectionClosed) => {
                debug!(stream_id, status, "headers for closed stream dropped");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn send_continue(&mut self, stream_id: StreamId, transport: &mut dyn Transport) {
        let fields = [(":status".to_string(), "100".to_string())];
        if let Err(err) = self.engine.send_headers(stream_id, &fields, false) {
            warn!(stream_id, %err, "could not send 100 Continue");
        }
        self.flush_control(transport);
    }

    /// Answer 400 and end the stream; returns false if the connection died
    fn respond_bad_request(&mut self, stream_id: StreamId, transport: &mut dyn Transport) -> bool {
        let fields = [(":status".to_string(), "400".to_string())];
        if let Err(err) = self.engine.send_headers(stream_id, &fields, true) {
            warn!(stream_id, %err, "could not send 400");
        }
        self.flush_control(transport)
    }

    /// Drop every trace of a stream; later calls do nothing
    fn teardown_stream(&mut self, stream_id: StreamId) {
        if self.queues.remove(&stream_id).is_none() {
            return;
        }
        match self.priority.remove_stream(stream_id) {
            Ok(()) | Err(PriorityError::MissingStream(_)) => {}
            Err(err) => debug!(stream_id, %err, "priority tree removal failed"),
        }
        if let Some(sender) = self.completions.remove(&stream_id) {
            let _ = sender.send(stream_id);
        }
        self.receivers.remove(&stream_id);
        self.drains.retain(|&id| id != stream_id);
        self.removals.push_back(stream_id);
        debug!(stream_id, "stream torn down");
    }

    fn timeout_connection(&mut self, transport: &mut dyn Transport) {
        self.idle_call = None;
        info!(peer = ?transport.peer(), "timing out client");

        let error_code = if self.engine.open_outbound_streams() > 0 || self.engine.open_inbound_streams() > 0 {
            ErrorCode::ProtocolError
        } else {
            ErrorCode::NoError
        };
        self.engine.close_connection(error_code);
        self.flush_data(transport);

        if let Some(timeout) = self.config.abort_timeout {
            self.abort_call = Some(self.reactor.call_later(timeout, Task::ForceAbort));
        }
        self.lose_transport(transport);
    }

    fn force_abort(&mut self, transport: &mut dyn Transport) {
        self.abort_call = None;
        info!(peer = ?transport.peer(), "forcibly timing out client");
        self.abort_transport(transport);
    }
}

/// Server side of one HTTP/2 connection
pub struct H2Connection<T: Transport> {
    core: Core,
    streams: HashMap<StreamId, H2Stream>,
    factory: Box<dyn RequestFactory>,
    transport: T,
}

impl<T: Transport> H2Connection<T> {
    /// Create a connection over `transport`; `factory` builds one consumer per stream
    pub fn new(transport: T, factory: impl RequestFactory + 'static, config: ConnectionConfig) -> Self {
        let mut core = Core::new(config);
        core.schedule_send();
        H2Connection {
            core,
            streams: HashMap::new(),
            factory: Box::new(factory),
            transport,
        }
    }

    /// Start the connection: arm the idle timeout and send our SETTINGS
    pub fn connection_made(&mut self) {
        if let Some(timeout) = self.core.config.idle_timeout {
            self.core.idle_call = Some(self.core.reactor.call_later(timeout, Task::IdleTimeout));
        }
        self.core.engine.initiate_connection();
        self.core.flush_data(&mut self.transport);
    }

    /// Feed bytes read from the transport
    pub fn data_received(&mut self, data: &[u8]) {
        if !self.core.still_producing || self.core.state == TransportState::Aborted {
            return;
        }

        let events = match self.core.engine.receive_data(data) {
            Ok(events) => events,
            Err(err) => {
                warn!(peer = ?self.transport.peer(), %err, "protocol error, closing connection");
                if self.core.flush_control(&mut self.transport) {
                    self.core.lose_transport(&mut self.transport);
                    self.lose(err, false);
                }
                self.settle();
                return;
            }
        };

        self.core.reset_idle();
        for event in events {
            self.dispatch(event);
            self.settle();
        }

        self.core.flush_control(&mut self.transport);
        self.settle();
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::RequestReceived { stream_id, headers } => self.request_received(stream_id, headers),
            Event::DataReceived {
                stream_id,
                data,
                flow_controlled_length,
            } => match self.core.live(&mut self.streams, stream_id) {
                Some(stream) => {
                    stream.receive_data_chunk(&mut self.core, &mut self.transport, data, flow_controlled_length)
                }
                // keep the connection window moving for streams we already dropped
                None => self
                    .core
                    .open_stream_window(stream_id, flow_controlled_length, &mut self.transport),
            },
            Event::StreamEnded { stream_id } => {
                if let Some(stream) = self.core.live(&mut self.streams, stream_id) {
                    stream.request_complete(&mut self.core, &mut self.transport);
                }
            }
            Event::StreamReset {
                stream_id,
                error_code,
                remote_reset,
            } => {
                debug!(stream_id, %error_code, remote_reset, "stream reset");
                if let Some(stream) = self.core.live(&mut self.streams, stream_id) {
                    stream.connection_lost(&Error::StreamReset(error_code));
                    self.core.teardown_stream(stream_id);
                }
            }
            Event::WindowUpdated { stream_id, delta } => {
                debug!(?stream_id, delta, "window updated");
                self.window_updated(stream_id);
            }
            Event::PriorityUpdated {
                stream_id,
                depends_on,
                weight,
                exclusive,
            } => self.priority_updated(stream_id, depends_on, weight, exclusive),
            Event::ConnectionTerminated {
                error_code,
                last_stream_id,
                ..
            } => {
                info!(%error_code, last_stream_id, "peer sent GOAWAY");
                self.core.lose_transport(&mut self.transport);
                self.lose(Error::ConnectionLost("Remote peer sent GOAWAY".to_string()), false);
            }
        }
    }

    fn request_received(&mut self, stream_id: StreamId, headers: Vec<(String, String)>) {
        match self.core.priority.insert_stream(stream_id, 0, DEFAULT_WEIGHT, false) {
            Ok(()) => {
                let _ = self.core.priority.block(stream_id);
            }
            // already placed by an earlier PRIORITY frame
            Err(PriorityError::DuplicateStream(_)) => {}
            Err(err) => {
                warn!(stream_id, %err, "refusing stream");
                if let Err(err) = self.core.engine.reset_stream(stream_id, ErrorCode::RefusedStream) {
                    debug!(stream_id, %err, "could not refuse stream");
                }
                self.core.flush_control(&mut self.transport);
                return;
            }
        }

        let consumer = self.factory.build(stream_id, false);
        self.core.open_stream(stream_id);

        let mut stream = H2Stream::new(stream_id, consumer);
        let check = stream.convert_headers(&mut self.core, &mut self.transport, headers);
        debug!(stream_id, method = stream.method(), path = stream.path(), "request received");
        self.streams.insert(stream_id, stream);

        if check == HeaderCheck::BadContentLength {
            debug!(stream_id, "invalid content-length");
            if self.core.respond_bad_request(stream_id, &mut self.transport) {
                if let Some(stream) = self.streams.get_mut(&stream_id) {
                    stream.connection_lost(&Error::ConnectionLost("Invalid request".to_string()));
                }
                self.core.teardown_stream(stream_id);
            }
        }
    }

    fn window_updated(&mut self, stream_id: Option<StreamId>) {
        let ids = match stream_id {
            Some(stream_id) => vec![stream_id],
            None => self.stream_ids(),
        };

        for stream_id in ids {
            if !self.core.is_live(stream_id) {
                continue;
            }
            if self.core.has_queued(stream_id) {
                let _ = self.core.priority.unblock(stream_id);
                self.core.wake_sender();
            }
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.window_updated(&mut self.core, &mut self.transport);
            }
        }
    }

    fn priority_updated(&mut self, stream_id: StreamId, depends_on: StreamId, weight: u16, exclusive: bool) {
        let priority = &mut self.core.priority;
        let result = match priority.reprioritize(stream_id, depends_on, weight, exclusive) {
            Err(PriorityError::MissingStream(_)) => priority
                .insert_stream(stream_id, depends_on, weight, exclusive)
                .and_then(|()| priority.block(stream_id)),
            other => other,
        };
        if let Err(err) = result {
            debug!(stream_id, %err, "priority update ignored");
        }
    }

    /// The transport went away
    pub fn connection_lost(&mut self, reason: Error) {
        self.lose(reason, true);
        self.settle();
    }

    /// Tell every stream the connection is gone and drop them all
    ///
    /// With `cancel_timeouts` false the forced-abort timer keeps running, so
    /// a peer that never reads our GOAWAY is still cut off eventually.
    fn lose(&mut self, reason: Error, cancel_timeouts: bool) {
        self.core.still_producing = false;
        if cancel_timeouts {
            if let Some(call) = self.core.idle_call.take() {
                self.core.reactor.cancel(call);
            }
        }

        let ids = self.stream_ids();
        for stream_id in &ids {
            if let Some(stream) = self.core.live(&mut self.streams, *stream_id) {
                stream.connection_lost(&reason);
            }
        }
        for stream_id in ids {
            self.core.teardown_stream(stream_id);
        }

        if cancel_timeouts {
            if let Some(call) = self.core.abort_call.take() {
                self.core.reactor.cancel(call);
            }
        }
    }

    /// Carry out work that stream callbacks queued
    fn settle(&mut self) {
        loop {
            if let Some(reason) = self.core.pending_loss.take() {
                self.lose(reason, true);
                continue;
            }
            if let Some(stream_id) = self.core.drains.pop_front() {
                if let Some(stream) = self.core.live(&mut self.streams, stream_id) {
                    if stream.is_producing() {
                        stream.resume_producing(&mut self.core, &mut self.transport);
                    }
                }
                continue;
            }
            if let Some(stream_id) = self.core.removals.pop_front() {
                if let Some(mut stream) = self.streams.remove(&stream_id) {
                    stream.teardown(&mut self.core);
                }
                continue;
            }
            break;
        }
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::Send => {
                if let Some(stream_id) = self.core.send_step(&mut self.transport) {
                    if let Some(stream) = self.core.live(&mut self.streams, stream_id) {
                        stream.flow_control_blocked();
                    }
                }
            }
            Task::Pull(stream_id) => {
                if let Some(stream) = self.core.live(&mut self.streams, stream_id) {
                    stream.pull(&mut self.core, &mut self.transport);
                }
            }
            Task::IdleTimeout => self.core.timeout_connection(&mut self.transport),
            Task::ForceAbort => self.core.force_abort(&mut self.transport),
        }
    }

    /// Run every task that is due now, including ones they schedule
    pub fn run_pending(&mut self) {
        while let Some((_, task)) = self.core.reactor.pop_due() {
            self.run_task(task);
            self.settle();
        }
    }

    /// Let `by` pass, running timers at their due times
    pub fn advance(&mut self, by: Duration) {
        let target = self.core.reactor.now() + by;
        self.run_pending();

        while let Some(delay) = self.core.reactor.next_delay() {
            if self.core.reactor.now() + delay > target {
                break;
            }
            self.core.reactor.advance(delay);
            self.run_pending();
        }

        let now = self.core.reactor.now();
        if target > now {
            self.core.reactor.advance(target - now);
        }
        self.run_pending();
    }

    /// Time until the next timer, for drivers that sleep in between
    pub fn next_timeout(&self) -> Option<Duration> {
        self.core.reactor.next_delay()
    }

    /// The transport's consumer cannot take more for now
    pub fn pause_producing(&mut self) {
        self.core.consumer_paused = true;
    }

    /// The transport's consumer can take more again
    pub fn resume_producing(&mut self) {
        if !self.core.consumer_paused {
            return;
        }
        self.core.consumer_paused = false;
        self.core.flush_buffered_control(&mut self.transport);
        if self.core.sender_awaiting_resume {
            self.core.sender_awaiting_resume = false;
            self.core.schedule_send();
        }
    }

    /// The transport's consumer is gone for good
    pub fn stop_producing(&mut self) {
        self.connection_lost(Error::ConnectionLost("Producing stopped".to_string()));
    }

    /// Run `f` with a live stream's [`StreamIo`]
    pub fn with_stream<R>(&mut self, stream_id: StreamId, f: impl FnOnce(&mut StreamIo<'_>) -> R) -> Option<R> {
        if !self.core.is_live(stream_id) {
            return None;
        }
        let stream = self.streams.get_mut(&stream_id)?;
        let result = f(&mut stream.io(&mut self.core, &mut self.transport));
        self.settle();
        Some(result)
    }

    /// Deliver a stream's inbound data again, starting with what was held back
    pub fn resume_stream(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.core.live(&mut self.streams, stream_id) {
            stream.resume_producing(&mut self.core, &mut self.transport);
        }
        self.settle();
    }

    /// Hold a stream's inbound data back from its consumer
    pub fn pause_stream(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.core.live(&mut self.streams, stream_id) {
            stream.pause_producing();
        }
    }

    pub fn register_producer(&mut self, stream_id: StreamId, producer: Producer) -> Result<()> {
        self.with_stream(stream_id, |io| io.register_producer(producer))
            .unwrap_or(Err(Error::StreamNotFound(stream_id)))
    }

    pub fn unregister_producer(&mut self, stream_id: StreamId) {
        self.with_stream(stream_id, |io| io.unregister_producer());
    }

    /// Queue response bytes on a stream
    pub fn write_data(&mut self, stream_id: StreamId, data: impl Into<Bytes>) {
        let data = data.into();
        self.with_stream(stream_id, |io| io.write(data));
    }

    /// End a stream's response after its queued data
    pub fn end_request(&mut self, stream_id: StreamId) {
        self.core.end_request(stream_id);
        self.settle();
    }

    /// Reset a stream straight away with RST_STREAM(CANCEL)
    pub fn abort_request(&mut self, stream_id: StreamId) {
        self.core.abort_request(stream_id, &mut self.transport);
        self.settle();
    }

    pub fn write_headers(&mut self, stream_id: StreamId, status: u16, headers: &[(String, String)]) -> Result<()> {
        let result = self
            .core
            .write_headers(stream_id, status, headers, &mut self.transport);
        self.settle();
        result
    }

    /// Send credit left on a live stream once queued data is accounted for
    pub fn remaining_outbound_window(&self, stream_id: StreamId) -> Option<i64> {
        if !self.core.is_live(stream_id) {
            return None;
        }
        Some(self.core.remaining_outbound_window(stream_id))
    }

    /// Hand `increment` bytes of receive window back to the peer
    pub fn open_stream_window(&mut self, stream_id: StreamId, increment: usize) {
        self.core
            .open_stream_window(stream_id, increment, &mut self.transport);
        self.settle();
    }

    /// Resolves with the stream id once the stream is torn down
    ///
    /// Can be taken once per stream, before teardown.
    pub fn completion(&mut self, stream_id: StreamId) -> Option<oneshot::Receiver<StreamId>> {
        self.core.receivers.remove(&stream_id)
    }

    pub fn stream(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    pub fn has_stream(&self, stream_id: StreamId) -> bool {
        self.core.is_live(stream_id) && self.streams.contains_key(&stream_id)
    }

    /// Live stream ids in ascending order
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self
            .streams
            .keys()
            .copied()
            .filter(|&id| self.core.is_live(id))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Whether the sender loop is still running
    pub fn is_producing(&self) -> bool {
        self.core.still_producing
    }

    pub fn transport_state(&self) -> TransportState {
        self.core.state
    }

    /// Control frame bytes waiting for the transport's consumer
    pub fn buffered_control_bytes(&self) -> usize {
        self.core.control_bytes
    }

    pub fn engine(&self) -> &ProtocolEngine {
        &self.core.engine
    }

    pub fn priority(&self) -> &PriorityTree {
        &self.core.priority
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.core.config
    }

    pub fn is_secure(&self) -> bool {
        self.transport.is_secure()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.transport.peer()
    }

    pub fn host(&self) -> Option<SocketAddr> {
        self.transport.host()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
