//! HTTP/2 stream states
//!
//! This module implements the stream state machine of RFC 7540 Section 5.1
//! as the protocol engine sees it: one [`StreamRecord`] per open stream,
//! holding its state and both flow-control windows, kept in a
//! [`StreamTable`] that also enforces stream-id ordering and the
//! concurrency limit.

use super::error::{Error, Result};
use super::flow_control::{FlowControlWindow, WindowManager};
use super::StreamId;
use std::collections::HashMap;

/// Stream state as defined in RFC 7540 Section 5.1
///
/// The reserved states are absent: this server never sends PUSH_PROMISE and
/// rejects it from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// Engine-side record of one stream
#[derive(Debug)]
pub struct StreamRecord {
    id: StreamId,
    state: StreamState,
    send_window: FlowControlWindow,
    recv_window: WindowManager,
    surfaced: bool,
}

impl StreamRecord {
    /// Create an idle stream
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        StreamRecord {
            id,
            state: StreamState::Idle,
            send_window: FlowControlWindow::with_initial_size(send_window),
            recv_window: WindowManager::new(recv_window),
            surfaced: false,
        }
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether the application has been told about this stream
    pub fn is_surfaced(&self) -> bool {
        self.surfaced
    }

    /// Mark the stream as reported to the application
    pub fn set_surfaced(&mut self) {
        self.surfaced = true;
    }

    /// Outbound window
    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    /// Mutable outbound window
    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send_window
    }

    /// Mutable inbound window
    pub fn recv_window_mut(&mut self) -> &mut WindowManager {
        &mut self.recv_window
    }

    /// Process the request HEADERS that open the stream
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
                Ok(())
            }
            _ => Err(Error::Protocol(format!(
                "Cannot open stream {} in state {:?}",
                self.id, self.state
            ))),
        }
    }

    /// Process trailing HEADERS, which must end the stream
    pub fn recv_trailers(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }
        if !end_stream {
            return Err(Error::Protocol(format!(
                "Trailers on stream {} without END_STREAM",
                self.id
            )));
        }
        self.recv_end_stream();
        Ok(())
    }

    /// Process an inbound DATA frame of `flow_controlled_length` bytes
    pub fn recv_data(&mut self, flow_controlled_length: usize, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }

        self.recv_window.window_consumed(flow_controlled_length)?;

        if end_stream {
            self.recv_end_stream();
        }
        Ok(())
    }

    fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// Prepare to send HEADERS
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::StreamClosed(self.id));
        }
        if end_stream {
            self.send_end_stream();
        }
        Ok(())
    }

    /// Prepare to send DATA, charging the stream window
    pub fn send_data(&mut self, data_len: usize, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::StreamClosed(self.id));
        }

        self.send_window.reserve(data_len)?;

        if end_stream {
            self.send_end_stream();
        }
        Ok(())
    }

    fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Reset the stream
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
    }
}

/// Table of open streams
///
/// Closed streams are removed; anything at or below the highest id the peer
/// has used and not in the table is therefore closed.
#[derive(Debug)]
pub struct StreamTable {
    streams: HashMap<StreamId, StreamRecord>,
    highest_inbound_id: StreamId,
    max_concurrent_streams: Option<u32>,
}

impl StreamTable {
    /// Create an empty table
    pub fn new(max_concurrent_streams: Option<u32>) -> Self {
        StreamTable {
            streams: HashMap::new(),
            highest_inbound_id: 0,
            max_concurrent_streams,
        }
    }

    /// Get maximum concurrent streams
    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Highest stream id the peer has opened
    pub fn highest_inbound_id(&self) -> StreamId {
        self.highest_inbound_id
    }

    /// Whether `stream_id` has never been used
    pub fn is_idle(&self, stream_id: StreamId) -> bool {
        stream_id % 2 == 0 || stream_id > self.highest_inbound_id
    }

    /// Register a stream the peer is opening
    ///
    /// A non-increasing or even id is a connection error. Exceeding the
    /// concurrency limit is `TooManyStreams`; the id still counts as used.
    pub fn open_inbound(&mut self, stream_id: StreamId, send_window: u32, recv_window: u32) -> Result<&mut StreamRecord> {
        if stream_id % 2 == 0 {
            return Err(Error::Protocol(format!("Client opened even stream {}", stream_id)));
        }
        if stream_id <= self.highest_inbound_id {
            return Err(Error::Protocol(format!(
                "Stream {} not above last stream {}",
                stream_id, self.highest_inbound_id
            )));
        }
        self.highest_inbound_id = stream_id;

        if let Some(max) = self.max_concurrent_streams {
            if self.active_stream_count() >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }

        Ok(self
            .streams
            .entry(stream_id)
            .or_insert_with(|| StreamRecord::new(stream_id, send_window, recv_window)))
    }

    /// Get a stream by ID
    pub fn get(&self, stream_id: StreamId) -> Option<&StreamRecord> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_mut(&mut self, stream_id: StreamId) -> Option<&mut StreamRecord> {
        self.streams.get_mut(&stream_id)
    }

    /// Remove a stream
    pub fn remove(&mut self, stream_id: StreamId) -> Option<StreamRecord> {
        self.streams.remove(&stream_id)
    }

    /// Remove the stream if it reached the closed state
    pub fn remove_if_closed(&mut self, stream_id: StreamId) {
        if self.streams.get(&stream_id).is_some_and(|s| s.state().is_closed()) {
            self.streams.remove(&stream_id);
        }
    }

    /// Get number of streams that are not closed
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    /// Iterate over all records
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StreamRecord> {
        self.streams.values_mut()
    }

    /// Get all stream IDs
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }
}
