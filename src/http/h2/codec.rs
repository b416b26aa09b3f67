//! HTTP/2 frame encoding and decoding
//!
//! Encoders build complete frames (header plus payload) from the typed frames
//! in [`super::frames`]. On the inbound side the codec buffers partial input,
//! splits it into raw [`Frame`]s, and the `decode_*` functions turn a raw
//! frame into its typed form while enforcing the per-type length rules of
//! RFC 7540 Section 6.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::settings::Settings;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FFFFFF;

/// Decoded 9-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length
    pub length: usize,
    /// Frame type, `None` for extension types
    pub frame_type: Option<FrameType>,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID with the reserved bit cleared
    pub stream_id: u32,
}

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec {
    /// Buffer for reading
    read_buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        FrameCodec {
            read_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append received bytes to the read buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.read_buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed
    pub fn buffered(&self) -> &[u8] {
        &self.read_buffer
    }

    /// Drop `n` bytes from the front of the read buffer
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.read_buffer.len());
        self.read_buffer.advance(n);
    }

    /// Pull the next complete frame out of the read buffer
    ///
    /// Returns `Ok(None)` until a whole frame is buffered. Frames of unknown
    /// type are discarded (RFC 7540 Section 4.1). A declared length above
    /// `max_frame_size` is a FRAME_SIZE_ERROR.
    pub fn next_frame(&mut self, max_frame_size: u32) -> Result<Option<Frame>> {
        loop {
            if self.read_buffer.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }

            let mut raw = [0u8; FRAME_HEADER_SIZE];
            raw.copy_from_slice(&self.read_buffer[..FRAME_HEADER_SIZE]);
            let header = Self::decode_header(&raw);

            if header.length > max_frame_size as usize {
                return Err(Error::FrameSize(format!(
                    "Frame length {} exceeds maximum {}",
                    header.length, max_frame_size
                )));
            }

            if self.read_buffer.len() < FRAME_HEADER_SIZE + header.length {
                return Ok(None);
            }

            self.read_buffer.advance(FRAME_HEADER_SIZE);
            let payload = self.read_buffer.split_to(header.length).freeze();

            match header.frame_type {
                Some(frame_type) => {
                    return Ok(Some(Frame::new(frame_type, header.flags, header.stream_id, payload)));
                }
                None => continue,
            }
        }
    }

    /// Encode a frame header into a buffer
    pub fn encode_header(frame_type: FrameType, flags: FrameFlags, stream_id: u32, length: usize) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();

        // Stream ID (31 bits, reserved bit is 0)
        let stream_id = stream_id & 0x7FFFFFFF;
        header[5..9].copy_from_slice(&stream_id.to_be_bytes());

        header
    }

    /// Decode a frame header from bytes
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let length = ((bytes[0] as usize) << 16)
            | ((bytes[1] as usize) << 8)
            | (bytes[2] as usize);

        let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7FFFFFFF;

        FrameHeader {
            length,
            frame_type: FrameType::from_u8(bytes[3]),
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.padding.is_some() {
            flags.set(FrameFlags::PADDED);
        }

        let payload_len = frame.flow_controlled_length();
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(FrameType::Data, flags, frame.stream_id, payload_len));

        if let Some(pad_len) = frame.padding {
            buf.put_u8(pad_len);
            buf.put_slice(&frame.data);
            buf.put_bytes(0, pad_len as usize);
        } else {
            buf.put_slice(&frame.data);
        }

        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut payload_len = frame.header_block.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        if frame.priority.is_some() {
            flags.set(FrameFlags::PRIORITY);
            payload_len += 5;
        }
        if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(FrameType::Headers, flags, frame.stream_id, payload_len));

        if let Some(pad_len) = frame.padding {
            buf.put_u8(pad_len);
        }
        if let Some(priority) = &frame.priority {
            Self::put_priority(&mut buf, priority);
        }
        buf.put_slice(&frame.header_block);
        if let Some(pad_len) = frame.padding {
            buf.put_bytes(0, pad_len as usize);
        }

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());
        buf.put_slice(&Self::encode_header(
            FrameType::Continuation,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        ));
        buf.put_slice(&frame.header_block);
        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let (flags, payload) = if frame.ack {
            (FrameFlags::from_u8(FrameFlags::ACK), Bytes::new())
        } else {
            (FrameFlags::empty(), frame.settings.encode_payload())
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_slice(&Self::encode_header(FrameType::Settings, flags, 0, payload.len()));
        buf.put_slice(&payload);
        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        buf.put_slice(&Self::encode_header(FrameType::Ping, flags, 0, 8));
        buf.put_slice(&frame.data);
        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let payload_len = 8 + frame.debug_data.len();

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(FrameType::Goaway, FrameFlags::empty(), 0, payload_len));
        buf.put_u32(frame.last_stream_id & 0x7FFFFFFF);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);
        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(FrameType::WindowUpdate, FrameFlags::empty(), frame.stream_id, 4));
        buf.put_u32(frame.size_increment & 0x7FFFFFFF);
        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(FrameType::RstStream, FrameFlags::empty(), frame.stream_id, 4));
        buf.put_u32(frame.error_code.as_u32());
        buf.freeze()
    }

    /// Encode a PRIORITY frame
    pub fn encode_priority_frame(frame: &PriorityFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 5);
        buf.put_slice(&Self::encode_header(FrameType::Priority, FrameFlags::empty(), frame.stream_id, 5));
        Self::put_priority(&mut buf, &frame.priority);
        buf.freeze()
    }

    fn put_priority(buf: &mut BytesMut, priority: &PrioritySpec) {
        let mut dep = priority.stream_dependency & 0x7FFFFFFF;
        if priority.exclusive {
            dep |= 0x80000000;
        }
        buf.put_u32(dep);
        buf.put_u8(priority.weight);
    }

    /// Decode a DATA frame, stripping padding
    pub fn decode_data(frame: &Frame) -> Result<DataFrame> {
        let mut payload = frame.payload.clone();
        let padding = Self::strip_padding(frame, &mut payload)?;

        Ok(DataFrame {
            stream_id: frame.stream_id,
            data: payload,
            end_stream: frame.flags.is_end_stream(),
            padding,
        })
    }

    /// Decode a HEADERS frame, stripping padding and priority fields
    pub fn decode_headers(frame: &Frame) -> Result<HeadersFrame> {
        let mut payload = frame.payload.clone();
        let padding = Self::strip_padding(frame, &mut payload)?;

        let priority = if frame.flags.is_priority() {
            if payload.len() < 5 {
                return Err(Error::FrameSize("HEADERS too short for priority fields".to_string()));
            }
            Some(Self::get_priority(&mut payload))
        } else {
            None
        };

        Ok(HeadersFrame {
            stream_id: frame.stream_id,
            header_block: payload,
            end_stream: frame.flags.is_end_stream(),
            end_headers: frame.flags.is_end_headers(),
            priority,
            padding,
        })
    }

    /// Decode a CONTINUATION frame
    pub fn decode_continuation(frame: &Frame) -> Result<ContinuationFrame> {
        Ok(ContinuationFrame {
            stream_id: frame.stream_id,
            header_block: frame.payload.clone(),
            end_headers: frame.flags.is_end_headers(),
        })
    }

    /// Decode a PRIORITY frame
    pub fn decode_priority(frame: &Frame) -> Result<PriorityFrame> {
        Self::expect_length(frame, 5)?;
        let mut payload = frame.payload.clone();
        Ok(PriorityFrame {
            stream_id: frame.stream_id,
            priority: Self::get_priority(&mut payload),
        })
    }

    /// Decode a RST_STREAM frame
    pub fn decode_rst_stream(frame: &Frame) -> Result<RstStreamFrame> {
        Self::expect_length(frame, 4)?;
        let mut payload = frame.payload.clone();
        Ok(RstStreamFrame {
            stream_id: frame.stream_id,
            error_code: ErrorCode::from_wire(payload.get_u32()),
        })
    }

    /// Decode a SETTINGS frame
    pub fn decode_settings(frame: &Frame) -> Result<SettingsFrame> {
        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Err(Error::FrameSize("SETTINGS ACK with payload".to_string()));
            }
            return Ok(SettingsFrame::ack());
        }
        if frame.payload.len() % 6 != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS length {} not a multiple of 6",
                frame.payload.len()
            )));
        }
        Ok(SettingsFrame::new(Settings::decode_payload(&frame.payload)?))
    }

    /// Decode a PING frame
    pub fn decode_ping(frame: &Frame) -> Result<PingFrame> {
        Self::expect_length(frame, 8)?;
        let mut data = [0u8; 8];
        data.copy_from_slice(&frame.payload);
        Ok(PingFrame {
            ack: frame.flags.is_ack(),
            data,
        })
    }

    /// Decode a GOAWAY frame
    pub fn decode_goaway(frame: &Frame) -> Result<GoawayFrame> {
        if frame.payload.len() < 8 {
            return Err(Error::FrameSize(format!("GOAWAY length {} below 8", frame.payload.len())));
        }
        let mut payload = frame.payload.clone();
        let last_stream_id = payload.get_u32() & 0x7FFFFFFF;
        let error_code = ErrorCode::from_wire(payload.get_u32());
        Ok(GoawayFrame::new(last_stream_id, error_code, payload))
    }

    /// Decode a WINDOW_UPDATE frame
    pub fn decode_window_update(frame: &Frame) -> Result<WindowUpdateFrame> {
        Self::expect_length(frame, 4)?;
        let mut payload = frame.payload.clone();
        Ok(WindowUpdateFrame::new(frame.stream_id, payload.get_u32() & 0x7FFFFFFF))
    }

    fn expect_length(frame: &Frame, length: usize) -> Result<()> {
        if frame.payload.len() != length {
            return Err(Error::FrameSize(format!(
                "{} length {} (expected {})",
                frame.frame_type.name(),
                frame.payload.len(),
                length
            )));
        }
        Ok(())
    }

    fn strip_padding(frame: &Frame, payload: &mut Bytes) -> Result<Option<u8>> {
        if !frame.flags.is_padded() {
            return Ok(None);
        }
        if payload.is_empty() {
            return Err(Error::FrameSize(format!("Padded {} without pad length", frame.frame_type.name())));
        }
        let pad_len = payload.get_u8();
        if pad_len as usize > payload.len() {
            return Err(Error::Protocol(format!(
                "Padding {} exceeds {} payload",
                pad_len,
                frame.frame_type.name()
            )));
        }
        payload.truncate(payload.len() - pad_len as usize);
        Ok(Some(pad_len))
    }

    fn get_priority(payload: &mut Bytes) -> PrioritySpec {
        let dep = payload.get_u32();
        let weight = payload.get_u8();
        PrioritySpec::new(dep & 0x7FFFFFFF, dep & 0x80000000 != 0, weight)
    }

    /// Write a frame to a writer (generic over any Write)
    pub fn write_frame<W: Write>(writer: &mut W, frame_data: &[u8]) -> io::Result<()> {
        writer.write_all(frame_data)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one frame from a blocking reader, skipping unknown types
    pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
        loop {
            let mut raw = [0u8; FRAME_HEADER_SIZE];
            reader.read_exact(&mut raw)?;
            let header = Self::decode_header(&raw);

            if header.length > MAX_FRAME_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Frame payload too large: {}", header.length),
                ));
            }

            let mut payload = vec![0u8; header.length];
            reader.read_exact(&mut payload)?;

            if let Some(frame_type) = header.frame_type {
                return Ok(Frame::new(frame_type, header.flags, header.stream_id, Bytes::from(payload)));
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
