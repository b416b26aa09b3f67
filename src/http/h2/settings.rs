//! SETTINGS parameters and their payload encoding
//!
//! Both ends' settings are kept as [`Settings`]; which ones are in force is
//! tracked by the protocol engine.

use super::error::{Error, Result};
use super::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Largest legal window size (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFFFFFF;

/// Upper bound of SETTINGS_MAX_FRAME_SIZE (2^24 - 1)
pub const MAX_MAX_FRAME_SIZE: u32 = 0x00FFFFFF;

/// HTTP/2 settings parameters (RFC 7540 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
    EnableConnectProtocol = 0x8,
}

impl SettingsParameter {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            0x8 => Some(SettingsParameter::EnableConnectProtocol),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
            SettingsParameter::EnableConnectProtocol => "ENABLE_CONNECT_PROTOCOL",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// HTTP/2 settings
///
/// Every field is optional: `None` means the parameter was not sent and the
/// RFC default applies. The `get_*` accessors resolve that default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Header table size (default: 4096)
    pub header_table_size: Option<u32>,

    /// Enable server push (default: true)
    pub enable_push: Option<bool>,

    /// Maximum concurrent streams (default: unlimited)
    pub max_concurrent_streams: Option<u32>,

    /// Initial window size (default: 65535)
    pub initial_window_size: Option<u32>,

    /// Maximum frame size (default: 16384, range: 16384-16777215)
    pub max_frame_size: Option<u32>,

    /// Maximum header list size (default: unlimited)
    pub max_header_list_size: Option<u32>,

    /// Enable CONNECT protocol (default: false)
    pub enable_connect_protocol: Option<bool>,
}

impl Settings {
    pub fn new() -> Self {
        Settings::default()
    }

    /// Settings a server advertises unless configured otherwise
    ///
    /// SETTINGS_ENABLE_PUSH is left out: it only has meaning when sent by a client.
    pub fn server_defaults() -> Self {
        Settings {
            header_table_size: Some(DEFAULT_HEADER_TABLE_SIZE),
            enable_push: None,
            max_concurrent_streams: Some(100),
            initial_window_size: Some(DEFAULT_INITIAL_WINDOW_SIZE),
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
            max_header_list_size: Some(65536),
            enable_connect_protocol: None,
        }
    }

    pub fn get_header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    pub fn get_enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    pub fn get_max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn get_max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    /// Validate settings values
    ///
    /// An out-of-range initial window size is a FLOW_CONTROL_ERROR
    /// (RFC 7540 Section 6.5.2); everything else is a PROTOCOL_ERROR.
    pub fn validate(&self) -> Result<()> {
        if let Some(initial_window_size) = self.initial_window_size {
            if initial_window_size > MAX_WINDOW_SIZE {
                return Err(Error::FlowControl(format!(
                    "Initial window size {} exceeds maximum (2^31-1)",
                    initial_window_size
                )));
            }
        }

        if let Some(max_frame_size) = self.max_frame_size {
            if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&max_frame_size) {
                return Err(Error::InvalidSettings(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    max_frame_size
                )));
            }
        }

        Ok(())
    }

    /// Apply a received SETTINGS frame on top of the settings in force
    pub fn merge(&mut self, other: &Settings) {
        if other.header_table_size.is_some() {
            self.header_table_size = other.header_table_size;
        }
        if other.enable_push.is_some() {
            self.enable_push = other.enable_push;
        }
        if other.max_concurrent_streams.is_some() {
            self.max_concurrent_streams = other.max_concurrent_streams;
        }
        if other.initial_window_size.is_some() {
            self.initial_window_size = other.initial_window_size;
        }
        if other.max_frame_size.is_some() {
            self.max_frame_size = other.max_frame_size;
        }
        if other.max_header_list_size.is_some() {
            self.max_header_list_size = other.max_header_list_size;
        }
        if other.enable_connect_protocol.is_some() {
            self.enable_connect_protocol = other.enable_connect_protocol;
        }
    }

    /// Encode the parameters that are set as a SETTINGS payload
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6 * 7);

        let mut put = |param: SettingsParameter, value: Option<u32>| {
            if let Some(value) = value {
                buf.put_u16(param.as_u16());
                buf.put_u32(value);
            }
        };

        put(SettingsParameter::HeaderTableSize, self.header_table_size);
        put(SettingsParameter::EnablePush, self.enable_push.map(u32::from));
        put(SettingsParameter::MaxConcurrentStreams, self.max_concurrent_streams);
        put(SettingsParameter::InitialWindowSize, self.initial_window_size);
        put(SettingsParameter::MaxFrameSize, self.max_frame_size);
        put(SettingsParameter::MaxHeaderListSize, self.max_header_list_size);
        put(SettingsParameter::EnableConnectProtocol, self.enable_connect_protocol.map(u32::from));

        buf.freeze()
    }

    /// Decode and validate a SETTINGS payload
    ///
    /// Unknown parameters are ignored (RFC 7540 Section 6.5.2). When a
    /// parameter repeats, the last value wins.
    pub fn decode_payload(mut payload: &[u8]) -> Result<Settings> {
        let mut settings = Settings::new();

        while payload.remaining() >= 6 {
            let id = payload.get_u16();
            let value = payload.get_u32();

            match SettingsParameter::from_u16(id) {
                Some(SettingsParameter::HeaderTableSize) => settings.header_table_size = Some(value),
                Some(SettingsParameter::EnablePush) => {
                    settings.enable_push = Some(Self::decode_flag(SettingsParameter::EnablePush, value)?)
                }
                Some(SettingsParameter::MaxConcurrentStreams) => settings.max_concurrent_streams = Some(value),
                Some(SettingsParameter::InitialWindowSize) => settings.initial_window_size = Some(value),
                Some(SettingsParameter::MaxFrameSize) => settings.max_frame_size = Some(value),
                Some(SettingsParameter::MaxHeaderListSize) => settings.max_header_list_size = Some(value),
                Some(SettingsParameter::EnableConnectProtocol) => {
                    settings.enable_connect_protocol =
                        Some(Self::decode_flag(SettingsParameter::EnableConnectProtocol, value)?)
                }
                None => {}
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn decode_flag(param: SettingsParameter, value: u32) -> Result<bool> {
        match value {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::InvalidSettings(format!("{} must be 0 or 1, got {}", param, other))),
        }
    }
}

/// Builder for HTTP/2 settings
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings::new(),
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    /// Set enable push
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    /// Set max header list size
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
