//! Per-connection configuration

use super::error::{Error, Result};
use super::settings::Settings;
use std::time::Duration;

/// Default idle timeout before a GOAWAY is sent (12 hours)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Default grace period between GOAWAY and a forced abort
pub const DEFAULT_ABORT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default ceiling on unflushed control frame bytes
pub const DEFAULT_MAX_BUFFERED_CONTROL_FRAME_BYTES: usize = 17 * 1024;

/// Settings for one [`H2Connection`](super::H2Connection)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Inactivity before the connection is closed; `None` never times out
    pub idle_timeout: Option<Duration>,

    /// Wait after an idle GOAWAY before aborting; `None` never aborts
    pub abort_timeout: Option<Duration>,

    /// Control frame bytes that may wait for a paused transport
    pub max_buffered_control_frame_bytes: usize,

    /// Local SETTINGS sent in the preface
    pub settings: Settings,
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;

        if self.max_buffered_control_frame_bytes == 0 {
            return Err(Error::Internal(
                "Control frame buffer ceiling must be non-zero".to_string(),
            ));
        }
        if self.idle_timeout == Some(Duration::ZERO) {
            return Err(Error::Internal("Idle timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            abort_timeout: Some(DEFAULT_ABORT_TIMEOUT),
            max_buffered_control_frame_bytes: DEFAULT_MAX_BUFFERED_CONTROL_FRAME_BYTES,
            settings: Settings::server_defaults(),
        }
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or disable the idle timeout
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set or disable the forced abort after an idle GOAWAY
    pub fn abort_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.abort_timeout = timeout;
        self
    }

    pub fn max_buffered_control_frame_bytes(mut self, limit: usize) -> Self {
        self.config.max_buffered_control_frame_bytes = limit;
        self
    }

    /// Replace all local settings
    pub fn settings(mut self, settings: Settings) -> Self {
        self.config.settings = settings;
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.settings.initial_window_size = Some(size);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.settings.max_frame_size = Some(size);
        self
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.config.settings.header_table_size = Some(size);
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.config.settings.max_header_list_size = Some(size);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
