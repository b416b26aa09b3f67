//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 7540 Section 5.2.
//!
//! Two halves: [`FlowControlWindow`] tracks how much we may still send, and
//! [`WindowManager`] tracks how much the peer may still send us and decides
//! when to hand credit back with WINDOW_UPDATE.

use super::error::{Error, Result};
use super::settings::MAX_WINDOW_SIZE;
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Outbound flow control window
///
/// The window can go negative when the peer shrinks SETTINGS_INITIAL_WINDOW_SIZE
/// below what is already in flight.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// Initial window size
    initial_size: u32,
    /// Current window size (can be negative if over-committed)
    current_size: i64,
}

impl FlowControlWindow {
    /// Create a new flow control window with default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a new flow control window with specified initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Check if window can send specified amount
    pub fn can_send(&self, amount: usize) -> bool {
        self.current_size >= amount as i64
    }

    /// Take exactly `amount` bytes of credit
    pub fn reserve(&mut self, amount: usize) -> Result<()> {
        if !self.can_send(amount) {
            return Err(Error::FlowControl(format!(
                "Cannot send {} bytes with a window of {}",
                amount, self.current_size
            )));
        }
        self.current_size -= amount as i64;
        Ok(())
    }

    /// Increase window size (WINDOW_UPDATE)
    ///
    /// Returns the new window size
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "Window update increment must be non-zero".to_string(),
            ));
        }

        let new_size = self.current_size + increment as i64;

        // RFC 7540 Section 6.9.1
        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Update initial window size from SETTINGS
    ///
    /// The difference between old and new initial size is applied to the
    /// current window (RFC 7540 Section 6.9.2).
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;

        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound window bookkeeping
///
/// Received bytes shrink the window straight away; the application later
/// reports them processed and the manager batches those reports into
/// WINDOW_UPDATE increments.
#[derive(Debug, Clone)]
pub struct WindowManager {
    max_window_size: u32,
    current_window_size: i64,
    bytes_processed: u32,
}

impl WindowManager {
    /// Create a manager for a window that starts full
    pub fn new(max_window_size: u32) -> Self {
        WindowManager {
            max_window_size,
            current_window_size: max_window_size as i64,
            bytes_processed: 0,
        }
    }

    /// Credit the peer still has
    pub fn current_window_size(&self) -> i64 {
        self.current_window_size
    }

    /// Configured window size
    pub fn max_window_size(&self) -> u32 {
        self.max_window_size
    }

    /// Charge received bytes against the window
    pub fn window_consumed(&mut self, size: usize) -> Result<()> {
        self.current_window_size -= size as i64;
        if self.current_window_size < 0 {
            return Err(Error::FlowControl(format!(
                "Peer overran window by {} bytes",
                -self.current_window_size
            )));
        }
        Ok(())
    }

    /// Report bytes as processed, returning the increment to announce if any
    ///
    /// An update goes out when the window is exhausted and a reasonable
    /// amount has been processed, or once half the window has been processed.
    pub fn process_bytes(&mut self, size: usize) -> Option<u32> {
        let size = size.min(MAX_WINDOW_SIZE as usize) as u32;
        self.bytes_processed = self.bytes_processed.saturating_add(size);

        let max = self.max_window_size;
        let exhausted_threshold = std::cmp::min(1024, max / 4);

        let should_update = (self.current_window_size <= 0 && self.bytes_processed > exhausted_threshold)
            || self.bytes_processed >= max / 2;
        if !should_update {
            return None;
        }

        let headroom = (max as i64 - self.current_window_size).max(0) as u32;
        let increment = std::cmp::min(self.bytes_processed, headroom);
        self.bytes_processed = 0;

        if increment == 0 {
            return None;
        }
        self.current_window_size += increment as i64;
        Some(increment)
    }
}
