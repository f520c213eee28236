//! Runtime configuration for transfers

use std::time::Duration;

/// Default transfer block size (1 MB)
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Minimum transfer block size (4 KB)
pub const MIN_BLOCK_SIZE: usize = 4 * 1024;

/// Maximum transfer block size (16 MB)
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Default bound on in-flight send/receive buffers
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Default retry attempts for transient disk errors
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between disk retries
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// Transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes per transfer block; must be a multiple of the device sector
    /// size
    pub block_size: usize,

    /// Backpressure bound: blocks in flight before the pipeline waits on
    /// completions
    pub max_in_flight: usize,

    /// Retry attempts for transient disk errors; socket errors are never
    /// retried
    pub retry_attempts: u32,

    /// Delay between disk retries
    pub retry_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl TransferConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set block size (clamped to valid range)
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE);
        self
    }

    /// Set the in-flight buffer bound (at least 1)
    pub fn max_in_flight(mut self, bound: usize) -> Self {
        self.max_in_flight = bound.max(1);
        self
    }

    /// Set disk retry attempts
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the delay between disk retries
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
