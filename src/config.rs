//! Engine configuration (§6).
//!
//! All knobs are validated eagerly in [`EngineConfigBuilder::build`] so an
//! invalid configuration never gets as far as spawning a thread.

use crate::error::{EngineError, Result};

/// Validated configuration for a [`crate::manager::ConnectionManager`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) backlog: u32,
    pub(crate) n_io_threads: usize,
    pub(crate) minimum_buffer_size: usize,
    pub(crate) maximum_buffer_size: usize,
    pub(crate) select_timeout_ms: u64,
    pub(crate) write_high_water_mark: usize,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn n_io_threads(&self) -> usize {
        self.n_io_threads
    }

    pub fn minimum_buffer_size(&self) -> usize {
        self.minimum_buffer_size
    }

    pub fn maximum_buffer_size(&self) -> usize {
        self.maximum_buffer_size
    }

    pub fn select_timeout_ms(&self) -> u64 {
        self.select_timeout_ms
    }

    pub fn write_high_water_mark(&self) -> usize {
        self.write_high_water_mark
    }
}

/// Builder for [`EngineConfig`]. Defaults are chosen to be usable for tests
/// and small deployments; production callers are expected to tune
/// `n_io_threads` and the buffer bounds for their workload.
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    backlog: u32,
    n_io_threads: usize,
    minimum_buffer_size: usize,
    maximum_buffer_size: usize,
    select_timeout_ms: u64,
    write_high_water_mark: usize,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        EngineConfigBuilder {
            backlog: 1024,
            n_io_threads: 1,
            minimum_buffer_size: 4 * 1024,
            maximum_buffer_size: 1024 * 1024,
            select_timeout_ms: 250,
            write_high_water_mark: 256 * 1024,
        }
    }
}

impl EngineConfigBuilder {
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn n_io_threads(mut self, n: usize) -> Self {
        self.n_io_threads = n;
        self
    }

    pub fn minimum_buffer_size(mut self, size: usize) -> Self {
        self.minimum_buffer_size = size;
        self
    }

    pub fn maximum_buffer_size(mut self, size: usize) -> Self {
        self.maximum_buffer_size = size;
        self
    }

    pub fn select_timeout_ms(mut self, ms: u64) -> Self {
        self.select_timeout_ms = ms;
        self
    }

    pub fn write_high_water_mark(mut self, bytes: usize) -> Self {
        self.write_high_water_mark = bytes;
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        if self.n_io_threads == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "n_io_threads must be at least 1".into(),
            });
        }
        if self.backlog == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "backlog must be at least 1".into(),
            });
        }
        if self.minimum_buffer_size == 0 || self.minimum_buffer_size > self.maximum_buffer_size {
            return Err(EngineError::InvalidConfig {
                reason: format!(
                    "minimum_buffer_size ({}) must be nonzero and <= maximum_buffer_size ({})",
                    self.minimum_buffer_size, self.maximum_buffer_size
                ),
            });
        }
        Ok(EngineConfig {
            backlog: self.backlog,
            n_io_threads: self.n_io_threads,
            minimum_buffer_size: self.minimum_buffer_size,
            maximum_buffer_size: self.maximum_buffer_size,
            select_timeout_ms: self.select_timeout_ms,
            write_high_water_mark: self.write_high_water_mark,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::builder().build().is_ok());
    }

    #[test]
    fn rejects_zero_io_threads() {
        let err = EngineConfig::builder().n_io_threads(0).build().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_inverted_buffer_bounds() {
        let err = EngineConfig::builder()
            .minimum_buffer_size(1024)
            .maximum_buffer_size(512)
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig { .. }));
    }
}
