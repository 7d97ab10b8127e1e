use crate::error::Error;

/// Configuration for the I/O scheduler.
#[derive(Clone)]
pub struct Config {
    /// Shard worker configuration.
    pub worker: WorkerConfig,
    /// Operation pool size when no DMA resource is configured. With a DMA
    /// resource, the pool is sized to the resource's buffer count instead.
    pub fallback_operations: usize,
    /// Device block size in bytes, used when no DMA resource is configured
    /// or when the resource reports a block size of 0.
    pub fallback_block_size: u64,
    /// Per-operation span ceiling, in device blocks. Bounds the length of a
    /// single device operation so large requests interleave with small ones.
    pub max_span_blocks: u64,
    /// In-place retries granted to each dispatched operation when the device
    /// reports a short transfer. Bounds completion-thread re-entrancy.
    pub short_retry_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            fallback_operations: 16,
            fallback_block_size: 512,
            max_span_blocks: 1024,
            short_retry_limit: 8,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.fallback_operations == 0 {
            return Err(Error::InvalidSetup(
                "fallback_operations must be > 0".into(),
            ));
        }
        if self.fallback_block_size == 0 || !self.fallback_block_size.is_power_of_two() {
            return Err(Error::InvalidSetup(
                "fallback_block_size must be > 0 and a power of two".into(),
            ));
        }
        if self.max_span_blocks == 0 {
            return Err(Error::InvalidSetup("max_span_blocks must be > 0".into()));
        }
        Ok(())
    }
}

/// Configuration for the thread-per-shard worker model.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Number of shard worker threads. 0 = number of CPUs.
    pub threads: usize,
    /// Whether to pin each shard worker to a CPU core.
    pub pin_to_core: bool,
    /// Starting CPU core index for pinning.
    pub core_offset: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            pin_to_core: false,
            core_offset: 0,
        }
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Worker settings ──────────────────────────────────────────────

    /// Set the number of shard worker threads. 0 = number of CPUs.
    pub fn shards(mut self, n: usize) -> Self {
        self.config.worker.threads = n;
        self
    }

    /// Enable or disable CPU core pinning for shard workers.
    pub fn pin_to_core(mut self, enable: bool) -> Self {
        self.config.worker.pin_to_core = enable;
        self
    }

    /// Set the starting CPU core index for pinning.
    pub fn core_offset(mut self, offset: usize) -> Self {
        self.config.worker.core_offset = offset;
        self
    }

    // ── Pool and device settings ─────────────────────────────────────

    /// Set the operation pool size used when no DMA resource is configured.
    pub fn fallback_operations(mut self, n: usize) -> Self {
        self.config.fallback_operations = n;
        self
    }

    /// Set the block size used when the DMA resource reports none.
    pub fn fallback_block_size(mut self, bytes: u64) -> Self {
        self.config.fallback_block_size = bytes;
        self
    }

    /// Set the per-operation span ceiling in device blocks.
    pub fn max_span_blocks(mut self, blocks: u64) -> Self {
        self.config.max_span_blocks = blocks;
        self
    }

    /// Set the in-place retry budget for short transfers.
    pub fn short_retry_limit(mut self, n: u32) -> Self {
        self.config.short_retry_limit = n;
        self
    }

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Get mutable access to the underlying config.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    // ── Terminal ─────────────────────────────────────────────────────

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn builder_round_trip() {
        let config = ConfigBuilder::new()
            .shards(2)
            .fallback_operations(4)
            .fallback_block_size(4096)
            .max_span_blocks(8)
            .short_retry_limit(1)
            .build()
            .unwrap();
        assert_eq!(config.worker.threads, 2);
        assert_eq!(config.fallback_operations, 4);
        assert_eq!(config.fallback_block_size, 4096);
        assert_eq!(config.max_span_blocks, 8);
        assert_eq!(config.short_retry_limit, 1);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let result = ConfigBuilder::new().fallback_operations(0).build();
        assert!(matches!(result, Err(Error::InvalidSetup(_))));
    }

    #[test]
    fn non_power_of_two_block_size_is_rejected() {
        let result = ConfigBuilder::new().fallback_block_size(500).build();
        assert!(matches!(result, Err(Error::InvalidSetup(_))));
    }

    #[test]
    fn zero_span_is_rejected() {
        let result = ConfigBuilder::new().max_span_blocks(0).build();
        assert!(matches!(result, Err(Error::InvalidSetup(_))));
    }
}
