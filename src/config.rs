//! Run configuration for scanning and copying.

use std::sync::OnceLock;

use crate::buffer::BufferPlan;
use crate::catalog::Catalog;
use crate::error::ConfigError;

/// Default read buffer: 32 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;
pub const MIN_BUFFER_SIZE: usize = 1024;
pub const MAX_BUFFER_SIZE: usize = 256 * 1024 * 1024;

/// Worker count used when none is configured: half the visible CPUs, at
/// least one. `ROMSHIFT_THREADS` overrides it; read once per process.
pub fn default_threads() -> usize {
    static THREADS: OnceLock<usize> = OnceLock::new();
    *THREADS.get_or_init(|| {
        std::env::var("ROMSHIFT_THREADS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get() / 2)
                    .unwrap_or(1)
                    .max(1)
            })
    })
}

fn validate_common(threads: usize, buffer_size: usize) -> Result<(), ConfigError> {
    if threads == 0 {
        return Err(ConfigError::ZeroThreads);
    }
    if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&buffer_size) {
        return Err(ConfigError::BufferSize(buffer_size));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub threads: usize,
    /// Read buffer per worker, also the header verification window
    pub buffer_size: usize,
    /// All header rules fit the default window, so no larger buffer is needed
    pub lazy_header_detection: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            threads: default_threads(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            lazy_header_detection: true,
        }
    }
}

impl ScanConfig {
    /// Size buffers for a catalog and its header rules. Computed once per run.
    pub fn for_catalog(catalog: &Catalog) -> Self {
        let plan = BufferPlan::for_catalog(catalog);
        ScanConfig {
            buffer_size: plan.buffer_size,
            lazy_header_detection: plan.lazy,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_common(self.threads, self.buffer_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyConfig {
    pub threads: usize,
    pub buffer_size: usize,
    /// Replace destinations that already exist instead of skipping them
    pub overwrite: bool,
}

impl Default for CopyConfig {
    fn default() -> Self {
        CopyConfig {
            threads: default_threads(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            overwrite: false,
        }
    }
}

impl CopyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_common(self.threads, self.buffer_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(default_threads() >= 1);
        assert!(ScanConfig::default().validate().is_ok());
        assert!(CopyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero = CopyConfig {
            threads: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::ZeroThreads)));

        let tiny = ScanConfig {
            buffer_size: 512,
            ..Default::default()
        };
        assert!(matches!(tiny.validate(), Err(ConfigError::BufferSize(512))));

        let huge = ScanConfig {
            buffer_size: MAX_BUFFER_SIZE + 1,
            ..Default::default()
        };
        assert!(huge.validate().is_err());
    }
}
