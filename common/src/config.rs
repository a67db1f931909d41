//! Configuration types for runtime and execution settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Transfer tuning shared by push and pull
///
/// The rate limit is not part of it, every transfer carries its own.
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Size of the buffer used to move file data (bytes)
    pub buffer_size: usize,
    /// Progress display and summary for each completed file
    pub progress: ProgressSettings,
}

pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            progress: ProgressSettings::default(),
        }
    }
}

impl TransferConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("buffer_size must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressSettings {
    /// Draw a progress bar on stderr while the file is moving
    pub show_bar: bool,
    /// Print the average rate line once a file completes
    pub print_summary: bool,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_transfer_config_is_valid() {
        assert!(TransferConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let config = TransferConfig {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("buffer_size"));
    }
}
