//! # Buffer Configuration
//!
//! `BufferConfig` is the configuration set consumed when a `BufferManager` is
//! initialized. Every setting is optional and falls back to the defaults in
//! [`super::constants`].
//!
//! ## Builder Pattern
//!
//! Settings are chained before the config is handed to the manager:
//!
//! ```ignore
//! let config = BufferConfig::new()
//!     .memory_available(64 * 1024 * 1024)
//!     .processor_batch_size(256)
//!     .storage_directory("/var/tmp/querybuf");
//!
//! let manager = BufferManager::new(config)?;
//! ```
//!
//! ## Property Form
//!
//! Hosts that carry configuration as flat string properties can use
//! [`BufferConfig::from_properties`]:
//!
//! | Key                                 | Default  | Unit        |
//! |-------------------------------------|----------|-------------|
//! | `buffer.memory_available`           | 128MB    | bytes, `KB`/`MB`/`GB` suffix, or `auto` |
//! | `buffer.session_use_percentage`     | 100      | percent     |
//! | `buffer.active_memory_threshold`    | 75       | percent     |
//! | `buffer.management_interval`        | 1000     | ms          |
//! | `buffer.connector_batch_size`       | 1000     | rows        |
//! | `buffer.processor_batch_size`       | 500      | rows        |
//! | `buffer.storage_directory`          | (none)   | path        |
//! | `buffer.max_open_files`             | 10       | handles     |
//! | `buffer.max_file_size`              | 2048MB   | bytes or suffix |
//! | `buffer.log_stats_interval`         | 0 (off)  | ms          |
//! | `buffer.lob_cleanup_batch`          | 16       | entries     |
//! | `buffer.location`                   | (none)   | string      |
//!
//! Unknown keys are ignored so that a host can pass its whole property set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{bail, ensure, Result, WrapErr};

use super::constants::*;

/// How the total memory budget is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimit {
    /// A fixed number of bytes.
    Bytes(usize),
    /// A share of system RAM, detected at initialization.
    Auto,
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    memory_limit: MemoryLimit,
    session_use_percentage: usize,
    active_memory_threshold: usize,
    management_interval: Duration,
    connector_batch_size: usize,
    processor_batch_size: usize,
    storage_directory: Option<PathBuf>,
    max_open_files: usize,
    max_file_size: u64,
    log_stats_interval: Option<Duration>,
    lob_cleanup_batch: usize,
    location: Option<String>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferConfig {
    pub fn new() -> Self {
        Self {
            memory_limit: MemoryLimit::Bytes(DEFAULT_MEMORY_AVAILABLE),
            session_use_percentage: DEFAULT_SESSION_USE_PERCENTAGE,
            active_memory_threshold: DEFAULT_ACTIVE_MEMORY_THRESHOLD,
            management_interval: Duration::from_millis(DEFAULT_MANAGEMENT_INTERVAL_MS),
            connector_batch_size: DEFAULT_CONNECTOR_BATCH_SIZE,
            processor_batch_size: DEFAULT_PROCESSOR_BATCH_SIZE,
            storage_directory: None,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            log_stats_interval: None,
            lob_cleanup_batch: DEFAULT_LOB_CLEANUP_BATCH,
            location: None,
        }
    }

    /// Sets the total memory budget in bytes.
    pub fn memory_available(mut self, bytes: usize) -> Self {
        self.memory_limit = MemoryLimit::Bytes(bytes);
        self
    }

    /// Sizes the budget from system RAM at initialization.
    pub fn memory_auto(mut self) -> Self {
        self.memory_limit = MemoryLimit::Auto;
        self
    }

    /// Sets the share of the budget (1..=100) a single group may occupy.
    pub fn session_use_percentage(mut self, percent: usize) -> Self {
        self.session_use_percentage = percent;
        self
    }

    /// Sets the usage percentage (1..=100) above which batches are spilled.
    pub fn active_memory_threshold(mut self, percent: usize) -> Self {
        self.active_memory_threshold = percent;
        self
    }

    pub fn management_interval(mut self, interval: Duration) -> Self {
        self.management_interval = interval;
        self
    }

    pub fn connector_batch_size(mut self, rows: usize) -> Self {
        self.connector_batch_size = rows;
        self
    }

    pub fn processor_batch_size(mut self, rows: usize) -> Self {
        self.processor_batch_size = rows;
        self
    }

    /// Enables the file tier, spilling into `path`.
    pub fn storage_directory<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.storage_directory = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn max_open_files(mut self, count: usize) -> Self {
        self.max_open_files = count;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Emits a stats line at most once per `interval`. A zero interval disables it.
    pub fn log_stats_interval(mut self, interval: Duration) -> Self {
        self.log_stats_interval = if interval.is_zero() {
            None
        } else {
            Some(interval)
        };
        self
    }

    /// Bounds the number of reclaimed LOB buffers released per cleanup call.
    pub fn lob_cleanup_batch(mut self, entries: usize) -> Self {
        self.lob_cleanup_batch = entries;
        self
    }

    /// Location tag attached to every tuple source id minted by the manager.
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builds a config from flat string properties.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::new();

        for (key, value) in properties {
            let key = key.as_ref();
            let value = value.as_ref().trim();

            match key {
                "buffer.memory_available" => {
                    if value.eq_ignore_ascii_case("auto") {
                        config.memory_limit = MemoryLimit::Auto;
                    } else {
                        config.memory_limit = MemoryLimit::Bytes(parse_size(key, value)? as usize);
                    }
                }
                "buffer.session_use_percentage" => {
                    config.session_use_percentage = parse_number(key, value)? as usize;
                }
                "buffer.active_memory_threshold" => {
                    config.active_memory_threshold = parse_number(key, value)? as usize;
                }
                "buffer.management_interval" => {
                    config.management_interval = Duration::from_millis(parse_number(key, value)?);
                }
                "buffer.connector_batch_size" => {
                    config.connector_batch_size = parse_number(key, value)? as usize;
                }
                "buffer.processor_batch_size" => {
                    config.processor_batch_size = parse_number(key, value)? as usize;
                }
                "buffer.storage_directory" => {
                    if !value.is_empty() {
                        config.storage_directory = Some(PathBuf::from(value));
                    }
                }
                "buffer.max_open_files" => {
                    config.max_open_files = parse_number(key, value)? as usize;
                }
                "buffer.max_file_size" => {
                    config.max_file_size = parse_size(key, value)?;
                }
                "buffer.log_stats_interval" => {
                    config = config.log_stats_interval(Duration::from_millis(parse_number(key, value)?));
                }
                "buffer.lob_cleanup_batch" => {
                    config.lob_cleanup_batch = parse_number(key, value)? as usize;
                }
                "buffer.location" => {
                    if !value.is_empty() {
                        config.location = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }

        Ok(config)
    }

    /// Checks ranges. Called by the manager before anything is allocated.
    pub fn validate(&self) -> Result<()> {
        if let MemoryLimit::Bytes(bytes) = self.memory_limit {
            ensure!(
                bytes >= MIN_MEMORY_AVAILABLE,
                "memory_available {} is below the minimum of {} bytes",
                bytes,
                MIN_MEMORY_AVAILABLE
            );
        }
        ensure!(
            (1..=100).contains(&self.session_use_percentage),
            "session_use_percentage {} must be within 1..=100",
            self.session_use_percentage
        );
        ensure!(
            (1..=100).contains(&self.active_memory_threshold),
            "active_memory_threshold {} must be within 1..=100",
            self.active_memory_threshold
        );
        ensure!(
            (1..=MAX_BATCH_ROWS).contains(&self.connector_batch_size),
            "connector_batch_size {} must be within 1..={}",
            self.connector_batch_size,
            MAX_BATCH_ROWS
        );
        ensure!(
            (1..=MAX_BATCH_ROWS).contains(&self.processor_batch_size),
            "processor_batch_size {} must be within 1..={}",
            self.processor_batch_size,
            MAX_BATCH_ROWS
        );
        ensure!(
            self.max_open_files >= MIN_MAX_OPEN_FILES,
            "max_open_files must be >= {}",
            MIN_MAX_OPEN_FILES
        );
        ensure!(
            self.max_file_size >= MIN_MAX_FILE_SIZE,
            "max_file_size {} is below the minimum of {} bytes",
            self.max_file_size,
            MIN_MAX_FILE_SIZE
        );
        ensure!(self.lob_cleanup_batch > 0, "lob_cleanup_batch must be > 0");
        Ok(())
    }

    pub fn get_memory_limit(&self) -> MemoryLimit {
        self.memory_limit
    }

    pub fn get_session_use_percentage(&self) -> usize {
        self.session_use_percentage
    }

    pub fn get_active_memory_threshold(&self) -> usize {
        self.active_memory_threshold
    }

    pub fn get_management_interval(&self) -> Duration {
        self.management_interval
    }

    pub fn get_connector_batch_size(&self) -> usize {
        self.connector_batch_size
    }

    pub fn get_processor_batch_size(&self) -> usize {
        self.processor_batch_size
    }

    pub fn get_storage_directory(&self) -> Option<&Path> {
        self.storage_directory.as_deref()
    }

    pub fn get_max_open_files(&self) -> usize {
        self.max_open_files
    }

    pub fn get_max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn get_log_stats_interval(&self) -> Option<Duration> {
        self.log_stats_interval
    }

    pub fn get_lob_cleanup_batch(&self) -> usize {
        self.lob_cleanup_batch
    }

    pub fn get_location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .wrap_err_with(|| format!("invalid value '{}' for {}", value, key))
}

fn parse_size(key: &str, value: &str) -> Result<u64> {
    let upper = value.to_ascii_uppercase();
    let (digits, multiplier) = if let Some(d) = upper.strip_suffix("GB") {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = upper.strip_suffix("MB") {
        (d, 1024 * 1024)
    } else if let Some(d) = upper.strip_suffix("KB") {
        (d, 1024)
    } else {
        (upper.as_str(), 1)
    };

    let base = parse_number(key, digits.trim())?;
    match base.checked_mul(multiplier) {
        Some(bytes) => Ok(bytes),
        None => bail!("value '{}' for {} overflows", value, key),
    }
}
