// SPDX-License-Identifier: GPL-3.0-only

//! Backend configuration
//!
//! All fields default to the values the kernel interfaces are normally used
//! with; a JSON file only needs to name what it overrides.

use crate::constants::{
    DEFAULT_BUFFER_COUNT, HID_BUFFER_LENGTH, OPEN_RETRIES, OPEN_RETRY_DELAY, POLL_TIMEOUT,
};
use crate::errors::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Root of the sysfs tree (normally `/sys`)
    pub sys_root: PathBuf,
    /// Root of the device node tree (normally `/dev`)
    pub dev_root: PathBuf,
    /// Root of procfs (normally `/proc`)
    pub proc_root: PathBuf,
    /// Kernel buffers requested when a profile is committed
    pub buffer_count: u32,
    /// Memory-map kernel buffers instead of handing the driver user memory
    pub use_memory_map: bool,
    /// Readiness wait bound in milliseconds
    pub poll_timeout_ms: u64,
    /// Sensor device node open attempts
    pub open_retries: u32,
    /// Delay between sensor open attempts in milliseconds
    pub open_retry_delay_ms: u64,
    /// Scans buffered by the kernel per IIO device
    pub hid_buffer_length: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            sys_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            proc_root: PathBuf::from("/proc"),
            buffer_count: DEFAULT_BUFFER_COUNT,
            use_memory_map: false, // User pointers carry the metadata block
            poll_timeout_ms: POLL_TIMEOUT.as_millis() as u64,
            open_retries: OPEN_RETRIES,
            open_retry_delay_ms: OPEN_RETRY_DELAY.as_millis() as u64,
            hid_buffer_length: HID_BUFFER_LENGTH,
        }
    }
}

impl BackendConfig {
    /// Load a configuration file, filling unnamed fields with defaults
    pub fn load(path: &Path) -> BackendResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BackendError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> BackendResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> BackendResult<()> {
        if self.buffer_count == 0 {
            return Err(BackendError::Config("buffer_count must be positive".into()));
        }
        if self.hid_buffer_length == 0 {
            return Err(BackendError::Config(
                "hid_buffer_length must be positive".into(),
            ));
        }
        if self.open_retries == 0 {
            return Err(BackendError::Config("open_retries must be positive".into()));
        }
        Ok(())
    }

    /// Readiness wait bound
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Delay between sensor open attempts
    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    /// Configuration rooted at a fixture tree (`<root>/sys`, `<root>/dev`, `<root>/proc`)
    pub fn with_root(root: &Path) -> Self {
        Self {
            sys_root: root.join("sys"),
            dev_root: root.join("dev"),
            proc_root: root.join("proc"),
            ..Self::default()
        }
    }
}
