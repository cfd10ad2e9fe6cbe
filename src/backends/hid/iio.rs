// SPDX-License-Identifier: GPL-3.0-only

//! Index/scan based IIO sensors (`/sys/bus/iio/devices/iio:deviceN`)

use super::channel::ChannelDescriptor;
use super::scan::ScanLayout;
use crate::backends::sysfs;
use crate::constants::IIO_DEVICE_PREFIX;
use crate::errors::{BackendError, BackendResult, ChannelParseError};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One IIO device and its scan channels
#[derive(Debug, Clone)]
pub struct IioSensor {
    path: PathBuf,
    name: String,
    device_number: u32,
    dev_node: PathBuf,
    channels: Vec<ChannelDescriptor>,
    channel_errors: Vec<ChannelParseError>,
    sampling_frequency: Option<PathBuf>,
}

impl IioSensor {
    /// Read the device name, channels and sampling-frequency attribute
    ///
    /// A channel whose attributes cannot be parsed is skipped and recorded in
    /// [`channel_errors`](Self::channel_errors).
    pub fn open(path: &Path, dev_root: &Path) -> BackendResult<Self> {
        let unavailable =
            |what: &str| BackendError::DeviceUnavailable(format!("{}: {}", path.display(), what));

        let dir_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let device_number: u32 = dir_name
            .strip_prefix(IIO_DEVICE_PREFIX)
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| unavailable("IIO device number is incorrect"))?;

        let name = sysfs::read_trimmed(&path.join("name"))
            .map_err(|e| unavailable(&format!("cannot read sensor name: {}", e)))?;

        let scan_dir = path.join("scan_elements");
        if !scan_dir.is_dir() {
            return Err(unavailable("missing scan_elements"));
        }

        let mut channels = Vec::new();
        let mut channel_errors = Vec::new();
        for entry in sysfs::sorted_entries(&scan_dir) {
            let Some(channel) = entry
                .strip_prefix("in_")
                .and_then(|rest| rest.strip_suffix("_en"))
            else {
                continue;
            };
            match ChannelDescriptor::read(&scan_dir, channel) {
                Ok(desc) => channels.push(desc),
                Err(e) => {
                    warn!(sensor = %name, error = %e, "Skipping channel");
                    channel_errors.push(e);
                }
            }
        }

        let sampling_frequency = sysfs::sorted_entries(path)
            .into_iter()
            .map(|entry| path.join(entry))
            .find(|p| {
                p.is_file()
                    && p.file_name()
                        .is_some_and(|n| n.to_string_lossy().contains("sampling_frequency"))
            });

        debug!(
            sensor = %name,
            device_number,
            channels = channels.len(),
            "IIO sensor opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            name,
            device_number,
            dev_node: dev_root.join(&dir_name),
            channels,
            channel_errors,
            sampling_frequency,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device_number(&self) -> u32 {
        self.device_number
    }

    /// Character device the samples are read from
    pub fn dev_node(&self) -> &Path {
        &self.dev_node
    }

    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    /// Channels dropped because their attributes could not be parsed
    pub fn channel_errors(&self) -> &[ChannelParseError] {
        &self.channel_errors
    }

    pub fn set_sample_rate(&self, hz: u32) -> BackendResult<()> {
        let Some(path) = &self.sampling_frequency else {
            return Err(BackendError::sysfs(
                self.path.join("sampling_frequency"),
                io::Error::new(io::ErrorKind::NotFound, "no sampling frequency attribute"),
            ));
        };
        sysfs::write_int(path, hz as i64)?;
        debug!(sensor = %self.name, hz, "Sampling frequency set");
        Ok(())
    }

    /// Enable or disable every channel
    pub fn set_channels_enabled(&mut self, enabled: bool) -> BackendResult<()> {
        let scan_dir = self.path.join("scan_elements");
        for channel in &mut self.channels {
            channel.set_enabled(&scan_dir, enabled)?;
        }
        Ok(())
    }

    /// Packed layout of the currently enabled channels
    pub fn layout(&self) -> BackendResult<ScanLayout> {
        ScanLayout::new(&self.name, &self.channels)
    }

    /// Set the kernel buffer depth and turn buffering on
    pub fn enable_buffer(&self, length: usize) -> BackendResult<()> {
        sysfs::write_int(&self.path.join("buffer/length"), length as i64)?;
        sysfs::write_int(&self.buffer_enable_path(), 1)
    }

    pub fn disable_buffer(&self) -> BackendResult<()> {
        sysfs::write_int(&self.buffer_enable_path(), 0)
    }

    pub fn buffer_enable_path(&self) -> PathBuf {
        self.path.join("buffer/enable")
    }
}
