// SPDX-License-Identifier: GPL-3.0-only

//! HID sensor capture loop
//!
//! Both sensor families share one capability set through [`SensorDriver`]
//! and one loop: wait for input or cancellation, read a batch of whole
//! records, decode them and hand each to the sample callback.

use super::custom::CustomSensor;
use super::iio::IioSensor;
use super::scan::{ScanLayout, SampleRecord};
use crate::backends::cancel::{CancellationChannel, WaitOutcome, wait_readable};
use crate::backends::frame_loop::{CaptureLoopController, LoopAction};
use crate::backends::notification::{Notification, NotificationHandler};
use crate::backends::sysfs;
use crate::config::BackendConfig;
use crate::constants::CUSTOM_REPORT_SIZE;
use crate::errors::{BackendError, BackendResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One decoded record and the sensor it came from
#[derive(Debug, Clone, Copy)]
pub struct SensorSample<'a> {
    pub sensor: &'a str,
    pub record: SampleRecord<'a>,
}

/// Receives samples; shared by every sensor thread of a device
pub type SampleCallback = Arc<dyn Fn(&SensorSample<'_>) + Send + Sync>;

/// How raw reads are split into records
#[derive(Debug, Clone)]
pub enum SampleDecoder {
    Scan(ScanLayout),
    Report,
}

impl SampleDecoder {
    pub fn record_width(&self) -> usize {
        match self {
            SampleDecoder::Scan(layout) => layout.scan_width(),
            SampleDecoder::Report => CUSTOM_REPORT_SIZE,
        }
    }

    /// Decode every whole record in `raw`
    pub fn read_batch<'a>(&'a self, raw: &'a [u8]) -> Vec<SampleRecord<'a>> {
        match self {
            SampleDecoder::Scan(layout) => layout.records(raw).collect(),
            SampleDecoder::Report => raw
                .chunks_exact(CUSTOM_REPORT_SIZE)
                .map(SampleRecord::opaque)
                .collect(),
        }
    }
}

/// The two sensor families
#[derive(Debug, Clone)]
pub enum SensorDriver {
    Iio(IioSensor),
    Custom(CustomSensor),
}

impl SensorDriver {
    pub fn name(&self) -> &str {
        match self {
            SensorDriver::Iio(s) => s.name(),
            SensorDriver::Custom(s) => s.name(),
        }
    }

    pub fn dev_node(&self) -> &Path {
        match self {
            SensorDriver::Iio(s) => s.dev_node(),
            SensorDriver::Custom(s) => s.dev_node(),
        }
    }

    /// Enable or disable sample production
    pub fn enable(&mut self, enabled: bool) -> BackendResult<()> {
        match self {
            SensorDriver::Iio(s) => s.set_channels_enabled(enabled),
            SensorDriver::Custom(s) => s.set_enabled(enabled),
        }
    }

    /// Turn on kernel buffering and build the record decoder
    fn prepare(&self, buffer_length: usize) -> BackendResult<SampleDecoder> {
        match self {
            SensorDriver::Iio(s) => {
                let layout = s.layout()?;
                s.enable_buffer(buffer_length)?;
                Ok(SampleDecoder::Scan(layout))
            }
            SensorDriver::Custom(_) => Ok(SampleDecoder::Report),
        }
    }

    /// Attributes written to 0 to halt the sensor from the loop thread
    fn halt_paths(&self) -> Vec<PathBuf> {
        match self {
            SensorDriver::Iio(s) => vec![s.buffer_enable_path()],
            SensorDriver::Custom(s) => vec![s.enable_path()],
        }
    }

    /// Undo `prepare` and `enable`; every step is attempted
    fn release(&mut self) -> BackendResult<()> {
        let mut first_error = None;
        if let SensorDriver::Iio(s) = self
            && let Err(e) = s.disable_buffer()
        {
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.enable(false) {
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A sensor and its capture thread, when streaming
pub struct HidSensor {
    driver: SensorDriver,
    capture: Option<CaptureLoopController>,
}

impl HidSensor {
    pub fn new(driver: SensorDriver) -> Self {
        Self {
            driver,
            capture: None,
        }
    }

    pub fn name(&self) -> &str {
        self.driver.name()
    }

    pub fn driver(&self) -> &SensorDriver {
        &self.driver
    }

    pub fn is_streaming(&self) -> bool {
        self.capture.is_some()
    }

    /// Enable the sensor, open its device node and spawn the capture thread
    ///
    /// Already streaming is not an error. On failure every side effect made
    /// so far is undone.
    pub fn start(
        &mut self,
        config: &BackendConfig,
        callback: SampleCallback,
        handler: NotificationHandler,
    ) -> BackendResult<()> {
        if self.capture.is_some() {
            return Ok(());
        }

        let dev_node = self.driver.dev_node().to_path_buf();
        if !dev_node.exists() {
            return Err(BackendError::DeviceUnavailable(format!(
                "{} is busy or not found",
                dev_node.display()
            )));
        }

        if let Err(e) = self.driver.enable(true) {
            self.rollback();
            return Err(e);
        }
        let decoder = match self.driver.prepare(config.hid_buffer_length) {
            Ok(decoder) => decoder,
            Err(e) => {
                self.rollback();
                return Err(e);
            }
        };
        let file = match open_with_retry(&dev_node, config.open_retries, config.open_retry_delay())
        {
            Ok(file) => file,
            Err(e) => {
                self.rollback();
                return Err(e);
            }
        };

        let sensor_name = self.name().to_string();
        let mut sensor_loop = SensorLoop {
            buffer: vec![0; decoder.record_width() * config.hid_buffer_length],
            file,
            sensor: sensor_name.clone(),
            decoder,
            callback,
            handler,
            halt_paths: self.driver.halt_paths(),
            timeout: config.poll_timeout(),
        };

        match CaptureLoopController::start(&format!("hid-{}", sensor_name), move |cancel| {
            sensor_loop.iterate(cancel)
        }) {
            Ok(controller) => {
                info!(sensor = %sensor_name, "Sensor capture started");
                self.capture = Some(controller);
                Ok(())
            }
            Err(source) => {
                self.rollback();
                Err(BackendError::DriverProtocol {
                    request: "spawn sensor thread",
                    source,
                })
            }
        }
    }

    fn rollback(&mut self) {
        if let Err(e) = self.driver.release() {
            warn!(sensor = %self.name(), error = %e, "Rollback after failed start");
        }
    }

    /// Stop the capture thread and disable the sensor; no-op when idle
    pub fn stop(&mut self) -> BackendResult<()> {
        let Some(mut capture) = self.capture.take() else {
            return Ok(());
        };
        capture.stop();
        debug!(sensor = %self.name(), "Sensor capture stopped");
        self.driver.release()
    }

    pub fn set_sample_rate(&self, hz: u32) -> BackendResult<()> {
        match &self.driver {
            SensorDriver::Iio(s) => s.set_sample_rate(hz),
            SensorDriver::Custom(_) => {
                debug!(hz, "Custom sensors have no sampling frequency");
                Ok(())
            }
        }
    }
}

impl Drop for HidSensor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(sensor = %self.name(), error = %e, "Sensor teardown failed");
        }
    }
}

/// Open a sensor device node, retrying while the driver is still settling
fn open_with_retry(path: &Path, retries: u32, delay: Duration) -> BackendResult<File> {
    let mut last_error = None;
    for attempt in 1..=retries {
        match OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
        {
            Ok(file) => return Ok(file),
            Err(e) => {
                warn!(path = %path.display(), attempt, error = %e, "open() failed");
                last_error = Some(e);
                if attempt < retries {
                    thread::sleep(delay);
                }
            }
        }
    }
    Err(BackendError::DeviceUnavailable(format!(
        "{}: open failed after {} attempts: {}",
        path.display(),
        retries,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// State owned by one sensor thread
struct SensorLoop {
    file: File,
    sensor: String,
    decoder: SampleDecoder,
    buffer: Vec<u8>,
    callback: SampleCallback,
    handler: NotificationHandler,
    halt_paths: Vec<PathBuf>,
    timeout: Duration,
}

impl SensorLoop {
    fn iterate(&mut self, cancel: &CancellationChannel) -> LoopAction {
        match wait_readable(self.file.as_raw_fd(), cancel, self.timeout) {
            Err(e) => self.fail(format!("readiness wait failed: {}", e)),
            Ok(WaitOutcome::TimedOut) => {
                warn!(
                    sensor = %self.sensor,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Samples didn't arrive within the poll timeout"
                );
                LoopAction::Continue
            }
            Ok(WaitOutcome::Cancelled) => {
                info!(sensor = %self.sensor, "Stream finished");
                LoopAction::Stop
            }
            Ok(WaitOutcome::Ready) => match self.file.read(&mut self.buffer) {
                Ok(0) => LoopAction::Continue,
                Ok(n) => {
                    for record in self.decoder.read_batch(&self.buffer[..n]) {
                        (self.callback)(&SensorSample {
                            sensor: &self.sensor,
                            record,
                        });
                    }
                    LoopAction::Continue
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    LoopAction::Continue
                }
                Err(e) => self.fail(format!("read failed: {}", e)),
            },
        }
    }

    fn fail(&self, message: String) -> LoopAction {
        error!(sensor = %self.sensor, error = %message, "Sensor loop failed");
        for path in &self.halt_paths {
            if let Err(e) = sysfs::write_int(path, 0) {
                warn!(error = %e, "Failed to halt sensor");
            }
        }
        (self.handler)(Notification::StreamFailed {
            error: format!("{}: {}", self.sensor, message),
        });
        LoopAction::Stop
    }
}
