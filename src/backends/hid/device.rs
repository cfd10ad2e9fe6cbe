// SPDX-License-Identifier: GPL-3.0-only

//! A physical HID device: every sensor sharing one USB topology path

use super::capture::{HidSensor, SampleCallback, SensorDriver};
use super::custom::{CustomSensor, ReportField};
use super::iio::IioSensor;
use crate::backends::enumeration::{SensorKind, SensorNode, TopologyPath};
use crate::backends::notification::NotificationHandler;
use crate::config::BackendConfig;
use crate::errors::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Requested sampling rate for one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidProfile {
    pub sensor_name: String,
    /// Samples per second
    pub frequency: u32,
}

pub struct HidDevice {
    topology_path: TopologyPath,
    sensors: Vec<HidSensor>,
    config: BackendConfig,
}

impl HidDevice {
    /// Open every sensor node belonging to one physical device
    pub fn open(nodes: &[SensorNode], config: &BackendConfig) -> BackendResult<Self> {
        let Some(first) = nodes.first() else {
            return Err(BackendError::DeviceUnavailable(
                "hid device is no longer connected".into(),
            ));
        };
        let topology_path = first.identity.topology_path.clone();

        let mut sensors = Vec::with_capacity(nodes.len());
        for node in nodes {
            if node.identity.topology_path != topology_path {
                warn!(path = %node.sysfs_path.display(), "Sensor belongs to another device; skipped");
                continue;
            }
            let driver = match node.kind {
                SensorKind::Iio => {
                    SensorDriver::Iio(IioSensor::open(&node.sysfs_path, &config.dev_root)?)
                }
                SensorKind::Custom => {
                    SensorDriver::Custom(CustomSensor::open(&node.sysfs_path, &config.dev_root)?)
                }
            };
            sensors.push(HidSensor::new(driver));
        }

        info!(device = %topology_path, sensors = sensors.len(), "HID device opened");
        Ok(Self {
            topology_path,
            sensors,
            config: config.clone(),
        })
    }

    pub fn topology_path(&self) -> &TopologyPath {
        &self.topology_path
    }

    /// Names of every sensor on the device
    pub fn sensor_names(&self) -> Vec<&str> {
        self.sensors.iter().map(|s| s.name()).collect()
    }

    pub fn sensors(&self) -> &[HidSensor] {
        &self.sensors
    }

    /// Apply each profile's rate and start every matching sensor
    ///
    /// If any sensor fails to start, the sensors started by this call are
    /// stopped again before the error is returned.
    pub fn start(
        &mut self,
        profiles: &[HidProfile],
        callback: SampleCallback,
        handler: NotificationHandler,
    ) -> BackendResult<()> {
        let mut selected = Vec::new();
        for profile in profiles {
            let matching: Vec<usize> = self
                .sensors
                .iter()
                .enumerate()
                .filter(|(_, s)| s.name() == profile.sensor_name)
                .map(|(i, _)| i)
                .collect();
            if matching.is_empty() {
                return Err(BackendError::SensorNotFound(profile.sensor_name.clone()));
            }
            for index in matching {
                self.sensors[index].set_sample_rate(profile.frequency)?;
                if !selected.contains(&index) {
                    selected.push(index);
                }
            }
        }

        let mut started = Vec::new();
        for index in selected {
            let sensor = &mut self.sensors[index];
            if sensor.is_streaming() {
                continue;
            }
            if let Err(e) = sensor.start(&self.config, callback.clone(), handler.clone()) {
                for &done in &started {
                    let sensor: &mut HidSensor = &mut self.sensors[done];
                    if let Err(stop_err) = sensor.stop() {
                        warn!(sensor = %sensor.name(), error = %stop_err, "Rollback stop failed");
                    }
                }
                return Err(e);
            }
            started.push(index);
        }
        Ok(())
    }

    /// Stop every streaming sensor; safe to call repeatedly
    pub fn stop(&mut self) -> BackendResult<()> {
        let mut first_error = None;
        for sensor in &mut self.sensors {
            if let Err(e) = sensor.stop() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Set the sampling rate of one sensor
    pub fn set_sample_rate(&self, sensor_name: &str, hz: u32) -> BackendResult<()> {
        let sensor = self
            .sensors
            .iter()
            .find(|s| s.name() == sensor_name)
            .ok_or_else(|| BackendError::SensorNotFound(sensor_name.to_string()))?;
        sensor.set_sample_rate(hz)
    }

    /// Read a feature report field of the custom sensor
    ///
    /// The sensor is enabled first when it is not streaming, since the
    /// driver only answers report reads from an enabled sensor.
    pub fn custom_report(&self, report: &str, field: ReportField) -> BackendResult<Vec<u8>> {
        for sensor in &self.sensors {
            if let SensorDriver::Custom(custom) = sensor.driver() {
                if !sensor.is_streaming() {
                    custom.set_enabled(true)?;
                }
                return custom.report(report, field);
            }
        }
        Err(BackendError::SensorNotFound(
            crate::constants::CUSTOM_SENSOR_ID.to_string(),
        ))
    }
}

impl Drop for HidDevice {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(device = %self.topology_path, error = %e, "HID device teardown failed");
        }
    }
}
