// SPDX-License-Identifier: GPL-3.0-only

//! Self-describing custom HID sensors bound to `hid_sensor_custom`
//!
//! A custom sensor has no scan channels. Its samples are fixed-size reports,
//! and its feature reports are described by `feature-*` folders whose
//! `*-name` file names the report.

use crate::backends::sysfs;
use crate::constants::CUSTOM_SENSOR_ID;
use crate::errors::{BackendError, BackendResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Attribute of a custom feature report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportField {
    Minimum,
    Maximum,
    Name,
    Size,
    UnitExpo,
    Units,
    Value,
}

impl ReportField {
    fn suffix(self) -> &'static str {
        match self {
            ReportField::Minimum => "-minimum",
            ReportField::Maximum => "-maximum",
            ReportField::Name => "-name",
            ReportField::Size => "-size",
            ReportField::UnitExpo => "-unit-expo",
            ReportField::Units => "-units",
            ReportField::Value => "-value",
        }
    }
}

impl std::str::FromStr for ReportField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimum" => Ok(ReportField::Minimum),
            "maximum" => Ok(ReportField::Maximum),
            "name" => Ok(ReportField::Name),
            "size" => Ok(ReportField::Size),
            "unit-expo" => Ok(ReportField::UnitExpo),
            "units" => Ok(ReportField::Units),
            "value" => Ok(ReportField::Value),
            other => Err(format!("unknown report field {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CustomSensor {
    path: PathBuf,
    dev_node: PathBuf,
    /// Report name to feature folder
    reports: BTreeMap<String, String>,
}

impl CustomSensor {
    /// Collect the feature report map of a custom sensor directory
    pub fn open(path: &Path, dev_root: &Path) -> BackendResult<Self> {
        if !path.is_dir() {
            return Err(BackendError::DeviceUnavailable(format!(
                "custom sensor {} not found",
                path.display()
            )));
        }
        let dir_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut reports = BTreeMap::new();
        for feature in sysfs::sorted_entries(path) {
            if !feature.contains("feature") {
                continue;
            }
            let feature_dir = path.join(&feature);
            for file in sysfs::sorted_entries(&feature_dir) {
                if !file.ends_with("name") {
                    continue;
                }
                if let Some(report) = sysfs::read_optional(&feature_dir.join(&file)) {
                    reports.insert(report, feature.clone());
                }
            }
        }

        debug!(path = %path.display(), reports = reports.len(), "Custom sensor opened");

        Ok(Self {
            path: path.to_path_buf(),
            dev_node: dev_root.join(&dir_name),
            reports,
        })
    }

    pub fn name(&self) -> &str {
        CUSTOM_SENSOR_ID
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dev_node(&self) -> &Path {
        &self.dev_node
    }

    /// Names of the feature reports this sensor exposes
    pub fn report_names(&self) -> impl Iterator<Item = &str> {
        self.reports.keys().map(String::as_str)
    }

    pub fn enable_path(&self) -> PathBuf {
        self.path.join("enable_sensor")
    }

    pub fn set_enabled(&self, enabled: bool) -> BackendResult<()> {
        sysfs::write_int(&self.enable_path(), enabled as i64)
    }

    /// Read one field of a named feature report
    ///
    /// The trailing newline is stripped.
    pub fn report(&self, report: &str, field: ReportField) -> BackendResult<Vec<u8>> {
        let folder = self
            .reports
            .get(report)
            .ok_or_else(|| BackendError::SensorNotFound(format!("report {}", report)))?;
        let path = self
            .path
            .join(folder)
            .join(format!("{}{}", folder, field.suffix()));
        let mut bytes = std::fs::read(&path).map_err(|e| BackendError::sysfs(&path, e))?;
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_field_suffixes() {
        assert_eq!(ReportField::UnitExpo.suffix(), "-unit-expo");
        assert_eq!("unit-expo".parse::<ReportField>(), Ok(ReportField::UnitExpo));
        assert!("bogus".parse::<ReportField>().is_err());
    }
}
