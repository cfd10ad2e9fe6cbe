// SPDX-License-Identifier: GPL-3.0-only

//! IIO scan channel descriptors
//!
//! Each channel of an IIO device exposes three attributes under
//! `scan_elements/`:
//!
//! - `in_<name>_type`: layout, e.g. `le:s12/16>>4`
//! - `in_<name>_index`: position of the channel within a scan
//! - `in_<name>_en`: whether the channel is part of the scan

use crate::backends::sysfs;
use crate::errors::{BackendResult, ChannelParseError};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Parsed `in_<name>_type` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanType {
    pub big_endian: bool,
    pub signed: bool,
    pub bits_used: u32,
    pub storage_bits: u32,
    pub shift: u32,
}

impl FromStr for ScanType {
    type Err = ();

    /// Parse `[bl]e:[su]BITS/STORAGE>>SHIFT`
    fn from_str(text: &str) -> Result<Self, ()> {
        let (endian, rest) = text.split_once(':').ok_or(())?;
        let big_endian = match endian {
            "be" => true,
            "le" => false,
            _ => return Err(()),
        };

        let mut chars = rest.chars();
        let signed = match chars.next() {
            Some('s') => true,
            Some('u') => false,
            _ => return Err(()),
        };
        let rest = chars.as_str();

        let (bits, rest) = rest.split_once('/').ok_or(())?;
        let (storage, shift) = rest.split_once(">>").ok_or(())?;
        let bits_used: u32 = bits.parse().map_err(|_| ())?;
        let storage_bits: u32 = storage.parse().map_err(|_| ())?;
        let shift: u32 = shift.parse().map_err(|_| ())?;

        if !matches!(storage_bits, 8 | 16 | 32 | 64) {
            return Err(());
        }
        if bits_used == 0 || bits_used > storage_bits || shift >= storage_bits {
            return Err(());
        }

        Ok(Self {
            big_endian,
            signed,
            bits_used,
            storage_bits,
            shift,
        })
    }
}

/// Mask selecting the low `bits_used` bits
pub fn value_mask(bits_used: u32) -> u64 {
    if bits_used >= 64 {
        u64::MAX
    } else {
        (1u64 << bits_used) - 1
    }
}

/// Layout of one scan channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Channel name without the `in_` prefix, e.g. `accel_x`
    pub name: String,
    pub index: u32,
    pub byte_width: usize,
    pub bits_used: u32,
    pub is_signed: bool,
    pub is_big_endian: bool,
    pub shift: u32,
    pub mask: u64,
    /// Position within a scan; assigned when the scan layout is packed
    pub byte_offset: usize,
    pub enabled: bool,
}

impl ChannelDescriptor {
    /// Build a descriptor from an already parsed scan type
    pub fn new(name: &str, index: u32, scan: ScanType, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            index,
            byte_width: (scan.storage_bits / 8) as usize,
            bits_used: scan.bits_used,
            is_signed: scan.signed,
            is_big_endian: scan.big_endian,
            shift: scan.shift,
            mask: value_mask(scan.bits_used),
            byte_offset: 0,
            enabled,
        }
    }

    /// Read a channel's attributes from a `scan_elements` directory
    pub fn read(scan_dir: &Path, name: &str) -> Result<Self, ChannelParseError> {
        let attribute = |suffix: &str| -> Result<String, ChannelParseError> {
            let file = format!("in_{}_{}", name, suffix);
            fs::read_to_string(scan_dir.join(&file))
                .map(|s| s.trim().to_string())
                .map_err(|e| ChannelParseError::Unreadable {
                    channel: name.to_string(),
                    attribute: file,
                    reason: e.to_string(),
                })
        };

        let type_text = attribute("type")?;
        let scan: ScanType = type_text.parse().map_err(|_| ChannelParseError::ScanType {
            channel: name.to_string(),
            text: type_text.clone(),
        })?;

        let index_text = attribute("index")?;
        let index: u32 = index_text.parse().map_err(|_| ChannelParseError::Index {
            channel: name.to_string(),
            text: index_text.clone(),
        })?;

        let enabled_text = attribute("en")?;
        let enabled = enabled_text
            .parse::<i64>()
            .map_err(|_| ChannelParseError::Enabled {
                channel: name.to_string(),
                text: enabled_text.clone(),
            })?
            != 0;

        Ok(Self::new(name, index, scan, enabled))
    }

    /// Write the channel's enable attribute
    pub fn set_enabled(&mut self, scan_dir: &Path, enabled: bool) -> BackendResult<()> {
        let path = scan_dir.join(format!("in_{}_en", self.name));
        sysfs::write_int(&path, enabled as i64)?;
        self.enabled = enabled;
        Ok(())
    }
}
