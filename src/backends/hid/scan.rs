// SPDX-License-Identifier: GPL-3.0-only

//! Scan layout and sample decoding
//!
//! Enabled channels are packed in ascending index order, each at the next
//! offset that is a multiple of its own width. Decoding is pure: the raw
//! buffer is only ever borrowed.

use super::channel::ChannelDescriptor;
use crate::constants::HID_METADATA_SIZE;
use crate::errors::{BackendError, BackendResult};

/// Naturally aligned offsets for `widths` in order, and the total scan width
pub fn pack_offsets(widths: &[usize]) -> (Vec<usize>, usize) {
    let mut cursor: usize = 0;
    let offsets = widths
        .iter()
        .map(|&width| {
            let offset = if width == 0 {
                cursor
            } else {
                cursor.div_ceil(width) * width
            };
            cursor = offset + width;
            offset
        })
        .collect();
    (offsets, cursor)
}

/// Byte layout of one scan over the enabled channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLayout {
    channels: Vec<ChannelDescriptor>,
    scan_width: usize,
    meaningful_bytes: usize,
}

impl ScanLayout {
    /// Pack the enabled channels of `sensor`
    pub fn new(sensor: &str, descriptors: &[ChannelDescriptor]) -> BackendResult<Self> {
        let mut channels: Vec<ChannelDescriptor> =
            descriptors.iter().filter(|c| c.enabled).cloned().collect();
        if channels.is_empty() {
            return Err(BackendError::NoEnabledChannels(sensor.to_string()));
        }
        channels.sort_by_key(|c| c.index);

        let widths: Vec<usize> = channels.iter().map(|c| c.byte_width).collect();
        let (offsets, scan_width) = pack_offsets(&widths);
        for (channel, offset) in channels.iter_mut().zip(offsets) {
            channel.byte_offset = offset;
        }

        let bits: u64 = channels.iter().map(|c| c.bits_used as u64).sum();
        let meaningful_bytes = bits.div_ceil(8) as usize;

        Ok(Self {
            channels,
            scan_width,
            meaningful_bytes,
        })
    }

    /// Enabled channels with their packed offsets, in index order
    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    /// Bytes per scan, including alignment padding
    pub fn scan_width(&self) -> usize {
        self.scan_width
    }

    /// Bits actually used by the channels, rounded up to bytes
    pub fn meaningful_bytes(&self) -> usize {
        self.meaningful_bytes
    }

    /// Whether each scan ends in a metadata block
    ///
    /// Deliberately strict: only a scan exactly `HID_METADATA_SIZE` bytes
    /// wider than its channel data qualifies, so a 3-axis 16-bit IMU scan
    /// (14 meaningful bytes in 16) is treated as plain data.
    pub fn has_metadata(&self) -> bool {
        self.scan_width == self.meaningful_bytes + HID_METADATA_SIZE
    }

    /// Length of the data part of a scan
    pub fn data_len(&self) -> usize {
        if self.has_metadata() {
            self.scan_width - HID_METADATA_SIZE
        } else {
            self.scan_width
        }
    }

    /// Split `raw` into whole scans; a trailing partial scan is ignored
    pub fn records<'a>(&'a self, raw: &'a [u8]) -> impl Iterator<Item = SampleRecord<'a>> + 'a {
        raw.chunks_exact(self.scan_width).map(move |scan| SampleRecord {
            scan,
            data_len: self.data_len(),
            has_metadata: self.has_metadata(),
            layout: Some(self),
        })
    }

    /// Extract one channel's value from a scan
    pub fn decode(&self, channel: &ChannelDescriptor, scan: &[u8]) -> Option<ChannelValue> {
        let bytes = scan.get(channel.byte_offset..channel.byte_offset + channel.byte_width)?;
        let mut raw: u64 = 0;
        if channel.is_big_endian {
            for &b in bytes {
                raw = (raw << 8) | b as u64;
            }
        } else {
            for &b in bytes.iter().rev() {
                raw = (raw << 8) | b as u64;
            }
        }

        let value = raw.checked_shr(channel.shift).unwrap_or(0) & channel.mask;
        if !channel.is_signed {
            return Some(ChannelValue::Unsigned(value));
        }
        let signed = if channel.bits_used < 64 && value & (1 << (channel.bits_used - 1)) != 0 {
            (value | !channel.mask) as i64
        } else {
            value as i64
        };
        Some(ChannelValue::Signed(signed))
    }
}

/// A decoded channel value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelValue {
    Signed(i64),
    Unsigned(u64),
}

impl ChannelValue {
    pub fn as_f64(self) -> f64 {
        match self {
            ChannelValue::Signed(v) => v as f64,
            ChannelValue::Unsigned(v) => v as f64,
        }
    }
}

/// One scan lent to the sample callback
#[derive(Debug, Clone, Copy)]
pub struct SampleRecord<'a> {
    scan: &'a [u8],
    data_len: usize,
    has_metadata: bool,
    layout: Option<&'a ScanLayout>,
}

impl<'a> SampleRecord<'a> {
    /// A record with no channel layout, such as a custom sensor report
    pub fn opaque(scan: &'a [u8]) -> Self {
        Self {
            scan,
            data_len: scan.len(),
            has_metadata: false,
            layout: None,
        }
    }

    /// The whole scan
    pub fn raw(&self) -> &'a [u8] {
        self.scan
    }

    /// Channel data without the metadata block
    pub fn data(&self) -> &'a [u8] {
        &self.scan[..self.data_len]
    }

    /// Trailing metadata block, when the layout carries one
    pub fn metadata(&self) -> Option<&'a [u8]> {
        self.has_metadata.then(|| &self.scan[self.data_len..])
    }

    /// Value of the channel with scan index `index`
    pub fn value(&self, index: u32) -> Option<ChannelValue> {
        let layout = self.layout?;
        let channel = layout.channels.iter().find(|c| c.index == index)?;
        layout.decode(channel, self.scan)
    }

    /// Values of every channel, in index order, keyed by channel name
    pub fn values(&self) -> Vec<(&'a str, ChannelValue)> {
        let Some(layout) = self.layout else {
            return Vec::new();
        };
        layout
            .channels
            .iter()
            .filter_map(|c| layout.decode(c, self.scan).map(|v| (c.name.as_str(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::hid::channel::ScanType;

    fn channel(name: &str, index: u32, scan_type: &str) -> ChannelDescriptor {
        let scan: ScanType = scan_type.parse().unwrap();
        ChannelDescriptor::new(name, index, scan, true)
    }

    /// Place `value` into `scan` the way the kernel would
    fn encode(channel: &ChannelDescriptor, value: i64, scan: &mut [u8]) {
        let raw = ((value as u64) & channel.mask) << channel.shift;
        let width = channel.byte_width;
        for i in 0..width {
            let byte = (raw >> (8 * i)) as u8;
            let pos = if channel.is_big_endian {
                channel.byte_offset + width - 1 - i
            } else {
                channel.byte_offset + i
            };
            scan[pos] = byte;
        }
    }

    #[test]
    fn test_pack_offsets_aligns_naturally() {
        assert_eq!(pack_offsets(&[4, 2, 4]), (vec![0, 4, 8], 12));
        assert_eq!(pack_offsets(&[2, 8]), (vec![0, 8], 16));
        assert_eq!(pack_offsets(&[1, 1, 2]), (vec![0, 1, 2], 4));
    }

    #[test]
    fn test_layout_sorts_by_index_and_drops_disabled() {
        let mut disabled = channel("c", 1, "le:s16/16>>0");
        disabled.enabled = false;
        let layout = ScanLayout::new(
            "accel",
            &[
                channel("z", 2, "le:s32/32>>0"),
                disabled,
                channel("x", 0, "le:s32/32>>0"),
            ],
        )
        .unwrap();

        let names: Vec<&str> = layout.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["x", "z"]);
        assert_eq!(layout.channels()[1].byte_offset, 4);
        assert_eq!(layout.scan_width(), 8);
    }

    #[test]
    fn test_layout_requires_enabled_channel() {
        let mut only = channel("x", 0, "le:s16/16>>0");
        only.enabled = false;
        assert!(matches!(
            ScanLayout::new("gyro", &[only]),
            Err(BackendError::NoEnabledChannels(_))
        ));
    }

    #[test]
    fn test_round_trip_values() {
        for endian in ["le", "be"] {
            let channels = [
                channel("a", 0, &format!("{}:s8/8>>0", endian)),
                channel("b", 1, &format!("{}:s12/16>>4", endian)),
                channel("c", 2, &format!("{}:u16/16>>0", endian)),
                channel("d", 3, &format!("{}:s64/64>>0", endian)),
            ];
            let layout = ScanLayout::new("imu", &channels).unwrap();
            let expected = [-5i64, -1000, 54321, i64::MIN + 7];

            let mut raw = vec![0u8; layout.scan_width() * 2];
            for (n, scan) in raw.chunks_exact_mut(layout.scan_width()).enumerate() {
                for (desc, value) in layout.channels().iter().zip(expected) {
                    encode(desc, value + n as i64, scan);
                }
            }
            let before = raw.clone();

            let records: Vec<_> = layout.records(&raw).collect();
            assert_eq!(records.len(), 2);
            for (n, record) in records.iter().enumerate() {
                let n = n as i64;
                assert_eq!(record.value(0), Some(ChannelValue::Signed(-5 + n)));
                assert_eq!(record.value(1), Some(ChannelValue::Signed(-1000 + n)));
                assert_eq!(record.value(2), Some(ChannelValue::Unsigned(54321 + n as u64)));
                assert_eq!(record.value(3), Some(ChannelValue::Signed(i64::MIN + 7 + n)));
            }
            assert_eq!(raw, before);
        }
    }

    #[test]
    fn test_records_ignore_trailing_partial_scan() {
        let layout = ScanLayout::new("accel", &[channel("x", 0, "le:u32/32>>0")]).unwrap();
        let raw = [0u8; 10];
        assert_eq!(layout.records(&raw).count(), 2);
    }

    #[test]
    fn test_metadata_block_detected() {
        // 3 x 16-bit axes plus a 64-bit timestamp: 14 meaningful bytes in 16
        let axes = ScanLayout::new(
            "gyro",
            &[
                channel("x", 0, "le:s16/16>>0"),
                channel("y", 1, "le:s16/16>>0"),
                channel("z", 2, "le:s16/16>>0"),
                channel("timestamp", 3, "le:s64/64>>0"),
            ],
        )
        .unwrap();
        assert_eq!(axes.scan_width(), 16);
        assert_eq!(axes.meaningful_bytes(), 14);
        assert!(!axes.has_metadata());

        // Two 32-bit words of which only 8 bits are meaningful
        let padded = ScanLayout::new(
            "custom",
            &[
                channel("value", 0, "le:u8/32>>0"),
                channel("reserved", 1, "le:u8/32>>0"),
                channel("extra", 2, "le:u1/8>>0"),
            ],
        )
        .unwrap();
        assert_eq!(padded.scan_width(), 9);
        assert_eq!(padded.meaningful_bytes(), 3);
        assert!(!padded.has_metadata());

        let with_meta = ScanLayout::new(
            "accel",
            &[
                channel("x", 0, "le:s16/32>>0"),
                channel("y", 1, "le:s16/32>>0"),
                channel("z", 2, "le:s16/32>>0"),
                channel("w", 3, "le:s16/32>>0"),
            ],
        )
        .unwrap();
        assert_eq!(with_meta.scan_width(), 16);
        assert_eq!(with_meta.meaningful_bytes(), 8);
        assert!(with_meta.has_metadata());

        let raw = [0xAAu8; 16];
        let record = with_meta.records(&raw).next().unwrap();
        assert_eq!(record.data().len(), 8);
        assert_eq!(record.metadata().map(|m| m.len()), Some(HID_METADATA_SIZE));
    }

    #[test]
    fn test_opaque_record_has_no_channels() {
        let report = [1u8; 24];
        let record = SampleRecord::opaque(&report);
        assert_eq!(record.data().len(), 24);
        assert!(record.metadata().is_none());
        assert!(record.value(0).is_none());
        assert!(record.values().is_empty());
    }
}
