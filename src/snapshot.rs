//! Point-in-time view of the attached devices.

use std::collections::btree_map::{self, BTreeMap};

use crate::attributes::DeviceAttributes;
use crate::filter::{matches, DeviceFilter};
use crate::normalize::{normalize, Platform, RawDeviceRecord};

/// Platform identifier of a device, stable while it stays attached.
pub type DeviceId = String;

/// Devices present at one point in time, keyed by [`DeviceId`].
///
/// Snapshots are never updated in place; every poll builds a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    devices: BTreeMap<DeviceId, DeviceAttributes>,
}

impl DeviceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&DeviceAttributes> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, DeviceId, DeviceAttributes> {
        self.devices.iter()
    }
}

impl FromIterator<(DeviceId, DeviceAttributes)> for DeviceSnapshot {
    /// Later entries replace earlier ones with the same id.
    fn from_iter<I: IntoIterator<Item = (DeviceId, DeviceAttributes)>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for DeviceSnapshot {
    type Item = (DeviceId, DeviceAttributes);
    type IntoIter = btree_map::IntoIter<DeviceId, DeviceAttributes>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

impl<'a> IntoIterator for &'a DeviceSnapshot {
    type Item = (&'a DeviceId, &'a DeviceAttributes);
    type IntoIter = btree_map::Iter<'a, DeviceId, DeviceAttributes>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// Normalize and filter raw records into a snapshot.
///
/// Malformed records are skipped. When two records share an identifier the one
/// enumerated last is kept.
pub fn build<'a>(
    records: impl IntoIterator<Item = &'a RawDeviceRecord>,
    filter: Option<&DeviceFilter>,
    platform: Platform,
) -> DeviceSnapshot {
    let mut devices = BTreeMap::new();
    for record in records {
        let (id, attributes) = match normalize(record, platform) {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!("Skipping device record: {}", e);
                continue;
            }
        };
        if !matches(&attributes, filter) {
            tracing::trace!(device_id = %id, "Device excluded by filter");
            continue;
        }
        if devices.insert(id.clone(), attributes).is_some() {
            tracing::debug!(device_id = %id, "Duplicate device identifier, keeping the later record");
        }
    }
    DeviceSnapshot { devices }
}
