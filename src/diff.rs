//! Set difference between two snapshots.

use crate::snapshot::DeviceSnapshot;

/// Devices that left and devices that arrived between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceChanges {
    /// Present before, gone now. Attributes as last seen.
    pub removed: DeviceSnapshot,
    /// Absent before, present now.
    pub added: DeviceSnapshot,
}

impl DeviceChanges {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    /// `(removed, added)`
    pub fn into_parts(self) -> (DeviceSnapshot, DeviceSnapshot) {
        (self.removed, self.added)
    }
}

/// Compare two snapshots by device identifier only. A device present in both is
/// never reported, even if its attributes changed.
pub fn diff(previous: &DeviceSnapshot, current: &DeviceSnapshot) -> DeviceChanges {
    let only_in = |a: &DeviceSnapshot, b: &DeviceSnapshot| -> DeviceSnapshot {
        a.iter()
            .filter(|(id, _)| !b.contains(id))
            .map(|(id, attrs)| (id.clone(), attrs.clone()))
            .collect()
    };
    DeviceChanges {
        removed: only_in(previous, current),
        added: only_in(current, previous),
    }
}
