use crate::backend::DeviceEnumerator;
use crate::error::{MonitorResult, ResultExt};
use crate::normalize::{Platform, RawDeviceRecord};
use udev::Enumerator;

/// Lists `usb_device` nodes known to udev. Every udev property of a device
/// becomes a text field of its record.
#[derive(Debug, Default)]
pub struct UdevEnumerator;

impl UdevEnumerator {
    pub fn new() -> Self {
        Self
    }

    fn scan(&self) -> MonitorResult<Enumerator> {
        let mut enumerator = Enumerator::new().convert(Platform::Linux)?;

        enumerator.match_subsystem("usb").convert(Platform::Linux)?;
        enumerator
            .match_property("DEVTYPE", "usb_device")
            .convert(Platform::Linux)?;

        Ok(enumerator)
    }
}

impl DeviceEnumerator for UdevEnumerator {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn enumerate(&self) -> MonitorResult<Vec<RawDeviceRecord>> {
        let mut enumerator = self.scan()?;
        let devices = enumerator.scan_devices().convert(Platform::Linux)?;

        Ok(devices
            .inspect(|d| tracing::trace!("udev device {:?}", UdevDevice(d)))
            // Devices without a vendor id are not real USB peripherals.
            .filter(|d| d.property_value("ID_VENDOR_ID").is_some())
            .map(|d| RawDeviceRecord::from(&d))
            .collect())
    }
}

impl From<&udev::Device> for RawDeviceRecord {
    fn from(dev: &udev::Device) -> Self {
        dev.properties()
            .map(|p| {
                (
                    p.name().to_string_lossy().into_owned(),
                    p.value().to_string_lossy().into_owned(),
                )
            })
            .collect()
    }
}

// Some debugging utilities (implement fmt::Debug for external types)
// ------------------------------------------------------------------

struct UdevDevice<'a>(&'a udev::Device);
struct Property<'a>(udev::Entry<'a>);

impl<'a> std::fmt::Debug for UdevDevice<'a> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_list()
            .entries(self.0.properties().map(Property))
            .finish()
    }
}

impl<'a> std::fmt::Debug for Property<'a> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "Property {{name: {}, value: {}}}",
            self.0.name().to_string_lossy(),
            self.0.value().to_string_lossy()
        )
    }
}
