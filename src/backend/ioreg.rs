//! macOS enumeration through the I/O registry's `IOUSB` plane, as printed by
//! `ioreg -p IOUSB -w0 -l`.

use std::process::Command;

use lazy_static::lazy_static;
use regex::Regex;

use crate::backend::DeviceEnumerator;
use crate::error::{MonitorError, MonitorResult, ResultExt};
use crate::normalize::{Platform, RawDeviceRecord};

lazy_static! {
    // `| +-o USB Receiver@00100000  <class IOUSBHostDevice, id 0x100000a5e, ...>`
    static ref ENTRY: Regex = Regex::new(r"\+-o\s+(.+?)\s+<class\s+([^,>]+)").unwrap();
    // `|       "idVendor" = 1133`
    static ref PROPERTY: Regex = Regex::new(r#"^[\s|]*"([^"]+)"\s*=\s*(.*?)\s*$"#).unwrap();
}

#[derive(Debug, Default)]
pub struct IoregEnumerator;

impl IoregEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceEnumerator for IoregEnumerator {
    fn platform(&self) -> Platform {
        Platform::MacOs
    }

    fn enumerate(&self) -> MonitorResult<Vec<RawDeviceRecord>> {
        let output = Command::new("ioreg")
            .args(["-p", "IOUSB", "-w0", "-l"])
            .output()
            .convert(Platform::MacOs)?;
        if !output.status.success() {
            return Err(MonitorError::enumeration(
                Platform::MacOs,
                format!(
                    "ioreg exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        let text = String::from_utf8(output.stdout).convert(Platform::MacOs)?;
        Ok(parse(&text))
    }
}

/// Split `ioreg -l` output into one record per registry entry that describes a
/// USB device (has an `idVendor` property). Host controllers and the root
/// entry are dropped.
pub(crate) fn parse(output: &str) -> Vec<RawDeviceRecord> {
    let mut records = Vec::new();
    let mut current: Option<RawDeviceRecord> = None;

    for line in output.lines() {
        if let Some(entry) = ENTRY.captures(line) {
            records.extend(current.take());
            let mut record = RawDeviceRecord::new();
            record.insert("IORegistryEntryName", &entry[1]);
            record.insert("IOObjectClass", entry[2].trim());
            current = Some(record);
        } else if let (Some(record), Some(property)) = (current.as_mut(), PROPERTY.captures(line)) {
            record.insert(&property[1], unquote(&property[2]));
        }
    }
    records.extend(current);

    records.retain(|r| r.contains("idVendor"));
    records
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
