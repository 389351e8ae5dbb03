//! Conversion of platform-native device records into [`DeviceAttributes`].

use std::collections::BTreeMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::attributes::{AttributeKey, DeviceAttributes};
use crate::error::{MonitorError, MonitorResult};
use crate::snapshot::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Windows,
    MacOs,
}

impl Platform {
    /// The platform this binary was built for, if it has a device enumerator.
    pub fn current() -> Option<Platform> {
        if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else if cfg!(windows) {
            Some(Platform::Windows)
        } else if cfg!(target_os = "macos") {
            Some(Platform::MacOs)
        } else {
            None
        }
    }

    /// Raw field the device identifier is read from.
    pub const fn identifier_field(self) -> &'static str {
        match self {
            Platform::Linux => "DEVNAME",
            Platform::Windows => "DeviceID",
            Platform::MacOs => "IORegistryEntryName",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
        })
    }
}

/// A value as handed over by the native subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Text(String),
    List(Vec<String>),
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_owned())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl From<Vec<String>> for RawValue {
    fn from(l: Vec<String>) -> Self {
        RawValue::List(l)
    }
}

/// Unordered key/value bag describing one device, keyed by platform-native names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDeviceRecord {
    fields: BTreeMap<String, RawValue>,
}

impl RawDeviceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RawValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Text view of a field. Lists are joined with `;`.
    fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(|value| match value {
            RawValue::Text(s) => s.clone(),
            RawValue::List(l) => l.join(";"),
        })
    }

    /// Text of the first of `keys` present in the record.
    fn first_text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.text(key))
    }

    /// Every string stored under `key`, whatever its shape.
    fn strings(&self, key: &str) -> Vec<&str> {
        match self.get(key) {
            Some(RawValue::Text(s)) => vec![s.as_str()],
            Some(RawValue::List(l)) => l.iter().map(String::as_str).collect(),
            None => Vec::new(),
        }
    }

    fn identifier(&self, platform: Platform) -> MonitorResult<DeviceId> {
        match self.text(platform.identifier_field()) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(MonitorError::MalformedDeviceRecord {
                platform,
                missing: platform.identifier_field(),
            }),
        }
    }
}

impl<K: Into<String>, V: Into<RawValue>> FromIterator<(K, V)> for RawDeviceRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

lazy_static! {
    static ref WINDOWS_VENDOR_ID: Regex = Regex::new(r"VID_([0-9A-Fa-f]{4})").unwrap();
    static ref WINDOWS_PRODUCT_ID: Regex = Regex::new(r"PID_([0-9A-Fa-f]{4})").unwrap();
    static ref WINDOWS_ENUMERATOR: Regex = Regex::new(r"^(.+?)\\").unwrap();
}

/// Separator udev uses inside `ID_USB_INTERFACES`, e.g. `:030101:030102:`.
const LINUX_INTERFACES_SEPARATOR: char = ':';
const WINDOWS_LIST_SEPARATOR: char = ';';

/// Normalize one raw record into its identifier and canonical attributes.
///
/// Only a missing identifier field is an error; any other missing field is
/// left at its absent value.
pub fn normalize(
    record: &RawDeviceRecord,
    platform: Platform,
) -> MonitorResult<(DeviceId, DeviceAttributes)> {
    let id = record.identifier(platform)?;
    let mut attrs = match platform {
        Platform::Linux => normalize_linux(record),
        Platform::Windows => normalize_windows(record, &id),
        Platform::MacOs => normalize_macos(record, &id),
    };

    for key in [AttributeKey::VendorId, AttributeKey::ModelId] {
        let lowered = attrs.text(key).to_ascii_lowercase();
        attrs.set(key, lowered);
    }

    Ok((id, attrs))
}

fn split_list(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .filter(|piece| !piece.is_empty())
        .map(str::to_owned)
        .collect()
}

fn normalize_linux(record: &RawDeviceRecord) -> DeviceAttributes {
    let mut attrs = DeviceAttributes::new();
    for key in AttributeKey::ALL {
        match (key.is_list(), record.get(key.as_str())) {
            (_, None) => {}
            (true, Some(RawValue::Text(s))) => {
                attrs.set(key, split_list(s, LINUX_INTERFACES_SEPARATOR))
            }
            (_, Some(RawValue::Text(s))) => attrs.set(key, s.as_str()),
            (_, Some(RawValue::List(l))) => attrs.set(key, l.clone()),
        }
    }
    attrs
}

/// First capture of `regex` across `values`.
fn capture<'a>(regex: &Regex, values: impl IntoIterator<Item = &'a str>) -> Option<String> {
    values
        .into_iter()
        .find_map(|v| regex.captures(v))
        .map(|c| c[1].to_owned())
}

/// Instance segment of `USB\VID_xxxx&PID_xxxx\<instance>`. Instances containing
/// `&` are generated by the PnP manager and are not serial numbers.
fn windows_serial(device_id: &str) -> Option<&str> {
    let mut segments = device_id.split('\\');
    let (_enumerator, _hardware, instance) = (segments.next()?, segments.next()?, segments.next()?);
    if instance.is_empty() || instance.contains('&') {
        None
    } else {
        Some(instance)
    }
}

fn normalize_windows(record: &RawDeviceRecord, id: &str) -> DeviceAttributes {
    let mut attrs = DeviceAttributes::new();
    let hardware_ids = record.strings("HardwareID");

    let id_sources = || std::iter::once(id).chain(hardware_ids.iter().copied());
    if let Some(vid) = capture(&WINDOWS_VENDOR_ID, id_sources()) {
        attrs.set(AttributeKey::VendorId, vid);
    }
    if let Some(pid) = capture(&WINDOWS_PRODUCT_ID, id_sources()) {
        attrs.set(AttributeKey::ModelId, pid);
    }

    if let Some(name) = record.text("Name") {
        attrs.set(AttributeKey::Model, name.as_str());
        attrs.set(AttributeKey::Vendor, name);
    }
    if let Some(caption) = record.text("Caption") {
        attrs.set(AttributeKey::ModelFromDatabase, caption);
    }
    if let Some(manufacturer) = record.text("Manufacturer") {
        attrs.set(AttributeKey::VendorFromDatabase, manufacturer);
    }
    match record.get("CompatibleID") {
        Some(RawValue::List(l)) => attrs.set(AttributeKey::UsbInterfaces, l.clone()),
        Some(RawValue::Text(s)) => {
            attrs.set(AttributeKey::UsbInterfaces, split_list(s, WINDOWS_LIST_SEPARATOR))
        }
        None => {}
    }

    attrs.set(AttributeKey::DevName, id);
    let pnp_id = record.text("PNPDeviceID").unwrap_or_else(|| id.to_owned());
    if let Some(enumerator) = capture(&WINDOWS_ENUMERATOR, [pnp_id.as_str()]) {
        attrs.set(AttributeKey::DevType, enumerator);
    }
    if let Some(serial) = windows_serial(id) {
        attrs.set(AttributeKey::Serial, serial);
    }
    attrs
}

/// `ioreg` reports ids as decimal integers; udev uses 4-digit hex.
fn macos_id(raw: &str) -> String {
    match raw.trim().parse::<u32>() {
        Ok(n) => format!("{:04x}", n),
        Err(_) => raw.trim().to_owned(),
    }
}

fn normalize_macos(record: &RawDeviceRecord, id: &str) -> DeviceAttributes {
    let mut attrs = DeviceAttributes::new();
    if let Some(vid) = record.first_text(&["idVendor"]) {
        attrs.set(AttributeKey::VendorId, macos_id(&vid));
    }
    if let Some(pid) = record.first_text(&["idProduct"]) {
        attrs.set(AttributeKey::ModelId, macos_id(&pid));
    }
    if let Some(product) = record.first_text(&["USB Product Name", "kUSBProductString"]) {
        attrs.set(AttributeKey::Model, product);
    }
    if let Some(vendor) = record.first_text(&["USB Vendor Name", "kUSBVendorString"]) {
        attrs.set(AttributeKey::Vendor, vendor);
    }
    if let Some(serial) = record.first_text(&["USB Serial Number", "kUSBSerialNumberString"]) {
        attrs.set(AttributeKey::Serial, serial);
    }
    if let Some(class) = record.first_text(&["IOObjectClass"]) {
        attrs.set(AttributeKey::DevType, class);
    }
    attrs.set(AttributeKey::DevName, id);
    attrs
}
