//! Canonical device attribute schema.
//!
//! Every platform's device records are reduced to the same ten attributes, named
//! after the Linux udev properties they originate from. A [`DeviceAttributes`]
//! always carries all of them; attributes a platform cannot provide hold the
//! empty value of their shape.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::str::FromStr;

use crate::error::MonitorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKey {
    ModelId,
    Model,
    ModelFromDatabase,
    Vendor,
    VendorId,
    VendorFromDatabase,
    UsbInterfaces,
    DevName,
    DevType,
    Serial,
}

impl AttributeKey {
    pub const ALL: [AttributeKey; 10] = [
        AttributeKey::ModelId,
        AttributeKey::Model,
        AttributeKey::ModelFromDatabase,
        AttributeKey::Vendor,
        AttributeKey::VendorId,
        AttributeKey::VendorFromDatabase,
        AttributeKey::UsbInterfaces,
        AttributeKey::DevName,
        AttributeKey::DevType,
        AttributeKey::Serial,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AttributeKey::ModelId => "ID_MODEL_ID",
            AttributeKey::Model => "ID_MODEL",
            AttributeKey::ModelFromDatabase => "ID_MODEL_FROM_DATABASE",
            AttributeKey::Vendor => "ID_VENDOR",
            AttributeKey::VendorId => "ID_VENDOR_ID",
            AttributeKey::VendorFromDatabase => "ID_VENDOR_FROM_DATABASE",
            AttributeKey::UsbInterfaces => "ID_USB_INTERFACES",
            AttributeKey::DevName => "DEVNAME",
            AttributeKey::DevType => "DEVTYPE",
            AttributeKey::Serial => "ID_SERIAL",
        }
    }

    /// Whether values of this attribute are sequences rather than strings.
    pub const fn is_list(self) -> bool {
        matches!(self, AttributeKey::UsbInterfaces)
    }

    /// The "absent" value for this attribute.
    pub fn empty_value(self) -> AttributeValue {
        if self.is_list() {
            AttributeValue::List(Vec::new())
        } else {
            AttributeValue::Text(String::new())
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeKey {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| MonitorError::InvalidFilterKey { key: s.to_owned() })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeValue {
    Text(String),
    List(Vec<String>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::Text(_) => None,
            AttributeValue::List(l) => Some(l),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Text(s) => s.is_empty(),
            AttributeValue::List(l) => l.is_empty(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::List(l) => write!(f, "({})", l.join(", ")),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(l: Vec<String>) -> Self {
        AttributeValue::List(l)
    }
}

impl From<&[&str]> for AttributeValue {
    fn from(l: &[&str]) -> Self {
        AttributeValue::List(l.iter().map(|s| (*s).to_owned()).collect())
    }
}

/// Normalized description of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAttributes {
    values: BTreeMap<AttributeKey, AttributeValue>,
}

impl DeviceAttributes {
    /// A map holding the absent value for every key.
    pub fn new() -> Self {
        Self {
            values: AttributeKey::ALL
                .iter()
                .map(|key| (*key, key.empty_value()))
                .collect(),
        }
    }

    pub fn get(&self, key: AttributeKey) -> &AttributeValue {
        // Every key is inserted by `new` and never removed.
        &self.values[&key]
    }

    /// Text view of an attribute; list attributes read as `""`.
    pub fn text(&self, key: AttributeKey) -> &str {
        self.get(key).as_text().unwrap_or_default()
    }

    /// List view of an attribute; text attributes read as an empty slice.
    pub fn list(&self, key: AttributeKey) -> &[String] {
        self.get(key).as_list().unwrap_or_default()
    }

    /// Store `value` under `key`, coercing it to the shape the key requires.
    pub fn set(&mut self, key: AttributeKey, value: impl Into<AttributeValue>) {
        let value = match (key.is_list(), value.into()) {
            (true, AttributeValue::Text(s)) if s.is_empty() => AttributeValue::List(Vec::new()),
            (true, AttributeValue::Text(s)) => AttributeValue::List(vec![s]),
            (false, AttributeValue::List(l)) => AttributeValue::Text(l.join(";")),
            (_, value) => value,
        };
        self.values.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (AttributeKey, &AttributeValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// One-line human readable description, e.g. `USB Receiver (c52b - 046d)`.
    pub fn summary(&self) -> String {
        format!(
            "{} ({} - {})",
            self.text(AttributeKey::Model),
            self.text(AttributeKey::ModelId),
            self.text(AttributeKey::VendorId)
        )
    }
}

impl Default for DeviceAttributes {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<AttributeKey> for DeviceAttributes {
    type Output = AttributeValue;

    fn index(&self, key: AttributeKey) -> &AttributeValue {
        self.get(key)
    }
}
