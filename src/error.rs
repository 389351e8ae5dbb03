// **************************************************************************
// Copyright (c) 2024 usbmonitor contributors All Rights Reserved.
//
// This file is part of usbmonitor
// **************************************************************************

use crate::normalize::Platform;
use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The field a device identifier is built from was missing from a raw record.
    /// Only the offending record is dropped.
    #[error("malformed {platform} device record: missing identifier field '{missing}'")]
    MalformedDeviceRecord {
        platform: Platform,
        missing: &'static str,
    },

    /// The native device subsystem could not be queried. Fails a single poll.
    #[error("failed to enumerate {platform} devices: {message}")]
    Enumeration { platform: Platform, message: String },

    #[error("'{key}' is not a canonical device attribute")]
    InvalidFilterKey { key: String },

    #[error("check interval must be a positive number of seconds, got {seconds}")]
    InvalidInterval { seconds: f64 },

    #[error("callback for device '{device_id}' failed: {message}")]
    CallbackFailure { device_id: String, message: String },

    #[error("USB monitoring is not supported on {os}")]
    UnsupportedPlatform { os: &'static str },

    #[error("failed to spawn the monitoring thread")]
    WorkerSpawn { source: std::io::Error },
}

impl MonitorError {
    pub(crate) fn enumeration(platform: Platform, cause: impl std::fmt::Display) -> Self {
        MonitorError::Enumeration {
            platform,
            message: cause.to_string(),
        }
    }
}

pub trait ResultExt<T> {
    /// Convert a native `Result<T, E>` into `Result<T, MonitorError::Enumeration {E}>`
    fn convert(self, platform: Platform) -> MonitorResult<T>;
}

impl<T> ResultExt<T> for Result<T, std::io::Error> {
    fn convert(self, platform: Platform) -> MonitorResult<T> {
        self.map_err(|e| MonitorError::enumeration(platform, e))
    }
}

impl<T> ResultExt<T> for Result<T, std::string::FromUtf8Error> {
    fn convert(self, platform: Platform) -> MonitorResult<T> {
        self.map_err(|e| MonitorError::enumeration(platform, e))
    }
}
