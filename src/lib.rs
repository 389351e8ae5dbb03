// **************************************************************************
// Copyright (c) 2024 usbmonitor contributors All Rights Reserved.
//
// This file is part of usbmonitor
// **************************************************************************

//! Cross-platform listing of attached USB devices, with callbacks when devices
//! connect or disconnect.
//!
//! Every platform's native device records (udev properties on Linux, SetupAPI
//! properties on Windows, the I/O registry on macOS) are normalized into the
//! same [`DeviceAttributes`], named after the udev properties. A [`UsbMonitor`]
//! compares successive [`DeviceSnapshot`]s, either on demand or from a polling
//! thread.
//!
//! ```no_run
//! use usbmonitor::{AttributeKey, DeviceAttributes, DeviceHandlers, MonitorOptions, UsbMonitor};
//!
//! let monitor = UsbMonitor::new()?;
//! let handlers = DeviceHandlers::new()
//!     .on_connect(|id: &str, attrs: &DeviceAttributes| println!("Connected {id}: {}", attrs.summary()))
//!     .on_disconnect(|id: &str, attrs: &DeviceAttributes| {
//!         println!("Disconnected {id}: {}", attrs.text(AttributeKey::Model))
//!     });
//! monitor.start_monitoring(handlers, MonitorOptions::default())?;
//! // ...
//! monitor.stop_monitoring(true);
//! # Ok::<(), usbmonitor::MonitorError>(())
//! ```

pub mod attributes;
pub mod backend;
pub mod diff;
mod error;
pub mod filter;
pub mod monitor;
pub mod normalize;
pub mod snapshot;

pub use attributes::{AttributeKey, AttributeValue, DeviceAttributes};
pub use backend::{platform_enumerator, DeviceEnumerator};
pub use diff::{diff, DeviceChanges};
pub use error::{MonitorError, MonitorResult};
pub use filter::{DeviceFilter, FilterClause};
pub use monitor::{
    DeviceCallback, DeviceHandlers, MonitorOptions, MonitorState, UsbMonitor, DEFAULT_CHECK_EVERY,
};
pub use normalize::{normalize, Platform, RawDeviceRecord, RawValue};
pub use snapshot::{DeviceId, DeviceSnapshot};
