// **************************************************************************
// Copyright (c) 2024 usbmonitor contributors All Rights Reserved.
//
// This file is part of usbmonitor
// **************************************************************************

//! Native device enumerators, one per supported platform.

use cfg_if::cfg_if;

use crate::error::MonitorResult;
use crate::normalize::{Platform, RawDeviceRecord};

// The ioreg parser is plain text processing, keep it testable everywhere.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
mod ioreg;

cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use self::linux::UdevEnumerator as PlatformEnumerator;
    } else if #[cfg(windows)] {
        mod windows;
        pub use self::windows::SetupApiEnumerator as PlatformEnumerator;
    } else if #[cfg(target_os = "macos")] {
        pub use self::ioreg::IoregEnumerator as PlatformEnumerator;
    }
}

/// Source of raw device records for one platform.
pub trait DeviceEnumerator: Send + Sync {
    /// Platform whose key names the returned records use.
    fn platform(&self) -> Platform;

    /// Every attached USB device, in enumeration order.
    fn enumerate(&self) -> MonitorResult<Vec<RawDeviceRecord>>;
}

/// The enumerator for the platform this crate was built for.
pub fn platform_enumerator() -> MonitorResult<Box<dyn DeviceEnumerator>> {
    cfg_if! {
        if #[cfg(any(target_os = "linux", windows, target_os = "macos"))] {
            Ok(Box::new(PlatformEnumerator::new()))
        } else {
            Err(crate::error::MonitorError::UnsupportedPlatform {
                os: std::env::consts::OS,
            })
        }
    }
}
