//! Windows enumeration through SetupAPI. Records use the property names of the
//! `Win32_PnPEntity` WMI class so they read the same as a WMI query would.

use std::io;
use std::mem;
use std::ptr;

use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInfo, SetupDiGetClassDevsW,
    SetupDiGetDeviceInstanceIdW, SetupDiGetDeviceRegistryPropertyW, DIGCF_ALLCLASSES,
    DIGCF_PRESENT, HDEVINFO, SPDRP_CLASS, SPDRP_COMPATIBLEIDS, SPDRP_DEVICEDESC,
    SPDRP_FRIENDLYNAME, SPDRP_HARDWAREID, SPDRP_MFG, SP_DEVINFO_DATA,
};
use windows_sys::Win32::Foundation::{
    ERROR_INSUFFICIENT_BUFFER, ERROR_NO_MORE_ITEMS, INVALID_HANDLE_VALUE,
};

use crate::backend::DeviceEnumerator;
use crate::error::{MonitorResult, ResultExt};
use crate::normalize::{Platform, RawDeviceRecord};

/// Instance id prefix shared by `USB\`, `USBSTOR\`, `USBPRINT\` and the
/// other USB enumerators.
const USB_ENUMERATOR_PREFIX: &str = "USB";

/// Hubs built into the host controller, never reported as devices.
const NON_USB_DEVICE_IDS: [&str; 2] = ["ROOT_HUB20", "ROOT_HUB30"];

#[derive(Debug, Default)]
pub struct SetupApiEnumerator;

impl SetupApiEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceEnumerator for SetupApiEnumerator {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn enumerate(&self) -> MonitorResult<Vec<RawDeviceRecord>> {
        let list = DevInfoList::present().convert(Platform::Windows)?;
        let mut records = Vec::new();

        for index in 0.. {
            let Some(info) = list.device(index).convert(Platform::Windows)? else {
                break;
            };
            let device_id = list.instance_id(&info).convert(Platform::Windows)?;
            if !is_usb_device(&device_id) {
                continue;
            }

            let mut record = RawDeviceRecord::new();
            record.insert("DeviceID", device_id.as_str());
            record.insert("PNPDeviceID", device_id);
            if let Some(ids) = list.multi_sz_property(&info, SPDRP_HARDWAREID) {
                record.insert("HardwareID", ids);
            }
            if let Some(ids) = list.multi_sz_property(&info, SPDRP_COMPATIBLEIDS) {
                record.insert("CompatibleID", ids);
            }
            let description = list.string_property(&info, SPDRP_DEVICEDESC);
            if let Some(name) = list
                .string_property(&info, SPDRP_FRIENDLYNAME)
                .or_else(|| description.clone())
            {
                record.insert("Name", name);
            }
            if let Some(caption) = description {
                record.insert("Caption", caption);
            }
            if let Some(mfg) = list.string_property(&info, SPDRP_MFG) {
                record.insert("Manufacturer", mfg);
            }
            if let Some(class) = list.string_property(&info, SPDRP_CLASS) {
                record.insert("PNPClass", class);
            }
            records.push(record);
        }

        Ok(records)
    }
}

/// Owned SetupAPI device information set.
struct DevInfoList(HDEVINFO);

impl DevInfoList {
    fn present() -> io::Result<Self> {
        let handle = unsafe {
            SetupDiGetClassDevsW(
                ptr::null(),
                ptr::null(),
                0,
                DIGCF_ALLCLASSES | DIGCF_PRESENT,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(handle))
    }

    fn device(&self, index: u32) -> io::Result<Option<SP_DEVINFO_DATA>> {
        let mut info: SP_DEVINFO_DATA = unsafe { mem::zeroed() };
        info.cbSize = mem::size_of::<SP_DEVINFO_DATA>() as u32;
        if unsafe { SetupDiEnumDeviceInfo(self.0, index, &mut info) } != 0 {
            return Ok(Some(info));
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_NO_MORE_ITEMS as i32) {
            Ok(None)
        } else {
            Err(err)
        }
    }

    fn instance_id(&self, info: &SP_DEVINFO_DATA) -> io::Result<String> {
        let mut required = 0u32;
        unsafe {
            SetupDiGetDeviceInstanceIdW(self.0, info, ptr::null_mut(), 0, &mut required);
        }
        let mut buf = vec![0u16; required.max(1) as usize];
        let ok = unsafe {
            SetupDiGetDeviceInstanceIdW(
                self.0,
                info,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut required,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(from_wide(&buf))
    }

    /// Raw bytes of a registry property, `None` when the device lacks it.
    fn property(&self, info: &SP_DEVINFO_DATA, property: u32) -> Option<Vec<u16>> {
        let mut required = 0u32;
        let ok = unsafe {
            SetupDiGetDeviceRegistryPropertyW(
                self.0,
                info,
                property,
                ptr::null_mut(),
                ptr::null_mut(),
                0,
                &mut required,
            )
        };
        if ok == 0
            && io::Error::last_os_error().raw_os_error() != Some(ERROR_INSUFFICIENT_BUFFER as i32)
        {
            return None;
        }

        let mut buf = vec![0u16; (required as usize + 1) / 2 + 1];
        let ok = unsafe {
            SetupDiGetDeviceRegistryPropertyW(
                self.0,
                info,
                property,
                ptr::null_mut(),
                buf.as_mut_ptr() as *mut u8,
                (buf.len() * 2) as u32,
                ptr::null_mut(),
            )
        };
        (ok != 0).then_some(buf)
    }

    fn string_property(&self, info: &SP_DEVINFO_DATA, property: u32) -> Option<String> {
        self.property(info, property).map(|buf| from_wide(&buf))
    }

    fn multi_sz_property(&self, info: &SP_DEVINFO_DATA, property: u32) -> Option<Vec<String>> {
        self.property(info, property).map(|buf| {
            buf.split(|c| *c == 0)
                .filter(|s| !s.is_empty())
                .map(String::from_utf16_lossy)
                .collect()
        })
    }
}

impl Drop for DevInfoList {
    fn drop(&mut self) {
        unsafe {
            SetupDiDestroyDeviceInfoList(self.0);
        }
    }
}

fn is_usb_device(device_id: &str) -> bool {
    let prefix_matches = device_id
        .get(..USB_ENUMERATOR_PREFIX.len())
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case(USB_ENUMERATOR_PREFIX));
    prefix_matches && !NON_USB_DEVICE_IDS.iter().any(|hub| device_id.contains(hub))
}

fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_wide() {
        let wide: Vec<u16> = "USB\\ROOT_HUB30\0garbage".encode_utf16().collect();
        assert_eq!(from_wide(&wide), "USB\\ROOT_HUB30");
    }

    #[test]
    fn test_usb_device_ids() {
        assert!(is_usb_device(r"USB\VID_046D&PID_C52B\5&2B3F1C0&0&1"));
        assert!(is_usb_device(r"USBSTOR\DISK&VEN_SANDISK&PROD_ULTRA\4C530001"));
        assert!(is_usb_device(r"USBPRINT\HPLASERJET\7&1A2B3C&0&USB001"));
        assert!(!is_usb_device(r"USB\ROOT_HUB30\4&1C2F3A&0&0"));
        assert!(!is_usb_device(r"PCI\VEN_8086&DEV_A36D\3&11583659&0&A0"));
        assert!(!is_usb_device(r"HID\VID_046D&PID_C52B&MI_00\7&2A1B&0&0000"));
    }

    #[test]
    #[ignore = "requires a Windows host with USB devices"]
    fn test_enumeration() {
        for record in SetupApiEnumerator::new().enumerate().unwrap() {
            println!("{:?}", record);
        }
    }
}
