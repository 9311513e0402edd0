//! Windows comm API backend
//!
//! Devices come from `HKLM\HARDWARE\DEVICEMAP\SERIALCOMM`, with the
//! kernel device name as the description. Reads poll with an immediate
//! timeout; BREAK conditions are collected with `ClearCommError` and
//! reported on the side channel.

use std::ffi::CString;
use std::ptr;

use ser_codec::BreakEncoding;
use tracing::{debug, info};
use windows_sys::Win32::Devices::Communication::{
    ClearCommError, EscapeCommFunction, GetCommState, GetDefaultCommConfigA, SetCommState,
    SetCommTimeouts, CE_BREAK, CLRDTR, COMMCONFIG, COMMTIMEOUTS, COMSTAT, DCB, EVENPARITY,
    MARKPARITY, NOPARITY, ODDPARITY, ONE5STOPBITS, ONESTOPBIT, SETDTR, SPACEPARITY,
    TWOSTOPBITS,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND,
    ERROR_INVALID_PARAMETER, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS, GENERIC_READ, GENERIC_WRITE,
    HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{CreateFileA, ReadFile, WriteFile, OPEN_EXISTING};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegEnumValueA, RegOpenKeyExA, HKEY, HKEY_LOCAL_MACHINE, KEY_QUERY_VALUE, REG_SZ,
};

use super::{PortIo, RawRead, SerialBackend};
use crate::catalog::DeviceDescriptor;
use crate::config::{BackendKind, Parity, SerialConfig, StopBits};
use crate::error::SerialError;

const SERIALCOMM_KEY: &[u8] = b"HARDWARE\\DEVICEMAP\\SERIALCOMM\0";

/// Registry value name and data buffer size
const REG_BUFFER: usize = 256;

/// `fDtrControl` occupies bits 4..=5 of the DCB flag word
const DTR_CONTROL_SHIFT: u32 = 4;
const DTR_CONTROL_MASK: u32 = 0b11 << DTR_CONTROL_SHIFT;

/// `fOutX` and `fInX`
const XON_XOFF_MASK: u32 = (1 << 8) | (1 << 9);

fn last_error() -> u32 {
    // SAFETY: reads thread-local error state only
    unsafe { GetLastError() }
}

fn io_error(operation: &'static str, code: u32) -> SerialError {
    SerialError::io(operation, code as i32)
}

/// Text up to the first NUL
fn trim_nul(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Copy the defaults of interest and disable DTR
fn prepare_open_state(dcb: &mut DCB, defaults: &DCB) {
    dcb.BaudRate = defaults.BaudRate;
    dcb.Parity = defaults.Parity;
    dcb.ByteSize = defaults.ByteSize;
    dcb.StopBits = defaults.StopBits;
    dcb._bitfield = (dcb._bitfield & !XON_XOFF_MASK) | (defaults._bitfield & XON_XOFF_MASK);
    dcb._bitfield &= !DTR_CONTROL_MASK;
}

/// Apply baud rate and framing to a DCB
fn apply_config(dcb: &mut DCB, config: &SerialConfig) -> Result<(), SerialError> {
    config.validate()?;

    dcb.BaudRate = config.baud_rate;
    dcb.ByteSize = config.char_size;
    dcb.Parity = match config.parity {
        Parity::Even => EVENPARITY,
        Parity::Mark => MARKPARITY,
        Parity::None => NOPARITY,
        Parity::Odd => ODDPARITY,
        Parity::Space => SPACEPARITY,
    };
    dcb.StopBits = match config.stop_bits {
        StopBits::One => ONESTOPBIT,
        StopBits::OnePointFive => ONE5STOPBITS,
        StopBits::Two => TWOSTOPBITS,
    };
    Ok(())
}

/// Device path usable by `CreateFile` for any COM number
fn device_path(name: &str) -> String {
    if name.starts_with("\\\\.\\") {
        name.to_string()
    } else {
        format!("\\\\.\\{}", name)
    }
}

/// Serial devices through the Windows comm API
#[derive(Debug, Default)]
pub struct WindowsBackend;

impl WindowsBackend {
    /// Create the backend
    pub fn new() -> Self {
        Self
    }
}

impl SerialBackend for WindowsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Windows
    }

    fn break_encoding(&self) -> BreakEncoding {
        BreakEncoding::SideChannel
    }

    fn enumerate(&self, max: usize) -> Vec<DeviceDescriptor> {
        let mut found = Vec::new();
        let mut key: HKEY = ptr::null_mut();

        // SAFETY: the subkey is NUL-terminated and `key` is a valid out pointer
        let status = unsafe {
            RegOpenKeyExA(
                HKEY_LOCAL_MACHINE,
                SERIALCOMM_KEY.as_ptr(),
                0,
                KEY_QUERY_VALUE,
                &mut key,
            )
        };
        if status != ERROR_SUCCESS {
            debug!("SERIALCOMM key unavailable (error {})", status);
            return found;
        }

        let mut index = 0u32;
        while found.len() < max {
            let mut value_name = [0u8; REG_BUFFER];
            let mut data = [0u8; REG_BUFFER];
            let mut name_len = REG_BUFFER as u32;
            let mut data_len = REG_BUFFER as u32;
            let mut value_type = 0u32;

            // SAFETY: buffers and lengths describe live stack arrays
            let status = unsafe {
                RegEnumValueA(
                    key,
                    index,
                    value_name.as_mut_ptr(),
                    &mut name_len,
                    ptr::null(),
                    &mut value_type,
                    data.as_mut_ptr(),
                    &mut data_len,
                )
            };
            if status == ERROR_NO_MORE_ITEMS {
                break;
            }
            if status != ERROR_SUCCESS {
                debug!("SERIALCOMM enumeration stopped (error {})", status);
                break;
            }

            if value_type == REG_SZ && data_len > 0 {
                let name = trim_nul(&data[..data_len as usize]);
                if !name.is_empty() {
                    found.push(DeviceDescriptor::new(name, trim_nul(&value_name)));
                }
            }
            index += 1;
        }

        // SAFETY: `key` was opened above
        unsafe { RegCloseKey(key) };
        found
    }

    fn open(&self, name: &str) -> Result<Box<dyn PortIo>, SerialError> {
        let not_found = || SerialError::NotFound(name.to_string());
        let c_name = CString::new(name).map_err(|_| not_found())?;
        let c_path = CString::new(device_path(name)).map_err(|_| not_found())?;

        // SAFETY: zeroed COMMCONFIG is a valid out structure
        let mut defaults: COMMCONFIG = unsafe { std::mem::zeroed() };
        let mut size = std::mem::size_of::<COMMCONFIG>() as u32;

        // SAFETY: name is NUL-terminated, `defaults` is sized by `size`
        if unsafe { GetDefaultCommConfigA(c_name.as_ptr() as *const u8, &mut defaults, &mut size) }
            == 0
        {
            return match last_error() {
                ERROR_INVALID_PARAMETER | ERROR_FILE_NOT_FOUND => Err(not_found()),
                code => Err(io_error("GetDefaultCommConfig", code)),
            };
        }

        // SAFETY: path is NUL-terminated, no security attributes or template
        let handle = unsafe {
            CreateFileA(
                c_path.as_ptr() as *const u8,
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null(),
                OPEN_EXISTING,
                0,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return match last_error() {
                ERROR_FILE_NOT_FOUND => Err(not_found()),
                ERROR_ACCESS_DENIED => Err(SerialError::Busy(name.to_string())),
                code => Err(io_error("CreateFile", code)),
            };
        }
        let port = WindowsPort {
            name: name.to_string(),
            handle,
        };

        let mut dcb = port.comm_state().map_err(|e| match e {
            SerialError::Io { code, .. } if code == ERROR_INVALID_PARAMETER as i32 => not_found(),
            e => e,
        })?;
        prepare_open_state(&mut dcb, &defaults.dcb);

        // SAFETY: handle is open and `dcb` is initialised
        if unsafe { SetCommState(port.handle, &dcb) } == 0 {
            return Err(io_error("SetCommState", last_error()));
        }

        let timeouts = COMMTIMEOUTS {
            ReadIntervalTimeout: u32::MAX,
            ReadTotalTimeoutMultiplier: 0,
            ReadTotalTimeoutConstant: 0,
            WriteTotalTimeoutMultiplier: 0,
            WriteTotalTimeoutConstant: 0,
        };
        // SAFETY: handle is open
        if unsafe { SetCommTimeouts(port.handle, &timeouts) } == 0 {
            return Err(io_error("SetCommTimeouts", last_error()));
        }

        info!("Opened {}", name);
        Ok(Box::new(port))
    }
}

/// An open comm device; the handle closes on drop
struct WindowsPort {
    name: String,
    handle: HANDLE,
}

impl WindowsPort {
    fn comm_state(&self) -> Result<DCB, SerialError> {
        // SAFETY: zeroed DCB is a valid out structure
        let mut dcb: DCB = unsafe { std::mem::zeroed() };
        dcb.DCBlength = std::mem::size_of::<DCB>() as u32;

        // SAFETY: handle is open
        if unsafe { GetCommState(self.handle, &mut dcb) } == 0 {
            return Err(io_error("GetCommState", last_error()));
        }
        Ok(dcb)
    }
}

impl Drop for WindowsPort {
    fn drop(&mut self) {
        // SAFETY: the handle is owned by this port and closed once
        unsafe { CloseHandle(self.handle) };
    }
}

impl PortIo for WindowsPort {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), SerialError> {
        let mut dcb = self.comm_state()?;
        apply_config(&mut dcb, config)?;

        // SAFETY: handle is open and `dcb` is initialised
        if unsafe { SetCommState(self.handle, &dcb) } == 0 {
            return match last_error() {
                ERROR_INVALID_PARAMETER => Err(SerialError::InvalidArgument(format!(
                    "host rejected {}",
                    config
                ))),
                code => Err(io_error("SetCommState", code)),
            };
        }

        debug!("Configured {} as {}", self.name, config);
        Ok(())
    }

    fn set_dtr(&mut self, assert: bool) -> Result<(), SerialError> {
        let function = if assert { SETDTR } else { CLRDTR };
        // SAFETY: handle is open
        if unsafe { EscapeCommFunction(self.handle, function) } == 0 {
            return Err(io_error("EscapeCommFunction", last_error()));
        }
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<RawRead, SerialError> {
        let mut errors = 0;
        // SAFETY: zeroed COMSTAT is a valid out structure
        let mut status: COMSTAT = unsafe { std::mem::zeroed() };

        // SAFETY: handle is open, out pointers are live
        if unsafe { ClearCommError(self.handle, &mut errors, &mut status) } == 0 {
            return Err(io_error("ClearCommError", last_error()));
        }

        let want = buf.len().min(u32::MAX as usize) as u32;
        let mut read = 0u32;
        // SAFETY: `buf` holds at least `want` bytes
        if unsafe {
            ReadFile(
                self.handle,
                buf.as_mut_ptr(),
                want,
                &mut read,
                ptr::null_mut(),
            )
        } == 0
        {
            return Err(io_error("ReadFile", last_error()));
        }

        Ok(RawRead {
            len: read as usize,
            break_reported: errors & CE_BREAK != 0,
        })
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        let want = data.len().min(u32::MAX as usize) as u32;
        let mut written = 0u32;
        // SAFETY: `data` holds at least `want` bytes
        if unsafe {
            WriteFile(
                self.handle,
                data.as_ptr(),
                want,
                &mut written,
                ptr::null_mut(),
            )
        } == 0
        {
            return Err(io_error("WriteFile", last_error()));
        }
        Ok(written as usize)
    }

    fn close(self: Box<Self>) {
        debug!("Closing {}", self.name);
    }
}
