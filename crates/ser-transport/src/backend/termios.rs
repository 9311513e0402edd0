//! POSIX terminal backend
//!
//! Devices are opened non-blocking and put into raw mode with `PARMRK` set
//! and `IGNBRK`/`BRKINT` cleared, so framing/parity errors and BREAKs show
//! up as inline marker sequences that [`ser_codec::decode_inline`]
//! resolves. Input parity checking (`INPCK`) stays off: a parity error
//! cannot be attributed to a character by the caller.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;

use nix::errno::Errno;
use nix::libc;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices,
};
use ser_codec::BreakEncoding;
use serialport::SerialPortType;
use tracing::{debug, info};

use super::{PortIo, RawRead, SerialBackend};
use crate::catalog::DeviceDescriptor;
use crate::config::{BackendKind, Parity, SerialConfig, StopBits};
use crate::error::SerialError;

mod ioctl {
    use nix::libc;

    nix::ioctl_none_bad!(tiocexcl, libc::TIOCEXCL);
    nix::ioctl_write_ptr_bad!(tiocmbis, libc::TIOCMBIS, libc::c_int);
    nix::ioctl_write_ptr_bad!(tiocmbic, libc::TIOCMBIC, libc::c_int);
}

/// Device name prefixes probed when the host cannot list its ports
const PROBE_PREFIXES: &[&str] = &["/dev/ttyS", "/dev/ttyUSB"];

/// Devices probed per prefix
const PROBE_COUNT: usize = 64;

const BAUD_MAP: &[(u32, BaudRate)] = &[
    (50, BaudRate::B50),
    (75, BaudRate::B75),
    (110, BaudRate::B110),
    (134, BaudRate::B134),
    (150, BaudRate::B150),
    (200, BaudRate::B200),
    (300, BaudRate::B300),
    (600, BaudRate::B600),
    (1200, BaudRate::B1200),
    (1800, BaudRate::B1800),
    (2400, BaudRate::B2400),
    (4800, BaudRate::B4800),
    (9600, BaudRate::B9600),
    (19200, BaudRate::B19200),
    (38400, BaudRate::B38400),
    (57600, BaudRate::B57600),
    (115200, BaudRate::B115200),
];

/// Host rate code for a baud rate, if the backend supports it
fn baud_rate(rate: u32) -> Option<BaudRate> {
    BAUD_MAP
        .iter()
        .find(|(r, _)| *r == rate)
        .map(|(_, code)| *code)
}

fn char_size_flags(size: u8) -> Option<ControlFlags> {
    match size {
        5 => Some(ControlFlags::CS5),
        6 => Some(ControlFlags::CS6),
        7 => Some(ControlFlags::CS7),
        8 => Some(ControlFlags::CS8),
        _ => None,
    }
}

fn errno_error(operation: &'static str, errno: Errno) -> SerialError {
    SerialError::io(operation, errno as i32)
}

/// Classify a failed open
fn open_error(name: &str, err: &io::Error) -> SerialError {
    match err.raw_os_error() {
        Some(libc::ENOENT) | Some(libc::ENXIO) | Some(libc::ENODEV) => {
            SerialError::NotFound(name.to_string())
        }
        Some(libc::EACCES) | Some(libc::EBUSY) => SerialError::Busy(name.to_string()),
        // Rejected before reaching the host, e.g. an interior NUL
        None if err.kind() == io::ErrorKind::InvalidInput => {
            SerialError::NotFound(name.to_string())
        }
        _ => SerialError::from_io("open", err),
    }
}

fn open_nonblocking(name: &str) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(name)
}

/// Apply raw mode with inline line-condition marking
fn make_raw(tio: &mut termios::Termios) {
    tio.input_flags.remove(
        InputFlags::IGNBRK
            | InputFlags::BRKINT
            | InputFlags::INPCK
            | InputFlags::ISTRIP
            | InputFlags::INLCR
            | InputFlags::IGNCR
            | InputFlags::ICRNL
            | InputFlags::IXON
            | InputFlags::IXOFF,
    );
    tio.input_flags
        .insert(InputFlags::PARMRK | InputFlags::IGNPAR);

    tio.output_flags.remove(OutputFlags::OPOST);

    tio.control_flags.remove(ControlFlags::HUPCL);
    tio.control_flags
        .insert(ControlFlags::CREAD | ControlFlags::CLOCAL);

    tio.local_flags.remove(
        LocalFlags::ISIG
            | LocalFlags::ICANON
            | LocalFlags::ECHO
            | LocalFlags::ECHOE
            | LocalFlags::ECHOK
            | LocalFlags::ECHONL
            | LocalFlags::NOFLSH
            | LocalFlags::TOSTOP
            | LocalFlags::IEXTEN,
    );

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
}

/// Apply baud rate and framing to a termios structure
fn apply_config(tio: &mut termios::Termios, config: &SerialConfig) -> Result<(), SerialError> {
    config.validate()?;

    let rate = baud_rate(config.baud_rate).ok_or_else(|| {
        SerialError::InvalidArgument(format!("unsupported baud rate {}", config.baud_rate))
    })?;
    termios::cfsetspeed(tio, rate).map_err(|e| match e {
        Errno::EINVAL => {
            SerialError::InvalidArgument(format!("unsupported baud rate {}", config.baud_rate))
        }
        e => errno_error("cfsetspeed", e),
    })?;

    let size = char_size_flags(config.char_size).ok_or_else(|| {
        SerialError::InvalidArgument(format!("character size {}", config.char_size))
    })?;
    tio.control_flags.remove(ControlFlags::CSIZE);
    tio.control_flags.insert(size);

    match config.parity {
        Parity::None => tio.control_flags.remove(ControlFlags::PARENB),
        Parity::Even => {
            tio.control_flags.remove(ControlFlags::PARODD);
            tio.control_flags.insert(ControlFlags::PARENB);
        }
        Parity::Odd => tio
            .control_flags
            .insert(ControlFlags::PARODD | ControlFlags::PARENB),
        Parity::Mark | Parity::Space => {
            return Err(SerialError::InvalidArgument(format!(
                "{:?} parity not supported",
                config.parity
            )))
        }
    }

    match config.stop_bits {
        StopBits::One => tio.control_flags.remove(ControlFlags::CSTOPB),
        StopBits::Two => tio.control_flags.insert(ControlFlags::CSTOPB),
        StopBits::OnePointFive => {
            return Err(SerialError::InvalidArgument(
                "1.5 stop bits not supported".to_string(),
            ))
        }
    }

    Ok(())
}

/// Terminal devices on a POSIX host
#[derive(Debug, Default)]
pub struct TermiosBackend;

impl TermiosBackend {
    /// Create the backend
    pub fn new() -> Self {
        Self
    }

    /// Open each candidate device path and keep the terminals
    fn probe(&self, max: usize) -> Vec<DeviceDescriptor> {
        let mut found = Vec::new();
        for prefix in PROBE_PREFIXES {
            for i in 0..PROBE_COUNT {
                if found.len() >= max {
                    return found;
                }
                let name = format!("{}{}", prefix, i);
                if let Ok(file) = open_nonblocking(&name) {
                    if file.is_terminal() {
                        found.push(DeviceDescriptor::new(name, ""));
                    }
                }
            }
        }
        found
    }
}

fn from_serialport(name: String, port_type: &SerialPortType) -> DeviceDescriptor {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let description = usb
                .product
                .clone()
                .or_else(|| usb.manufacturer.clone())
                .unwrap_or_default();
            DeviceDescriptor::new(name, description)
        }
        _ => DeviceDescriptor::new(name, ""),
    }
}

impl SerialBackend for TermiosBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Termios
    }

    fn break_encoding(&self) -> BreakEncoding {
        BreakEncoding::Inline
    }

    fn enumerate(&self, max: usize) -> Vec<DeviceDescriptor> {
        match serialport::available_ports() {
            Ok(ports) if !ports.is_empty() => ports
                .into_iter()
                .take(max)
                .map(|p| from_serialport(p.port_name, &p.port_type))
                .collect(),
            Ok(_) => self.probe(max),
            Err(e) => {
                debug!("Port listing failed ({}), probing device paths", e);
                self.probe(max)
            }
        }
    }

    fn open(&self, name: &str) -> Result<Box<dyn PortIo>, SerialError> {
        let file = open_nonblocking(name).map_err(|e| open_error(name, &e))?;

        if !file.is_terminal() {
            return Err(SerialError::NotFound(name.to_string()));
        }

        // SAFETY: the descriptor is owned by `file` and valid for this call
        unsafe { ioctl::tiocexcl(file.as_raw_fd()) }.map_err(|e| errno_error("ioctl", e))?;

        let mut tio = termios::tcgetattr(file.as_fd()).map_err(|e| errno_error("tcgetattr", e))?;
        make_raw(&mut tio);
        termios::tcsetattr(file.as_fd(), SetArg::TCSANOW, &tio)
            .map_err(|e| errno_error("tcsetattr", e))?;

        info!("Opened {}", name);
        Ok(Box::new(TermiosPort {
            name: name.to_string(),
            file,
        }))
    }
}

/// An open terminal device
struct TermiosPort {
    name: String,
    file: File,
}

impl PortIo for TermiosPort {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), SerialError> {
        let mut tio =
            termios::tcgetattr(self.file.as_fd()).map_err(|e| errno_error("tcgetattr", e))?;
        apply_config(&mut tio, config)?;

        termios::tcsetattr(self.file.as_fd(), SetArg::TCSAFLUSH, &tio).map_err(|e| match e {
            Errno::EINVAL => SerialError::InvalidArgument(format!("host rejected {}", config)),
            e => errno_error("tcsetattr", e),
        })?;

        debug!("Configured {} as {}", self.name, config);
        Ok(())
    }

    fn set_dtr(&mut self, assert: bool) -> Result<(), SerialError> {
        let dtr: libc::c_int = libc::TIOCM_DTR;
        let fd = self.file.as_raw_fd();

        // SAFETY: `fd` is open and `dtr` outlives the call
        let result = unsafe {
            if assert {
                ioctl::tiocmbis(fd, &dtr)
            } else {
                ioctl::tiocmbic(fd, &dtr)
            }
        };

        match result {
            Ok(_) => Ok(()),
            Err(Errno::EINVAL) | Err(Errno::ENOTTY) => Err(SerialError::Unsupported("DTR control")),
            Err(e) => Err(errno_error("ioctl", e)),
        }
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<RawRead, SerialError> {
        match self.file.read(buf) {
            Ok(n) => Ok(RawRead::bytes(n)),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(RawRead::empty())
            }
            Err(e) => Err(SerialError::from_io("read", &e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        match self.file.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(SerialError::from_io("write", &e)),
        }
    }

    fn close(self: Box<Self>) {
        debug!("Closing {}", self.name);
        drop(self.file);
    }
}
