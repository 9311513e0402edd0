//! ser-show - list host serial devices and try them out
//!
//! Prints the device catalog with the `serN` names accepted by the
//! transport, then opens each NAME given on the command line, applies a
//! line configuration, asserts DTR and optionally polls for input before
//! listing the open ports and closing them again.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use ser_transport::{
    BackendKind, Decoded, LineRef, PortHandle, SerialConfig, SerialManager, TransportSettings,
};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Device name used for the lines this tool opens ports on
const LINE_DEVICE: &str = "SHOW";

/// Bytes requested per poll
const POLL_CHUNK: usize = 256;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Backend to use: termios, windows or unsupported (default: this host's)
    #[arg(short, long)]
    backend: Option<BackendKind>,
    /// JSON file with transport settings
    #[arg(short, long)]
    settings: Option<PathBuf>,
    /// Maximum number of devices to list
    #[arg(short, long)]
    max: Option<usize>,
    /// Line configuration for opened ports, e.g. 9600-8N1 or 300-7E2
    #[arg(short, long, default_value = "9600-8N1")]
    config: SerialConfig,
    /// Poll opened ports for this many milliseconds, printing what arrives
    #[arg(long, default_value_t = 0)]
    listen_ms: u64,
    /// Ports to open: serN, a device description or a device name
    names: Vec<String>,
}

#[derive(Debug, Error)]
enum ShowError {
    #[error("cannot read settings {}: {source}", path.display())]
    ReadSettings { path: PathBuf, source: io::Error },

    #[error("invalid settings {}: {source}", path.display())]
    ParseSettings {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Output(#[from] io::Error),
}

fn load_settings(args: &Args) -> Result<TransportSettings, ShowError> {
    let mut settings = match &args.settings {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| ShowError::ReadSettings {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&text).map_err(|source| ShowError::ParseSettings {
                path: path.clone(),
                source,
            })?
        }
        None => TransportSettings::default(),
    };

    if let Some(backend) = args.backend {
        settings.backend = backend;
    }
    if let Some(max) = args.max {
        settings.max_devices = max;
    }
    Ok(settings)
}

/// Print the device catalog
fn show_devices<W: Write>(out: &mut W, serial: &SerialManager) -> io::Result<()> {
    writeln!(out, "Serial devices:")?;

    if !serial.is_supported() {
        return writeln!(out, "  serial support not available");
    }

    let devices = serial.list_devices(serial.max_devices());
    if devices.is_empty() {
        return writeln!(out, "  no serial devices are available");
    }

    let width = devices.iter().map(|d| d.name.len()).max().unwrap_or(0);
    for (i, device) in devices.iter().enumerate() {
        writeln!(
            out,
            " ser{}\t{:<width$} ({})",
            i,
            device.name,
            device.description,
            width = width
        )?;
    }
    Ok(())
}

/// Print the open ports, if any
fn show_open_ports<W: Write>(out: &mut W, serial: &SerialManager) -> io::Result<()> {
    let open = serial.describe_open_ports();
    if open.is_empty() {
        return Ok(());
    }

    writeln!(out, "Open Serial Devices:")?;
    for port in open {
        match port.description {
            Some(desc) => writeln!(out, " {} {} ({})", port.line, port.name, desc)?,
            None => writeln!(out, " {} {}", port.line, port.name)?,
        }
    }
    Ok(())
}

/// Render decoded input, marking BREAKs and escaping non-printables
fn render_input(input: &Decoded) -> String {
    let mut text = String::new();
    for (&byte, &brk) in input.data().iter().zip(input.breaks()) {
        if brk {
            text.push_str("<BREAK>");
        }
        if byte.is_ascii_graphic() || byte == b' ' {
            text.push(byte as char);
        } else {
            text.push_str(&format!("\\x{:02x}", byte));
        }
    }
    text
}

/// Open each named port on its own line, configured and with DTR up
fn open_ports(
    serial: &mut SerialManager,
    names: &[String],
    config: &SerialConfig,
) -> Vec<PortHandle> {
    let mut handles = Vec::new();

    for (line, name) in names.iter().enumerate() {
        let handle = match serial.resolve_and_open(name, LineRef::new(LINE_DEVICE, line)) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot open {}: {}", name, e);
                continue;
            }
        };

        if let Err(e) = serial.configure(handle, config) {
            warn!("Cannot configure {} as {}: {}", name, config, e);
        }
        if !serial.control(handle, true) {
            warn!("DTR not asserted on {}", name);
        }
        handles.push(handle);
    }

    handles
}

fn listen<W: Write>(
    out: &mut W,
    serial: &mut SerialManager,
    handles: &[PortHandle],
    duration: Duration,
) -> io::Result<()> {
    let deadline = Instant::now() + duration;

    while Instant::now() < deadline {
        for &handle in handles {
            match serial.poll_read(handle, POLL_CHUNK) {
                Ok(input) if !input.is_empty() => {
                    writeln!(out, " {}: {}", handle, render_input(&input))?
                }
                Ok(_) => {}
                Err(e) => warn!("Read from {} failed: {}", handle, e),
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

fn run(args: Args) -> Result<(), ShowError> {
    let settings = load_settings(&args)?;
    let mut serial = SerialManager::with_settings(&settings);
    info!(
        "Using {} backend ({} BREAK encoding)",
        serial.backend_kind().name(),
        serial.break_encoding().name()
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let handles = open_ports(&mut serial, &args.names, &args.config);
    show_devices(&mut out, &serial)?;
    show_open_ports(&mut out, &serial)?;

    if args.listen_ms > 0 && !handles.is_empty() {
        listen(
            &mut out,
            &mut serial,
            &handles,
            Duration::from_millis(args.listen_ms),
        )?;
    }

    serial.close_all();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ser_show=info,ser_transport=info,ser_codec=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ser-show: {}", e);
            ExitCode::FAILURE
        }
    }
}
