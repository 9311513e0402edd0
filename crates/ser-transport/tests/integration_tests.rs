//! Integration tests for the serial transport
//!
//! These drive `SerialManager` over the simulated host and verify:
//! - Name resolution through the live catalog
//! - Catalog merging of open devices the host does not list
//! - Open/close pairing with the registry
//! - Decoded reads for both BREAK encodings
//! - That only unexpected host failures are reported

use std::sync::{Arc, Mutex};

use ser_transport::backend::sim::SimOp;
use ser_transport::backend::{SimBackend, SimDevice};
use ser_transport::{
    BreakEncoding, LineRef, OpenPortInfo, Parity, SerialConfig, SerialError, SerialManager,
    StopBits, MAX_READ_CHUNK,
};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// A host with three devices, one of them described
    pub fn host(encoding: BreakEncoding) -> SimBackend {
        let host = SimBackend::new(encoding);
        host.add_device(SimDevice::new("/dev/ttyUSB0").with_description("FT232R USB UART"));
        host.add_device(SimDevice::new("/dev/ttyS1"));
        host.add_device(SimDevice::new("/dev/ttyS0"));
        host
    }

    /// Manager plus a handle on its host for scripting
    pub fn manager(encoding: BreakEncoding) -> (SimBackend, SerialManager) {
        let host = host(encoding);
        (host.clone(), SerialManager::new(Box::new(host)))
    }

    pub fn line(n: usize) -> LineRef {
        LineRef::new("DZ", n)
    }

    #[derive(Default)]
    struct MessageVisitor {
        message: Option<String>,
    }

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.message = Some(format!("{:?}", value));
            }
        }
    }

    /// Records error-level events from the diagnostics target
    struct ReportCapture(Arc<Mutex<Vec<String>>>);

    impl<S: Subscriber> Layer<S> for ReportCapture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().target() != "ser_transport::diagnostics" {
                return;
            }
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            if let Ok(mut reports) = self.0.lock() {
                reports.push(visitor.message.unwrap_or_default());
            }
        }
    }

    /// Run `f` and return the diagnostics it reported
    pub fn reports<T, F: FnOnce() -> T>(f: F) -> (T, Vec<String>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(ReportCapture(reports.clone()));
        let out = tracing::subscriber::with_default(subscriber, f);
        let reports = reports.lock().unwrap().clone();
        (out, reports)
    }
}

use helpers::*;

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn test_indexed_names_follow_sorted_catalog() {
    let (_host, mgr) = manager(BreakEncoding::Inline);

    let listed = mgr.list_devices(64);
    let names: Vec<&str> = listed.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["/dev/ttyS0", "/dev/ttyS1", "/dev/ttyUSB0"]);

    for (i, device) in listed.iter().enumerate() {
        let resolved = mgr.resolve(&format!("ser{}", i)).unwrap();
        assert_eq!(resolved.name, device.name);
        assert_eq!(resolved.description.as_deref(), device.description());
    }

    // Case-insensitive prefix
    assert_eq!(mgr.resolve("SER2").unwrap().name, "/dev/ttyUSB0");
}

#[test]
fn test_out_of_range_index_is_not_found() {
    let (_host, mut mgr) = manager(BreakEncoding::Inline);

    assert!(matches!(mgr.resolve("ser99"), Err(SerialError::NotFound(_))));
    // Too long for the indexed form, so it passes through as a device name
    assert_eq!(mgr.resolve("ser999").unwrap().name, "ser999");

    let (result, reported) = reports(|| mgr.resolve_and_open("ser999", line(0)));
    assert!(matches!(result, Err(SerialError::NotFound(_))));
    assert!(reported.is_empty());
}

#[test]
fn test_description_match_keeps_callers_spelling() {
    let (_host, mut mgr) = manager(BreakEncoding::Inline);

    let handle = mgr.resolve_and_open("ft232r usb uart", line(2)).unwrap();
    assert_eq!(
        mgr.describe_open_ports(),
        vec![OpenPortInfo {
            line: line(2),
            name: "/dev/ttyUSB0".into(),
            description: Some("ft232r usb uart".into()),
        }]
    );

    // A prefix of the description is not a match and passes through
    assert_eq!(mgr.resolve("FT232R").unwrap().name, "FT232R");
    mgr.close(handle);
}

// ============================================================================
// Catalog
// ============================================================================

#[test]
fn test_open_hidden_device_stays_in_catalog() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    host.add_device(SimDevice::new("/dev/ttyACM0").hidden());

    assert_eq!(mgr.list_devices(64).len(), 3);

    let handle = mgr.resolve_and_open("/dev/ttyACM0", line(0)).unwrap();
    let names: Vec<String> = mgr.list_devices(64).into_iter().map(|d| d.name).collect();
    assert_eq!(
        names,
        vec!["/dev/ttyACM0", "/dev/ttyS0", "/dev/ttyS1", "/dev/ttyUSB0"]
    );

    // Indices now account for the merged device
    assert_eq!(mgr.resolve("ser0").unwrap().name, "/dev/ttyACM0");

    mgr.close(handle);
    assert_eq!(mgr.list_devices(64).len(), 3);
}

#[test]
fn test_catalog_bound() {
    let (_host, mgr) = manager(BreakEncoding::Inline);
    assert_eq!(mgr.list_devices(2).len(), 2);
    assert!(mgr.list_devices(0).is_empty());
}

// ============================================================================
// Open / close
// ============================================================================

#[test]
fn test_busy_and_missing_devices_are_not_reported() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    host.add_device(SimDevice::new("/dev/ttyS7").busy());

    let (results, reported) = reports(|| {
        (
            mgr.resolve_and_open("/dev/ttyS7", line(0)),
            mgr.resolve_and_open("/dev/nonexistent", line(1)),
        )
    });

    assert!(matches!(results.0, Err(SerialError::Busy(_))));
    assert!(matches!(results.1, Err(SerialError::NotFound(_))));
    assert!(reported.is_empty());
    assert!(mgr.registry().is_empty());
}

#[test]
fn test_second_open_of_same_device_is_busy() {
    let (_host, mut mgr) = manager(BreakEncoding::Inline);

    let first = mgr.resolve_and_open("ser0", line(0)).unwrap();
    assert!(matches!(
        mgr.resolve_and_open("ser0", line(1)),
        Err(SerialError::Busy(_))
    ));
    assert_eq!(mgr.describe_open_ports().len(), 1);
    mgr.close(first);
}

#[test]
fn test_unexpected_open_failure_is_reported_once() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    host.fail_next("/dev/ttyS0", SimOp::Open, 5);

    let (result, reported) = reports(|| mgr.resolve_and_open("/dev/ttyS0", line(0)));
    assert_eq!(result, Err(SerialError::io("open", 5)));
    assert_eq!(reported, vec!["Serial: open fails with error 5"]);
    assert!(mgr.registry().is_empty());
}

#[test]
fn test_close_is_idempotent_and_isolated() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);

    let a = mgr.resolve_and_open("ser0", line(0)).unwrap();
    let b = mgr.resolve_and_open("ser1", line(1)).unwrap();

    let (_, reported) = reports(|| {
        mgr.close(a);
        mgr.close(a);
    });
    assert!(reported.is_empty());

    assert!(!host.is_open("/dev/ttyS0"));
    assert!(host.is_open("/dev/ttyS1"));
    assert_eq!(mgr.write(b, b"ok"), Ok(2));
    assert_eq!(mgr.write(a, b"no"), Err(SerialError::UnknownHandle(a)));

    let open = mgr.describe_open_ports();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].line, line(1));
}

#[test]
fn test_open_starts_with_dtr_deasserted() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();

    assert!(!host.dtr("/dev/ttyS0"));
    assert!(mgr.control(handle, true));
    assert!(host.dtr("/dev/ttyS0"));
    assert!(mgr.control(handle, false));
    assert!(!host.dtr("/dev/ttyS0"));
}

// ============================================================================
// Configure / control
// ============================================================================

#[test]
fn test_char_size_out_of_range_is_argument_error() {
    let (host, mut mgr) = manager(BreakEncoding::SideChannel);
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();

    for size in [0, 4, 9, 16] {
        let config = SerialConfig::new(9600, size, Parity::None, StopBits::One);
        let (result, reported) = reports(|| mgr.configure(handle, &config));
        assert!(matches!(result, Err(SerialError::InvalidArgument(_))));
        assert!(reported.is_empty());
    }
    assert_eq!(host.config("/dev/ttyS0"), None);

    let config: SerialConfig = "2400-7O2".parse().unwrap();
    mgr.configure(handle, &config).unwrap();
    assert_eq!(host.config("/dev/ttyS0"), Some(config));
}

#[test]
fn test_fractional_stop_bits_need_host_support() {
    let host = SimBackend::new(BreakEncoding::SideChannel);
    host.add_device(SimDevice::new("COM1"));
    host.add_device(SimDevice::new("COM2").with_fractional_stop_bits());
    let mut mgr = SerialManager::new(Box::new(host));

    let config = SerialConfig::new(110, 5, Parity::Mark, StopBits::OnePointFive);

    let plain = mgr.resolve_and_open("COM1", line(0)).unwrap();
    assert!(matches!(
        mgr.configure(plain, &config),
        Err(SerialError::InvalidArgument(_))
    ));

    let capable = mgr.resolve_and_open("COM2", line(1)).unwrap();
    assert_eq!(mgr.configure(capable, &config), Ok(()));
}

#[test]
fn test_unexpected_configure_failure_is_reported() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();
    host.fail_next("/dev/ttyS0", SimOp::Configure, 71);

    let (result, reported) = reports(|| mgr.configure(handle, &SerialConfig::default()));
    assert_eq!(result, Err(SerialError::io("tcsetattr", 71)));
    assert_eq!(reported, vec!["Serial: tcsetattr fails with error 71"]);
}

#[test]
fn test_dtr_unsupported_is_quiet_failure() {
    let host = SimBackend::new(BreakEncoding::Inline);
    host.add_device(SimDevice::new("/dev/ttyS0").without_dtr());
    let mut mgr = SerialManager::new(Box::new(host));
    let handle = mgr.resolve_and_open("/dev/ttyS0", line(0)).unwrap();

    let (ok, reported) = reports(|| mgr.control(handle, true));
    assert!(!ok);
    assert!(reported.is_empty());
}

#[test]
fn test_dtr_host_failure_is_reported() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();
    host.fail_next("/dev/ttyS0", SimOp::Control, 6);

    let (ok, reported) = reports(|| mgr.control(handle, true));
    assert!(!ok);
    assert_eq!(reported, vec!["Serial: ioctl fails with error 6"]);
}

// ============================================================================
// Reads and writes
// ============================================================================

#[test]
fn test_inline_encoding_through_poll_read() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();

    assert!(mgr.poll_read(handle, 64).unwrap().is_empty());

    host.queue_read("/dev/ttyS0", &[0x41, 0xFF, 0xFF, 0x42]);
    let decoded = mgr.poll_read(handle, 64).unwrap();
    assert_eq!(decoded.data(), &[0x41, 0xFF, 0x42]);
    assert!(!decoded.has_break());

    host.queue_read("/dev/ttyS0", &[0xFF, 0x00, 0x00]);
    let decoded = mgr.poll_read(handle, 64).unwrap();
    assert_eq!(decoded.data(), &[0x00]);
    assert_eq!(decoded.breaks(), &[true]);

    host.queue_read("/dev/ttyS0", &[0x41, 0xFF, 0x00, 0x58, 0x42]);
    let decoded = mgr.poll_read(handle, 64).unwrap();
    assert_eq!(decoded.data(), &[0x41, 0x58, 0x42]);
    assert!(!decoded.has_break());
}

#[test]
fn test_side_channel_encoding_through_poll_read() {
    let (host, mut mgr) = manager(BreakEncoding::SideChannel);
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();

    host.queue_break_read("/dev/ttyS0", &[0x10, 0x00, 0x20]);
    let decoded = mgr.poll_read(handle, 64).unwrap();
    assert_eq!(decoded.break_positions().collect::<Vec<_>>(), vec![1]);

    host.queue_break_read("/dev/ttyS0", &[0x10, 0x20]);
    let decoded = mgr.poll_read(handle, 64).unwrap();
    assert_eq!(decoded.break_positions().collect::<Vec<_>>(), vec![0]);

    // Inline markers mean nothing on this host
    host.queue_read("/dev/ttyS0", &[0xFF, 0xFF]);
    assert_eq!(mgr.poll_read(handle, 64).unwrap().data(), &[0xFF, 0xFF]);
}

#[test]
fn test_unbounded_poll_request_is_capped() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();

    let (result, reported) = reports(|| mgr.poll_read(handle, usize::MAX));
    assert!(result.unwrap().is_empty());
    assert!(reported.is_empty());

    host.queue_read("/dev/ttyS0", &vec![0x41; MAX_READ_CHUNK + 1]);
    assert_eq!(mgr.poll_read(handle, usize::MAX).unwrap().len(), MAX_READ_CHUNK);
    assert_eq!(mgr.poll_read(handle, usize::MAX).unwrap().data(), &[0x41]);
}

#[test]
fn test_read_failure_is_reported_and_surfaced() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();
    host.fail_next("/dev/ttyS0", SimOp::Read, 5);

    let (result, reported) = reports(|| mgr.poll_read(handle, 64));
    assert_eq!(result, Err(SerialError::io("read", 5)));
    assert_eq!(reported, vec!["Serial: read fails with error 5"]);

    // The port stays usable
    host.queue_read("/dev/ttyS0", b"ok");
    assert_eq!(mgr.poll_read(handle, 64).unwrap().data(), b"ok");
}

#[test]
fn test_partial_write_is_success() {
    let host = SimBackend::new(BreakEncoding::Inline);
    host.add_device(SimDevice::new("/dev/ttyS0").with_max_write(3));
    let mut mgr = SerialManager::new(Box::new(host.clone()));
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();

    assert_eq!(mgr.write(handle, b"hello"), Ok(3));
    assert_eq!(mgr.write(handle, b"lo"), Ok(2));
    assert_eq!(host.written("/dev/ttyS0"), b"hello");
}

#[test]
fn test_write_failure_is_reported() {
    let (host, mut mgr) = manager(BreakEncoding::Inline);
    let handle = mgr.resolve_and_open("ser0", line(0)).unwrap();
    host.fail_next("/dev/ttyS0", SimOp::Write, 32);

    let (result, reported) = reports(|| mgr.write(handle, b"x"));
    assert_eq!(result, Err(SerialError::io("write", 32)));
    assert_eq!(reported, vec!["Serial: write fails with error 32"]);
}
