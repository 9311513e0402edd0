//! Diagnostic reporter
//!
//! The single place unexpected host failures are logged. Expected outcomes
//! (not found, busy, bad argument, unsupported, would-block) never reach it.

use tracing::error;

use crate::error::SerialError;

/// Log an unexpected failure of a host routine
pub fn report(operation: &str, code: i32) {
    error!(
        target: "ser_transport::diagnostics",
        operation,
        code,
        "Serial: {} fails with error {}",
        operation,
        code
    );
}

/// Report `err` if it is unexpected, then hand it back
pub fn observe(err: SerialError) -> SerialError {
    if let SerialError::Io { operation, code } = &err {
        report(operation, *code);
    }
    err
}
