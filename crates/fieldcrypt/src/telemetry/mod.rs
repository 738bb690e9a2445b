//! Structured logging and optional OpenTelemetry span export.
//!
//! # Telemetry invariants
//!
//! - **No plaintext or key material** may appear in any span attribute or log
//!   field. Key fingerprints, record identities, and field names may.
//! - Log level is configurable via `FIELDCRYPT_LOG_LEVEL` (default: `info`),
//!   overridden by `RUST_LOG`.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
