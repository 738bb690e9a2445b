//! Building backends and a coordinator from [`Config`].
//!
//! Keys are materialised here, before any record is touched, so a missing or
//! unwritable key directory fails startup instead of the first flush.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::backend::{BackendKind, SharedBackend};
use crate::config::Config;
use crate::coordinator::EncryptionCoordinator;
use crate::host::Metadata;
use crate::key::KeySource;

/// Backends selected by configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredBackends {
    pub kind: BackendKind,
    pub current: SharedBackend,
    pub legacy: Option<SharedBackend>,
}

/// Build the current backend (keyed from `cfg.key_dir`) and, when a legacy
/// secret is configured, the `V1` legacy backend.
///
/// # Errors
///
/// Returns an error if the encryptor is unknown or the current key cannot be
/// loaded or created.
pub fn backends_from_config(cfg: &Config) -> Result<ConfiguredBackends> {
    let kind = cfg.backend_kind()?;
    let current = kind.build_in(&cfg.key_dir);
    let fingerprint = current.key_fingerprint().with_context(|| {
        format!(
            "failed to load {} key from {}",
            cfg.encryptor,
            cfg.key_dir.display()
        )
    })?;
    info!(
        encryptor = %cfg.encryptor,
        generation = %current.generation(),
        key_fingerprint = %fingerprint,
        "current backend ready"
    );

    let legacy = match cfg.legacy_key.as_deref() {
        Some(secret) => {
            let legacy = BackendKind::AesGcm.build(KeySource::from_secret(secret));
            let fingerprint = legacy
                .key_fingerprint()
                .context("failed to derive legacy key")?;
            info!(
                generation = %legacy.generation(),
                key_fingerprint = %fingerprint,
                "legacy backend enabled"
            );
            Some(legacy)
        }
        None => None,
    };

    Ok(ConfiguredBackends {
        kind,
        current,
        legacy,
    })
}

/// Build a coordinator wired per `cfg` over the host's `metadata`.
///
/// # Errors
///
/// Propagates errors from [`backends_from_config`].
pub fn coordinator_from_config(
    cfg: &Config,
    metadata: Arc<dyn Metadata>,
) -> Result<EncryptionCoordinator> {
    let backends = backends_from_config(cfg)?;
    let coordinator = EncryptionCoordinator::new(backends.current, metadata);
    coordinator.set_legacy_backend(backends.legacy);
    coordinator.set_convert_unmarked(cfg.convert_unmarked);
    Ok(coordinator)
}
