//! `fieldcrypt` command-line entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise telemetry (JSON logs to stderr, optional OTLP export).
//! 3. Build the configured backends, materialising keys.
//! 4. Run the requested command, writing results to stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use fieldcrypt::backend::{Backends, ReadOutcome};
use fieldcrypt::config::Config;
use fieldcrypt::setup::{backends_from_config, ConfiguredBackends};
use fieldcrypt::{telemetry, MarkerCodec};

#[derive(Debug, Parser)]
#[command(name = "fieldcrypt", version, about = "Encrypt and decrypt marker-tagged field values")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encrypt a value with the current backend and print the stored form.
    Encrypt { value: String },
    /// Decrypt a stored value; unmarked values are printed unchanged.
    Decrypt { stored: String },
    /// Encrypt a file's contents into an encoded body (no marker).
    EncryptFile { input: PathBuf, output: PathBuf },
    /// Reverse of `encrypt-file`.
    DecryptFile { input: PathBuf, output: PathBuf },
    /// Print the fingerprints of the configured keys.
    Fingerprint,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        encryptor = %cfg.encryptor,
        "fieldcrypt starting"
    );

    // -----------------------------------------------------------------------
    // 3. Backends
    // -----------------------------------------------------------------------
    let backends = backends_from_config(&cfg)?;

    // -----------------------------------------------------------------------
    // 4. Command
    // -----------------------------------------------------------------------
    let result = run(cli.command, &cfg, backends);
    telemetry::shutdown_telemetry();
    result
}

fn run(command: Command, cfg: &Config, configured: ConfiguredBackends) -> Result<()> {
    let codec = MarkerCodec::default();
    let current = configured.current;

    match command {
        Command::Encrypt { value } => {
            let body = current.encrypt(value.as_bytes())?;
            println!("{}", codec.encode(current.generation(), &body)?);
        }
        Command::Decrypt { stored } => {
            let backends = Backends {
                restore: current.clone(),
                current,
                legacy: configured.legacy,
            };
            match backends.read(&codec, Some(stored.as_str()), cfg.convert_unmarked) {
                ReadOutcome::Untouched => println!("{stored}"),
                ReadOutcome::Decrypted(plain) => println!("{plain}"),
                ReadOutcome::Failed(e) => {
                    return Err(e).context("stored value could not be decrypted");
                }
            }
        }
        Command::EncryptFile { input, output } => {
            current
                .encrypt_file(&input, &output)
                .with_context(|| format!("failed to encrypt {}", input.display()))?;
            info!(input = %input.display(), output = %output.display(), "file encrypted");
        }
        Command::DecryptFile { input, output } => {
            current
                .decrypt_file(&input, &output)
                .with_context(|| format!("failed to decrypt {}", input.display()))?;
            info!(input = %input.display(), output = %output.display(), "file decrypted");
        }
        Command::Fingerprint => {
            println!(
                "current {} {}",
                current.generation(),
                current.key_fingerprint()?
            );
            if let Some(legacy) = configured.legacy {
                println!(
                    "legacy {} {}",
                    legacy.generation(),
                    legacy.key_fingerprint()?
                );
            }
        }
    }
    Ok(())
}
