//! `quickstart` - sample binary for the data-protection crate.
//!
//! Startup sequence:
//! 1. Load and validate [`DataProtectionOptions`] from environment variables.
//! 2. Initialise structured JSON logging, with AWS SDK targets held at `warn`.
//! 3. Open the key storage and load (or create) the key ring.
//! 4. Spawn the key ring refresh task.
//! 5. Protect and unprotect a sample settings object.

use anyhow::{Context, Result};
use data_protection::{refresh_task, DataProtectionOptions, KeyManager, Protectable, ProtectorExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// SDK crates held at `warn` so key ring startup stays readable.
const QUIET_TARGETS: &[&str] = &["aws_config", "aws_sdk_s3", "aws_smithy_runtime", "hyper"];

#[derive(Debug, Protectable)]
struct SmtpSettings {
    host: String,
    #[protect]
    password: String,
}

#[derive(Debug, Protectable)]
struct AppSettings {
    name: String,
    #[protect]
    api_key: String,
    #[protect(optional)]
    legacy_token: Option<String>,
    #[protect(nested)]
    smtp: Option<SmtpSettings>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let options = DataProtectionOptions::from_env().map_err(|e| {
        eprintln!("ERROR: data protection configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    init_tracing(&options.log_level)?;

    // -----------------------------------------------------------------------
    // 3. Key ring
    // -----------------------------------------------------------------------
    let manager = KeyManager::from_options(&options)
        .await
        .context("failed to load key ring")?;

    // -----------------------------------------------------------------------
    // 4. Background refresh
    // -----------------------------------------------------------------------
    let _refresh = refresh_task(
        manager.clone(),
        std::time::Duration::from_secs(options.key_refresh_interval_secs),
    );

    // -----------------------------------------------------------------------
    // 5. Protect / unprotect
    // -----------------------------------------------------------------------
    let protector = manager
        .provider()
        .create_protector(&options.application_name()?)?
        .create_protector("settings")?;

    let mut settings = AppSettings {
        name: "quickstart".into(),
        api_key: "sk-live-0000".into(),
        legacy_token: Some("stored before protection was enabled".into()),
        smtp: Some(SmtpSettings {
            host: "smtp.example.com".into(),
            password: "hunter2".into(),
        }),
    };

    // The legacy token is plain text at rest; leave it out of the first pass.
    let legacy = settings.legacy_token.take();
    protector.protect_properties(&mut settings)?;
    settings.legacy_token = legacy;
    info!(
        settings = %settings.name,
        smtp_host = settings.smtp.as_ref().map(|s| s.host.as_str()).unwrap_or_default(),
        fields = "api_key, smtp.password",
        "settings protected"
    );

    protector.unprotect_properties(&mut settings)?;
    let smtp_restored = settings.smtp.as_ref().is_some_and(|s| s.password == "hunter2");
    info!(
        settings = %settings.name,
        api_key_restored = settings.api_key == "sk-live-0000",
        smtp_restored,
        legacy_token_kept = settings.legacy_token.is_some(),
        "settings unprotected"
    );

    Ok(())
}

/// Structured JSON logs to stdout. `RUST_LOG` replaces the configured level
/// and the SDK caps entirely.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(log_level))
            .with_context(|| format!("invalid log level {log_level:?}"))?,
    };

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing subscriber: {e}"))
}

fn default_directives(log_level: &str) -> String {
    QUIET_TARGETS
        .iter()
        .fold(log_level.to_owned(), |acc, target| format!("{acc},{target}=warn"))
}
