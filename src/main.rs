//! iocmgr - one-shot fleet status report.
//!
//! Loads the manager settings, scans the repository and prints one line per unit
//! with its state, status, snapshot consistency and export consistency, followed by
//! the exported deployment targets. Nothing is modified.
//!
//! # Execution Flow
//!
//! 1. Load settings from `$IOCMGR_SETTINGS_DIR/iocmgr.yaml` (default `/etc/iocmgr`)
//!    layered with `IOCMGR_*` environment overrides
//! 2. Initialize logging into the configured log directory
//! 3. Print the status report and deployment targets
//! 4. Log the metrics summary

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use iocmgr::metrics::metrics;
use iocmgr::{APP_NAME, ConfigManager, Repository, VERSION};

const DEFAULT_SETTINGS_DIR: &str = "/etc/iocmgr";

fn main() -> Result<()> {
    let settings_dir = std::env::var("IOCMGR_SETTINGS_DIR")
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|_| Utf8PathBuf::from(DEFAULT_SETTINGS_DIR));

    let settings = ConfigManager::new(&settings_dir)?
        .load_settings()
        .context("Failed to load manager settings")?;

    let _guard = iocmgr::logging::setup_logging(&settings.log_dir, APP_NAME, false)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let repository = Repository::new(settings);

    let reports = repository
        .status_reports()
        .context("Failed to scan the repository")?;
    println!(
        "{:<24} {:<8} {:<10} {:<14} {}",
        "UNIT", "STATE", "STATUS", "SNAPSHOT", "EXPORT"
    );
    for report in &reports {
        println!(
            "{:<24} {:<8} {:<10} {:<14} {}",
            report.name,
            report.state.to_string(),
            report.status.to_string(),
            report.snapshot_consistency.to_string(),
            report.export_consistency
        );
    }

    let targets = repository
        .deployment_targets()
        .context("Failed to list deployment targets")?;
    if !targets.is_empty() {
        println!();
        for target in &targets {
            println!("{} [{}] {}", target.name, target.host_group, target.exported_path);
        }
    }

    tracing::info!(
        "Reported {} unit(s), {} deployment target(s)",
        reports.len(),
        targets.len()
    );
    metrics().log_summary();
    Ok(())
}
