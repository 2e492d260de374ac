//! Snapshots of a unit's configuration and source tree, and consistency checks
//! against the live unit and its exported deployment.

use crate::error::DiagnosticError;
use crate::fs_utils;
use crate::metrics::metrics;
use crate::models::ManagerSettings;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

/// Result of comparing a snapshot with the live unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotConsistency {
    Consistent,
    Inconsistent,
    NoSnapshot,
}

/// Result of comparing a unit's generated output with its export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportConsistency {
    Consistent,
    Inconsistent,
    /// Nothing has been exported yet.
    ExportRequired,
}

impl fmt::Display for SnapshotConsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SnapshotConsistency::Consistent => "consistent",
            SnapshotConsistency::Inconsistent => "inconsistent",
            SnapshotConsistency::NoSnapshot => "no snapshot",
        })
    }
}

impl fmt::Display for ExportConsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportConsistency::Consistent => "consistent",
            ExportConsistency::Inconsistent => "inconsistent",
            ExportConsistency::ExportRequired => "export required",
        })
    }
}

/// Paths of the live unit that a snapshot covers.
#[derive(Debug, Clone, Copy)]
pub struct LiveUnit<'a> {
    pub config: &'a Utf8Path,
    pub src_dir: &'a Utf8Path,
    /// The unit's `project/` directory
    pub project_dir: &'a Utf8Path,
}

pub struct SnapshotManager<'a> {
    settings: &'a ManagerSettings,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(settings: &'a ManagerSettings) -> Self {
        Self { settings }
    }

    pub fn snapshot_dir(&self, unit: &str) -> Utf8PathBuf {
        self.settings.snapshot_root.join(unit)
    }

    /// Replace the unit's snapshot with the current config and source tree.
    pub fn capture(&self, unit: &str, live: &LiveUnit<'_>) -> Result<Utf8PathBuf, DiagnosticError> {
        let dir = self.snapshot_dir(unit);
        fs_utils::remove_path(&dir).map_err(|e| DiagnosticError::io(&dir, &e))?;

        let config = dir.join(crate::unit::CONFIG_FILE);
        let src = dir.join(crate::unit::SOURCE_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| DiagnosticError::io(&dir, &e))?;
        std::fs::copy(live.config, &config).map_err(|e| DiagnosticError::io(live.config, &e))?;
        fs_utils::copy_tree(live.src_dir, &src).map_err(|e| DiagnosticError::io(&src, &e))?;

        metrics().record_snapshot();
        tracing::info!("Captured snapshot of {} at {}", unit, dir);
        Ok(dir)
    }

    pub fn check_against_live(
        &self,
        unit: &str,
        live: &LiveUnit<'_>,
    ) -> Result<SnapshotConsistency, DiagnosticError> {
        let dir = self.snapshot_dir(unit);
        let config = dir.join(crate::unit::CONFIG_FILE);
        if !config.is_file() {
            return Ok(SnapshotConsistency::NoSnapshot);
        }

        let same = fs_utils::files_equal(&config, live.config)
            .and_then(|equal| {
                Ok(equal && fs_utils::trees_equal(&dir.join(crate::unit::SOURCE_DIR), live.src_dir)?)
            })
            .map_err(|e| DiagnosticError::io(&dir, &e))?;

        tracing::debug!("Snapshot check for {}: consistent={}", unit, same);
        Ok(if same {
            SnapshotConsistency::Consistent
        } else {
            SnapshotConsistency::Inconsistent
        })
    }

    /// Compare the live config and startup tree with what was last exported to
    /// `export_dir`.
    pub fn check_against_export(
        &self,
        live: &LiveUnit<'_>,
        export_dir: &Utf8Path,
    ) -> Result<ExportConsistency, DiagnosticError> {
        let exported_config = export_dir.join(crate::unit::CONFIG_FILE);
        if !exported_config.is_file() {
            return Ok(ExportConsistency::ExportRequired);
        }

        let same = fs_utils::files_equal(&exported_config, live.config)
            .and_then(|equal| {
                Ok(equal
                    && fs_utils::trees_equal(
                        &export_dir.join("startup"),
                        &live.project_dir.join("startup"),
                    )?)
            })
            .map_err(|e| DiagnosticError::io(export_dir, &e))?;

        Ok(if same {
            ExportConsistency::Consistent
        } else {
            ExportConsistency::Inconsistent
        })
    }

    pub fn remove(&self, unit: &str) -> Result<(), DiagnosticError> {
        let dir = self.snapshot_dir(unit);
        fs_utils::remove_path(&dir).map_err(|e| DiagnosticError::io(&dir, &e))
    }
}
