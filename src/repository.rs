//! Fleet-level operations over the repository root.
//!
//! The status report side is strictly read-only: it never takes a unit lock,
//! never repairs a damaged file and tolerates units caught mid-write.

use crate::error::UnitError;
use crate::models::{ManagerSettings, Severity, UnitStatus};
use crate::services::{
    ExportConsistency, ExportManager, LiveUnit, SnapshotConsistency, SnapshotManager,
};
use crate::state::StateRecord;
use crate::store;
use crate::unit::{self, CONFIG_FILE, DEPLOY_SECTION, PROJECT_DIR, SOURCE_DIR, STATE_FILE, Unit};
use camino::{Utf8Path, Utf8PathBuf};

/// One line of the status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub name: String,
    pub state: Severity,
    pub status: UnitStatus,
    pub snapshot_consistency: SnapshotConsistency,
    pub export_consistency: ExportConsistency,
}

/// An exported unit as seen by the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub name: String,
    pub exported_path: Utf8PathBuf,
    pub host_group: String,
}

pub struct Repository {
    settings: ManagerSettings,
}

impl Repository {
    pub fn new(settings: ManagerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn root(&self) -> &Utf8Path {
        &self.settings.repository_root
    }

    /// Names of every unit directory (one holding a config or state file), sorted.
    pub fn list_units(&self) -> Result<Vec<String>, UnitError> {
        let root = self.root();
        if !root.is_dir() {
            tracing::debug!("Repository root {} does not exist", root);
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in root.read_dir_utf8()? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || !unit::is_valid_name(entry.file_name()) {
                continue;
            }
            if path.join(CONFIG_FILE).exists() || path.join(STATE_FILE).exists() {
                names.push(entry.file_name().to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    pub fn create_unit(&self, name: &str) -> Result<Unit, UnitError> {
        Unit::create(&self.settings, name)
    }

    pub fn open_unit(&self, name: &str) -> Result<Unit, UnitError> {
        Unit::open(&self.settings, name)
    }

    /// Full removal of a unit, its snapshot and export copy.
    pub fn remove_unit(&self, name: &str) -> Result<(), UnitError> {
        self.open_unit(name)?.remove_all()
    }

    /// Read-only status of one unit.
    pub fn status_report(&self, name: &str) -> Result<UnitReport, UnitError> {
        if !unit::is_valid_name(name) {
            return Err(UnitError::InvalidName(name.to_string()));
        }
        let dir = self.root().join(name);
        if !dir.is_dir() {
            return Err(UnitError::NotFound(name.to_string()));
        }

        // An unreadable state file reads as `error`; the unit itself repairs it on open.
        let state = StateRecord::load(&dir.join(STATE_FILE)).unwrap_or_else(|err| {
            tracing::debug!("Unreadable state for {}: {}", name, err);
            StateRecord {
                state: Severity::Error,
                ..StateRecord::default()
            }
        });

        let config = dir.join(CONFIG_FILE);
        let src_dir = dir.join(SOURCE_DIR);
        let project_dir = dir.join(PROJECT_DIR);
        let live = LiveUnit {
            config: &config,
            src_dir: &src_dir,
            project_dir: &project_dir,
        };

        let snapshots = SnapshotManager::new(&self.settings);
        let snapshot_consistency = snapshots.check_against_live(name, &live)?;
        let export_consistency =
            snapshots.check_against_export(&live, &self.export_dir_for(name, &config))?;

        Ok(UnitReport {
            name: name.to_string(),
            state: state.state,
            status: state.status,
            snapshot_consistency,
            export_consistency,
        })
    }

    /// Status of every unit. Units whose report fails are logged and skipped.
    pub fn status_reports(&self) -> Result<Vec<UnitReport>, UnitError> {
        let mut reports = Vec::new();
        for name in self.list_units()? {
            match self.status_report(&name) {
                Ok(report) => reports.push(report),
                Err(err) => tracing::warn!("No status for {}: {}", name, err),
            }
        }
        Ok(reports)
    }

    /// Every unit whose state says it has been exported and whose export copy exists.
    pub fn deployment_targets(&self) -> Result<Vec<DeploymentTarget>, UnitError> {
        let mut targets = Vec::new();
        for name in self.list_units()? {
            let dir = self.root().join(&name);
            let exported = StateRecord::load(&dir.join(STATE_FILE))
                .map(|state| state.is_exported)
                .unwrap_or(false);
            if !exported {
                continue;
            }

            let host_group = self.host_group_for(&dir.join(CONFIG_FILE));
            let exported_path = ExportManager::new(&self.settings).export_dir(&host_group, &name);
            if exported_path.is_dir() {
                targets.push(DeploymentTarget {
                    name,
                    exported_path,
                    host_group,
                });
            }
        }
        Ok(targets)
    }

    fn host_group_for(&self, config: &Utf8Path) -> String {
        store::load(config)
            .map(|record| record.get(DEPLOY_SECTION, "host").trim().to_string())
            .ok()
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| self.settings.default_host_group.clone())
    }

    fn export_dir_for(&self, name: &str, config: &Utf8Path) -> Utf8PathBuf {
        ExportManager::new(&self.settings).export_dir(&self.host_group_for(config), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn repository(dir: &TempDir) -> Repository {
        let base = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        Repository::new(ManagerSettings::rooted_at(&base))
    }

    #[test]
    fn test_list_units() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        assert!(repo.list_units().unwrap().is_empty());

        repo.create_unit("beta").unwrap();
        repo.create_unit("alpha").unwrap();
        fs::create_dir_all(repo.root().join("stray")).unwrap();

        assert_eq!(repo.list_units().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_status_report_is_read_only() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        let unit = repo.create_unit("alpha").unwrap();
        let state_path = unit.state_path();
        drop(unit);
        fs::remove_file(&state_path).unwrap();

        let report = repo.status_report("alpha").unwrap();
        assert_eq!(report.state, Severity::Error);
        assert_eq!(report.snapshot_consistency, SnapshotConsistency::NoSnapshot);
        assert_eq!(report.export_consistency, ExportConsistency::ExportRequired);
        assert!(!state_path.exists());
    }

    #[test]
    fn test_status_report_rejects_paths_outside_root() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        fs::create_dir_all(repo.root().join("alpha")).unwrap();
        fs::create_dir_all(dir.path().join("outside")).unwrap();

        for name in ["../outside", "alpha/..", "/tmp", ""] {
            assert!(
                matches!(repo.status_report(name), Err(UnitError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_remove_unit() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        let mut unit = repo.create_unit("alpha").unwrap();
        unit.capture_snapshot().unwrap();
        drop(unit);

        repo.remove_unit("alpha").unwrap();
        assert!(!repo.root().join("alpha").exists());
        assert!(!repo.settings().snapshot_root.join("alpha").exists());
        assert!(matches!(
            repo.open_unit("alpha"),
            Err(UnitError::NotFound(_))
        ));
    }
}
