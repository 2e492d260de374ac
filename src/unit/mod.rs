//! The unit aggregate.
//!
//! A [`Unit`] owns one unit's config record, its [`StateManager`] and its paths, and
//! sequences the services. Every mutation runs under the unit's [`UnitLock`] as
//! lock, reload from disk, mutate, normalize, persist.
//!
//! Diagnostics from a failed operation are written to the state transcript as
//! `"<operation> failed"` with the error text as prompt, then returned.

mod lock;

pub use lock::UnitLock;

use crate::error::{DiagnosticError, UnitError};
use crate::fs_utils;
use crate::metrics::metrics;
use crate::models::{ManagerSettings, NameMismatchPolicy, Severity, SnapshotStatus, UnitStatus};
use crate::services::collector::SRC_SECTION;
use crate::services::startup::{IOC_SECTION, SETTING_SECTION};
use crate::services::{
    CheckedInputs, CollectReport, ExportConsistency, ExportManager, ExportPolicy, LiveUnit,
    SnapshotConsistency, SnapshotManager, SourceFileCollector, StartupScriptGenerator,
};
use crate::state::{StateChange, StateManager};
use crate::store::{self, Record, StoreError};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use std::sync::LazyLock;
use std::time::Instant;
use tokio::sync::broadcast;

pub const CONFIG_FILE: &str = "ioc.ini";
pub const STATE_FILE: &str = ".ioc_state.ini";
pub const LOCK_FILE: &str = ".lock";
pub const SOURCE_DIR: &str = "src";
pub const PROJECT_DIR: &str = "project";

pub const DEPLOY_SECTION: &str = "DEPLOY";

static UNIT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("Invalid unit name regex"));

/// Whether `name` can be used as a unit directory name.
pub fn is_valid_name(name: &str) -> bool {
    UNIT_NAME.is_match(name)
}

/// Operations that write to the transcript when they fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Collect,
    Generate,
    Snapshot,
    Export,
    Remove,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::Collect => "collect",
            Operation::Generate => "generate",
            Operation::Snapshot => "snapshot",
            Operation::Export => "export",
            Operation::Remove => "remove",
        }
    }
}

/// One managed unit.
pub struct Unit {
    name: String,
    dir: Utf8PathBuf,
    settings: ManagerSettings,
    record: Record,
    state: StateManager,
}

impl Unit {
    /// Create a new unit under the repository root with the default sections.
    pub fn create(settings: &ManagerSettings, name: &str) -> Result<Self, UnitError> {
        if !is_valid_name(name) {
            return Err(UnitError::InvalidName(name.to_string()));
        }

        let dir = settings.repository_root.join(name);
        if dir.exists() {
            return Err(UnitError::AlreadyExists(name.to_string()));
        }
        fs::create_dir_all(dir.join(SOURCE_DIR))?;

        let record = default_record(name, settings);
        {
            let _lock = UnitLock::acquire(&dir.join(LOCK_FILE), name)?;
            store::persist(&record, &dir.join(CONFIG_FILE))?;
        }
        let state = StateManager::create(dir.join(STATE_FILE));

        tracing::info!("Created unit {} at {}", name, dir);
        Ok(Self {
            name: name.to_string(),
            dir,
            settings: settings.clone(),
            record,
            state,
        })
    }

    /// Open an existing unit by name.
    pub fn open(settings: &ManagerSettings, name: &str) -> Result<Self, UnitError> {
        if !is_valid_name(name) {
            return Err(UnitError::InvalidName(name.to_string()));
        }
        Self::open_at(settings, &settings.repository_root.join(name))
    }

    /// Open the unit stored at `dir`.
    ///
    /// Never fails on a damaged unit: a missing or corrupt config is recorded as an
    /// `error` and the unit continues with an empty record.
    pub fn open_at(settings: &ManagerSettings, dir: &Utf8Path) -> Result<Self, UnitError> {
        let name = dir
            .file_name()
            .ok_or_else(|| UnitError::InvalidName(dir.to_string()))?
            .to_string();
        if !dir.is_dir() {
            return Err(UnitError::NotFound(name));
        }

        let mut state = StateManager::open(dir.join(STATE_FILE));
        let config = dir.join(CONFIG_FILE);
        let loaded = match store::load(&config) {
            Ok(record) => Some(record),
            Err(StoreError::NotFound(_)) => {
                state.record(Severity::Error, "config file lost", Some(config.as_str()));
                None
            }
            Err(err) => {
                state.record(Severity::Error, "config file corrupt", Some(&err.to_string()));
                None
            }
        };

        let mut unit = Self {
            name,
            dir: dir.to_path_buf(),
            settings: settings.clone(),
            record: loaded.clone().unwrap_or_default(),
            state,
        };

        if loaded.is_some() {
            unit.check_name();
        }

        Ok(unit)
    }

    fn check_name(&mut self) {
        let recorded = self.record.get(IOC_SECTION, "name");
        if recorded == self.name {
            return;
        }

        let prompt = format!("recorded name \"{}\", directory \"{}\"", recorded, self.name);
        match self.settings.name_mismatch {
            NameMismatchPolicy::Rename => {
                let name = self.name.clone();
                match self.mutate(|record| {
                    record.set(IOC_SECTION, "name", name);
                    Ok(())
                }) {
                    Ok(()) => {
                        self.state
                            .record(Severity::Warning, "name mismatch, renamed", Some(&prompt));
                    }
                    Err(err) => {
                        tracing::warn!("Could not correct name of {}: {}", self.name, err);
                        self.state
                            .record(Severity::Warning, "name mismatch", Some(&prompt));
                    }
                }
            }
            NameMismatchPolicy::Reject => {
                self.state.record(Severity::Error, "name mismatch", Some(&prompt));
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn state_path(&self) -> Utf8PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn src_dir(&self) -> Utf8PathBuf {
        self.dir.join(SOURCE_DIR)
    }

    pub fn project_dir(&self) -> Utf8PathBuf {
        self.dir.join(PROJECT_DIR)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state.subscribe()
    }

    /// `DEPLOY.host`, or the configured default group.
    pub fn host_group(&self) -> String {
        let host = self.record.get(DEPLOY_SECTION, "host");
        if host.trim().is_empty() {
            self.settings.default_host_group.clone()
        } else {
            host.trim().to_string()
        }
    }

    pub fn export_dir(&self) -> Utf8PathBuf {
        ExportManager::new(&self.settings).export_dir(&self.host_group(), &self.name)
    }

    /// Soft read; `""` when undefined.
    pub fn get(&self, section: &str, option: &str) -> String {
        self.record.get(section, option)
    }

    /// Write one option. Section and option names that would not survive a
    /// round trip through the file are rejected.
    pub fn set(&mut self, section: &str, option: &str, value: &str) -> Result<(), UnitError> {
        store::validate_key(section, option)?;
        self.mutate(|record| {
            record.set(section, option, value);
            Ok(())
        })
    }

    /// Overwrite the whole config with `record`, without reading the file first.
    ///
    /// This is the way out of a corrupt `ioc.ini`: [`Unit::set`] and the other
    /// mutations refuse to run until the file parses again.
    pub fn replace_record(&mut self, record: Record) -> Result<(), UnitError> {
        let _lock = self.lock()?;
        let record = record.normalized();
        store::persist(&record, &self.config_path())?;
        self.record = record;
        tracing::info!("Replaced config of {}", self.name);
        Ok(())
    }

    pub fn remove_option(&mut self, section: &str, option: &str) -> Result<(), UnitError> {
        self.mutate(|record| {
            record.remove_option(section, option);
            Ok(())
        })
    }

    /// Import (or with `None`, verify) source files and refresh the `SRC` lists.
    pub fn collect_sources(&mut self, source_dir: Option<&Utf8Path>) -> Result<CollectReport, UnitError> {
        let suffixes = self.settings.suffixes.clone();
        let src_dir = self.src_dir();

        let result = self.mutate(|record| {
            SourceFileCollector::new(&suffixes).collect(record, &src_dir, source_dir)
        });

        match result {
            Ok(report) => {
                if !report.lost.is_empty() {
                    self.state.record(
                        Severity::Error,
                        "source file lost",
                        Some(&report.lost.join("\n")),
                    );
                }
                Ok(report)
            }
            Err(err) => Err(self.fail(Operation::Collect, err)),
        }
    }

    /// Validate generation inputs without writing anything.
    pub fn generate_check(&mut self) -> Result<CheckedInputs, UnitError> {
        let checked = self.reload().map_err(UnitError::from).and_then(|()| {
            Ok(StartupScriptGenerator::new(&self.settings).check(&self.record, &self.src_dir())?)
        });
        checked.map_err(|err| self.fail(Operation::Generate, err))
    }

    /// Regenerate the startup tree.
    ///
    /// The whole tree is computed first; on any failure nothing is written and the
    /// previous startup tree is left in place.
    pub fn generate(&mut self) -> Result<(), UnitError> {
        let started = Instant::now();
        let result = self.generate_locked();
        metrics().record_generation(result.is_ok(), started.elapsed());

        match result {
            Ok(()) => {
                self.state.set_status(UnitStatus::Generated);
                self.reset_after_generate();
                tracing::info!("Generated startup tree for {}", self.name);
                Ok(())
            }
            Err(err) => Err(self.fail(Operation::Generate, err)),
        }
    }

    fn generate_locked(&mut self) -> Result<(), UnitError> {
        let _lock = self.lock()?;
        self.reload()?;

        let generator = StartupScriptGenerator::new(&self.settings);
        let plan = generator.plan(&self.name, &self.record, &self.src_dir())?;
        StartupScriptGenerator::write(&plan, &self.project_dir())?;
        Ok(())
    }

    /// Clear the state after a successful generation when every open fault was a
    /// generation warning. Errors and other warnings survive.
    fn reset_after_generate(&mut self) {
        if self.state.current_state() == Severity::Normal {
            return;
        }

        let prefix = Operation::Generate.label();
        let only_generation_warnings = self.state.entries().iter().all(|entry| match entry.severity {
            Severity::Error => false,
            Severity::Warning => entry.message.starts_with(prefix),
            Severity::Normal => true,
        });

        if only_generation_warnings {
            self.state.reset();
        } else {
            tracing::info!(
                "Keeping {} state for {}: transcript holds other faults",
                self.state.current_state(),
                self.name
            );
        }
    }

    /// Replace the snapshot with the current config and sources.
    pub fn capture_snapshot(&mut self) -> Result<Utf8PathBuf, UnitError> {
        let result = self.lock().and_then(|_lock| {
            let config = self.config_path();
            let src_dir = self.src_dir();
            let project_dir = self.project_dir();
            let live = LiveUnit {
                config: &config,
                src_dir: &src_dir,
                project_dir: &project_dir,
            };
            Ok(SnapshotManager::new(&self.settings).capture(&self.name, &live)?)
        });

        match result {
            Ok(dir) => {
                self.state.set_snapshot(SnapshotStatus::Tracked);
                Ok(dir)
            }
            Err(err) => {
                if !matches!(err, UnitError::Locked(_)) {
                    self.state.set_snapshot(SnapshotStatus::Error);
                }
                Err(self.fail(Operation::Snapshot, err))
            }
        }
    }

    pub fn check_snapshot_live(&self) -> Result<SnapshotConsistency, UnitError> {
        let config = self.config_path();
        let src_dir = self.src_dir();
        let project_dir = self.project_dir();
        let live = LiveUnit {
            config: &config,
            src_dir: &src_dir,
            project_dir: &project_dir,
        };
        Ok(SnapshotManager::new(&self.settings).check_against_live(&self.name, &live)?)
    }

    pub fn check_snapshot_export(&self) -> Result<ExportConsistency, UnitError> {
        let config = self.config_path();
        let src_dir = self.src_dir();
        let project_dir = self.project_dir();
        let live = LiveUnit {
            config: &config,
            src_dir: &src_dir,
            project_dir: &project_dir,
        };
        Ok(SnapshotManager::new(&self.settings).check_against_export(&live, &self.export_dir())?)
    }

    /// Publish the runtime tree. Requires state `normal` and a generated unit; a
    /// failed precondition has no side effect.
    pub fn export(&mut self, overwrite: bool) -> Result<ExportPolicy, UnitError> {
        let state = self.state.current_state();
        if state != Severity::Normal {
            tracing::warn!("Refusing to export {}: state is {}", self.name, state);
            return Err(DiagnosticError::ExportStateNotNormal(state).into());
        }
        let status = self.state.status();
        if status == UnitStatus::Created {
            tracing::warn!("Refusing to export {}: status is {}", self.name, status);
            return Err(DiagnosticError::ExportNotGenerated(status).into());
        }

        let result = self.lock().and_then(|_lock| {
            self.reload()?;
            let host_group = self.host_group();
            let (policy, _) = ExportManager::new(&self.settings).publish(
                &self.name,
                &host_group,
                &self.config_path(),
                &self.project_dir(),
                overwrite,
            )?;
            Ok(policy)
        });

        match result {
            Ok(policy) => {
                self.state.set_status(UnitStatus::Exported);
                self.state.set_exported(true);
                Ok(policy)
            }
            Err(err) => Err(self.fail(Operation::Export, err)),
        }
    }

    /// Partial removal: drop `project/` and return to `created`.
    pub fn remove_generated(&mut self) -> Result<(), UnitError> {
        let result = self.lock().and_then(|_lock| {
            let project = self.project_dir();
            fs_utils::remove_path(&project).map_err(|e| DiagnosticError::io(&project, &e).into())
        });

        match result {
            Ok(()) => {
                self.state.set_status(UnitStatus::Created);
                tracing::info!("Removed generated tree of {}", self.name);
                Ok(())
            }
            Err(err) => Err(self.fail(Operation::Remove, err)),
        }
    }

    /// Full removal: the unit directory, its snapshot and its export copy.
    pub fn remove_all(mut self) -> Result<(), UnitError> {
        let export_dir = self.export_dir();
        let result = self.lock().and_then(|lock| {
            SnapshotManager::new(&self.settings).remove(&self.name)?;
            fs_utils::remove_path(&export_dir)
                .map_err(|e| DiagnosticError::io(&export_dir, &e))?;
            fs_utils::remove_path(&self.dir).map_err(|e| DiagnosticError::io(&self.dir, &e))?;
            drop(lock);
            Ok(())
        });

        match result {
            Ok(()) => {
                tracing::info!("Removed unit {}", self.name);
                Ok(())
            }
            Err(err) => Err(self.fail(Operation::Remove, err)),
        }
    }

    /// Explicit corrective action: clear severity and transcript.
    pub fn reset_state(&mut self) -> Vec<StateChange> {
        self.state.reset()
    }

    fn lock(&self) -> Result<UnitLock, UnitError> {
        UnitLock::acquire(&self.dir.join(LOCK_FILE), &self.name)
    }

    /// Pick up edits made on disk since the last read. A missing file keeps the
    /// in-memory record; a corrupt or unreadable one is refused so nothing is
    /// written over it until it is repaired or replaced with [`Unit::replace_record`].
    fn reload(&mut self) -> Result<(), StoreError> {
        match store::load(&self.config_path()) {
            Ok(record) => {
                self.record = record;
                Ok(())
            }
            Err(StoreError::NotFound(path)) => {
                tracing::debug!("Keeping in-memory record for {}: {} is missing", self.name, path);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Refusing to touch config of {}: {}", self.name, err);
                Err(err)
            }
        }
    }

    fn mutate<R>(
        &mut self,
        op: impl FnOnce(&mut Record) -> Result<R, DiagnosticError>,
    ) -> Result<R, UnitError> {
        let _lock = self.lock()?;
        self.reload()?;

        let mut record = self.record.clone();
        let value = op(&mut record)?;
        record.normalize();
        store::persist(&record, &self.config_path())?;
        self.record = record;
        Ok(value)
    }

    fn fail(&mut self, op: Operation, err: UnitError) -> UnitError {
        let message = format!("{} failed", op.label());
        self.state.record(Severity::Warning, &message, Some(&err.to_string()));
        err
    }
}

fn default_record(name: &str, settings: &ManagerSettings) -> Record {
    let mut record = Record::new();
    record.set(IOC_SECTION, "name", name);
    record.set(IOC_SECTION, "bin", "");
    record.set(IOC_SECTION, "module", "autosave, caputlog");
    record.set(IOC_SECTION, "description", "");
    record.set(DEPLOY_SECTION, "host", settings.default_host_group.as_str());
    record.add_section(SRC_SECTION);
    record.add_section("DB");
    record.add_section("ENV");
    record.add_section("RAW");
    record.set(SETTING_SECTION, "report_info", "true");
    record.set(SETTING_SECTION, "caputlog_json", "false");
    record
}
