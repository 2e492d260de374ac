// State management module
//
// This module provides the StateManager which owns a unit's state file, applies the
// monotonic severity rules and emits change events for observers.

use crate::metrics::metrics;
use crate::models::{Severity, SnapshotStatus, UnitStatus};
use crate::store::{self, Record, StoreError};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::broadcast;

/// Section of the state file holding every field.
pub const STATE_SECTION: &str = "STATE";

/// Timestamp format used in transcript entries.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Prefix of prompt detail lines in the transcript.
const PROMPT_PREFIX: &str = "prompt: ";

static ENTRY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(normal|warning|error)\] \[([^\]]*)\] (.*)$").expect("Invalid entry regex")
});

/// Source of transcript timestamps.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn timestamp(&self) -> String;
}

/// Local wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn timestamp(&self) -> String {
        chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Change events emitted when the state file is modified
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// Severity moved
    StateChanged { from: Severity, to: Severity },

    /// A transcript entry was appended
    TranscriptAppended { severity: Severity, message: String },

    StatusChanged { status: UnitStatus },

    SnapshotChanged { snapshot: SnapshotStatus },

    ExportFlagChanged { is_exported: bool },

    /// State and transcript were cleared
    StateReset,
}

/// Everything persisted in a unit's state file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateRecord {
    pub state: Severity,
    pub state_info: String,
    pub status: UnitStatus,
    pub snapshot: SnapshotStatus,
    pub is_exported: bool,
}

impl StateRecord {
    fn from_record(record: &Record) -> Self {
        let raw_state = record.get(STATE_SECTION, "state");
        // An unreadable severity must not silently become `normal`.
        let state = if raw_state.trim().is_empty() {
            Severity::Normal
        } else {
            raw_state.parse().unwrap_or(Severity::Error)
        };

        Self {
            state,
            state_info: record.get(STATE_SECTION, "state_info"),
            status: record
                .get(STATE_SECTION, "status")
                .parse()
                .unwrap_or_default(),
            snapshot: record
                .get(STATE_SECTION, "snapshot")
                .parse()
                .unwrap_or_default(),
            is_exported: record.get_bool(STATE_SECTION, "is_exported"),
        }
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.set(STATE_SECTION, "state", self.state.as_str());
        record.set(STATE_SECTION, "state_info", self.state_info.clone());
        record.set(STATE_SECTION, "status", self.status.as_str());
        record.set(STATE_SECTION, "snapshot", self.snapshot.as_str());
        record.set(STATE_SECTION, "is_exported", self.is_exported.to_string());
        record
    }

    /// Read a state file without repairing it. Used by read-only observers.
    pub fn load(path: &Utf8Path) -> Result<Self, StoreError> {
        store::load(path).map(|record| Self::from_record(&record))
    }
}

/// One parsed transcript entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub severity: Severity,
    pub timestamp: String,
    pub message: String,
    pub prompt: Vec<String>,
}

/// Append-only diagnostic state machine for one unit.
///
/// Severity only ever climbs: `error` beats `warning` beats `normal`, and the only
/// way down is [`reset()`](Self::reset). Every change is written to the state file
/// before the method returns.
///
/// # Usage
///
/// - [`record()`](Self::record) to append a fault
/// - [`reset()`](Self::reset) after an explicit corrective action
/// - [`subscribe()`](Self::subscribe) to receive [`StateChange`] events
pub struct StateManager {
    path: Utf8PathBuf,

    record: StateRecord,

    clock: Box<dyn Clock>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Start a fresh state file at `path`, replacing any existing one.
    pub fn create(path: impl Into<Utf8PathBuf>) -> Self {
        Self::create_with_clock(path, Box::new(SystemClock))
    }

    pub fn create_with_clock(path: impl Into<Utf8PathBuf>, clock: Box<dyn Clock>) -> Self {
        let manager = Self::from_parts(path.into(), StateRecord::default(), clock);
        if let Err(err) = manager.persist() {
            tracing::error!("Failed to write state file {}: {}", manager.path, err);
        }
        manager
    }

    /// Open the state file at `path`.
    ///
    /// Never fails: a missing or unreadable file is recreated and the loss is
    /// recorded as an `error` entry.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Self {
        Self::open_with_clock(path, Box::new(SystemClock))
    }

    pub fn open_with_clock(path: impl Into<Utf8PathBuf>, clock: Box<dyn Clock>) -> Self {
        let path = path.into();
        match StateRecord::load(&path) {
            Ok(record) => Self::from_parts(path, record, clock),
            Err(StoreError::NotFound(_)) => {
                tracing::warn!("State file {} lost, recreating", path);
                let mut manager = Self::from_parts(path, StateRecord::default(), clock);
                manager.record(Severity::Error, "state file lost", None);
                manager
            }
            Err(err) => {
                tracing::warn!("State file {} unreadable, recreating: {}", path, err);
                let mut manager = Self::from_parts(path, StateRecord::default(), clock);
                manager.record(Severity::Error, "state file corrupt", Some(&err.to_string()));
                manager
            }
        }
    }

    fn from_parts(path: Utf8PathBuf, record: StateRecord, clock: Box<dyn Clock>) -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            path,
            record,
            clock,
            state_tx,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn current_state(&self) -> Severity {
        self.record.state
    }

    /// The whole transcript, entries joined by newlines.
    pub fn full_transcript(&self) -> &str {
        &self.record.state_info
    }

    pub fn status(&self) -> UnitStatus {
        self.record.status
    }

    pub fn snapshot(&self) -> SnapshotStatus {
        self.record.snapshot
    }

    pub fn is_exported(&self) -> bool {
        self.record.is_exported
    }

    pub fn state_record(&self) -> &StateRecord {
        &self.record
    }

    /// Append an entry and raise the severity.
    ///
    /// `warning` never downgrades an existing `error`. A `normal` entry is
    /// informational and leaves the severity untouched.
    pub fn record(
        &mut self,
        severity: Severity,
        message: &str,
        prompt: Option<&str>,
    ) -> Vec<StateChange> {
        let entry = self.format_entry(severity, message, prompt);

        match severity {
            Severity::Error => tracing::error!("{}: {}", self.path, entry),
            Severity::Warning => tracing::warn!("{}: {}", self.path, entry),
            Severity::Normal => tracing::info!("{}: {}", self.path, entry),
        }

        self.update(|state| {
            state.state = state.state.max(severity);
            if !state.state_info.is_empty() {
                state.state_info.push('\n');
            }
            state.state_info.push_str(&entry);
        })
    }

    /// Clear severity and transcript. The only path back to `normal`.
    pub fn reset(&mut self) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.state = Severity::Normal;
            state.state_info.clear();
        });
        changes.push(StateChange::StateReset);
        let _ = self.state_tx.send(StateChange::StateReset);
        changes
    }

    pub fn set_status(&mut self, status: UnitStatus) -> Vec<StateChange> {
        self.update(|state| state.status = status)
    }

    pub fn set_snapshot(&mut self, snapshot: SnapshotStatus) -> Vec<StateChange> {
        self.update(|state| state.snapshot = snapshot)
    }

    pub fn set_exported(&mut self, is_exported: bool) -> Vec<StateChange> {
        self.update(|state| state.is_exported = is_exported)
    }

    /// Parse the transcript into entries.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        let mut entries: Vec<TranscriptEntry> = Vec::new();

        for line in self.record.state_info.lines() {
            if let Some(caps) = ENTRY_PATTERN.captures(line) {
                entries.push(TranscriptEntry {
                    severity: caps[1].parse().unwrap_or(Severity::Error),
                    timestamp: caps[2].to_string(),
                    message: caps[3].to_string(),
                    prompt: Vec::new(),
                });
            } else if let Some(last) = entries.last_mut() {
                let detail = line.strip_prefix(PROMPT_PREFIX).unwrap_or(line);
                last.prompt.push(detail.to_string());
            }
        }

        entries
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn format_entry(&self, severity: Severity, message: &str, prompt: Option<&str>) -> String {
        let message = message.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut entry = format!("[{}] [{}] {}", severity, self.clock.timestamp(), message);

        if let Some(prompt) = prompt {
            for line in prompt.lines().map(str::trim).filter(|line| !line.is_empty()) {
                entry.push('\n');
                entry.push_str(PROMPT_PREFIX);
                entry.push_str(line);
            }
        }

        entry
    }

    /// Apply a mutation, persist it, and emit the resulting events.
    fn update<F>(&mut self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut StateRecord),
    {
        let old_record = self.record.clone();

        update_fn(&mut self.record);

        let changes = Self::detect_changes(&old_record, &self.record);

        if old_record != self.record {
            metrics().record_state_update();
            if let Err(err) = self.persist() {
                tracing::error!("Failed to persist state file {}: {}", self.path, err);
            }
        }

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    fn detect_changes(old: &StateRecord, new: &StateRecord) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.state != new.state {
            changes.push(StateChange::StateChanged {
                from: old.state,
                to: new.state,
            });
        }

        if new.state_info.len() > old.state_info.len()
            && new.state_info.starts_with(&old.state_info)
        {
            let appended = new.state_info[old.state_info.len()..].trim_start_matches('\n');
            if let Some(caps) = appended.lines().next().and_then(|l| ENTRY_PATTERN.captures(l)) {
                changes.push(StateChange::TranscriptAppended {
                    severity: caps[1].parse().unwrap_or(Severity::Error),
                    message: caps[3].to_string(),
                });
            }
        }

        if old.status != new.status {
            changes.push(StateChange::StatusChanged { status: new.status });
        }

        if old.snapshot != new.snapshot {
            changes.push(StateChange::SnapshotChanged {
                snapshot: new.snapshot,
            });
        }

        if old.is_exported != new.is_exported {
            changes.push(StateChange::ExportFlagChanged {
                is_exported: new.is_exported,
            });
        }

        changes
    }

    fn persist(&self) -> Result<(), StoreError> {
        store::persist(&self.record.to_record(), &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FIXED_TIME: &str = "2026-01-02 03:04:05";

    fn fixed_clock() -> Box<dyn Clock> {
        let mut clock = MockClock::new();
        clock
            .expect_timestamp()
            .return_const(FIXED_TIME.to_string());
        Box::new(clock)
    }

    fn state_path(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().join(".ioc_state.ini")).unwrap()
    }

    fn new_manager(dir: &TempDir) -> StateManager {
        StateManager::create_with_clock(state_path(dir), fixed_clock())
    }

    #[test]
    fn test_new_state_manager() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);

        assert_eq!(manager.current_state(), Severity::Normal);
        assert_eq!(manager.full_transcript(), "");
        assert_eq!(manager.status(), UnitStatus::Created);
        assert_eq!(manager.snapshot(), SnapshotStatus::Untracked);
        assert!(!manager.is_exported());
        assert!(manager.path().exists());
    }

    #[test]
    fn test_warning_does_not_downgrade_error() {
        let dir = TempDir::new().unwrap();
        let mut manager = new_manager(&dir);

        manager.record(Severity::Error, "source file lost", Some("a.db"));
        manager.record(Severity::Warning, "generate failed", Some("bin not set"));
        manager.record(Severity::Warning, "generate failed", Some("bin not set"));

        assert_eq!(manager.current_state(), Severity::Error);
        assert_eq!(manager.entries().len(), 3);
    }

    #[test]
    fn test_reset_then_warning() {
        let dir = TempDir::new().unwrap();
        let mut manager = new_manager(&dir);

        manager.record(Severity::Error, "boom", None);
        let changes = manager.reset();
        assert!(changes.contains(&StateChange::StateReset));
        assert_eq!(manager.current_state(), Severity::Normal);
        assert_eq!(manager.full_transcript(), "");

        manager.record(Severity::Warning, "generate failed", None);
        assert_eq!(manager.current_state(), Severity::Warning);
    }

    #[test]
    fn test_normal_entry_keeps_severity() {
        let dir = TempDir::new().unwrap();
        let mut manager = new_manager(&dir);

        manager.record(Severity::Warning, "w", None);
        manager.record(Severity::Normal, "note", None);
        assert_eq!(manager.current_state(), Severity::Warning);
    }

    #[test]
    fn test_entry_format() {
        let dir = TempDir::new().unwrap();
        let mut manager = new_manager(&dir);

        manager.record(Severity::Warning, "generate  failed\n", Some("bin not set\n\nline two"));

        assert_eq!(
            manager.full_transcript(),
            "[warning] [2026-01-02 03:04:05] generate failed\nprompt: bin not set\nprompt: line two"
        );

        let entries = manager.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Warning);
        assert_eq!(entries[0].timestamp, FIXED_TIME);
        assert_eq!(entries[0].message, "generate failed");
        assert_eq!(entries[0].prompt, vec!["bin not set", "line two"]);
    }

    #[test]
    fn test_transcript_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let mut manager = new_manager(&dir);
        manager.record(Severity::Warning, "first", Some("detail"));
        manager.record(Severity::Error, "second", None);
        manager.set_status(UnitStatus::Generated);
        manager.set_exported(true);
        let transcript = manager.full_transcript().to_string();

        let reopened = StateManager::open_with_clock(state_path(&dir), fixed_clock());
        assert_eq!(reopened.current_state(), Severity::Error);
        assert_eq!(reopened.full_transcript(), transcript);
        assert_eq!(reopened.status(), UnitStatus::Generated);
        assert!(reopened.is_exported());
    }

    #[test]
    fn test_open_missing_records_error() {
        let dir = TempDir::new().unwrap();
        let manager = StateManager::open_with_clock(state_path(&dir), fixed_clock());

        assert_eq!(manager.current_state(), Severity::Error);
        assert!(manager.full_transcript().contains("state file lost"));
        assert!(state_path(&dir).exists());
    }

    #[test]
    fn test_open_corrupt_records_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(state_path(&dir), "state = normal\n").unwrap();

        let manager = StateManager::open_with_clock(state_path(&dir), fixed_clock());
        assert_eq!(manager.current_state(), Severity::Error);
        assert!(manager.full_transcript().contains("state file corrupt"));
    }

    #[test]
    fn test_unknown_severity_reads_as_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(state_path(&dir), "[STATE]\nstate = fine\n").unwrap();

        let manager = StateManager::open_with_clock(state_path(&dir), fixed_clock());
        assert_eq!(manager.current_state(), Severity::Error);
    }

    #[test]
    fn test_change_detection() {
        let dir = TempDir::new().unwrap();
        let mut manager = new_manager(&dir);

        let changes = manager.record(Severity::Warning, "generate failed", None);
        assert_eq!(
            changes,
            vec![
                StateChange::StateChanged {
                    from: Severity::Normal,
                    to: Severity::Warning
                },
                StateChange::TranscriptAppended {
                    severity: Severity::Warning,
                    message: "generate failed".to_string()
                },
            ]
        );

        let changes = manager.set_status(UnitStatus::Generated);
        assert_eq!(
            changes,
            vec![StateChange::StatusChanged {
                status: UnitStatus::Generated
            }]
        );

        assert!(manager.set_status(UnitStatus::Generated).is_empty());
    }

    #[test]
    fn test_subscribe_to_changes() {
        let dir = TempDir::new().unwrap();
        let mut manager = new_manager(&dir);
        let mut rx = manager.subscribe();

        manager.set_snapshot(SnapshotStatus::Tracked);

        assert_eq!(
            rx.try_recv().unwrap(),
            StateChange::SnapshotChanged {
                snapshot: SnapshotStatus::Tracked
            }
        );
    }
}
