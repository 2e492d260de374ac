//! Data models shared across the crate.
//!
//! - [`ManagerSettings`]: repository-wide roots, suffix classes and naming policy, loaded
//!   from `iocmgr.yaml` by [`ConfigManager`](crate::config::ConfigManager)
//! - [`SuffixClasses`] / [`SourceKind`]: the three source file classes
//! - [`Severity`], [`UnitStatus`], [`SnapshotStatus`]: the keywords persisted in a unit's
//!   state file by [`StateManager`](crate::state::StateManager)

pub mod settings;
pub mod unit_state;

pub use settings::{ManagerSettings, NameMismatchPolicy, SourceKind, SuffixClasses};
pub use unit_state::{Severity, SnapshotStatus, UnitStatus, UnknownKeyword};
