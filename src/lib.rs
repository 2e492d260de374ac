// iocmgr - declarative lifecycle management for fleets of EPICS IOC projects
//
// This is the library crate containing the unit model, the generators and the
// repository-level status interface. The binary crate (main.rs) prints a one-shot
// fleet status report.

pub mod config;
pub mod error;
pub mod fs_utils;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod services;
pub mod state;
pub mod store;
pub mod unit;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use error::{DiagnosticError, UnitError};
pub use models::{ManagerSettings, NameMismatchPolicy, Severity, SnapshotStatus, UnitStatus};
pub use repository::{DeploymentTarget, Repository, UnitReport};
pub use state::{StateChange, StateManager};
pub use store::{Record, StoreError};
pub use unit::Unit;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
