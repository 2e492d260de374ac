//! Services module - the operations behind a unit's lifecycle.
//!
//! Each service works on paths and records handed to it by the caller and knows
//! nothing about locking or the state file; the [`Unit`](crate::unit::Unit)
//! aggregate sequences them and records their diagnostics.
//!
//! # Components
//!
//! - [`SourceFileCollector`]: imports and classifies source files into the `SRC` lists
//! - [`SubstitutionGenerator`]: compiles `DB.load` directives into a substitution file
//! - [`Module`]: the capability registry spliced into the startup script
//! - [`StartupScriptGenerator`]: validates inputs and builds the whole startup tree
//!   in memory before writing anything
//! - [`SnapshotManager`]: captures and compares snapshots
//! - [`ExportManager`]: publishes the runtime tree to the deployment mount
//!
//! Every service returns a [`DiagnosticError`](crate::error::DiagnosticError) and
//! never leaves a partial artifact behind.

pub mod artifact;
pub mod collector;
pub mod export;
pub mod modules;
pub mod snapshot;
pub mod startup;
pub mod substitution;

pub use artifact::{Artifacts, GeneratedFile};
pub use collector::{CollectReport, SourceFileCollector};
pub use export::{ExportManager, ExportPolicy};
pub use modules::Module;
pub use snapshot::{ExportConsistency, LiveUnit, SnapshotConsistency, SnapshotManager};
pub use startup::{
    CheckedInputs, FileCopy, GenerationPlan, StartupScript, StartupScriptGenerator,
};
pub use substitution::{LoadDirective, SubstitutionArtifact, SubstitutionGenerator};
