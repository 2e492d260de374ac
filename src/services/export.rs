//! Publishing a unit's runtime tree to the deployment mount.

use crate::error::DiagnosticError;
use crate::fs_utils;
use crate::metrics::metrics;
use crate::models::ManagerSettings;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::fs;

/// Runtime subtrees published alongside the config.
pub const RUNTIME_DIRS: [&str; 3] = ["settings", "log", "startup"];

/// How an export treated the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPolicy {
    /// Destination did not exist.
    Create,
    /// Destination removed and republished.
    FullOverwrite,
    /// Config and `startup/` replaced; `settings/` and `log/` kept.
    Incremental,
}

impl fmt::Display for ExportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportPolicy::Create => "create",
            ExportPolicy::FullOverwrite => "full overwrite",
            ExportPolicy::Incremental => "incremental",
        })
    }
}

impl ExportPolicy {
    pub fn choose(destination_exists: bool, overwrite: bool) -> Self {
        match (destination_exists, overwrite) {
            (false, _) => ExportPolicy::Create,
            (true, true) => ExportPolicy::FullOverwrite,
            (true, false) => ExportPolicy::Incremental,
        }
    }
}

pub struct ExportManager<'a> {
    settings: &'a ManagerSettings,
}

impl<'a> ExportManager<'a> {
    pub fn new(settings: &'a ManagerSettings) -> Self {
        Self { settings }
    }

    /// `<export_root>/<host_group>/<unit>`
    pub fn export_dir(&self, host_group: &str, unit: &str) -> Utf8PathBuf {
        self.settings.export_root.join(host_group).join(unit)
    }

    /// Copy `config` and the runtime subtrees of `project_dir` into the export
    /// directory for `unit`.
    pub fn publish(
        &self,
        unit: &str,
        host_group: &str,
        config: &Utf8Path,
        project_dir: &Utf8Path,
        overwrite: bool,
    ) -> Result<(ExportPolicy, Utf8PathBuf), DiagnosticError> {
        let dest = self.export_dir(host_group, unit);
        let policy = ExportPolicy::choose(dest.exists(), overwrite);

        if policy == ExportPolicy::FullOverwrite {
            fs_utils::remove_path(&dest).map_err(io(&dest))?;
        }
        fs::create_dir_all(&dest).map_err(io(&dest))?;

        let dest_config = dest.join(crate::unit::CONFIG_FILE);
        if dest_config.is_file() {
            fs::remove_file(&dest_config).map_err(io(&dest_config))?;
        }
        fs::copy(config, &dest_config).map_err(io(config))?;

        for name in RUNTIME_DIRS {
            let target = dest.join(name);
            if policy == ExportPolicy::Incremental {
                if name != "startup" {
                    fs::create_dir_all(&target).map_err(io(&target))?;
                    continue;
                }
                fs_utils::remove_path(&target).map_err(io(&target))?;
            }
            fs_utils::copy_tree(&project_dir.join(name), &target).map_err(io(&target))?;
        }

        metrics().record_export();
        tracing::info!("Exported {} to {} ({})", unit, dest, policy);
        Ok((policy, dest))
    }
}

fn io(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> DiagnosticError + '_ {
    move |e| DiagnosticError::io(path, &e)
}
