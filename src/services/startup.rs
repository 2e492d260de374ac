//! Startup script generation.
//!
//! The script is assembled from three ordered line lists (pre-load, at-load,
//! post-init) in a fixed order:
//!
//! 1. interpreter line and base environment
//! 2. database definition and driver registration
//! 3. `ENV.epics_env` bindings
//! 4. enabled modules in [`Module::PRIORITY`] order
//! 5. raw fragments from the `RAW` section and `RAW.file_copy` staging
//! 6. the optional self-report fragment (`SETTING.report_info`)
//!
//! followed by the substitution artifact's `dbLoadTemplate` when `DB.load` is set.
//! The whole plan is built in memory first; [`StartupScriptGenerator::write`] only
//! runs on a complete plan, so a failed generation never leaves partial output.

use super::artifact::{Artifacts, GeneratedFile, MODE_DEFAULT, MODE_EXECUTABLE};
use super::collector::SRC_SECTION;
use super::modules::{Module, ModuleContext};
use super::substitution::{
    DB_SECTION, DB_STAGING_DIR, LOAD_OPTION, SubstitutionArtifact, SubstitutionGenerator,
};
use crate::error::DiagnosticError;
use crate::fs_utils;
use crate::models::{ManagerSettings, SourceKind};
use crate::store::Record;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use std::io;
use std::sync::LazyLock;

pub const IOC_SECTION: &str = "IOC";
pub const ENV_SECTION: &str = "ENV";
pub const RAW_SECTION: &str = "RAW";
pub const SETTING_SECTION: &str = "SETTING";

/// Startup subtree relative to `project/`.
pub const STARTUP_DIR: &str = "startup";
/// Script file name inside the startup subtree.
pub const SCRIPT_NAME: &str = "st.cmd";

/// Runtime directories whose contents belong to the running IOC.
pub const RUNTIME_STATE_DIRS: [&str; 2] = ["settings", "log"];

/// Sibling of `startup/` the next tree is assembled in.
const STAGING_DIR: &str = ".startup.new";
/// Where the previous tree waits while the new one is moved into place.
const RETIRED_DIR: &str = ".startup.old";

static ENV_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid env name regex"));

/// Where a file-copy entry reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
    /// A file in the unit's managed source directory
    Src(Utf8PathBuf),
    /// A file in the shared template area
    Template(Utf8PathBuf),
}

/// One `RAW.file_copy` entry: `source:dest[:flags]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopy {
    pub source: CopySource,
    /// Relative to `project/`
    pub dest: Utf8PathBuf,
    pub mode: u32,
}

impl FileCopy {
    pub fn parse(entry: &str) -> Result<Self, DiagnosticError> {
        let invalid = |reason: &str| DiagnosticError::InvalidFileCopy {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        let (source, dest, flags) = match parts.as_slice() {
            [source, dest] => (*source, *dest, None),
            [source, dest, flags] => (*source, *dest, Some(*flags)),
            _ => return Err(invalid("expected source:dest[:flags]")),
        };

        let source = if let Some(rest) = source.strip_prefix("src/") {
            CopySource::Src(relative_path(rest).ok_or_else(|| invalid("bad source path"))?)
        } else if let Some(rest) = source.strip_prefix("template/") {
            CopySource::Template(relative_path(rest).ok_or_else(|| invalid("bad source path"))?)
        } else {
            return Err(invalid("source must start with src/ or template/"));
        };

        let dest = relative_path(dest).ok_or_else(|| invalid("destination must be a relative path"))?;
        if is_reserved_dest(&dest) {
            return Err(invalid("destination overlaps a runtime directory or the script"));
        }

        let mode = match flags {
            None => MODE_DEFAULT,
            Some(flags) => parse_flags(flags).ok_or_else(|| invalid("flags must be a combination of r, w, x"))?,
        };

        Ok(Self { source, dest, mode })
    }
}

/// A non-empty relative path with no `..`, root or prefix components.
fn relative_path(raw: &str) -> Option<Utf8PathBuf> {
    let path = Utf8Path::new(raw);
    if raw.is_empty()
        || !path
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir))
    {
        return None;
    }
    Some(path.to_path_buf())
}

/// Runtime state under `settings/` and `log/`, the `startup` root itself, the
/// script and the staging directories are owned by generation and export.
fn is_reserved_dest(dest: &Utf8Path) -> bool {
    let parts: Vec<&str> = dest
        .components()
        .filter_map(|component| match component {
            Utf8Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    match parts.as_slice() {
        [] => true,
        [first, ..] if RUNTIME_STATE_DIRS.contains(first) => true,
        [first, ..] if [STAGING_DIR, RETIRED_DIR].contains(first) => true,
        [only] => *only == STARTUP_DIR,
        [first, second] => *first == STARTUP_DIR && *second == SCRIPT_NAME,
        _ => false,
    }
}

fn parse_flags(flags: &str) -> Option<u32> {
    if flags.is_empty() {
        return None;
    }
    flags.chars().try_fold(0u32, |mode, flag| match flag {
        'r' => Some(mode | 0o444),
        'w' => Some(mode | 0o200),
        'x' => Some(mode | 0o111),
        _ => None,
    })
}

/// The three line lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupScript {
    pub pre_load: Vec<String>,
    pub at_load: Vec<String>,
    pub post_init: Vec<String>,
}

impl StartupScript {
    /// pre-load, at-load, `iocInit()`, post-init.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.pre_load {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        for line in &self.at_load {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("\niocInit()\n");
        if !self.post_init.is_empty() {
            out.push('\n');
            for line in &self.post_init {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

/// Validated inputs, produced by [`StartupScriptGenerator::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedInputs {
    pub bin: String,
    pub modules: Vec<Module>,
    pub env: Vec<(String, String)>,
    pub copies: Vec<FileCopy>,
}

/// Everything a successful generation writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPlan {
    pub script: StartupScript,
    pub files: Artifacts,
    /// Directories (relative to `project/`) that must exist
    pub runtime_dirs: Vec<Utf8PathBuf>,
}

/// Builds and writes a unit's startup tree.
pub struct StartupScriptGenerator<'a> {
    settings: &'a ManagerSettings,
}

impl<'a> StartupScriptGenerator<'a> {
    pub fn new(settings: &'a ManagerSettings) -> Self {
        Self { settings }
    }

    /// Validation pass run before any generation.
    pub fn check(&self, record: &Record, src_dir: &Utf8Path) -> Result<CheckedInputs, DiagnosticError> {
        let bin = record.get(IOC_SECTION, "bin").trim().to_string();
        if bin.is_empty() {
            return Err(DiagnosticError::BinNotSet);
        }

        let modules = Module::resolve(record.get_list(IOC_SECTION, "module").as_slice())
            .map_err(DiagnosticError::UnknownModule)?;

        let env = record
            .get_lines(ENV_SECTION, "epics_env")
            .into_iter()
            .map(|line| parse_env(&line))
            .collect::<Result<Vec<_>, _>>()?;

        if modules.iter().any(|module| module.stages_protocols()) {
            for name in record.get_list(SRC_SECTION, SourceKind::Proto.option()) {
                if !src_dir.join(&name).is_file() {
                    return Err(DiagnosticError::ProtocolFileMissing(name));
                }
            }
        }

        let mut copies = Vec::new();
        for entry in record.get_lines(RAW_SECTION, "file_copy") {
            let copy = FileCopy::parse(&entry)?;
            let source = self.copy_source_path(&copy.source, src_dir);
            if !source.is_file() {
                return Err(DiagnosticError::InvalidFileCopy {
                    entry,
                    reason: format!("source {source} not found"),
                });
            }
            copies.push(copy);
        }

        Ok(CheckedInputs {
            bin,
            modules,
            env,
            copies,
        })
    }

    /// Build the full generation plan in memory.
    pub fn plan(
        &self,
        unit: &str,
        record: &Record,
        src_dir: &Utf8Path,
    ) -> Result<GenerationPlan, DiagnosticError> {
        let inputs = self.check(record, src_dir)?;
        let bin = &inputs.bin;

        let mut script = StartupScript::default();
        let mut files = Artifacts::default();
        let mut runtime_dirs: Vec<Utf8PathBuf> = RUNTIME_STATE_DIRS
            .into_iter()
            .chain([STARTUP_DIR])
            .map(Utf8PathBuf::from)
            .collect();

        // 1. interpreter and base environment
        script.pre_load.extend([
            format!("#!../../bin/linux-x86_64/{bin}"),
            String::new(),
            format!("epicsEnvSet(\"IOC\",\"{unit}\")"),
            format!(
                "epicsEnvSet(\"TOP\",\"{}/{unit}\")",
                self.settings.container_top.trim_end_matches('/')
            ),
            "cd \"${TOP}\"".to_string(),
        ]);

        // 2. database definition and driver registration
        script.pre_load.extend([
            String::new(),
            "## register all support components".to_string(),
            format!("dbLoadDatabase(\"dbd/{bin}.dbd\")"),
            format!("{bin}_registerRecordDeviceDriver(pdbbase)"),
        ]);

        // 3. environment bindings
        if !inputs.env.is_empty() {
            script.pre_load.push(String::new());
            for (name, value) in &inputs.env {
                script.pre_load.push(format!("epicsEnvSet(\"{name}\",\"{value}\")"));
            }
        }

        // 4. modules
        let ctx = ModuleContext {
            unit,
            caputlog_json: record.get_bool(SETTING_SECTION, "caputlog_json"),
        };
        for module in &inputs.modules {
            let fragments = module.fragments(&ctx);
            if !fragments.pre_load.is_empty() {
                script.pre_load.push(String::new());
                script.pre_load.extend(fragments.pre_load);
            }
            script.at_load.extend(fragments.at_load);
            script.post_init.extend(fragments.post_init);

            for stage in module.staged_templates(unit) {
                let source = self.settings.template_root.join(&stage.template);
                let contents = fs::read(&source)
                    .map_err(|_| DiagnosticError::TemplateMissing(source.clone()))?;
                files.insert(GeneratedFile::new(stage.dest, contents, MODE_DEFAULT));
            }
            runtime_dirs.extend(module.runtime_dirs().iter().copied().map(Utf8PathBuf::from));

            if module.stages_protocols() {
                for name in record.get_list(SRC_SECTION, SourceKind::Proto.option()) {
                    let source = src_dir.join(&name);
                    let contents = fs::read(&source).map_err(|e| DiagnosticError::io(&source, &e))?;
                    files.insert(GeneratedFile::new(
                        Utf8Path::new(DB_STAGING_DIR).join(&name),
                        contents,
                        MODE_DEFAULT,
                    ));
                }
            }
        }

        // 5. raw fragments and file copies
        let raw_pre = record.get_lines(RAW_SECTION, "cmd_before_dbload");
        if !raw_pre.is_empty() {
            script.pre_load.push(String::new());
            script.pre_load.extend(raw_pre);
        }
        script.at_load.extend(record.get_lines(RAW_SECTION, "cmd_at_dbload"));
        script.post_init.extend(record.get_lines(RAW_SECTION, "cmd_after_iocinit"));

        for copy in &inputs.copies {
            let source = self.copy_source_path(&copy.source, src_dir);
            let contents = fs::read(&source).map_err(|e| DiagnosticError::io(&source, &e))?;
            files.insert(GeneratedFile::new(copy.dest.clone(), contents, copy.mode));
        }

        // 6. self-report
        if record.get_bool(SETTING_SECTION, "report_info") {
            script.post_init.extend(report_fragment(unit));
        }

        if !record.get_lines(DB_SECTION, LOAD_OPTION).is_empty() {
            let artifact = SubstitutionGenerator::generate(unit, record, src_dir)?;
            script.at_load.push(format!(
                "dbLoadTemplate(\"db/{}\")",
                SubstitutionArtifact::file_name(unit)
            ));
            files.extend(artifact.staged);
            files.insert(artifact.substitution);
        }

        Ok(GenerationPlan {
            script,
            files,
            runtime_dirs,
        })
    }

    /// Write a plan under `project_dir`, replacing the startup subtree wholesale.
    ///
    /// The new tree is assembled in a staging directory next to `startup/` and only
    /// moved into place once every file is written. Any failure before the swap
    /// leaves the previous tree and the rest of `project/` untouched.
    pub fn write(plan: &GenerationPlan, project_dir: &Utf8Path) -> Result<(), DiagnosticError> {
        let staging = project_dir.join(STAGING_DIR);
        let outside = match Self::stage(plan, project_dir, &staging) {
            Ok(outside) => outside,
            Err(err) => {
                if let Err(cleanup) = fs_utils::remove_path(&staging) {
                    tracing::warn!("Failed to remove staging tree {}: {}", staging, cleanup);
                }
                return Err(err);
            }
        };

        for dir in &plan.runtime_dirs {
            let path = project_dir.join(dir);
            fs::create_dir_all(&path).map_err(|e| DiagnosticError::io(&path, &e))?;
        }
        for relative in &outside {
            let staged = staging.join(relative);
            let target = project_dir.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| DiagnosticError::io(parent, &e))?;
            }
            fs::rename(&staged, &target).map_err(|e| DiagnosticError::io(&target, &e))?;
        }
        Self::swap_startup(project_dir, &staging.join(STARTUP_DIR))?;
        fs_utils::remove_path(&staging).map_err(|e| DiagnosticError::io(&staging, &e))?;

        tracing::info!(
            "Wrote {} with {} staged file(s)",
            project_dir.join(STARTUP_DIR).join(SCRIPT_NAME),
            plan.files.len()
        );
        Ok(())
    }

    /// Write every planned file below `staging`, mirroring the `project/` layout.
    /// Returns the files that live outside `startup/`.
    fn stage(
        plan: &GenerationPlan,
        project_dir: &Utf8Path,
        staging: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, DiagnosticError> {
        fs_utils::remove_path(staging).map_err(|e| DiagnosticError::io(staging, &e))?;
        let startup = staging.join(STARTUP_DIR);
        fs::create_dir_all(&startup).map_err(|e| DiagnosticError::io(&startup, &e))?;

        for dir in plan.runtime_dirs.iter().filter(|dir| dir.starts_with(STARTUP_DIR)) {
            let path = staging.join(dir);
            fs::create_dir_all(&path).map_err(|e| DiagnosticError::io(&path, &e))?;
        }

        let mut outside = Vec::new();
        for file in plan.files.iter() {
            if !file.relative.starts_with(STARTUP_DIR) {
                let target = project_dir.join(&file.relative);
                if target.is_dir() {
                    return Err(DiagnosticError::io(
                        &target,
                        &io::Error::new(io::ErrorKind::IsADirectory, "destination is a directory"),
                    ));
                }
                outside.push(file.relative.clone());
            }
            let path = staging.join(&file.relative);
            fs_utils::write_file_mode(&path, &file.contents, file.mode)
                .map_err(|e| DiagnosticError::io(&path, &e))?;
        }

        let script_path = startup.join(SCRIPT_NAME);
        fs_utils::write_file_mode(&script_path, plan.script.render(), MODE_EXECUTABLE)
            .map_err(|e| DiagnosticError::io(&script_path, &e))?;
        Ok(outside)
    }

    /// Move `next` to `project/startup`, restoring the previous tree if the move fails.
    fn swap_startup(project_dir: &Utf8Path, next: &Utf8Path) -> Result<(), DiagnosticError> {
        let current = project_dir.join(STARTUP_DIR);
        let retired = project_dir.join(RETIRED_DIR);
        fs_utils::remove_path(&retired).map_err(|e| DiagnosticError::io(&retired, &e))?;

        let had_previous = current.exists();
        if had_previous {
            fs::rename(&current, &retired).map_err(|e| DiagnosticError::io(&current, &e))?;
        }
        if let Err(err) = fs::rename(next, &current) {
            if had_previous {
                if let Err(restore) = fs::rename(&retired, &current) {
                    tracing::error!("Failed to restore {}: {}", current, restore);
                }
            }
            return Err(DiagnosticError::io(&current, &err));
        }
        if had_previous {
            fs_utils::remove_path(&retired).map_err(|e| DiagnosticError::io(&retired, &e))?;
        }
        Ok(())
    }

    fn copy_source_path(&self, source: &CopySource, src_dir: &Utf8Path) -> Utf8PathBuf {
        match source {
            CopySource::Src(path) => src_dir.join(path),
            CopySource::Template(path) => self.settings.template_root.join(path),
        }
    }
}

fn parse_env(line: &str) -> Result<(String, String), DiagnosticError> {
    let Some((name, value)) = line.split_once('=') else {
        return Err(DiagnosticError::InvalidEnv(line.to_string()));
    };
    let name = name.trim();
    if !ENV_NAME.is_match(name) {
        return Err(DiagnosticError::InvalidEnv(line.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn report_fragment(unit: &str) -> Vec<String> {
    let info = format!("${{TOP}}/log/{unit}.info");
    vec![
        "## report ioc info".to_string(),
        format!("system(\"date > {info}\")"),
        format!("system(\"hostname -I >> {info}\")"),
        format!("dbl >> \"{info}\""),
    ]
}
