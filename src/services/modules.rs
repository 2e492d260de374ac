//! Capability modules spliced into the startup script.
//!
//! Modules are always applied in [`Module::PRIORITY`] order, whatever order the
//! unit lists them in.

use camino::Utf8PathBuf;

/// A toggleable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Module {
    /// StreamDevice protocol support
    Stream,
    /// Settings persistence across reboots
    Autosave,
    /// Channel Access put logging
    Caputlog,
    /// IOC health records
    StatusIoc,
    /// Host operating system health records
    StatusOs,
}

/// Fragments one module contributes to each script phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleFragments {
    pub pre_load: Vec<String>,
    pub at_load: Vec<String>,
    pub post_init: Vec<String>,
}

/// A template file copied into the runtime tree when the module is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateStage {
    /// Path relative to the template root
    pub template: Utf8PathBuf,
    /// Path relative to `project/`
    pub dest: Utf8PathBuf,
}

/// Inputs a module reads while rendering.
#[derive(Debug, Clone, Copy)]
pub struct ModuleContext<'a> {
    pub unit: &'a str,
    pub caputlog_json: bool,
}

impl Module {
    pub const PRIORITY: [Module; 5] = [
        Module::Stream,
        Module::Autosave,
        Module::Caputlog,
        Module::StatusIoc,
        Module::StatusOs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Module::Stream => "stream",
            Module::Autosave => "autosave",
            Module::Caputlog => "caputlog",
            Module::StatusIoc => "status-ioc",
            Module::StatusOs => "status-os",
        }
    }

    /// Case-insensitive lookup; `_` and `-` are interchangeable.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_lowercase().replace('_', "-");
        Self::PRIORITY
            .into_iter()
            .find(|module| module.name() == wanted)
    }

    /// Resolve a list of names into priority order, dropping duplicates.
    ///
    /// Returns the first unrecognised name on failure.
    pub fn resolve<S: AsRef<str>>(names: &[S]) -> Result<Vec<Module>, String> {
        let mut modules = Vec::new();
        for name in names {
            let module = Self::from_name(name.as_ref()).ok_or_else(|| name.as_ref().to_string())?;
            if !modules.contains(&module) {
                modules.push(module);
            }
        }
        modules.sort();
        Ok(modules)
    }

    /// Whether the module stages the unit's protocol files.
    pub fn stages_protocols(self) -> bool {
        self == Module::Stream
    }

    pub fn fragments(self, ctx: &ModuleContext<'_>) -> ModuleFragments {
        let unit = ctx.unit;
        match self {
            Module::Stream => ModuleFragments {
                pre_load: vec![
                    "## stream device".to_string(),
                    "epicsEnvSet(\"STREAM_PROTOCOL_PATH\",\"${TOP}/startup/db\")".to_string(),
                ],
                ..ModuleFragments::default()
            },
            Module::Autosave => ModuleFragments {
                pre_load: vec![
                    "## autosave".to_string(),
                    "set_requestfile_path(\"${TOP}/startup/autosave\")".to_string(),
                    "set_savefile_path(\"${TOP}/settings/autosave\")".to_string(),
                    format!("set_pass0_restoreFile(\"{unit}-settings.sav\")"),
                    format!("set_pass1_restoreFile(\"{unit}-settings.sav\")"),
                    format!("save_restoreSet_status_prefix(\"{unit}:\")"),
                ],
                at_load: vec![format!(
                    "dbLoadRecords(\"db/save_restoreStatus.db\",\"P={unit}:\")"
                )],
                post_init: vec![format!(
                    "create_monitor_set(\"{unit}-settings.req\",5,\"\")"
                )],
            },
            Module::Caputlog => {
                let init = if ctx.caputlog_json {
                    "caPutJsonLogInit"
                } else {
                    "caPutLogInit"
                };
                ModuleFragments {
                    pre_load: vec![
                        "## caputlog".to_string(),
                        "asSetFilename(\"${TOP}/startup/default.acf\")".to_string(),
                    ],
                    post_init: vec![format!(
                        "{init}(\"${{EPICS_IOC_CAPUTLOG_INET}}:${{EPICS_IOC_CAPUTLOG_PORT}}\",0)"
                    )],
                    ..ModuleFragments::default()
                }
            }
            Module::StatusIoc => ModuleFragments {
                at_load: vec![format!("dbLoadRecords(\"db/status_ioc.db\",\"IOC={unit}\")")],
                ..ModuleFragments::default()
            },
            Module::StatusOs => ModuleFragments {
                at_load: vec![format!("dbLoadRecords(\"db/status_OS.db\",\"HOST={unit}:\")")],
                ..ModuleFragments::default()
            },
        }
    }

    /// Template files the module stages into the runtime tree.
    pub fn staged_templates(self, unit: &str) -> Vec<TemplateStage> {
        let stage = |template: &str, dest: String| TemplateStage {
            template: Utf8PathBuf::from(template),
            dest: Utf8PathBuf::from(dest),
        };

        match self {
            Module::Stream => Vec::new(),
            Module::Autosave => vec![
                stage(
                    "autosave/save_restoreStatus.db",
                    "startup/db/save_restoreStatus.db".to_string(),
                ),
                stage(
                    "autosave/settings.req",
                    format!("startup/autosave/{unit}-settings.req"),
                ),
            ],
            Module::Caputlog => vec![stage("caputlog/default.acf", "startup/default.acf".to_string())],
            Module::StatusIoc => vec![stage(
                "status-ioc/status_ioc.db",
                "startup/db/status_ioc.db".to_string(),
            )],
            Module::StatusOs => vec![stage(
                "status-os/status_OS.db",
                "startup/db/status_OS.db".to_string(),
            )],
        }
    }

    /// Runtime directories (relative to `project/`) the module needs to exist.
    pub fn runtime_dirs(self) -> &'static [&'static str] {
        match self {
            Module::Autosave => &["settings/autosave"],
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Module::from_name("status-ioc"), Some(Module::StatusIoc));
        assert_eq!(Module::from_name("STATUS_IOC"), Some(Module::StatusIoc));
        assert_eq!(Module::from_name("asyn"), None);
    }

    #[test]
    fn test_resolve_uses_priority_order() {
        let modules = Module::resolve(&["status-os", "autosave", "stream", "autosave"]).unwrap();
        assert_eq!(
            modules,
            vec![Module::Stream, Module::Autosave, Module::StatusOs]
        );
    }

    #[test]
    fn test_resolve_reports_unknown() {
        assert_eq!(
            Module::resolve(&["autosave", "bogus"]),
            Err("bogus".to_string())
        );
    }

    #[test]
    fn test_status_ioc_load_line() {
        let ctx = ModuleContext {
            unit: "alpha",
            caputlog_json: false,
        };
        let fragments = Module::StatusIoc.fragments(&ctx);
        assert_eq!(
            fragments.at_load,
            vec!["dbLoadRecords(\"db/status_ioc.db\",\"IOC=alpha\")"]
        );
    }

    #[test]
    fn test_caputlog_flavour() {
        let json = ModuleContext {
            unit: "alpha",
            caputlog_json: true,
        };
        let fragments = Module::Caputlog.fragments(&json);
        assert!(fragments.post_init[0].starts_with("caPutJsonLogInit("));
        assert_eq!(
            fragments.post_init[0],
            "caPutJsonLogInit(\"${EPICS_IOC_CAPUTLOG_INET}:${EPICS_IOC_CAPUTLOG_PORT}\",0)"
        );
    }

    #[test]
    fn test_autosave_stages_templates() {
        let stages = Module::Autosave.staged_templates("alpha");
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].dest, "startup/autosave/alpha-settings.req");
        assert_eq!(Module::Autosave.runtime_dirs(), &["settings/autosave"]);
    }
}
