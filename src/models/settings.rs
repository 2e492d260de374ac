use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Repository-wide settings from `iocmgr.yaml`.
///
/// Every field has a default, so a partial (or missing) file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Directory holding one subdirectory per unit.
    pub repository_root: Utf8PathBuf,

    /// Directory holding one snapshot per unit.
    pub snapshot_root: Utf8PathBuf,

    /// Runtime mount point; exports land in `<export_root>/<host_group>/<unit>`.
    pub export_root: Utf8PathBuf,

    /// Read-only boilerplate area keyed by module name.
    pub template_root: Utf8PathBuf,

    /// Location of a unit's runtime tree inside its container; `TOP` in `st.cmd`.
    pub container_top: String,

    /// Host group used when a unit does not declare `DEPLOY.host`.
    pub default_host_group: String,

    /// Directory for rolling log files.
    pub log_dir: Utf8PathBuf,

    /// What to do when `IOC.name` disagrees with the unit directory name.
    pub name_mismatch: NameMismatchPolicy,

    pub suffixes: SuffixClasses,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            repository_root: Utf8PathBuf::from("/opt/iocmgr/repository"),
            snapshot_root: Utf8PathBuf::from("/opt/iocmgr/snapshots"),
            export_root: Utf8PathBuf::from("/opt/iocmgr/mount"),
            template_root: Utf8PathBuf::from("/opt/iocmgr/templates"),
            container_top: "/opt/EPICS/RUN".to_string(),
            default_host_group: "swarm".to_string(),
            log_dir: Utf8PathBuf::from("/var/log/iocmgr"),
            name_mismatch: NameMismatchPolicy::default(),
            suffixes: SuffixClasses::default(),
        }
    }
}

impl ManagerSettings {
    /// Settings with every managed directory placed under `root`.
    pub fn rooted_at(root: &Utf8Path) -> Self {
        Self {
            repository_root: root.join("repository"),
            snapshot_root: root.join("snapshots"),
            export_root: root.join("mount"),
            template_root: root.join("templates"),
            log_dir: root.join("logs"),
            ..Self::default()
        }
    }
}

/// Policy for a unit whose recorded name differs from its directory name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameMismatchPolicy {
    /// Rewrite `IOC.name` to the directory name and record a warning.
    #[default]
    Rename,
    /// Leave the record alone and record an error.
    Reject,
}

/// The three source file classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Db,
    Proto,
    Other,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Db, SourceKind::Proto, SourceKind::Other];

    /// Option in the `SRC` section listing files of this class.
    pub fn option(self) -> &'static str {
        match self {
            SourceKind::Db => "db_file",
            SourceKind::Proto => "proto_file",
            SourceKind::Other => "other_file",
        }
    }
}

/// File suffixes (without the dot) for each source class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuffixClasses {
    pub db: Vec<String>,
    pub proto: Vec<String>,
    pub other: Vec<String>,
}

impl Default for SuffixClasses {
    fn default() -> Self {
        Self {
            db: vec!["db".to_string(), "template".to_string(), "vdb".to_string()],
            proto: vec!["proto".to_string()],
            other: vec![
                "req".to_string(),
                "acf".to_string(),
                "cmd".to_string(),
                "substitutions".to_string(),
                "txt".to_string(),
            ],
        }
    }
}

impl SuffixClasses {
    pub fn suffixes(&self, kind: SourceKind) -> &[String] {
        match kind {
            SourceKind::Db => &self.db,
            SourceKind::Proto => &self.proto,
            SourceKind::Other => &self.other,
        }
    }

    /// Class of a file by its extension; the first matching class wins.
    pub fn classify(&self, file_name: &str) -> Option<SourceKind> {
        let extension = Utf8Path::new(file_name).extension()?.to_lowercase();
        SourceKind::ALL.into_iter().find(|kind| {
            self.suffixes(*kind)
                .iter()
                .any(|suffix| suffix.trim_start_matches('.').eq_ignore_ascii_case(&extension))
        })
    }
}
