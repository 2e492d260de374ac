//! Shared fixtures for integration tests.

#![allow(dead_code)]

use camino::Utf8PathBuf;
use iocmgr::{ManagerSettings, Repository};
use std::fs;
use tempfile::TempDir;

/// A repository rooted in a temporary directory with the module templates seeded.
pub struct Fixture {
    _temp_dir: TempDir,
    pub base: Utf8PathBuf,
    pub repository: Repository,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(adjust: impl FnOnce(&mut ManagerSettings)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let base = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let mut settings = ManagerSettings::rooted_at(&base);
        adjust(&mut settings);

        seed_templates(&settings.template_root);

        Self {
            _temp_dir: temp_dir,
            base,
            repository: Repository::new(settings),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        self.repository.settings()
    }

    /// A directory outside the repository to collect sources from.
    pub fn incoming(&self, files: &[(&str, &str)]) -> Utf8PathBuf {
        let dir = self.base.join("incoming");
        fs::create_dir_all(&dir).unwrap();
        for (name, contents) in files {
            fs::write(dir.join(name), contents).unwrap();
        }
        dir
    }
}

pub fn seed_templates(root: &Utf8PathBuf) {
    let templates = [
        ("autosave/save_restoreStatus.db", "record(ao, \"$(P)SR_status\") {}\n"),
        ("autosave/settings.req", "file \"settings.req\"\n"),
        ("caputlog/default.acf", "ASG(DEFAULT) {\n    RULE(1, WRITE)\n}\n"),
        ("status-ioc/status_ioc.db", "record(ai, \"$(IOC):HEARTBEAT\") {}\n"),
        ("status-os/status_OS.db", "record(ai, \"$(HOST)LOAD\") {}\n"),
        ("common/access.acf", "ASG(DEFAULT) {}\n"),
    ];
    for (relative, contents) in templates {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

/// Contents of a unit's generated startup script.
pub fn read_script(unit: &iocmgr::Unit) -> String {
    fs::read_to_string(unit.project_dir().join("startup/st.cmd")).unwrap()
}
