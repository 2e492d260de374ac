use crate::models::ManagerSettings;
use ::config::{Config, Environment, File, FileFormat};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// File name of the manager settings inside the settings directory.
pub const SETTINGS_FILE: &str = "iocmgr.yaml";

/// Prefix of environment variables overriding settings, e.g. `IOCMGR_EXPORT_ROOT`.
pub const ENV_PREFIX: &str = "IOCMGR";

/// Configuration manager for loading and saving the manager settings.
///
/// Settings are layered: defaults, then `iocmgr.yaml`, then `IOCMGR_*` environment
/// variables. Nested keys use `__`, e.g. `IOCMGR_SUFFIXES__PROTO`.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    settings_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager for the given settings directory, creating it if needed.
    pub fn new<P: AsRef<Utf8Path>>(settings_dir: P) -> Result<Self> {
        let settings_dir = settings_dir.as_ref().to_path_buf();

        if !settings_dir.exists() {
            fs::create_dir_all(&settings_dir).with_context(|| {
                format!("Failed to create settings directory: {}", settings_dir)
            })?;
        }

        Ok(Self {
            settings_path: settings_dir.join(SETTINGS_FILE),
            settings_dir,
        })
    }

    /// Load the manager settings.
    ///
    /// # Returns
    /// The layered settings; defaults when neither file nor environment set anything
    pub fn load_settings(&self) -> Result<ManagerSettings> {
        self.load_settings_with(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
    }

    fn load_settings_with(&self, environment: Environment) -> Result<ManagerSettings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        let settings: ManagerSettings = Config::builder()
            .add_source(File::new(self.settings_path.as_str(), FileFormat::Yaml).required(false))
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!(
            "Loaded settings: repository={}, export={}",
            settings.repository_root,
            settings.export_root
        );
        Ok(settings)
    }

    /// Save the manager settings.
    pub fn save_settings(&self, settings: &ManagerSettings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Get the settings directory path.
    pub fn settings_dir(&self) -> &Utf8Path {
        &self.settings_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NameMismatchPolicy;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    fn environment(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .source(Some(source))
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let settings = manager.load_settings_with(environment(&[])).unwrap();
        assert_eq!(settings, ManagerSettings::default());
    }

    #[test]
    fn test_load_save_settings() {
        let (manager, temp_dir) = create_test_config_manager();
        let base = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();

        let mut settings = ManagerSettings::rooted_at(&base);
        settings.default_host_group = "lab".to_string();
        settings.name_mismatch = NameMismatchPolicy::Reject;
        manager.save_settings(&settings).unwrap();

        let loaded = manager.load_settings_with(environment(&[])).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.settings_path(), "default_host_group: rack\n").unwrap();

        let loaded = manager.load_settings_with(environment(&[])).unwrap();
        assert_eq!(loaded.default_host_group, "rack");
        assert_eq!(loaded.container_top, "/opt/EPICS/RUN");
    }

    #[test]
    fn test_environment_overrides_file() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.settings_path(), "default_host_group: rack\n").unwrap();

        let loaded = manager
            .load_settings_with(environment(&[
                ("IOCMGR_DEFAULT_HOST_GROUP", "field"),
                ("IOCMGR_NAME_MISMATCH", "reject"),
            ]))
            .unwrap();
        assert_eq!(loaded.default_host_group, "field");
        assert_eq!(loaded.name_mismatch, NameMismatchPolicy::Reject);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.settings_path(), "default_host_group: [unclosed\n").unwrap();
        assert!(manager.load_settings_with(environment(&[])).is_err());
    }
}
