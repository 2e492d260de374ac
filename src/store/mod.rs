//! ConfigStore - persistent INI records for units.
//!
//! A [`Record`] is an ordered map of sections, each an ordered map of options to
//! string values. Section names are canonicalised to upper case and option names
//! to lower case on every read and write, so hand edits with a different case land
//! in the same slot.
//!
//! Reads through [`Record::get`] never fail: an undefined option reads as `""`.
//! Files are read and written wholesale with [`load`] and [`persist`]; there is no
//! in-place patching.
//!
//! # Wire format
//!
//! ```text
//! [IOC]
//! name = alpha
//! module = autosave, status-ioc
//!
//! [ENV]
//! epics_env =
//!     EPICS_CA_ADDR_LIST=10.0.0.255
//!     EPICS_CA_AUTO_ADDR_LIST=NO
//! ```

mod normalize;

pub use normalize::normalize;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;
use std::io::ErrorKind;
use thiserror::Error;

/// Indentation used for continuation lines of multi-line values.
const CONTINUATION_INDENT: &str = "    ";

/// Errors raised while loading or persisting a record.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("record {path} is corrupt at line {line}: {reason}")]
    Corrupt {
        path: Utf8PathBuf,
        line: usize,
        reason: String,
    },

    #[error("invalid {kind} name \"{name}\": {reason}")]
    InvalidKey {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One section: option name to value, in file order.
pub type Section = IndexMap<String, String>;

/// In-memory image of one INI record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    sections: IndexMap<String, Section>,
}

/// Where and why parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub line: usize,
    pub reason: String,
}

fn section_key(section: &str) -> String {
    section.trim().to_uppercase()
}

fn option_key(option: &str) -> String {
    option.trim().to_lowercase()
}

/// Check that a section and option name can be written and read back unchanged.
///
/// Section names must be non-empty and fit on one line. Option names additionally
/// may not contain `=` or start with `[`, `#` or `;`.
pub fn validate_key(section: &str, option: &str) -> Result<(), StoreError> {
    let invalid = |kind, name: &str, reason| StoreError::InvalidKey {
        kind,
        name: name.to_string(),
        reason,
    };

    let section_name = section.trim();
    if section_name.is_empty() {
        return Err(invalid("section", section, "empty"));
    }
    if section_name.contains(char::is_control) {
        return Err(invalid("section", section, "contains a control character"));
    }

    let option_name = option.trim();
    if option_name.is_empty() {
        return Err(invalid("option", option, "empty"));
    }
    if option_name.contains(char::is_control) {
        return Err(invalid("option", option, "contains a control character"));
    }
    if option_name.contains('=') {
        return Err(invalid("option", option, "contains '='"));
    }
    if option_name.starts_with(['[', '#', ';']) {
        return Err(invalid("option", option, "starts with '[', '#' or ';'"));
    }
    Ok(())
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> Result<Self, ParseFailure> {
        let mut record = Record::new();
        let mut current: Option<String> = None;
        let mut last_option: Option<String> = None;

        let fail = |line: usize, reason: &str| ParseFailure {
            line,
            reason: reason.to_string(),
        };

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;

            if raw.trim().is_empty() || raw.starts_with('#') || raw.starts_with(';') {
                continue;
            }

            if raw.starts_with(char::is_whitespace) {
                let (Some(section), Some(option)) = (&current, &last_option) else {
                    return Err(fail(line_no, "continuation line without an option"));
                };
                if let Some(value) = record
                    .sections
                    .get_mut(section)
                    .and_then(|entries| entries.get_mut(option))
                {
                    value.push('\n');
                    value.push_str(raw.trim());
                }
                continue;
            }

            let line = raw.trim_end();
            if line.starts_with('[') {
                if !line.ends_with(']') || line.len() < 3 {
                    return Err(fail(line_no, "malformed section header"));
                }
                let name = section_key(&line[1..line.len() - 1]);
                if name.is_empty() {
                    return Err(fail(line_no, "empty section name"));
                }
                if record.sections.contains_key(&name) {
                    return Err(fail(line_no, &format!("duplicate section [{name}]")));
                }
                record.sections.insert(name.clone(), Section::new());
                current = Some(name);
                last_option = None;
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(fail(line_no, "expected 'option = value'"));
            };
            let key = option_key(key);
            if key.is_empty() {
                return Err(fail(line_no, "empty option name"));
            }
            let Some(section) = &current else {
                return Err(fail(line_no, "option outside of any section"));
            };
            let entries = record.sections.entry(section.clone()).or_default();
            if entries.contains_key(&key) {
                return Err(fail(line_no, &format!("duplicate option '{key}'")));
            }
            entries.insert(key.clone(), value.trim().to_string());
            last_option = Some(key);
        }

        Ok(record)
    }

    /// Render the record in its on-disk form.
    pub fn to_ini_string(&self) -> String {
        let mut out = String::new();
        for (idx, (name, options)) in self.sections.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(&format!("[{name}]\n"));
            for (key, value) in options {
                let mut lines = value.split('\n');
                let first = lines.next().unwrap_or_default();
                if first.is_empty() {
                    out.push_str(&format!("{key} =\n"));
                } else {
                    out.push_str(&format!("{key} = {first}\n"));
                }
                for line in lines.filter(|line| !line.trim().is_empty()) {
                    out.push_str(CONTINUATION_INDENT);
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        out
    }

    /// Soft read: `""` for anything undefined.
    pub fn get(&self, section: &str, option: &str) -> String {
        self.sections
            .get(&section_key(section))
            .and_then(|entries| entries.get(&option_key(option)))
            .cloned()
            .unwrap_or_default()
    }

    /// Write an option, creating the section when absent.
    pub fn set(&mut self, section: &str, option: &str, value: impl Into<String>) {
        self.sections
            .entry(section_key(section))
            .or_default()
            .insert(option_key(option), value.into());
    }

    /// [`Record::set`] for names that come from outside, see [`validate_key`].
    pub fn try_set(
        &mut self,
        section: &str,
        option: &str,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        validate_key(section, option)?;
        self.set(section, option, value);
        Ok(())
    }

    pub fn add_section(&mut self, section: &str) {
        self.sections.entry(section_key(section)).or_default();
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(&section_key(section))
    }

    pub fn has_option(&self, section: &str, option: &str) -> bool {
        self.sections
            .get(&section_key(section))
            .is_some_and(|entries| entries.contains_key(&option_key(option)))
    }

    pub fn remove_option(&mut self, section: &str, option: &str) -> Option<String> {
        self.sections
            .get_mut(&section_key(section))
            .and_then(|entries| entries.shift_remove(&option_key(option)))
    }

    pub fn remove_section(&mut self, section: &str) -> bool {
        self.sections.shift_remove(&section_key(section)).is_some()
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn options(&self, section: &str) -> Vec<(&str, &str)> {
        self.sections
            .get(&section_key(section))
            .map(|entries| {
                entries
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `true`, `yes`, `on` and `1` (any case) read as true; everything else false.
    pub fn get_bool(&self, section: &str, option: &str) -> bool {
        matches!(
            self.get(section, option).trim().to_lowercase().as_str(),
            "true" | "yes" | "on" | "1"
        )
    }

    /// Comma separated list, trimmed, empty items dropped.
    pub fn get_list(&self, section: &str, option: &str) -> Vec<String> {
        self.get(section, option)
            .split([',', '\n'])
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn set_list(&mut self, section: &str, option: &str, items: &[String]) {
        self.set(section, option, items.join(", "));
    }

    /// Newline separated clauses, trimmed, empty lines dropped.
    pub fn get_lines(&self, section: &str, option: &str) -> Vec<String> {
        self.get(section, option)
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    }

    /// Normalize every value in place.
    pub fn normalize(&mut self) {
        for entries in self.sections.values_mut() {
            for value in entries.values_mut() {
                *value = normalize(value);
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

/// Load a record from disk.
pub fn load(path: &Utf8Path) -> Result<Record, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        Err(err) if err.kind() == ErrorKind::InvalidData => {
            return Err(StoreError::Corrupt {
                path: path.to_path_buf(),
                line: 0,
                reason: "not valid UTF-8".to_string(),
            });
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    Record::parse(&text).map_err(|failure| StoreError::Corrupt {
        path: path.to_path_buf(),
        line: failure.line,
        reason: failure.reason,
    })
}

/// Replace the file at `path` with the rendered record.
///
/// The text goes to a sibling temporary file first and is renamed over the
/// target, so readers see either the old or the new record.
pub fn persist(record: &Record, path: &Utf8Path) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp_path = Utf8PathBuf::from(format!("{path}.tmp"));
    fs::write(&tmp_path, record.to_ini_string()).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(io_err)?;

    tracing::debug!("Persisted record to {}", path);
    Ok(())
}
