//! Source file collection and classification.
//!
//! Files are sorted into three classes by suffix ([`SourceKind`]) and tracked as
//! comma-joined lists in the `SRC` section of the unit record.

use crate::error::DiagnosticError;
use crate::metrics::metrics;
use crate::models::{SourceKind, SuffixClasses};
use crate::store::Record;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::fs;

/// Section holding the classification lists.
pub const SRC_SECTION: &str = "SRC";

/// Outcome of a collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    /// Files copied into the managed directory that were not there before
    pub added: Vec<String>,
    /// Files that replaced an existing entry of the same name
    pub overwritten: Vec<String>,
    /// Names listed in the record but absent from the managed directory (init mode)
    pub lost: Vec<String>,
}

impl CollectReport {
    pub fn summary(&self) -> String {
        format!(
            "{} added, {} overwritten, {} lost",
            self.added.len(),
            self.overwritten.len(),
            self.lost.len()
        )
    }
}

/// Imports and classifies source files.
pub struct SourceFileCollector<'a> {
    suffixes: &'a SuffixClasses,
}

impl<'a> SourceFileCollector<'a> {
    pub fn new(suffixes: &'a SuffixClasses) -> Self {
        Self { suffixes }
    }

    /// Run one collection pass.
    ///
    /// With `source_dir` pointing somewhere other than `managed_dir`, every file with a
    /// recognised suffix is copied in. With `None` (or the managed directory itself) the
    /// pass only verifies that every listed file is still on disk.
    ///
    /// Either way the three lists are then recomputed from `managed_dir`; a list is
    /// only replaced when the new value is non-empty.
    pub fn collect(
        &self,
        record: &mut Record,
        managed_dir: &Utf8Path,
        source_dir: Option<&Utf8Path>,
    ) -> Result<CollectReport, DiagnosticError> {
        let mut report = CollectReport::default();

        match source_dir.filter(|dir| !same_dir(dir, managed_dir)) {
            Some(external) => self.import(external, managed_dir, &mut report)?,
            None => self.verify(record, managed_dir, &mut report),
        }

        let classified = self.scan(managed_dir)?;
        for kind in SourceKind::ALL {
            if let Some(names) = classified.get(&kind).filter(|names| !names.is_empty()) {
                record.set_list(SRC_SECTION, kind.option(), names);
            }
        }

        tracing::info!("Collected sources into {}: {}", managed_dir, report.summary());
        Ok(report)
    }

    fn import(
        &self,
        external: &Utf8Path,
        managed_dir: &Utf8Path,
        report: &mut CollectReport,
    ) -> Result<(), DiagnosticError> {
        if !external.is_dir() {
            return Err(DiagnosticError::SourceDirNotFound(external.to_path_buf()));
        }
        fs::create_dir_all(managed_dir).map_err(|e| DiagnosticError::io(managed_dir, &e))?;

        let incoming = self.scan(external)?;
        for kind in SourceKind::ALL {
            for name in incoming.get(&kind).cloned().unwrap_or_default() {
                let dest = managed_dir.join(&name);
                let existed = dest.exists();
                fs::copy(external.join(&name), &dest)
                    .map_err(|e| DiagnosticError::io(&dest, &e))?;

                if existed {
                    tracing::debug!("Overwrote source file {}", dest);
                    metrics().record_file_overwritten();
                    report.overwritten.push(name);
                } else {
                    tracing::debug!("Added source file {}", dest);
                    metrics().record_file_added();
                    report.added.push(name);
                }
            }
        }

        Ok(())
    }

    fn verify(&self, record: &Record, managed_dir: &Utf8Path, report: &mut CollectReport) {
        for kind in SourceKind::ALL {
            for name in record.get_list(SRC_SECTION, kind.option()) {
                if !managed_dir.join(&name).is_file() {
                    report.lost.push(name);
                }
            }
        }
    }

    /// Regular files in `dir` with a recognised suffix, grouped and sorted.
    fn scan(&self, dir: &Utf8Path) -> Result<BTreeMap<SourceKind, Vec<String>>, DiagnosticError> {
        let mut classified: BTreeMap<SourceKind, Vec<String>> = BTreeMap::new();
        if !dir.is_dir() {
            return Ok(classified);
        }

        let entries = dir
            .read_dir_utf8()
            .map_err(|e| DiagnosticError::io(dir, &e))?;
        for entry in entries {
            let entry = entry.map_err(|e| DiagnosticError::io(dir, &e))?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(kind) = self.suffixes.classify(entry.file_name()) {
                classified
                    .entry(kind)
                    .or_default()
                    .push(entry.file_name().to_string());
            }
        }

        for names in classified.values_mut() {
            names.sort();
            names.dedup();
        }
        Ok(classified)
    }
}

fn same_dir(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (a.canonicalize_utf8(), b.canonicalize_utf8()) {
        (Ok(a), Ok(b)) => a == b,
        _ => Utf8PathBuf::from(a) == Utf8PathBuf::from(b),
    }
}
