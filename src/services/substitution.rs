//! Substitution artifact generation from `DB.load` directives.
//!
//! Each directive line names a classified source file followed by its macro
//! bindings:
//!
//! ```text
//! motor.db, P=MTR:, R=m1
//! ```
//!
//! and becomes one block of the `<unit>.substitutions` file:
//!
//! ```text
//! file db/motor.db {
//!     pattern { P, R }
//!         { MTR:, m1 }
//! }
//! ```

use super::artifact::{GeneratedFile, MODE_DEFAULT, MODE_READ_ONLY};
use super::collector::SRC_SECTION;
use crate::error::DiagnosticError;
use crate::models::SourceKind;
use crate::store::Record;
use camino::Utf8Path;
use std::fs;

pub const DB_SECTION: &str = "DB";
pub const LOAD_OPTION: &str = "load";

/// Runtime directory (relative to `project/`) receiving database files.
pub const DB_STAGING_DIR: &str = "startup/db";

/// One parsed load line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadDirective {
    pub file: String,
    pub macros: Vec<(String, String)>,
}

impl LoadDirective {
    /// Parse `file, key=value, ...`.
    pub fn parse(line: &str) -> Result<Self, DiagnosticError> {
        let invalid = |reason: &str| DiagnosticError::InvalidLoad {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let mut tokens = line.split(',').map(str::trim);
        let file = tokens.next().unwrap_or_default();
        if file.is_empty() {
            return Err(invalid("missing file name"));
        }
        if file.contains('=') {
            return Err(invalid("first token must be a file name"));
        }

        let mut macros = Vec::new();
        for token in tokens.filter(|token| !token.is_empty()) {
            let Some((key, value)) = token.split_once('=') else {
                return Err(invalid(&format!("\"{token}\" is not key=value")));
            };
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(invalid(&format!("bad macro name in \"{token}\"")));
            }
            macros.push((key.to_string(), value.trim().to_string()));
        }

        Ok(Self {
            file: file.to_string(),
            macros,
        })
    }

    fn render(&self) -> String {
        let keys: Vec<&str> = self.macros.iter().map(|(k, _)| k.as_str()).collect();
        let values: Vec<String> = self.macros.iter().map(|(_, v)| quote(v)).collect();
        format!(
            "file db/{} {{\n    pattern {}\n        {}\n}}\n",
            self.file,
            braced(&keys),
            braced(&values)
        )
    }
}

fn braced<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        "{ }".to_string()
    } else {
        let joined: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
        format!("{{ {} }}", joined.join(", "))
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.contains(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

/// The substitution file plus the database files it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionArtifact {
    pub substitution: GeneratedFile,
    pub staged: Vec<GeneratedFile>,
}

impl SubstitutionArtifact {
    /// File name of the substitution artifact inside the db staging directory.
    pub fn file_name(unit: &str) -> String {
        format!("{unit}.substitutions")
    }
}

/// Compiles load directives. Nothing touches disk besides reading source files;
/// writing is left to the caller so a failure leaves no partial artifact.
pub struct SubstitutionGenerator;

impl SubstitutionGenerator {
    pub fn generate(
        unit: &str,
        record: &Record,
        src_dir: &Utf8Path,
    ) -> Result<SubstitutionArtifact, DiagnosticError> {
        let lines = record.get_lines(DB_SECTION, LOAD_OPTION);
        if lines.is_empty() {
            return Err(DiagnosticError::EmptyLoad);
        }

        let classified: Vec<String> = SourceKind::ALL
            .into_iter()
            .flat_map(|kind| record.get_list(SRC_SECTION, kind.option()))
            .collect();

        let mut blocks = Vec::with_capacity(lines.len());
        let mut staged: Vec<GeneratedFile> = Vec::new();

        for line in &lines {
            let directive = LoadDirective::parse(line)?;
            if !classified.contains(&directive.file) {
                return Err(DiagnosticError::LoadFileNotFound(directive.file));
            }

            let relative = Utf8Path::new(DB_STAGING_DIR).join(&directive.file);
            if !staged.iter().any(|file| file.relative == relative) {
                let source = src_dir.join(&directive.file);
                let contents = fs::read(&source).map_err(|e| DiagnosticError::io(&source, &e))?;
                staged.push(GeneratedFile::new(relative, contents, MODE_DEFAULT));
            }

            blocks.push(directive.render());
        }

        let substitution = GeneratedFile::new(
            Utf8Path::new(DB_STAGING_DIR).join(SubstitutionArtifact::file_name(unit)),
            blocks.join("\n"),
            MODE_READ_ONLY,
        );

        tracing::debug!(
            "Compiled {} load directive(s) for {}, staging {} file(s)",
            lines.len(),
            unit,
            staged.len()
        );

        Ok(SubstitutionArtifact {
            substitution,
            staged,
        })
    }
}
