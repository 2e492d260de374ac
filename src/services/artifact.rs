use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

/// Mode for generated and staged plain files.
pub const MODE_DEFAULT: u32 = 0o644;
/// Mode for the substitution artifact.
pub const MODE_READ_ONLY: u32 = 0o444;
/// Mode for the startup script.
pub const MODE_EXECUTABLE: u32 = 0o755;

/// A file to be written under a unit's `project/` tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Path relative to `project/`
    pub relative: Utf8PathBuf,
    pub contents: Vec<u8>,
    pub mode: u32,
}

impl GeneratedFile {
    pub fn new(relative: impl Into<Utf8PathBuf>, contents: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            relative: relative.into(),
            contents: contents.into(),
            mode,
        }
    }
}

/// Ordered set of generated files keyed by destination; a later file for the same
/// destination replaces the earlier one in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    files: IndexMap<Utf8PathBuf, GeneratedFile>,
}

impl Artifacts {
    pub fn insert(&mut self, file: GeneratedFile) {
        self.files.insert(file.relative.clone(), file);
    }

    pub fn extend(&mut self, files: impl IntoIterator<Item = GeneratedFile>) {
        for file in files {
            self.insert(file);
        }
    }

    pub fn get(&self, relative: &Utf8Path) -> Option<&GeneratedFile> {
        self.files.get(relative)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneratedFile> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
