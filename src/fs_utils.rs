//! Filesystem helpers for staging, copying and comparing unit trees.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use walkdir::WalkDir;

/// Write a file with specific Unix permissions, creating parent directories as needed.
///
/// An existing file is removed first so read-only leftovers do not block the write.
pub fn write_file_mode(path: &Utf8Path, content: impl AsRef<[u8]>, mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.is_file() {
        fs::remove_file(path)?;
    }
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Remove a file or directory tree. Absent paths are fine.
pub fn remove_path(path: &Utf8Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Copy the tree under `src` into `dst`, creating `dst`. A missing `src` yields an
/// empty `dst`.
pub fn copy_tree(src: &Utf8Path, dst: &Utf8Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    if !src.is_dir() {
        return Ok(());
    }

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = Utf8PathBuf::try_from(entry.path().to_path_buf())
            .map_err(|err| err.into_io_error())?;
        let relative = path
            .strip_prefix(src)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if target.is_file() {
                fs::remove_file(&target)?;
            }
            fs::copy(&path, &target)?;
        }
    }

    Ok(())
}

/// Relative paths of every regular file under `root`, sorted. Missing root is empty.
pub fn tree_files(root: &Utf8Path) -> io::Result<BTreeSet<Utf8PathBuf>> {
    let mut files = BTreeSet::new();
    if !root.is_dir() {
        return Ok(files);
    }

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8PathBuf::try_from(entry.path().to_path_buf())
            .map_err(|err| err.into_io_error())?;
        if let Ok(relative) = path.strip_prefix(root) {
            files.insert(relative.to_path_buf());
        }
    }

    Ok(files)
}

/// Byte comparison. Two missing files are equal; one missing file is not.
pub fn files_equal(a: &Utf8Path, b: &Utf8Path) -> io::Result<bool> {
    match (a.is_file(), b.is_file()) {
        (false, false) => Ok(true),
        (true, true) => Ok(fs::read(a)? == fs::read(b)?),
        _ => Ok(false),
    }
}

/// Same file set with the same bytes under both roots.
pub fn trees_equal(a: &Utf8Path, b: &Utf8Path) -> io::Result<bool> {
    let a_files = tree_files(a)?;
    if a_files != tree_files(b)? {
        return Ok(false);
    }

    for relative in &a_files {
        if fs::read(a.join(relative))? != fs::read(b.join(relative))? {
            return Ok(false);
        }
    }

    Ok(true)
}
