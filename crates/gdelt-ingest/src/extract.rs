//! Archive extraction and the scratch working directory
//!
//! Every archive entry name is resolved against the extraction root before
//! anything is written. An entry that is absolute or climbs out of the root
//! through `..` fails the whole archive with
//! [`GdeltError::UnsafeArchivePath`], so a hostile archive writes nothing.

use gdelt_common::{GdeltError, Result};
use std::collections::HashSet;
use std::io::{Cursor, Read, Seek};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Resolve an archive entry name beneath `root`
///
/// Resolution is lexical: `.` is ignored and `..` pops a previously pushed
/// component. Returns `UnsafeArchivePath` when the name is absolute or would
/// step above `root`.
pub fn resolve_entry_path(root: &Path, entry_name: &str) -> Result<PathBuf> {
    let unsafe_path = || GdeltError::UnsafeArchivePath {
        entry: entry_name.to_string(),
        root: root.to_path_buf(),
    };

    let mut relative = PathBuf::new();
    for component in Path::new(entry_name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {},
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(unsafe_path());
                }
            },
            Component::RootDir | Component::Prefix(_) => return Err(unsafe_path()),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(unsafe_path());
    }

    let resolved = root.join(&relative);
    if !resolved.starts_with(root) {
        return Err(unsafe_path());
    }
    Ok(resolved)
}

/// Extract a ZIP archive held in memory into `dest`
///
/// Returns the paths of the regular files written.
pub fn extract_zip_to(data: &[u8], dest: &Path) -> Result<Vec<PathBuf>> {
    extract_zip_reader(Cursor::new(data), dest)
}

/// Extract a ZIP archive from any seekable reader into `dest`
pub fn extract_zip_reader<R: Read + Seek>(reader: R, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| GdeltError::Archive(format!("Failed to read zip archive: {}", e)))?;

    std::fs::create_dir_all(dest)?;

    // Validate all names first; nothing is written for a rejected archive.
    let mut targets = Vec::with_capacity(archive.len());
    let mut seen = HashSet::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| GdeltError::Archive(format!("Failed to read zip entry {}: {}", i, e)))?;
        let target = resolve_entry_path(dest, entry.name())?;
        if !entry.is_dir() && !seen.insert(target.clone()) {
            return Err(GdeltError::Archive(format!(
                "Zip entry {:?} duplicates an earlier file at {}",
                entry.name(),
                target.display()
            )));
        }
        targets.push((target, entry.is_dir()));
    }

    let mut written = Vec::new();
    for (i, (target, is_dir)) in targets.into_iter().enumerate() {
        if is_dir {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        let mut entry = archive
            .by_index(i)
            .map_err(|e| GdeltError::Archive(format!("Failed to open zip entry {}: {}", i, e)))?;

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        let bytes = std::io::copy(&mut entry, &mut out)?;
        debug!("Extracted {} ({} bytes)", target.display(), bytes);
        written.push(target);
    }

    Ok(written)
}

/// Scratch directory owned by one pipeline run
///
/// Holds exactly the extracted files of the batch being processed.
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    root: PathBuf,
}

impl WorkingDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory and remove any residue from an earlier run
    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        self.clear()
    }

    /// Remove everything inside the directory, keeping the directory itself
    pub fn clear(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }

        if removed > 0 {
            debug!("Cleared {} entries from {}", removed, self.root.display());
        }
        Ok(())
    }

    /// Clear without failing; used on error paths where the original error wins
    pub fn clear_quietly(&self) {
        if let Err(e) = self.clear() {
            warn!("Failed to clear working directory {}: {}", self.root.display(), e);
        }
    }

    /// All regular files beneath the directory, sorted by path
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }

        files.sort();
        Ok(files)
    }
}
