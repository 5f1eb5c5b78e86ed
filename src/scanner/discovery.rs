use std::{
    fs,
    path::{Path, PathBuf},
};

#[cfg(windows)]
use std::os::windows::fs::MetadataExt;

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::naming::{strip_extension, NameCleaner};

/// A directory entry the scanner will try to turn into a game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameCandidate {
    /// Cleaned title used for the metadata lookup.
    pub name: String,
    /// File or folder name as found on disk.
    pub raw_name: String,
    pub full_path: PathBuf,
    pub is_file: bool,
}

pub fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        if p.trim().is_empty() {
            continue;
        }
        // Patterns and paths are both compared with forward slashes
        let norm = p.trim().replace('\\', "/");
        b.add(Glob::new(&norm)?);
    }
    Ok(b.build()?)
}

pub fn matches_excludes(path: &Path, set: &GlobSet) -> bool {
    if set.is_empty() {
        return false;
    }
    let s = path.to_string_lossy().replace('\\', "/");
    set.is_match(&s)
}

fn is_hidden(name: &str, md: &fs::Metadata) -> bool {
    name.starts_with('.') || is_hidden_or_system(md)
}

#[cfg(windows)]
fn is_hidden_or_system(md: &fs::Metadata) -> bool {
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    let attrs = md.file_attributes();
    (attrs & FILE_ATTRIBUTE_HIDDEN) != 0 || (attrs & FILE_ATTRIBUTE_SYSTEM) != 0
}

#[cfg(not(windows))]
fn is_hidden_or_system(_md: &fs::Metadata) -> bool {
    false
}

/// Lists the immediate subfolders of `root`, one candidate each.
///
/// Hidden folders, excluded folders and plain files are skipped. Results are
/// sorted by path so repeated scans process folders in the same order.
pub fn discover_folders(root: &Path, cleaner: &NameCleaner, excludes: &GlobSet) -> std::io::Result<Vec<GameCandidate>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {}: {}", root.display(), e);
                continue;
            }
        };
        let path = entry.path();
        let Ok(md) = entry.metadata() else { continue };
        if !md.is_dir() {
            continue;
        }
        let raw_name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&raw_name, &md) || matches_excludes(&path, excludes) {
            continue;
        }
        out.push(GameCandidate { name: cleaner.clean(&raw_name), raw_name, full_path: path, is_file: false });
    }
    out.sort_by(|a, b| a.full_path.cmp(&b.full_path));
    Ok(out)
}

/// Walks `root` recursively and yields every file whose extension is allowed
/// and not ignored. Extensions are compared lowercase and without the dot.
pub fn discover_files(
    root: &Path,
    allowed: &[String],
    ignored: &[String],
    cleaner: &NameCleaner,
    excludes: &GlobSet,
) -> std::io::Result<Vec<GameCandidate>> {
    if !root.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a directory: {}", root.display()),
        ));
    }

    let mut out = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).min_depth(1).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        let hidden = e.metadata().map(|md| is_hidden(&name, &md)).unwrap_or(false);
        !hidden && !matches_excludes(e.path(), excludes)
    });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Skipping entry during file discovery: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let raw_name = entry.file_name().to_string_lossy().to_string();
        let Some(ext) = Path::new(&raw_name).extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            continue;
        };
        if ignored.iter().any(|i| *i == ext) || !allowed.iter().any(|a| *a == ext) {
            continue;
        }
        let stem = strip_extension(&raw_name, allowed);
        out.push(GameCandidate {
            name: cleaner.clean(stem),
            raw_name: raw_name.clone(),
            full_path: entry.into_path(),
            is_file: true,
        });
    }
    out.sort_by(|a, b| a.full_path.cmp(&b.full_path));
    Ok(out)
}

/// Total size in bytes of a file, or of every file below a directory.
/// Unreadable entries count as zero.
pub fn dir_size(path: &Path) -> u64 {
    match fs::metadata(path) {
        Ok(md) if md.is_file() => md.len(),
        Ok(_) => WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|md| md.len())
            .sum(),
        Err(_) => 0,
    }
}
