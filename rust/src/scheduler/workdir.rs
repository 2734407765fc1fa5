//! File operations on chain working directories and job archives.
//!
//! `wipe` is destructive. Callers must have verified the dependency files and
//! the chain's free state before calling it.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{PostboxError, Result};
use crate::models::ChainNumber;

pub const CARDS_FILE: &str = "CARDS";
pub const MODEL_FILE: &str = "MODEL";
/// Copy of the predecessor's model the new run warm-starts from.
pub const PREVIOUS_MODEL_FILE: &str = "MODEL_OLD";

/// Files a completed model must provide to seed a new run.
pub const REQUIRED_FILES: [&str; 9] = [
    CARDS_FILE,
    "DATOM",
    "FEDAT",
    "FEDAT_FORMAL",
    "FGRID",
    "FORMAL_CARDS",
    MODEL_FILE,
    "NEWDATOM_INPUT",
    "NEWFORMAL_CARDS_INPUT",
];

/// Top-level chain directory entries not worth archiving.
pub const ARCHIVE_EXCLUDE: [&str; 3] = [PREVIOUS_MODEL_FILE, "next_job", "next_jobz"];

/// Per-chain output logs, as `(stem, extension)`. The toolchain names them
/// `<stem><chain>.<ext>`; archives store them as `<stem>.<ext>`.
pub const OUTPUT_LOGS: [(&str, &str); 5] = [
    ("wrstart", "out"),
    ("wruniq", "out"),
    ("wruniq", "cpr"),
    ("formal", "out"),
    ("formal", "plot"),
];

/// Required files absent from `dir`.
pub fn missing_files(dir: &Path) -> Vec<&'static str> {
    REQUIRED_FILES
        .iter()
        .copied()
        .filter(|name| !dir.join(name).is_file())
        .collect()
}

/// Remove every file and subdirectory inside `dir`, creating it if absent.
pub fn wipe(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| PostboxError::io(dir, e))?;
    let entries = fs::read_dir(dir).map_err(|e| PostboxError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PostboxError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| PostboxError::io(&path, e))?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| PostboxError::io(&path, e))?;
    }
    Ok(())
}

/// Fill a wiped chain directory from a completed model.
///
/// `cards` is written as the new CARDS; the other required files are copied
/// and the model is duplicated as the warm-start model.
pub fn populate(source: &Path, chain_dir: &Path, cards: &str) -> Result<()> {
    let cards_path = chain_dir.join(CARDS_FILE);
    fs::write(&cards_path, cards).map_err(|e| PostboxError::io(&cards_path, e))?;

    for name in REQUIRED_FILES.iter().filter(|n| **n != CARDS_FILE) {
        copy_file(&source.join(name), &chain_dir.join(name))?;
    }
    copy_file(
        &source.join(MODEL_FILE),
        &chain_dir.join(PREVIOUS_MODEL_FILE),
    )
}

/// Archive a finished chain into `dest`.
///
/// Copies the chain directory (minus `ARCHIVE_EXCLUDE`) and then the chain's
/// output logs from `output_root`. Returns the names of logs that were absent.
pub fn archive(
    chain_dir: &Path,
    dest: &Path,
    output_root: &Path,
    chain: ChainNumber,
) -> Result<Vec<String>> {
    fs::create_dir_all(dest).map_err(|e| PostboxError::io(dest, e))?;
    copy_tree(chain_dir, dest, &ARCHIVE_EXCLUDE)?;

    let mut missing = Vec::new();
    for (stem, ext) in OUTPUT_LOGS {
        let source = output_root.join(format!("{}{}.{}", stem, chain, ext));
        if !source.is_file() {
            missing.push(source.display().to_string());
            continue;
        }
        copy_file(&source, &dest.join(format!("{}.{}", stem, ext)))?;
    }
    Ok(missing)
}

fn copy_tree(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    let walker = WalkDir::new(src).follow_links(false).into_iter().filter_entry(|e| {
        let rel = e.path().strip_prefix(src).unwrap_or(e.path());
        rel.as_os_str().is_empty() || !exclude.iter().any(|ex| rel == Path::new(ex))
    });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            PostboxError::io(path, e.into())
        })?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target: PathBuf = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| PostboxError::io(&target, e))?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Copy one entry. Symlinks are recreated as links, never followed.
fn copy_file(from: &Path, to: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(from).map_err(|e| PostboxError::io(from, e))?;
    if !meta.file_type().is_symlink() {
        return fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| PostboxError::io(from, e));
    }

    let link = fs::read_link(from).map_err(|e| PostboxError::io(from, e))?;
    // A leftover from an interrupted archive would make symlink() fail.
    if fs::symlink_metadata(to).is_ok() {
        fs::remove_file(to).map_err(|e| PostboxError::io(to, e))?;
    }
    make_symlink(&link, to).map_err(|e| PostboxError::io(to, e))
}

#[cfg(unix)]
fn make_symlink(link: &Path, to: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(link, to)
}

#[cfg(not(unix))]
fn make_symlink(link: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(link, to).map(|_| ())
}
