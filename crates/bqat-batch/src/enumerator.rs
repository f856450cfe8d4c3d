//! Input discovery
//!
//! Walks an input root and yields sample files whose name matches
//! `<pattern>.<ext>` for every accepted extension, in both lower and upper
//! case spellings. Hidden entries are skipped, as a shell `**/` glob would.

use bqat_common::{BqatError, Modality, Result};
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::scan::{Conversion, DirectoryTask, ScanTask};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Finds candidate sample files below a root directory
#[derive(Debug, Clone)]
pub struct PathEnumerator {
    root: PathBuf,
    /// One compiled `<pattern>.<ext>` glob per extension spelling
    patterns: Vec<Pattern>,
}

impl PathEnumerator {
    /// Fails with [`BqatError::InputNotFound`] when `root` does not exist.
    pub fn new(root: impl AsRef<Path>, pattern: &str, extensions: &[String]) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(BqatError::InputNotFound(root.to_path_buf()));
        }
        let root = std::path::absolute(root)?;

        let pattern = if pattern.trim().is_empty() {
            "*"
        } else {
            pattern.trim()
        };

        let patterns = extension_spellings(extensions)
            .iter()
            .map(|ext| {
                Pattern::new(&format!("{pattern}.{ext}")).map_err(|e| {
                    BqatError::config(format!("Invalid filename pattern '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(root = %root.display(), patterns = patterns.len(), "Input enumerator ready");

        Ok(Self { root, patterns })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the root, one pass per extension spelling.
    ///
    /// Re-invoke to restart; the sequence is not cached.
    pub fn paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.patterns.iter().flat_map(move |pattern| {
            walk_files(&self.root, None).filter(move |path| matches_name(pattern, path))
        })
    }

    /// Natural number of matching files, ignoring any limit
    pub fn count(&self) -> usize {
        self.paths().count()
    }

    /// Scan tasks for the matching files, capped at `limit` when given
    pub fn tasks(
        &self,
        modality: Modality,
        conversion: &Conversion,
        limit: Option<usize>,
    ) -> impl Iterator<Item = ScanTask> + '_ {
        let conversion = conversion.clone();
        self.paths()
            .take(limit.filter(|l| *l > 0).unwrap_or(usize::MAX))
            .map(move |path| ScanTask {
                path,
                modality,
                conversion: conversion.clone(),
            })
    }

    /// Every directory (root included) that directly holds a matching file.
    ///
    /// With a `limit`, directories are taken until their files reach it; the
    /// directory that crosses the limit is still included whole.
    pub fn qualifying_directories(
        &self,
        modality: Modality,
        limit: Option<usize>,
    ) -> Vec<DirectoryTask> {
        let limit = limit.filter(|l| *l > 0).map(|l| l as u64);
        let mut tasks = Vec::new();
        let mut files = 0;

        let dirs = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir());

        for dir in dirs {
            if limit.is_some_and(|limit| files >= limit) {
                break;
            }
            let file_count = self.direct_matches(dir.path());
            if file_count > 0 {
                tasks.push(DirectoryTask {
                    dir: dir.path().to_path_buf(),
                    modality,
                    file_count,
                });
                files += file_count;
            }
        }

        tasks
    }

    /// Matching files directly inside `dir`, not recursive
    pub fn direct_matches(&self, dir: &Path) -> u64 {
        self.patterns
            .iter()
            .map(|pattern| {
                walk_files(dir, Some(1))
                    .filter(|path| matches_name(pattern, path))
                    .count() as u64
            })
            .sum()
    }
}

/// Lower and upper case spelling of every extension, first-seen order
pub fn extension_spellings(extensions: &[String]) -> Vec<String> {
    let mut spellings: Vec<String> = Vec::with_capacity(extensions.len() * 2);
    let lower = extensions.iter().map(|e| e.to_lowercase());
    let upper = extensions.iter().map(|e| e.to_uppercase());
    for ext in lower.chain(upper) {
        if !spellings.contains(&ext) {
            spellings.push(ext);
        }
    }
    spellings
}

fn walk_files(root: &Path, max_depth: Option<usize>) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .max_depth(max_depth.unwrap_or(usize::MAX))
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn matches_name(pattern: &Pattern, path: &Path) -> bool {
    path.file_name()
        .map(|name| pattern.matches_with(&name.to_string_lossy(), MATCH_OPTIONS))
        .unwrap_or(false)
}
