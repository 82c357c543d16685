//! Locating expected files on disk
//!
//! A [`Locator`] tries an ordered list of glob candidates and returns the
//! first existing match; the order encodes preference (a staging Wine build
//! before a stable one, say). When every candidate misses it falls back to a
//! bounded recursive search by file name. Nothing is cached: installation
//! steps between two calls may have changed the filesystem.

use crate::error::{InstallerError, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Bounded recursive search used when no candidate matches
#[derive(Debug, Clone)]
pub struct FallbackSearch {
    pub root: PathBuf,
    /// Glob matched against file names only
    pub file_pattern: String,
    pub max_depth: usize,
}

/// Ordered candidate search with an optional fallback
#[derive(Debug, Clone, Default)]
pub struct Locator {
    what: String,
    candidates: Vec<String>,
    fallback: Option<FallbackSearch>,
}

impl Locator {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            ..Default::default()
        }
    }

    /// Add a raw glob pattern
    pub fn candidate(mut self, pattern: impl Into<String>) -> Self {
        self.candidates.push(pattern.into());
        self
    }

    /// Add a glob pattern relative to `root`; `root` itself is matched literally
    pub fn candidate_in(self, root: &Path, relative: &str) -> Self {
        let root = Pattern::escape(&root.to_string_lossy());
        let pattern = format!("{}/{}", root.trim_end_matches('/'), relative);
        self.candidate(pattern)
    }

    pub fn fallback(
        mut self,
        root: &Path,
        file_pattern: impl Into<String>,
        max_depth: usize,
    ) -> Self {
        self.fallback = Some(FallbackSearch {
            root: root.to_path_buf(),
            file_pattern: file_pattern.into(),
            max_depth,
        });
        self
    }

    /// First existing match, or `NotFound`
    pub fn locate(&self) -> Result<PathBuf> {
        for pattern in &self.candidates {
            match glob::glob(pattern) {
                Ok(paths) => {
                    if let Some(found) = paths.filter_map(|p| p.ok()).next() {
                        debug!("Found {} at {:?}", self.what, found);
                        return Ok(found);
                    }
                }
                Err(e) => debug!("Skipping bad pattern {}: {}", pattern, e),
            }
        }

        if let Some(ref fallback) = self.fallback {
            if let Some(found) = search(fallback) {
                debug!("Found {} by searching {:?}: {:?}", self.what, fallback.root, found);
                return Ok(found);
            }
        }

        Err(InstallerError::NotFound(self.what.clone()))
    }

    pub fn exists(&self) -> bool {
        self.locate().is_ok()
    }

    /// Every match of the first candidate that matches anything, or every
    /// fallback match when no candidate does
    pub fn locate_all(&self) -> Vec<PathBuf> {
        for pattern in &self.candidates {
            match glob::glob(pattern) {
                Ok(paths) => {
                    let found: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
                    if !found.is_empty() {
                        debug!("Found {} {} candidate(s) for {}", found.len(), self.what, pattern);
                        return found;
                    }
                }
                Err(e) => debug!("Skipping bad pattern {}: {}", pattern, e),
            }
        }

        match self.fallback {
            Some(ref fallback) => search_all(fallback),
            None => Vec::new(),
        }
    }
}

fn search(fallback: &FallbackSearch) -> Option<PathBuf> {
    let pattern = Pattern::new(&fallback.file_pattern).ok()?;
    if !fallback.root.exists() {
        return None;
    }
    WalkDir::new(&fallback.root)
        .max_depth(fallback.max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|entry| {
            entry
                .file_name()
                .to_str()
                .map_or(false, |name| pattern.matches(name))
        })
        .map(|entry| entry.into_path())
}

fn search_all(fallback: &FallbackSearch) -> Vec<PathBuf> {
    let Ok(pattern) = Pattern::new(&fallback.file_pattern) else {
        return Vec::new();
    };
    if !fallback.root.exists() {
        return Vec::new();
    }
    WalkDir::new(&fallback.root)
        .max_depth(fallback.max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map_or(false, |name| pattern.matches(name))
        })
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn first_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("opt/wine-staging/bin/wine"));
        touch(&dir.path().join("usr/bin/wine"));

        let found = Locator::new("wine")
            .candidate_in(dir.path(), "opt/wine-staging/bin/wine")
            .candidate_in(dir.path(), "usr/bin/wine")
            .locate()
            .unwrap();
        assert_eq!(found, dir.path().join("opt/wine-staging/bin/wine"));
    }

    #[test]
    fn later_candidate_used_when_earlier_missing() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("usr/bin/wine"));

        let found = Locator::new("wine")
            .candidate_in(dir.path(), "opt/wine-staging/bin/wine")
            .candidate_in(dir.path(), "usr/bin/wine")
            .locate()
            .unwrap();
        assert_eq!(found, dir.path().join("usr/bin/wine"));
    }

    #[test]
    fn glob_candidates_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Live 11 Suite/Program/Ableton Live 11 Suite.exe"));
        touch(&dir.path().join("Live 12 Suite/Program/Ableton Live 12 Suite.exe"));

        let locator = Locator::new("Ableton Live")
            .candidate_in(dir.path(), "Live */Program/Ableton Live *.exe");
        let first = locator.locate().unwrap();
        let second = locator.locate().unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with(dir.path()));
    }

    #[test]
    fn locate_all_returns_every_match_of_the_first_hit() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Live 11 Suite/Program/Ableton Live 11 Suite.exe"));
        touch(&dir.path().join("Live 12 Suite/Program/Ableton Live 12 Suite.exe"));
        touch(&dir.path().join("other/Ableton Live 10 Lite.exe"));

        let all = Locator::new("Ableton Live")
            .candidate_in(dir.path(), "Live */Program/Ableton Live *.exe")
            .fallback(dir.path(), "Ableton Live *.exe", 4)
            .locate_all();
        assert_eq!(all.len(), 2);

        let searched = Locator::new("Ableton Live")
            .candidate_in(dir.path(), "missing/*.exe")
            .fallback(dir.path(), "Ableton Live *.exe", 4)
            .locate_all();
        assert_eq!(searched.len(), 3);
    }

    #[test]
    fn falls_back_to_bounded_search() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a/b/c/windef.h"));

        let found = Locator::new("wine headers")
            .candidate_in(dir.path(), "include/wine/windows/windef.h")
            .fallback(dir.path(), "windef.h", 5)
            .locate()
            .unwrap();
        assert_eq!(found, dir.path().join("a/b/c/windef.h"));

        let too_shallow = Locator::new("wine headers")
            .fallback(dir.path(), "windef.h", 2)
            .locate();
        assert!(matches!(too_shallow, Err(InstallerError::NotFound(_))));
    }

    #[test]
    fn root_with_glob_characters_is_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("prefix [test]");
        touch(&root.join("system.reg"));

        assert!(Locator::new("prefix").candidate_in(&root, "system.reg").exists());
    }

    #[test]
    fn nothing_found_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Locator::new("yabridgectl")
            .candidate_in(dir.path(), "yabridgectl")
            .fallback(&dir.path().join("missing"), "yabridgectl", 3)
            .locate()
            .unwrap_err();
        assert!(matches!(err, InstallerError::NotFound(ref what) if what == "yabridgectl"));
    }
}
