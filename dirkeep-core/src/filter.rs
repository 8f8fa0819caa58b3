use crate::config::{DaemonConfig, Pattern};
use crate::error::ConfigError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Runtime filter compiled from include / exclude pattern lists.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
    /// Exact files (and their `-journal`/`-wal`/`-shm` siblings) that are never backed up.
    ignored: Vec<PathBuf>,
}

impl PathFilter {
    /// Build a filter from lists. Empty include list means "include all".
    pub fn new(include: &[Pattern], exclude: &[Pattern]) -> Result<Self, ConfigError> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
            ignored: Vec::new(),
        })
    }

    /// The daemon's filter: configured globs plus the durable store file, resolved to the
    /// absolute path the watcher reports.
    pub fn for_config(cfg: &DaemonConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(&cfg.include, &cfg.exclude)?.ignore_file(absolute_store_path(&cfg.store_path)))
    }

    /// A filter that lets everything through.
    pub fn allow_all() -> Self {
        Self {
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
            ignored: Vec::new(),
        }
    }

    pub fn ignore_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ignored.push(path.into());
        self
    }

    /// Determine whether a given path should be backed up.
    pub fn check<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        if self.ignored.iter().any(|ignored| is_same_or_sidecar(path, ignored)) {
            return false;
        }
        let included = self.include.is_empty() || self.include.is_match(path);
        let excluded = self.exclude.is_match(path);
        included && !excluded
    }
}

fn compile(patterns: &[Pattern]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(&pat.0).map_err(|source| ConfigError::Pattern {
            pattern: pat.0.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ConfigError::Pattern {
        pattern: patterns
            .iter()
            .map(|p| p.0.as_str())
            .collect::<Vec<_>>()
            .join(","),
        source,
    })
}

/// Resolve the store file against its canonical parent so it matches watcher paths.
fn absolute_store_path(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match (std::fs::canonicalize(&parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

fn is_same_or_sidecar(path: &Path, ignored: &Path) -> bool {
    if path == ignored {
        return true;
    }
    if path.parent() != ignored.parent() {
        return false;
    }
    let (Some(name), Some(base)) = (path.file_name(), ignored.file_name()) else {
        return false;
    };
    ["-journal", "-wal", "-shm"].iter().any(|suffix| {
        let mut sidecar = OsString::from(base);
        sidecar.push(suffix);
        name == sidecar
    })
}
