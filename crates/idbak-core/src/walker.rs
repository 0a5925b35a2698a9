use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::Result;

use crate::logger::{Logger, SkipReason};

/// Expands include roots into the regular files below them.
///
/// The walk keeps a LIFO work list, so the emission order is unspecified.
/// Paths are canonicalized before they are compared against the excludes,
/// and a path is excluded when it equals an exclude or lies below one
/// (component-wise, so `/a/b` does not exclude `/a/bc`).
///
/// Every canonical directory is expanded at most once and every canonical
/// file is emitted at most once, so symlink loops and overlapping includes
/// neither hang the walk nor upload a file twice.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    includes: Vec<PathBuf>,
    excludes: Vec<PathBuf>,
}

impl TreeWalker {
    pub fn new(includes: &[PathBuf], excludes: &[PathBuf]) -> Self {
        let excludes = excludes
            .iter()
            .map(|exclude| fs::canonicalize(exclude).unwrap_or_else(|_| exclude.clone()))
            .collect();
        Self {
            includes: includes.to_vec(),
            excludes,
        }
    }

    pub fn excluded_by(&self, path: &Path) -> Option<&Path> {
        self.excludes
            .iter()
            .find(|exclude| path.starts_with(exclude))
            .map(PathBuf::as_path)
    }

    /// Invoke `visit` once for every regular file reachable from the
    /// includes. Unusable paths are reported to `logger` and skipped; only an
    /// error returned by `visit` ends the walk early.
    pub fn walk<F>(&self, logger: &dyn Logger, mut visit: F) -> Result<()>
    where
        F: FnMut(PathBuf) -> Result<()>,
    {
        let mut paths = self.includes.clone();
        let mut expanded = HashSet::new();
        let mut emitted = HashSet::new();

        while let Some(path) = paths.pop() {
            let path = match path.canonicalize() {
                Ok(path) => path,
                Err(err) => {
                    logger.skipped(&path, &SkipReason::BrokenLink(err));
                    continue;
                }
            };

            if let Some(exclude) = self.excluded_by(&path) {
                logger.skipped(&path, &SkipReason::Excluded(exclude.to_path_buf()));
                continue;
            }

            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(_) => {
                    logger.skipped(&path, &SkipReason::NotFileOrDirectory);
                    continue;
                }
            };

            if metadata.is_file() {
                if !emitted.insert(path.clone()) {
                    logger.skipped(&path, &SkipReason::AlreadyVisited);
                    continue;
                }
                visit(path)?;
            } else if metadata.is_dir() {
                if !expanded.insert(path.clone()) {
                    logger.skipped(&path, &SkipReason::AlreadyVisited);
                    continue;
                }
                let dir = match fs::read_dir(&path) {
                    Ok(dir) => dir,
                    Err(err) => {
                        logger.skipped(&path, &SkipReason::Vanished(err));
                        continue;
                    }
                };

                for entry in dir {
                    match entry {
                        Ok(entry) => paths.push(entry.path()),
                        Err(err) => logger.skipped(&path, &SkipReason::UnreadableEntry(err)),
                    }
                }
            } else {
                logger.skipped(&path, &SkipReason::NotFileOrDirectory);
            }
        }

        Ok(())
    }

    /// Collect every emitted file.
    pub fn collect(&self, logger: &dyn Logger) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        self.walk(logger, |path| {
            files.push(path);
            Ok(())
        })?;
        Ok(files)
    }
}
