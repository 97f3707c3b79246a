//! Codebase walker.
//!
//! Discovers eligible files under a root directory, extracts their chunks,
//! assigns each chunk the next vector id, and inserts it into the chunk
//! store. Traversal is depth-first with entries sorted by file name, so the
//! same tree always yields the same id assignment.
//!
//! The walker assumes it is the only writer for the duration of a walk;
//! [`crate::service::CodeRag`] holds its write lock around every call.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::WalkerConfig;
use crate::error::{RagError, Result};
use crate::extract::extract;
use crate::store::ChunkStore;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Counters for one walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkReport {
    /// Regular files visited (after exclude globs).
    pub files_scanned: usize,
    /// Files whose chunks were written.
    pub files_parsed: usize,
    /// Files ignored because their extension is not accepted.
    pub files_skipped: usize,
    pub chunks_written: usize,
    /// Files that could not be read or extracted.
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct Walker {
    accepted_extensions: Vec<String>,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl Walker {
    pub fn new(config: &WalkerConfig) -> Result<Self> {
        let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        patterns.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            accepted_extensions: config
                .accepted_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            exclude: build_globset(&patterns)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Dotted, lowercased extension of `path` if it is accepted.
    fn accepted_extension(&self, path: &Path) -> Option<String> {
        let ext = format!(
            ".{}",
            path.extension()?.to_string_lossy().to_ascii_lowercase()
        );
        self.accepted_extensions.contains(&ext).then_some(ext)
    }

    /// Regular files under `root` in depth-first, name-sorted order, minus
    /// excluded paths. Unreadable directory entries are logged and skipped.
    fn discover(&self, root: &Path) -> Vec<PathBuf> {
        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if self.exclude.is_match(relative) {
                debug!(path = %path.display(), "excluded");
                continue;
            }
            files.push(path.to_path_buf());
        }
        files
    }

    /// Walk `root` and write every extracted chunk into `store`.
    ///
    /// Extraction failures are counted and the walk continues; a store
    /// failure aborts it.
    pub async fn walk(&self, root: &Path, store: &dyn ChunkStore) -> Result<WalkReport> {
        if !root.is_dir() {
            return Err(RagError::InvalidArgument(format!(
                "codebase root is not a directory: {}",
                root.display()
            )));
        }

        let files = {
            let walker = self.clone();
            let root = root.to_path_buf();
            tokio::task::spawn_blocking(move || walker.discover(&root)).await?
        };

        let mut report = WalkReport::default();

        for path in files {
            report.files_scanned += 1;

            let Some(ext) = self.accepted_extension(&path) else {
                report.files_skipped += 1;
                debug!(path = %path.display(), "extension not accepted");
                continue;
            };

            let file_path = path.to_string_lossy().to_string();

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    report.errors += 1;
                    warn!(path = %file_path, error = %e, "failed to read file");
                    continue;
                }
            };

            let chunks = match extract(&bytes, &ext, &file_path) {
                Ok(chunks) => chunks,
                Err(e) => {
                    report.errors += 1;
                    warn!(path = %file_path, error = %e, "skipping file");
                    continue;
                }
            };

            let count = chunks.len();
            for chunk in chunks {
                let next_id = store.last_vector_id().await? + 1;
                store.insert(&chunk.with_vector_id(next_id)).await?;
            }

            report.files_parsed += 1;
            report.chunks_written += count;
            info!(path = %file_path, chunks = count, "parsed file");
        }

        info!(
            root = %root.display(),
            files = report.files_parsed,
            chunks = report.chunks_written,
            errors = report.errors,
            "walk complete"
        );
        Ok(report)
    }
}

/// Walk `root` with the default excludes, accepting only `accepted_extensions`.
pub async fn walk(
    root: &Path,
    accepted_extensions: &[String],
    store: &dyn ChunkStore,
) -> Result<WalkReport> {
    let config = WalkerConfig {
        root: root.to_path_buf(),
        accepted_extensions: accepted_extensions.to_vec(),
        ..WalkerConfig::default()
    };
    Walker::new(&config)?.walk(root, store).await
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RagError::InvalidArgument(format!("bad glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::InvalidArgument(format!("glob set: {e}")))
}
