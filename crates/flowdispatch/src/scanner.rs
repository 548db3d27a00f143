use crate::fingerprint::fingerprint_file;
use crate::queue::WorkQueue;
use flowcore::{DispatchError, FileStatus, Library};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub discovered: usize,
    pub added: usize,
    pub duplicates: usize,
}

/// Discovers files under library paths and queues the new ones
#[derive(Debug, Default, Clone)]
pub struct Scanner {
    /// File names matching this are skipped.
    ignore: Option<Regex>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignoring(mut self, pattern: Regex) -> Self {
        self.ignore = Some(pattern);
        self
    }

    fn list(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %root.display(), "scan error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if self.ignore.as_ref().is_some_and(|re| re.is_match(&name)) {
                continue;
            }
            files.push(entry.into_path());
        }
        files
    }

    pub async fn scan(&self, queue: &WorkQueue, library: &Library) -> Result<ScanSummary, DispatchError> {
        let mut summary = ScanSummary::default();
        if !library.enabled {
            debug!(library = %library.name, "library disabled, not scanning");
            return Ok(summary);
        }

        let root = PathBuf::from(&library.path);
        let scanner = self.clone();
        let files = tokio::task::spawn_blocking(move || scanner.list(&root))
            .await
            .map_err(|e| DispatchError::Store(format!("scan task failed: {}", e)))?;

        for path in files {
            summary.discovered += 1;
            let name = path.to_string_lossy().into_owned();
            if queue.store().find_by_path(library.uid, &name).await?.is_some() {
                continue;
            }
            let fingerprint = match fingerprint_file(&path).await {
                Ok(fingerprint) => Some(fingerprint),
                Err(e) => {
                    warn!(file = %name, "could not fingerprint: {}", e);
                    None
                }
            };
            let file = queue.add_file(library.uid, &name, fingerprint).await?;
            summary.added += 1;
            if file.status == FileStatus::Duplicate {
                summary.duplicates += 1;
            }
        }

        if summary.added > 0 {
            info!(library = %library.name, added = summary.added, duplicates = summary.duplicates, "Library scan complete");
        }
        Ok(summary)
    }
}
