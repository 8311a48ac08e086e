//! Directory job source: turns matching files under a root into jobs.

use std::path::{Path, PathBuf};

use offload_dispatch::JobSpec;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::error::WorkloadError;

#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Lower-case extensions without the dot. Empty matches every file.
    pub extensions: Vec<String>,
    pub max_depth: Option<usize>,
    pub follow_links: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            max_depth: None,
            follow_links: true,
        }
    }
}

impl SourceOptions {
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    fn matches(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|want| e.eq_ignore_ascii_case(want)))
            .unwrap_or(false)
    }
}

/// Build one job per matching file under `root`, ordered by path.
///
/// Files that cannot be read still produce a job, with an unreadable payload,
/// so the failure shows up in the batch outcome. Entries the walk itself
/// cannot descend into are skipped with a warning.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn collect_jobs(root: &Path, options: &SourceOptions) -> Result<Vec<JobSpec>, WorkloadError> {
    if !root.is_dir() {
        return Err(WorkloadError::NotADirectory(root.to_path_buf()));
    }

    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name();
    if let Some(depth) = options.max_depth {
        walker = walker.max_depth(depth);
    }

    let mut jobs = Vec::new();
    let mut unreadable = 0usize;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !options.matches(path) {
            continue;
        }

        let label = relative_label(root, path);
        let size_hint = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let spec = match std::fs::read(path) {
            Ok(bytes) => JobSpec::new(label, bytes),
            Err(e) => {
                unreadable += 1;
                debug!(path = %path.display(), error = %e, "file unreadable");
                JobSpec::unreadable(label, size_hint, e.to_string())
            }
        };
        jobs.push(spec.with_metadata("path", path.display().to_string()));
    }

    info!(jobs = jobs.len(), unreadable, "collected jobs");
    Ok(jobs)
}

/// Path relative to `root` with forward slashes.
fn relative_label(root: &Path, path: &Path) -> String {
    let rel: PathBuf = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    rel.to_string_lossy().replace('\\', "/")
}
