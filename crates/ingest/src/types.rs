use std::io;
use std::path::PathBuf;

use cburn_core::SessionStats;

/// A session log file found during directory scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Decoded display name, e.g. "gitlore".
    pub project: String,
    /// Raw encoded directory name.
    pub project_dir: String,
    /// For subagents: `<parent>/<agent-file-stem>` to avoid collisions.
    pub session_id: String,
    pub is_subagent: bool,
    pub parent_session: Option<String>,
}

/// Output of parsing one file: the session plus soft-error bookkeeping.
#[derive(Debug, Clone)]
pub struct FileStats {
    pub stats: SessionStats,
    pub parse_errors: usize,
}

/// Output of the full load pipeline.
#[derive(Debug, Default)]
pub struct LoadResult {
    pub sessions: Vec<SessionStats>,
    pub total_files: usize,
    pub parsed_files: usize,
    pub parse_errors: usize,
    pub file_errors: usize,
    pub project_count: usize,
}

/// [`LoadResult`] extended with cache diff counters.
#[derive(Debug, Default)]
pub struct CachedLoadResult {
    pub sessions: Vec<SessionStats>,
    pub total_files: usize,
    pub parsed_files: usize,
    pub parse_errors: usize,
    pub file_errors: usize,
    pub project_count: usize,
    pub cache_hits: usize,
    pub reparsed: usize,
}

/// Progress callback fired from worker threads after each file.
/// Receives (files done, total files); implementations must be cheap and
/// may drop intermediate updates.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Sync);

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("scanning {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, IngestError>;
