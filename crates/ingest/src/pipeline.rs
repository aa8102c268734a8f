use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::UNIX_EPOCH;

use cburn_core::Pricing;
use cburn_store::{Cache, FileStamp};
use rayon::prelude::*;
use tracing::warn;

use crate::parser::parse_file;
use crate::scanner::{count_projects, scan_dir};
use crate::types::{
    CachedLoadResult, DiscoveredFile, FileStats, IngestError, LoadResult, ProgressFn, Result,
};

/// Discovers and parses every session file under `data_dir`, using a bounded
/// worker pool. Soft failures are counted in the result; only a failed scan
/// is fatal.
pub fn load(
    data_dir: &Path,
    include_subagents: bool,
    pricing: &Pricing,
    progress: Option<ProgressFn<'_>>,
) -> Result<LoadResult> {
    let files = scan_dir(data_dir).map_err(|source| IngestError::Scan {
        path: data_dir.to_path_buf(),
        source,
    })?;

    if files.is_empty() {
        return Ok(LoadResult::default());
    }

    let to_process = filter_subagents(&files, include_subagents);

    let mut result = LoadResult {
        total_files: to_process.len(),
        project_count: count_projects(&files),
        ..LoadResult::default()
    };

    if to_process.is_empty() {
        return Ok(result);
    }

    let outcomes = parse_batch(&to_process, pricing, progress, 0, to_process.len());
    for outcome in outcomes {
        match outcome {
            Err(_) => result.file_errors += 1,
            Ok(parsed) => {
                result.parsed_files += 1;
                result.parse_errors += parsed.parse_errors;
                if keep_session(&parsed) {
                    result.sessions.push(parsed.stats);
                }
            }
        }
    }

    Ok(result)
}

/// Discovers files, diffs them against the cache by (mtime_ns, size), loads
/// unchanged sessions from the cache, reparses the rest in parallel, and
/// persists fresh results. Any cache failure degrades to a plain reparse;
/// the load itself never fails because the cache is unavailable.
pub fn load_with_cache(
    data_dir: &Path,
    include_subagents: bool,
    cache: &mut Cache,
    pricing: &Pricing,
    progress: Option<ProgressFn<'_>>,
) -> Result<CachedLoadResult> {
    let files = scan_dir(data_dir).map_err(|source| IngestError::Scan {
        path: data_dir.to_path_buf(),
        source,
    })?;

    if files.is_empty() {
        return Ok(CachedLoadResult::default());
    }

    let to_process = filter_subagents(&files, include_subagents);

    let mut result = CachedLoadResult {
        total_files: to_process.len(),
        project_count: count_projects(&files),
        ..CachedLoadResult::default()
    };

    if to_process.is_empty() {
        return Ok(result);
    }

    let mut degraded = false;
    let tracked = match cache.tracked_files() {
        Ok(tracked) => tracked,
        Err(err) => {
            warn!("metric cache unreadable, reparsing everything: {err}");
            degraded = true;
            Default::default()
        }
    };

    let mut unchanged: HashSet<String> = HashSet::new();
    let mut to_reparse: Vec<DiscoveredFile> = Vec::new();

    for file in to_process {
        let Ok(meta) = fs::metadata(&file.path) else {
            continue;
        };
        let stamp = stamp_from_metadata(&meta);
        let path_key = file.path.to_string_lossy().into_owned();
        match tracked.get(&path_key) {
            Some(cached) if *cached == stamp => {
                unchanged.insert(path_key);
            }
            _ => to_reparse.push(file),
        }
    }

    result.cache_hits = unchanged.len();
    result.reparsed = to_reparse.len();

    let mut cached_sessions = None;
    if !degraded && !tracked.is_empty() {
        match cache.load_all_sessions() {
            Ok(sessions) => cached_sessions = Some(sessions),
            Err(err) => {
                warn!("loading cached sessions failed, reparsing everything: {err}");
                degraded = true;
            }
        }
    }

    if degraded && !unchanged.is_empty() {
        // The cache diff is useless without cached rows: reparse the lot.
        let unchanged_set = unchanged;
        unchanged = HashSet::new();
        for file in filter_subagents(&files, include_subagents) {
            if unchanged_set.contains(&file.path.to_string_lossy().into_owned()) {
                to_reparse.push(file);
            }
        }
        result.cache_hits = 0;
        result.reparsed = to_reparse.len();
    }

    if let Some(cached) = &cached_sessions {
        for session in cached {
            if unchanged.contains(&session.file_path) {
                result.sessions.push(session.clone());
                result.parsed_files += 1;
            }
        }
    }

    if !to_reparse.is_empty() {
        let outcomes = parse_batch(
            &to_reparse,
            pricing,
            progress,
            result.cache_hits,
            result.total_files,
        );
        for (file, outcome) in to_reparse.iter().zip(outcomes) {
            match outcome {
                Err(_) => result.file_errors += 1,
                Ok(parsed) => {
                    result.parsed_files += 1;
                    result.parse_errors += parsed.parse_errors;
                    if keep_session(&parsed) {
                        if !degraded
                            && let Ok(meta) = fs::metadata(&file.path)
                            && let Err(err) =
                                cache.save_session(&parsed.stats, stamp_from_metadata(&meta))
                        {
                            warn!("caching session {} failed: {err}", parsed.stats.session_id);
                        }
                        result.sessions.push(parsed.stats);
                    }
                }
            }
        }
    }

    if !degraded {
        prune_vanished(cache, &files, &tracked, cached_sessions.as_deref());
    }

    Ok(result)
}

/// Drops tracker entries and cached sessions for files that no longer exist
/// on disk.
fn prune_vanished(
    cache: &mut Cache,
    discovered: &[DiscoveredFile],
    tracked: &std::collections::HashMap<String, FileStamp>,
    cached_sessions: Option<&[cburn_core::SessionStats]>,
) {
    let present: HashSet<String> = discovered
        .iter()
        .map(|f| f.path.to_string_lossy().into_owned())
        .collect();
    let vanished: Vec<&String> = tracked.keys().filter(|path| !present.contains(*path)).collect();
    if vanished.is_empty() {
        return;
    }

    if let Some(sessions) = cached_sessions {
        for session in sessions {
            if !present.contains(&session.file_path)
                && let Err(err) = cache.delete_session(&session.session_id)
            {
                warn!("pruning session {} failed: {err}", session.session_id);
            }
        }
    }
    for path in vanished {
        if let Err(err) = cache.delete_file_tracker(path) {
            warn!("pruning tracker for {path} failed: {err}");
        }
    }
}

fn filter_subagents(files: &[DiscoveredFile], include_subagents: bool) -> Vec<DiscoveredFile> {
    files
        .iter()
        .filter(|f| include_subagents || !f.is_subagent)
        .cloned()
        .collect()
}

/// Sessions that produced no calls and no prompts carry no usable signal.
fn keep_session(parsed: &FileStats) -> bool {
    parsed.stats.api_calls > 0 || parsed.stats.user_messages > 0
}

fn stamp_from_metadata(meta: &fs::Metadata) -> FileStamp {
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    FileStamp {
        mtime_ns,
        size_bytes: meta.len() as i64,
    }
}

fn worker_count(files: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cpus.max(4).min(files).max(1)
}

/// Parses a batch on a bounded pool. Each worker writes to its own result
/// slot; the shared counter feeds the progress callback from worker threads.
fn parse_batch(
    files: &[DiscoveredFile],
    pricing: &Pricing,
    progress: Option<ProgressFn<'_>>,
    done_offset: usize,
    total: usize,
) -> Vec<io::Result<FileStats>> {
    let counter = AtomicUsize::new(0);
    let run = || {
        files
            .par_iter()
            .map(|file| {
                let outcome = parse_file(file, pricing);
                let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = progress {
                    cb(done_offset + done, total);
                }
                outcome
            })
            .collect()
    };

    match rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count(files.len()))
        .build()
    {
        Ok(pool) => pool.install(run),
        Err(_) => run(),
    }
}
