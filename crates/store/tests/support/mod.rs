#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use cburn_core::{ModelUsage, SessionStats};
use cburn_store::{Cache, FileStamp};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

pub struct TestCache {
    pub _dir: TempDir,
    pub cache: Cache,
    pub path: PathBuf,
}

pub fn setup_cache() -> TestCache {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("metrics.db");
    let cache = Cache::open(&path).expect("open cache");
    TestCache {
        _dir: dir,
        cache,
        path,
    }
}

pub fn make_session(id: &str, project: &str, file_path: &str) -> SessionStats {
    let mut models = HashMap::new();
    models.insert(
        "claude-sonnet-4-5".to_string(),
        ModelUsage {
            api_calls: 3,
            input_tokens: 120,
            output_tokens: 480,
            cache_creation_5m_tokens: 1000,
            cache_creation_1h_tokens: 0,
            cache_read_tokens: 9000,
            estimated_cost: 0.42,
        },
    );
    models.insert(
        "claude-haiku-4-5".to_string(),
        ModelUsage {
            api_calls: 1,
            input_tokens: 30,
            output_tokens: 20,
            cache_creation_5m_tokens: 0,
            cache_creation_1h_tokens: 0,
            cache_read_tokens: 0,
            estimated_cost: 0.01,
        },
    );
    SessionStats {
        session_id: id.to_string(),
        project: project.to_string(),
        project_path: "/home/user/projects/demo".to_string(),
        file_path: file_path.to_string(),
        is_subagent: false,
        parent_session: None,
        start_time: Some(Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap()),
        end_time: Some(Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()),
        duration_secs: 1800,
        user_messages: 7,
        api_calls: 4,
        input_tokens: 150,
        output_tokens: 500,
        cache_creation_5m_tokens: 1000,
        cache_creation_1h_tokens: 0,
        cache_read_tokens: 9000,
        models,
        estimated_cost: 0.43,
        cache_hit_rate: 0.886,
    }
}

pub fn stamp(mtime_ns: i64, size_bytes: i64) -> FileStamp {
    FileStamp {
        mtime_ns,
        size_bytes,
    }
}
