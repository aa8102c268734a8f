mod support;

use cburn_core::SessionStats;
use support::{make_session, setup_cache, stamp};

#[test]
fn save_and_reload_round_trips() {
    let mut test = setup_cache();
    let session = make_session("s1", "demo", "/tmp/claude/projects/x/s1.jsonl");
    test.cache
        .save_session(&session, stamp(1234, 5678))
        .expect("save");

    let loaded = test.cache.load_all_sessions().expect("load");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0], session);
}

#[test]
fn resave_replaces_model_rollups() {
    let mut test = setup_cache();
    let mut session = make_session("s1", "demo", "/tmp/claude/projects/x/s1.jsonl");
    test.cache
        .save_session(&session, stamp(1, 10))
        .expect("save");

    session.models.remove("claude-haiku-4-5");
    session.api_calls = 3;
    test.cache
        .save_session(&session, stamp(2, 20))
        .expect("resave");

    let loaded = test.cache.load_all_sessions().expect("load");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].models.len(), 1);
    assert_eq!(loaded[0].api_calls, 3);

    let tracked = test.cache.tracked_files().expect("tracked");
    let entry = &tracked["/tmp/claude/projects/x/s1.jsonl"];
    assert_eq!(entry.mtime_ns, 2);
    assert_eq!(entry.size_bytes, 20);
}

#[test]
fn session_without_rollups_loads_empty_map() {
    let mut test = setup_cache();
    let mut session = make_session("s1", "demo", "/tmp/f.jsonl");
    session.models.clear();
    test.cache
        .save_session(&session, stamp(1, 1))
        .expect("save");

    let loaded = test.cache.load_all_sessions().expect("load");
    assert!(loaded[0].models.is_empty());
}

#[test]
fn zero_times_round_trip_as_absent() {
    let mut test = setup_cache();
    let mut session = make_session("s1", "demo", "/tmp/f.jsonl");
    session.start_time = None;
    session.end_time = None;
    test.cache
        .save_session(&session, stamp(1, 1))
        .expect("save");

    let loaded = test.cache.load_all_sessions().expect("load");
    assert_eq!(loaded[0].start_time, None);
    assert_eq!(loaded[0].end_time, None);
}

#[test]
fn delete_session_cascades_rollups() {
    let mut test = setup_cache();
    let session = make_session("s1", "demo", "/tmp/f.jsonl");
    test.cache
        .save_session(&session, stamp(1, 1))
        .expect("save");
    assert_eq!(test.cache.session_count().expect("count"), 1);

    test.cache.delete_session("s1").expect("delete");
    assert_eq!(test.cache.session_count().expect("count"), 0);

    // A fresh save of the same id must not resurrect old rollups.
    let mut fresh = make_session("s1", "demo", "/tmp/f.jsonl");
    fresh.models.clear();
    test.cache.save_session(&fresh, stamp(2, 2)).expect("save");
    let loaded = test.cache.load_all_sessions().expect("load");
    assert!(loaded[0].models.is_empty());
}

#[test]
fn delete_file_tracker_forgets_path() {
    let mut test = setup_cache();
    let session = make_session("s1", "demo", "/tmp/f.jsonl");
    test.cache
        .save_session(&session, stamp(1, 1))
        .expect("save");

    test.cache.delete_file_tracker("/tmp/f.jsonl").expect("delete");
    assert!(test.cache.tracked_files().expect("tracked").is_empty());
}

#[test]
fn subagent_fields_round_trip() {
    let mut test = setup_cache();
    let mut session = make_session("p1/agent-x", "demo", "/tmp/agent-x.jsonl");
    session.is_subagent = true;
    session.parent_session = Some("p1".to_string());
    test.cache
        .save_session(&session, stamp(1, 1))
        .expect("save");

    let loaded: Vec<SessionStats> = test.cache.load_all_sessions().expect("load");
    assert!(loaded[0].is_subagent);
    assert_eq!(loaded[0].parent_session.as_deref(), Some("p1"));
}
