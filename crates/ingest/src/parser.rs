use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use chrono::{DateTime, Utc};
use cburn_core::{ApiCall, ModelUsage, Pricing, SessionStats};
use serde::Deserialize;

use crate::types::{DiscoveredFile, FileStats};

// Byte patterns for field extraction.
const TYPE_KEY: &[u8] = b"\"type\"";
const PAT_TURN_DURATION: &[u8] = b"\"turn_duration\"";
const PAT_DURATION_MS: &[u8] = b"\"durationMs\":";
const PAT_TIMESTAMP: [&[u8]; 2] = [b"\"timestamp\":\"", b"\"timestamp\": \""];
const PAT_CWD: [&[u8]; 2] = [b"\"cwd\":\"", b"\"cwd\": \""];

/// The three routed record kinds; every other discriminator is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    User,
    System,
    Assistant,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntry {
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    cwd: String,
    #[serde(rename = "durationMs", default)]
    duration_ms: i64,
    #[serde(default)]
    data: Option<RawProgressData>,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProgressData {
    #[serde(rename = "durationMs", default)]
    duration_ms: i64,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation: Option<RawCacheCreation>,
    #[serde(default)]
    service_tier: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawCacheCreation {
    #[serde(default)]
    ephemeral_5m_input_tokens: u64,
    #[serde(default)]
    ephemeral_1h_input_tokens: u64,
}

/// Reads one session log and produces deduplicated session statistics.
/// Calls are deduplicated by `message.id`, keeping only the last entry per
/// id (the final billed usage after edits and retries).
///
/// Line routing by the top-level `type` discriminator:
///   - `user`      -> byte-level extraction (timestamp, cwd, count)
///   - `system`    -> byte-level extraction (timestamp, cwd, durationMs)
///   - `assistant` -> full JSON parse (token usage, model, costs)
///   - everything else -> skip
pub fn parse_file(df: &DiscoveredFile, pricing: &Pricing) -> io::Result<FileStats> {
    let file = File::open(&df.path)?;
    let mut reader = BufReader::with_capacity(256 * 1024, file);

    let mut calls: HashMap<String, ApiCall> = HashMap::new();
    let mut user_messages: u64 = 0;
    let mut parse_errors: usize = 0;
    let mut total_duration_ms: i64 = 0;
    let mut min_time: Option<DateTime<Utc>> = None;
    let mut max_time: Option<DateTime<Utc>> = None;
    let mut cwd = String::new();

    let mut line = Vec::with_capacity(4096);
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
            line.pop();
        }

        let Some(kind) = extract_top_level_type(&line) else {
            continue;
        };

        match kind {
            RecordKind::User => {
                user_messages += 1;
                if let Some(ts) = extract_timestamp_bytes(&line) {
                    update_time_range(&mut min_time, &mut max_time, ts);
                }
                if cwd.is_empty()
                    && let Some(found) = extract_cwd_bytes(&line)
                {
                    cwd = found;
                }
            }
            RecordKind::System => {
                if let Some(ts) = extract_timestamp_bytes(&line) {
                    update_time_range(&mut min_time, &mut max_time, ts);
                }
                if cwd.is_empty()
                    && let Some(found) = extract_cwd_bytes(&line)
                {
                    cwd = found;
                }
                if contains(&line, PAT_TURN_DURATION)
                    && let Some(ms) = extract_duration_ms(&line)
                {
                    total_duration_ms += ms;
                }
            }
            RecordKind::Assistant => {
                let entry: RawEntry = match serde_json::from_slice(&line) {
                    Ok(entry) => entry,
                    Err(_) => {
                        parse_errors += 1;
                        continue;
                    }
                };

                let ts = parse_rfc3339(&entry.timestamp);
                if let Some(ts) = ts {
                    update_time_range(&mut min_time, &mut max_time, ts);
                }
                if cwd.is_empty() && !entry.cwd.is_empty() {
                    cwd = entry.cwd;
                }
                if entry.duration_ms > 0 {
                    total_duration_ms += entry.duration_ms;
                } else if let Some(data) = &entry.data
                    && data.duration_ms > 0
                {
                    total_duration_ms += data.duration_ms;
                }

                let Some(msg) = entry.message else { continue };
                if msg.id.is_empty() {
                    continue;
                }
                let Some(usage) = msg.usage else { continue };

                // Prefer the nested TTL breakdown; the legacy scalar counts
                // as 5-minute creation only.
                let (cache_5m, cache_1h) = match &usage.cache_creation {
                    Some(cc) => (cc.ephemeral_5m_input_tokens, cc.ephemeral_1h_input_tokens),
                    None => (usage.cache_creation_input_tokens, 0),
                };

                calls.insert(
                    msg.id.clone(),
                    ApiCall {
                        message_id: msg.id,
                        model: msg.model,
                        timestamp: ts,
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        cache_creation_5m_tokens: cache_5m,
                        cache_creation_1h_tokens: cache_1h,
                        cache_read_tokens: usage.cache_read_input_tokens,
                        service_tier: usage.service_tier,
                        estimated_cost: 0.0,
                    },
                );
            }
        }
    }

    let mut stats = SessionStats {
        session_id: df.session_id.clone(),
        project: df.project.clone(),
        project_path: cwd,
        file_path: df.path.to_string_lossy().into_owned(),
        is_subagent: df.is_subagent,
        parent_session: df.parent_session.clone(),
        start_time: min_time,
        end_time: max_time,
        user_messages,
        api_calls: calls.len() as u64,
        models: HashMap::new(),
        ..SessionStats::default()
    };

    if total_duration_ms > 0 {
        stats.duration_secs = total_duration_ms / 1000;
    } else if let (Some(start), Some(end)) = (min_time, max_time) {
        stats.duration_secs = (end - start).num_seconds();
    }

    for call in calls.values_mut() {
        let estimated_cost = pricing.cost_at(
            &call.model,
            call.timestamp,
            call.input_tokens,
            call.output_tokens,
            call.cache_creation_5m_tokens,
            call.cache_creation_1h_tokens,
            call.cache_read_tokens,
        );
        call.estimated_cost = estimated_cost;

        stats.input_tokens += call.input_tokens;
        stats.output_tokens += call.output_tokens;
        stats.cache_creation_5m_tokens += call.cache_creation_5m_tokens;
        stats.cache_creation_1h_tokens += call.cache_creation_1h_tokens;
        stats.cache_read_tokens += call.cache_read_tokens;
        stats.estimated_cost += estimated_cost;

        let usage = stats
            .models
            .entry(pricing.normalize(&call.model).to_string())
            .or_insert_with(ModelUsage::default);
        usage.api_calls += 1;
        usage.input_tokens += call.input_tokens;
        usage.output_tokens += call.output_tokens;
        usage.cache_creation_5m_tokens += call.cache_creation_5m_tokens;
        usage.cache_creation_1h_tokens += call.cache_creation_1h_tokens;
        usage.cache_read_tokens += call.cache_read_tokens;
        usage.estimated_cost += estimated_cost;
    }

    stats.cache_hit_rate = stats.compute_cache_hit_rate();

    Ok(FileStats {
        stats,
        parse_errors,
    })
}

/// Finds the top-level `type` field of a JSONL line. Tracks brace depth and
/// string boundaries so `type` keys nested in inner objects are ignored, and
/// exits as soon as the depth-1 key is seen.
fn extract_top_level_type(line: &[u8]) -> Option<RecordKind> {
    let mut depth: i32 = 0;
    let mut i = 0;
    while i < line.len() {
        match line[i] {
            b'"' => {
                if depth == 1 && line[i..].starts_with(TYPE_KEY) {
                    let (kind, is_key) = classify_type(line, i + TYPE_KEY.len());
                    if is_key {
                        // Found the "type" key: done regardless of value.
                        return kind;
                    }
                    // "type" appeared as a value, not a key. Keep scanning.
                }
                i = skip_json_string(line, i);
            }
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

/// Checks whether `pos` follows a JSON key (expects `:` then a value).
/// `is_key == false` means `type` appeared as a value and the caller should
/// continue scanning.
fn classify_type(line: &[u8], pos: usize) -> (Option<RecordKind>, bool) {
    let mut i = skip_spaces(line, pos);
    if i >= line.len() || line[i] != b':' {
        return (None, false);
    }
    i = skip_spaces(line, i + 1);
    if i >= line.len() || line[i] != b'"' {
        // Key with a non-string value (null, number, object).
        return (None, true);
    }
    i += 1;

    let Some(end) = line[i..].iter().position(|&b| b == b'"') else {
        return (None, true);
    };
    if end > 20 {
        return (None, true);
    }
    let kind = match &line[i..i + end] {
        b"user" => Some(RecordKind::User),
        b"system" => Some(RecordKind::System),
        b"assistant" => Some(RecordKind::Assistant),
        // Valid key but irrelevant type (e.g. "progress", "summary").
        _ => None,
    };
    (kind, true)
}

/// Advances past a JSON string starting at the opening quote.
fn skip_json_string(line: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < line.len() {
        match line[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    i
}

fn skip_spaces(line: &[u8], mut i: usize) -> usize {
    while i < line.len() && line[i] == b' ' {
        i += 1;
    }
    i
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Extracts the `timestamp` field via byte scanning.
fn extract_timestamp_bytes(line: &[u8]) -> Option<DateTime<Utc>> {
    for pat in PAT_TIMESTAMP {
        let Some(idx) = find(line, pat) else { continue };
        let start = idx + pat.len();
        let Some(end) = line[start..].iter().position(|&b| b == b'"') else {
            continue;
        };
        if end > 40 {
            continue;
        }
        let raw = std::str::from_utf8(&line[start..start + end]).ok()?;
        return parse_rfc3339(raw);
    }
    None
}

/// Extracts the `cwd` field via byte scanning.
fn extract_cwd_bytes(line: &[u8]) -> Option<String> {
    for pat in PAT_CWD {
        let Some(idx) = find(line, pat) else { continue };
        let start = idx + pat.len();
        let Some(end) = line[start..].iter().position(|&b| b == b'"') else {
            continue;
        };
        if end == 0 || end > 1024 {
            continue;
        }
        if let Ok(value) = std::str::from_utf8(&line[start..start + end]) {
            return Some(value.to_string());
        }
    }
    None
}

/// Extracts the `durationMs` integer via byte scanning.
fn extract_duration_ms(line: &[u8]) -> Option<i64> {
    let idx = find(line, PAT_DURATION_MS)?;
    let mut start = idx + PAT_DURATION_MS.len();
    while start < line.len() && line[start] == b' ' {
        start += 1;
    }
    let mut end = start;
    while end < line.len() && line[end].is_ascii_digit() {
        end += 1;
    }
    if end == start {
        return None;
    }
    let mut value: i64 = 0;
    for &b in &line[start..end] {
        value = value * 10 + i64::from(b - b'0');
    }
    Some(value)
}

fn update_time_range(
    min_time: &mut Option<DateTime<Utc>>,
    max_time: &mut Option<DateTime<Utc>>,
    ts: DateTime<Utc>,
) {
    if min_time.is_none_or(|min| ts < min) {
        *min_time = Some(ts);
    }
    if max_time.is_none_or(|max| ts > max) {
        *max_time = Some(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_session(lines: &[&str]) -> (tempfile::TempDir, DiscoveredFile) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("session.jsonl");
        let mut file = File::create(&path).expect("create");
        for line in lines {
            writeln!(file, "{line}").expect("write");
        }
        let df = DiscoveredFile {
            path,
            project: "demo".to_string(),
            project_dir: "-home-u-projects-demo".to_string(),
            session_id: "session".to_string(),
            is_subagent: false,
            parent_session: None,
        };
        (dir, df)
    }

    fn parse(lines: &[&str]) -> FileStats {
        let (_dir, df) = write_session(lines);
        parse_file(&df, &Pricing::default()).expect("parse")
    }

    #[test]
    fn routes_only_top_level_types() {
        assert_eq!(
            extract_top_level_type(br#"{"type":"user"}"#),
            Some(RecordKind::User)
        );
        assert_eq!(
            extract_top_level_type(br#"{"type": "assistant"}"#),
            Some(RecordKind::Assistant)
        );
        assert_eq!(extract_top_level_type(br#"{"type":"summary"}"#), None);
        // Nested "type" keys must not be mistaken for the discriminator.
        assert_eq!(
            extract_top_level_type(br#"{"data":{"type":"user"}}"#),
            None
        );
        // "type" as a *value* before the real key.
        assert_eq!(
            extract_top_level_type(br#"{"kind":"type","type":"system"}"#),
            Some(RecordKind::System)
        );
        // Escaped quotes inside strings do not break depth tracking.
        assert_eq!(
            extract_top_level_type(br#"{"text":"a \"{\" b","type":"user"}"#),
            Some(RecordKind::User)
        );
    }

    #[test]
    fn nested_type_before_top_level_is_ignored() {
        let stats = parse(&[
            r#"{"data":{"type":"progress"},"type":"user","timestamp":"2025-06-01T10:00:00Z"}"#,
        ]);
        assert_eq!(stats.stats.user_messages, 1);
        assert_eq!(stats.parse_errors, 0);
    }

    #[test]
    fn dedups_retried_message_last_wins() {
        let stats = parse(&[
            r#"{"type":"assistant","timestamp":"2025-06-01T10:00:00Z","message":{"id":"m1","model":"claude-sonnet-4-5","usage":{"input_tokens":100,"output_tokens":50}}}"#,
            r#"{"type":"assistant","timestamp":"2025-06-01T10:00:05Z","message":{"id":"m1","model":"claude-sonnet-4-5","usage":{"input_tokens":200,"output_tokens":80}}}"#,
        ]);
        let s = &stats.stats;
        assert_eq!(s.api_calls, 1);
        assert_eq!(s.input_tokens, 200);
        assert_eq!(s.output_tokens, 80);
        let usage = &s.models["claude-sonnet-4-5"];
        assert_eq!(usage.api_calls, 1);
        assert_eq!(usage.input_tokens, 200);
    }

    #[test]
    fn sums_turn_durations_from_system_lines() {
        let stats = parse(&[
            r#"{"type":"system","subtype":"turn_duration","timestamp":"2025-06-01T10:00:00Z","durationMs":5000}"#,
            r#"{"type":"system","subtype":"turn_duration","timestamp":"2025-06-01T10:01:00Z","durationMs":3000}"#,
        ]);
        assert_eq!(stats.stats.duration_secs, 8);
    }

    #[test]
    fn duration_falls_back_to_time_range() {
        let stats = parse(&[
            r#"{"type":"user","timestamp":"2025-06-01T10:00:00Z"}"#,
            r#"{"type":"user","timestamp":"2025-06-01T10:02:30Z"}"#,
        ]);
        assert_eq!(stats.stats.duration_secs, 150);
    }

    #[test]
    fn nested_cache_creation_preferred_over_legacy() {
        let stats = parse(&[
            r#"{"type":"assistant","timestamp":"2025-06-01T10:00:00Z","message":{"id":"m1","model":"claude-sonnet-4-5","usage":{"input_tokens":10,"output_tokens":5,"cache_creation_input_tokens":999,"cache_creation":{"ephemeral_5m_input_tokens":40,"ephemeral_1h_input_tokens":60}}}}"#,
        ]);
        assert_eq!(stats.stats.cache_creation_5m_tokens, 40);
        assert_eq!(stats.stats.cache_creation_1h_tokens, 60);
    }

    #[test]
    fn legacy_cache_creation_counts_as_5m() {
        let stats = parse(&[
            r#"{"type":"assistant","timestamp":"2025-06-01T10:00:00Z","message":{"id":"m1","model":"claude-sonnet-4-5","usage":{"input_tokens":10,"output_tokens":5,"cache_creation_input_tokens":70}}}"#,
        ]);
        assert_eq!(stats.stats.cache_creation_5m_tokens, 70);
        assert_eq!(stats.stats.cache_creation_1h_tokens, 0);
    }

    #[test]
    fn malformed_assistant_line_is_counted_and_skipped() {
        let stats = parse(&[
            r#"{"type":"assistant","message":{"id":"m1","usage":{"input_tokens":"#,
            r#"{"type":"user","timestamp":"2025-06-01T10:00:00Z"}"#,
        ]);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.stats.user_messages, 1);
        assert_eq!(stats.stats.api_calls, 0);
    }

    #[test]
    fn assistant_without_id_or_usage_is_not_a_call() {
        let stats = parse(&[
            r#"{"type":"assistant","timestamp":"2025-06-01T10:00:00Z","message":{"id":"","usage":{"input_tokens":10}}}"#,
            r#"{"type":"assistant","timestamp":"2025-06-01T10:00:01Z","message":{"id":"m2","model":"claude-sonnet-4-5"}}"#,
        ]);
        assert_eq!(stats.stats.api_calls, 0);
        assert_eq!(stats.parse_errors, 0);
    }

    #[test]
    fn records_first_cwd_and_time_range() {
        let stats = parse(&[
            r#"{"type":"user","timestamp":"2025-06-01T10:05:00Z","cwd":"/home/u/projects/demo"}"#,
            r#"{"type":"system","timestamp":"2025-06-01T10:00:00Z","cwd":"/somewhere/else"}"#,
            r#"{"type":"user","timestamp":"2025-06-01T10:10:00Z"}"#,
        ]);
        let s = &stats.stats;
        assert_eq!(s.project_path, "/home/u/projects/demo");
        assert_eq!(s.start_time, parse_rfc3339("2025-06-01T10:00:00Z"));
        assert_eq!(s.end_time, parse_rfc3339("2025-06-01T10:10:00Z"));
    }

    #[test]
    fn model_totals_match_session_totals() {
        let stats = parse(&[
            r#"{"type":"assistant","timestamp":"2025-06-01T10:00:00Z","message":{"id":"m1","model":"claude-sonnet-4-5-20250929","usage":{"input_tokens":100,"output_tokens":40,"cache_read_input_tokens":900}}}"#,
            r#"{"type":"assistant","timestamp":"2025-06-01T10:01:00Z","message":{"id":"m2","model":"claude-haiku-4-5","usage":{"input_tokens":20,"output_tokens":10}}}"#,
        ]);
        let s = &stats.stats;
        // Model names are normalized (date suffix stripped).
        assert!(s.models.contains_key("claude-sonnet-4-5"));
        let input: u64 = s.models.values().map(|m| m.input_tokens).sum();
        let cost: f64 = s.models.values().map(|m| m.estimated_cost).sum();
        assert_eq!(input, s.input_tokens);
        assert!((cost - s.estimated_cost).abs() < 1e-9);
        assert!(s.estimated_cost > 0.0);
        assert!((s.cache_hit_rate - 900.0 / 1020.0).abs() < 1e-9);
    }

    #[test]
    fn unreadable_file_is_a_fatal_error() {
        let df = DiscoveredFile {
            path: PathBuf::from("/nonexistent/session.jsonl"),
            project: "demo".to_string(),
            project_dir: String::new(),
            session_id: "session".to_string(),
            is_subagent: false,
            parent_session: None,
        };
        assert!(parse_file(&df, &Pricing::default()).is_err());
    }
}
