use std::fs;
use std::path::Path;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{SecondsFormat, Utc};
use daemon::{DaemonConfig, EventKind, Service, Status};
use cburn_core::Pricing;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

fn test_service(data_dir: &Path) -> Service {
    let cfg = DaemonConfig {
        data_dir: data_dir.to_path_buf(),
        days: 30,
        use_cache: false,
        interval: Duration::from_secs(15),
        events_buffer: 200,
        ..DaemonConfig::default()
    };
    Service::new(cfg, Pricing::default())
}

/// Writes a session worth exactly 1000 billed tokens, timestamped recently
/// enough to land in the 30-day window.
fn write_recent_session(data_dir: &Path, id: &str) {
    let dir = data_dir.join("projects").join("-home-u-projects-demo");
    fs::create_dir_all(&dir).expect("mkdirs");
    let ts = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let lines = format!(
        concat!(
            r#"{{"type":"user","timestamp":"{ts}","cwd":"/home/u/projects/demo"}}"#,
            "\n",
            r#"{{"type":"assistant","timestamp":"{ts}","message":{{"id":"m-{id}","model":"claude-sonnet-4-5","usage":{{"input_tokens":600,"output_tokens":400}}}}}}"#,
            "\n",
        ),
        ts = ts,
        id = id,
    );
    fs::write(dir.join(format!("{id}.jsonl")), lines).expect("write session");
}

#[tokio::test]
async fn poll_emits_snapshot_then_delta_then_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let svc = test_service(dir.path());

    // First poll against an empty set: one snapshot event with id 1.
    svc.poll_once().await;
    let events = svc.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, 1);
    assert_eq!(events[0].kind, EventKind::Snapshot);
    assert_eq!(events[0].snapshot.sessions, 0);

    // New usage appears: one usage_delta with id 2 and the token delta.
    write_recent_session(dir.path(), "s1");
    svc.poll_once().await;
    let events = svc.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].id, 2);
    assert_eq!(events[1].kind, EventKind::UsageDelta);
    assert_eq!(events[1].delta.tokens, 1000);
    assert_eq!(events[1].delta.sessions, 1);
    assert_eq!(events[1].delta.prompts, 1);

    // No change: no event, but the poll counter still advances.
    svc.poll_once().await;
    assert_eq!(svc.events().len(), 2);
    assert_eq!(svc.status().poll_count, 3);
}

#[tokio::test]
async fn event_ring_is_bounded() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = DaemonConfig {
        data_dir: dir.path().to_path_buf(),
        use_cache: false,
        events_buffer: 2,
        ..DaemonConfig::default()
    };
    let svc = Service::new(cfg, Pricing::default());

    svc.poll_once().await;
    for i in 0..3 {
        write_recent_session(dir.path(), &format!("s{i}"));
        svc.poll_once().await;
    }

    let events = svc.events();
    assert_eq!(events.len(), 2);
    // Truncation drops from the head; ids stay monotonic.
    assert_eq!(events[0].id, 3);
    assert_eq!(events[1].id, 4);
}

#[tokio::test]
async fn subscribers_get_an_immediate_snapshot_and_live_events() {
    let dir = tempfile::tempdir().expect("temp dir");
    let svc = test_service(dir.path());
    svc.poll_once().await;

    let (id, mut rx, first) = svc.subscribe();
    assert_eq!(first.kind, EventKind::Snapshot);
    assert_eq!(svc.status().subscriber_count, 1);

    write_recent_session(dir.path(), "s1");
    svc.poll_once().await;

    let event = rx.recv().await.expect("live event");
    assert_eq!(event.kind, EventKind::UsageDelta);

    svc.unsubscribe(id);
    assert_eq!(svc.status().subscriber_count, 0);
}

#[tokio::test]
async fn healthz_returns_ok() {
    let dir = tempfile::tempdir().expect("temp dir");
    let app = test_service(dir.path()).router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn status_endpoint_reports_poll_state() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_recent_session(dir.path(), "s1");
    let svc = test_service(dir.path());
    svc.poll_once().await;

    let response = svc
        .router()
        .oneshot(
            Request::builder()
                .uri("/v1/status")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.expect("body").to_bytes();
    let status: Status = serde_json::from_slice(&body).expect("parse status");
    assert_eq!(status.poll_count, 1);
    assert_eq!(status.days, 30);
    assert_eq!(status.summary.sessions, 1);
    assert_eq!(status.summary.tokens, 1000);
    assert_eq!(status.event_count, 1);
    assert!(status.last_poll_at.is_some());
    assert!(status.last_error.is_empty());
}

#[tokio::test]
async fn events_endpoint_returns_ring_copy() {
    let dir = tempfile::tempdir().expect("temp dir");
    let svc = test_service(dir.path());
    svc.poll_once().await;

    let response = svc
        .router()
        .oneshot(
            Request::builder()
                .uri("/v1/events")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.expect("body").to_bytes();
    let events: Vec<daemon::Event> = serde_json::from_slice(&body).expect("parse events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Snapshot);
}

#[tokio::test]
async fn stream_endpoint_speaks_sse() {
    let dir = tempfile::tempdir().expect("temp dir");
    let svc = test_service(dir.path());
    svc.poll_once().await;

    let response = svc
        .router()
        .oneshot(
            Request::builder()
                .uri("/v1/stream")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    // The first frame is the immediate snapshot event.
    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("frame in time")
        .expect("some frame")
        .expect("frame ok");
    let text = String::from_utf8_lossy(frame.into_data().expect("data frame").as_ref()).to_string();
    assert!(text.starts_with("event: snapshot\n"));
    assert!(text.contains("data: {"));
}
