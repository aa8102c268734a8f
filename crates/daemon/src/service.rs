use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router, extract::State};
use chrono::Utc;
use cburn_core::{Pricing, SessionStats, aggregate, filter_by_model, filter_by_project};
use cburn_store::Cache;
use ingest::{cache_path, load, load_with_cache};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::events::{Delta, Event, EventKind, Snapshot, Status};

const SUBSCRIBER_BUFFER: usize = 16;

/// Daemon runtime configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub days: i64,
    pub project_filter: String,
    pub model_filter: String,
    pub include_subagents: bool,
    pub use_cache: bool,
    pub interval: Duration,
    pub addr: String,
    pub events_buffer: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: ingest::default_data_dir(),
            days: 30,
            project_filter: String::new(),
            model_filter: String::new(),
            include_subagents: true,
            use_cache: true,
            interval: Duration::from_secs(15),
            addr: "127.0.0.1:8787".to_string(),
            events_buffer: 200,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon http server: {0}")]
    Io(#[from] io::Error),
}

struct ServiceState {
    last_poll_at: Option<chrono::DateTime<Utc>>,
    poll_count: u64,
    last_error: String,
    snapshot: Option<Snapshot>,
    next_event_id: i64,
    events: VecDeque<Event>,
    next_sub_id: usize,
    subs: HashMap<usize, mpsc::Sender<Event>>,
}

struct Inner {
    cfg: DaemonConfig,
    pricing: Pricing,
    started_at: chrono::DateTime<Utc>,
    state: RwLock<ServiceState>,
}

/// The observation daemon: periodic polls over the load pipeline, snapshot
/// diffing, a bounded event ring, and the status/events/stream HTTP API.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

impl Service {
    pub fn new(mut cfg: DaemonConfig, pricing: Pricing) -> Self {
        if cfg.interval < Duration::from_secs(2) {
            cfg.interval = Duration::from_secs(10);
        }
        if cfg.events_buffer < 1 {
            cfg.events_buffer = 200;
        }
        if cfg.addr.is_empty() {
            cfg.addr = "127.0.0.1:8787".to_string();
        }
        Self {
            inner: Arc::new(Inner {
                cfg,
                pricing,
                started_at: Utc::now(),
                state: RwLock::new(ServiceState {
                    last_poll_at: None,
                    poll_count: 0,
                    last_error: String::new(),
                    snapshot: None,
                    next_event_id: 0,
                    events: VecDeque::new(),
                    next_sub_id: 0,
                    subs: HashMap::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.inner.cfg
    }

    /// Serves the HTTP API and polls until `shutdown` resolves, then shuts
    /// the server down with a short grace window.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> Result<(), DaemonError> {
        let listener = tokio::net::TcpListener::bind(&self.inner.cfg.addr).await?;
        let app = self.router();

        let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = close_rx.await;
                })
                .await
        });

        // Seed the initial snapshot so status is useful immediately.
        self.poll_once().await;

        let mut ticker = tokio::time::interval(self.inner.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.poll_once().await,
            }
        }

        let _ = close_tx.send(());
        match tokio::time::timeout(Duration::from_secs(5), server).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(DaemonError::Io(err)),
            // Join error or grace window expired: shutdown proceeds anyway.
            Ok(Err(_)) | Err(_) => Ok(()),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/v1/status", get(status))
            .route("/v1/events", get(events))
            .route("/v1/stream", get(stream))
            .with_state(self.clone())
    }

    /// One poll step: load, filter, aggregate, diff, publish.
    pub async fn poll_once(&self) {
        let inner = self.inner.clone();
        let loaded = tokio::task::spawn_blocking(move || load_and_summarize(&inner)).await;

        let now = Utc::now();
        let snap = match loaded {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                self.record_poll_error(err.to_string(), now);
                return;
            }
            Err(err) => {
                self.record_poll_error(format!("poll task failed: {err}"), now);
                return;
            }
        };

        let published = {
            let mut state = self.inner.state.write().expect("daemon state poisoned");
            let prev = state.snapshot.replace(snap.clone());
            state.last_poll_at = Some(now);
            state.poll_count += 1;
            state.last_error.clear();

            match prev {
                None => {
                    state.next_event_id += 1;
                    Some(Event {
                        id: state.next_event_id,
                        kind: EventKind::Snapshot,
                        timestamp: now,
                        snapshot: snap,
                        delta: Delta::default(),
                    })
                }
                Some(prev) => {
                    let delta = snap.diff(&prev);
                    if delta.is_zero() {
                        None
                    } else {
                        state.next_event_id += 1;
                        Some(Event {
                            id: state.next_event_id,
                            kind: EventKind::UsageDelta,
                            timestamp: now,
                            snapshot: snap,
                            delta,
                        })
                    }
                }
            }
        };

        if let Some(event) = published {
            debug!(id = event.id, kind = event.kind.as_str(), "publishing event");
            self.publish(event);
        }
    }

    fn record_poll_error(&self, message: String, now: chrono::DateTime<Utc>) {
        warn!("daemon poll error: {message}");
        let mut state = self.inner.state.write().expect("daemon state poisoned");
        state.last_error = message;
        state.last_poll_at = Some(now);
        state.poll_count += 1;
    }

    /// Appends to the ring (truncating from the head) and fans out to
    /// subscribers without blocking: a full subscriber just misses the event.
    fn publish(&self, event: Event) {
        let mut state = self.inner.state.write().expect("daemon state poisoned");
        state.events.push_back(event.clone());
        while state.events.len() > self.inner.cfg.events_buffer {
            state.events.pop_front();
        }
        for tx in state.subs.values() {
            let _ = tx.try_send(event.clone());
        }
    }

    pub fn status(&self) -> Status {
        let state = self.inner.state.read().expect("daemon state poisoned");
        Status {
            started_at: self.inner.started_at,
            last_poll_at: state.last_poll_at,
            poll_interval_sec: self.inner.cfg.interval.as_secs(),
            poll_count: state.poll_count,
            data_dir: self.inner.cfg.data_dir.to_string_lossy().into_owned(),
            days: self.inner.cfg.days,
            project_filter: self.inner.cfg.project_filter.clone(),
            model_filter: self.inner.cfg.model_filter.clone(),
            summary: state.snapshot.clone().unwrap_or_default(),
            last_error: state.last_error.clone(),
            event_count: state.events.len(),
            subscriber_count: state.subs.len(),
        }
    }

    /// A copy of the current event ring, oldest first.
    pub fn events(&self) -> Vec<Event> {
        let state = self.inner.state.read().expect("daemon state poisoned");
        state.events.iter().cloned().collect()
    }

    /// Registers a live subscriber. Returns its id, the bounded event
    /// channel, and an immediate snapshot event carrying the current summary.
    pub fn subscribe(&self) -> (usize, mpsc::Receiver<Event>, Event) {
        let mut state = self.inner.state.write().expect("daemon state poisoned");
        state.next_sub_id += 1;
        let id = state.next_sub_id;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        state.subs.insert(id, tx);
        let first = Event {
            id: 0,
            kind: EventKind::Snapshot,
            timestamp: Utc::now(),
            snapshot: state.snapshot.clone().unwrap_or_default(),
            delta: Delta::default(),
        };
        (id, rx, first)
    }

    pub fn unsubscribe(&self, id: usize) {
        let mut state = self.inner.state.write().expect("daemon state poisoned");
        state.subs.remove(&id);
    }
}

fn load_and_summarize(inner: &Inner) -> ingest::Result<Snapshot> {
    let sessions = load_sessions(inner)?;

    let now = Utc::now();
    let since = now - chrono::Duration::days(inner.cfg.days);

    let mut filtered = sessions;
    if !inner.cfg.project_filter.is_empty() {
        filtered = filter_by_project(filtered, &inner.cfg.project_filter);
    }
    if !inner.cfg.model_filter.is_empty() {
        filtered = filter_by_model(filtered, &inner.cfg.model_filter);
    }

    let stats = aggregate(&filtered, since, now, &inner.pricing);
    Ok(Snapshot::from_summary(&stats, now))
}

fn load_sessions(inner: &Inner) -> ingest::Result<Vec<SessionStats>> {
    if inner.cfg.use_cache {
        match Cache::open(cache_path()) {
            Ok(mut cache) => {
                match load_with_cache(
                    &inner.cfg.data_dir,
                    inner.cfg.include_subagents,
                    &mut cache,
                    &inner.pricing,
                    None,
                ) {
                    Ok(result) => return Ok(result.sessions),
                    Err(err) => warn!("cached load failed, retrying uncached: {err}"),
                }
            }
            Err(err) => warn!("metric cache unavailable, loading uncached: {err}"),
        }
    }

    let result = load(
        &inner.cfg.data_dir,
        inner.cfg.include_subagents,
        &inner.pricing,
        None,
    )?;
    Ok(result.sessions)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(svc): State<Service>) -> Json<Status> {
    Json(svc.status())
}

async fn events(State(svc): State<Service>) -> Json<Vec<Event>> {
    Json(svc.events())
}

async fn stream(
    State(svc): State<Service>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (id, rx, first) = svc.subscribe();
    let guard = SubscriptionGuard { svc, id };

    let stream = tokio_stream::once(first)
        .chain(ReceiverStream::new(rx))
        .map(move |event| {
            // Keep the guard alive for the lifetime of the stream; dropping
            // it unregisters the subscriber when the client disconnects.
            let _ = &guard;
            Ok(SseEvent::default()
                .event(event.kind.as_str())
                .data(serde_json::to_string(&event).unwrap_or_default()))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

struct SubscriptionGuard {
    svc: Service,
    id: usize,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.svc.unsubscribe(self.id);
    }
}
