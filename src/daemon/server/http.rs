use crate::daemon::coordinator::Coordinator;
use crate::daemon::server::ws;
use anyhow::{anyhow, Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use fornax_common::threading::{ThreadHandle, ThreadRegistry};
use fornax_core::device::DeviceConfig;
use fornax_core::feed::FeedEvent;
use fornax_core::sample::Sample;
use fornax_core::status::StatusUpdate;
use fornax_core::warning::WarningSettings;
use futures_util::stream::Stream;
use log::info;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/ws/ingest", get(ws::ingest_handler))
        .route("/v1/stream", get(stream_handler))
        .route("/v1/health", get(health_handler))
        .route("/v1/statuses", get(statuses_handler))
        .route("/v1/devices", get(list_devices_handler))
        .route(
            "/v1/devices/{name}",
            axum::routing::put(upsert_device_handler).delete(delete_device_handler),
        )
        .route(
            "/v1/devices/{name}/warnings",
            get(warnings_handler).put(set_warnings_handler),
        )
        .route("/v1/devices/{name}/runs/latest", get(latest_run_handler))
        .route(
            "/v1/devices/{name}/runs/{run_id}/samples",
            get(run_samples_handler),
        )
        .route("/v1/devices/{name}/samples", get(range_samples_handler))
        .with_state(coordinator)
}

type HttpError = (StatusCode, String);

fn internal(e: anyhow::Error) -> HttpError {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

fn sse_event(event: &FeedEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
    Event::default().data(data)
}

/// Observer feed: a catch-up prelude (current statuses plus non-zero
/// failure trackers), then the live broadcast. Observers that fall behind
/// drop their own backlog; history is pulled via the query routes instead.
async fn stream_handler(
    State(coordinator): State<Arc<Coordinator>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
    use tokio_stream::wrappers::BroadcastStream;
    use tokio_stream::StreamExt;

    let rx = coordinator.broadcaster().subscribe();
    let catchup = coordinator.catchup_events();
    let prelude = tokio_stream::iter(
        catchup
            .into_iter()
            .map(|event| Ok::<Event, Infallible>(sse_event(&event))),
    );
    let live = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => Some(Ok(sse_event(&event))),
        Err(BroadcastStreamRecvError::Lagged(_)) => None,
    });
    Sse::new(prelude.chain(live))
}

async fn statuses_handler(
    State(coordinator): State<Arc<Coordinator>>,
) -> Json<Vec<StatusUpdate>> {
    Json(coordinator.current_statuses())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    workers: Vec<String>,
    observers: usize,
    samples_appended: u64,
    last_append_at: Option<String>,
}

async fn health_handler(State(coordinator): State<Arc<Coordinator>>) -> Json<Health> {
    let metrics = fornax_storage::storage_metrics_watch().borrow().clone();
    Json(Health {
        workers: coordinator.threads().active_thread_names(),
        observers: coordinator.broadcaster().observer_count(),
        samples_appended: metrics.samples_appended,
        last_append_at: metrics
            .last_append_at
            .map(fornax_core::timefmt::format_stamp),
    })
}

async fn list_devices_handler(
    State(coordinator): State<Arc<Coordinator>>,
) -> Result<Json<Vec<DeviceConfig>>, HttpError> {
    let devices = coordinator.directory().list().map_err(internal)?;
    Ok(Json(devices))
}

async fn upsert_device_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path(name): Path<String>,
    Json(mut config): Json<DeviceConfig>,
) -> Result<StatusCode, HttpError> {
    // The path segment is authoritative for identity.
    config.name = name;
    coordinator.upsert_device(config).map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_device_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path(name): Path<String>,
) -> Result<StatusCode, HttpError> {
    if coordinator.delete_device(&name).map_err(internal)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

async fn warnings_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path(name): Path<String>,
) -> Result<Json<WarningSettings>, HttpError> {
    let settings = coordinator
        .store()
        .load_warning_settings(&name)
        .map_err(internal)?;
    Ok(Json(settings))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WarningsToggle {
    warnings_enabled: bool,
}

async fn set_warnings_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path(name): Path<String>,
    Json(toggle): Json<WarningsToggle>,
) -> Result<Json<WarningSettings>, HttpError> {
    let settings = coordinator
        .set_warnings_enabled(&name, toggle.warnings_enabled)
        .map_err(internal)?;
    Ok(Json(settings))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LatestRun {
    device_id: String,
    run_id: u64,
}

async fn latest_run_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path(name): Path<String>,
) -> Result<Json<LatestRun>, HttpError> {
    let run_id = coordinator.store().max_run_id(&name).map_err(internal)?;
    Ok(Json(LatestRun {
        device_id: name,
        run_id,
    }))
}

async fn run_samples_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path((name, run_id)): Path<(String, u64)>,
) -> Result<Json<Vec<Sample>>, HttpError> {
    let samples = coordinator
        .store()
        .find_by_run(&name, run_id)
        .map_err(internal)?;
    Ok(Json(samples))
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    since: Option<String>,
    until: Option<String>,
}

async fn range_samples_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path(name): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<Sample>>, HttpError> {
    let samples = coordinator
        .store()
        .find_range(&name, params.since.as_deref(), params.until.as_deref())
        .map_err(internal)?;
    Ok(Json(samples))
}

/// Serve the router from a dedicated thread with its own runtime. The
/// readiness channel guards against silently losing the listener: callers
/// get an error instead of a daemon without a bound port.
pub fn spawn_http_server(
    listen_addr: String,
    coordinator: Arc<Coordinator>,
    threads: &ThreadRegistry,
) -> Result<ThreadHandle> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let handle = threads
        .spawn("http-server", move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build runtime");
            rt.block_on(async move {
                let app = router(coordinator);
                let listener = TcpListener::bind(&listen_addr)
                    .await
                    .expect("bind telemetry listener");
                tx.send(()).ok();
                info!("telemetry server listening on {}", listen_addr);
                axum::serve(listener, app).await.expect("serve telemetry");
            });
        })
        .context("spawn HTTP server thread")?;

    match rx.recv_timeout(Duration::from_millis(500)) {
        Ok(()) => Ok(handle),
        Err(_) => Err(anyhow!(
            "HTTP server failed to signal readiness within 500ms"
        )),
    }
}
