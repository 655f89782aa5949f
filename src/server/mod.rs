//! HTTP CRUD surface over the catalog files.
//!
//! | Method | Path                        | Response                      |
//! |--------|-----------------------------|-------------------------------|
//! | GET    | `/api/prompts/default`      | catalog object                |
//! | GET    | `/api/prompts/custom`       | catalog object                |
//! | POST   | `/api/prompts/custom`       | `{ok, key}`                   |
//! | DELETE | `/api/prompts/custom/{key}` | `{ok}`, 404 when absent       |
//! | DELETE | `/api/prompts/custom`       | `{ok}`                        |
//! | GET    | `/api/prompts/events`       | `prompts-changed` SSE stream  |
//!
//! Catalog reads are never cached and never fail: an unreadable document is
//! served as `{}`. The default catalog accepts no writes.

mod error;

pub use error::{ApiError, ErrorBody};

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::client::CHANGE_EVENT_NAME;
use crate::entity::{PromptFields, PromptMap};
use crate::error::Result;
use crate::propagation::{ChangeBus, ChangeKind, FileWatcher};
use crate::storage::{CatalogName, CatalogStore, DeleteOutcome};

const NO_STORE: &str = "no-store";
const SSE_BUFFER: usize = 16;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    store: Arc<CatalogStore>,
    bus: ChangeBus,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: Arc<CatalogStore>, bus: ChangeBus) -> Self {
        Self {
            store,
            bus,
            shutdown: CancellationToken::new(),
        }
    }

    /// End open event streams when `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertResponse {
    pub ok: bool,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/prompts/default", get(get_default))
        .route(
            "/api/prompts/custom",
            get(get_custom).post(upsert_custom).delete(clear_custom),
        )
        .route("/api/prompts/custom/{key}", delete(delete_custom))
        .route("/api/prompts/events", get(change_events))
        .layer(middleware::from_fn(trace_requests))
        .with_state(state)
}

/// Serve on `bind` until `shutdown` is cancelled, publishing a change event
/// whenever either catalog file is modified on disk.
pub async fn serve(
    store: Arc<CatalogStore>,
    bus: ChangeBus,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let _watcher = watch_catalogs(&store, &bus)?;
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "effectdeck server listening");

    let app = router(AppState::new(store, bus).with_shutdown(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("effectdeck server stopped");
    Ok(())
}

/// Relay edits made by other processes (or by hand) onto `bus`.
pub fn watch_catalogs(store: &CatalogStore, bus: &ChangeBus) -> Result<FileWatcher> {
    let custom_path = store.path(CatalogName::Custom).to_path_buf();
    let files = [
        store.path(CatalogName::Default).to_path_buf(),
        custom_path.clone(),
    ];
    let bus = bus.clone();
    FileWatcher::spawn(&files, move |changed| {
        let name = if changed.file_name() == custom_path.file_name() {
            CatalogName::Custom
        } else {
            CatalogName::Default
        };
        bus.publish_external(ChangeKind::Catalog(name));
    })
}

async fn trace_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = info_span!("http.request", method = %method, path = %path);

    let started = Instant::now();
    let response = next.run(request).instrument(span).await;
    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Run blocking file I/O off the async workers.
async fn blocking<T, F>(work: F) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(ApiError::from)
}

async fn read_catalog(state: &AppState, name: CatalogName) -> Response {
    let store = Arc::clone(&state.store);
    let catalog = tokio::task::spawn_blocking(move || store.read_catalog(name))
        .await
        .unwrap_or_else(|e| {
            debug!(error = %e, "catalog read task failed");
            PromptMap::new()
        });
    ([(header::CACHE_CONTROL, NO_STORE)], Json(catalog)).into_response()
}

async fn get_default(State(state): State<AppState>) -> Response {
    read_catalog(&state, CatalogName::Default).await
}

async fn get_custom(State(state): State<AppState>) -> Response {
    read_catalog(&state, CatalogName::Custom).await
}

/// `{key?, en_name, en_prompt, zh_name?, zh_prompt?, icon?, type?}`.
/// Missing `zh_*` fields are filled from `en_*`; a missing key is generated.
async fn upsert_custom(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> std::result::Result<Json<UpsertResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest {
        message: e.body_text(),
    })?;
    if !body.is_object() {
        return Err(ApiError::BadRequest {
            message: "Request body must be a JSON object".to_string(),
        });
    }
    let key = body
        .get("key")
        .and_then(Value::as_str)
        .map(str::to_string);
    let fields: PromptFields = serde_json::from_value(body).map_err(crate::error::EffectError::from)?;

    let store = Arc::clone(&state.store);
    let key = blocking(move || store.upsert_entry(CatalogName::Custom, key.as_deref(), &fields)).await?;
    Ok(Json(UpsertResponse { ok: true, key }))
}

async fn delete_custom(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> std::result::Result<Json<OkResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    match blocking(move || store.delete_entry(CatalogName::Custom, &key)).await? {
        DeleteOutcome::Deleted => Ok(Json(OkResponse { ok: true })),
        DeleteOutcome::NotFound => Err(ApiError::NotFound),
    }
}

async fn clear_custom(
    State(state): State<AppState>,
) -> std::result::Result<Json<OkResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    blocking(move || store.clear_catalog(CatalogName::Custom)).await?;
    Ok(Json(OkResponse { ok: true }))
}

/// One `prompts-changed` event per bus event until the client disconnects
/// or the server shuts down.
async fn change_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(SSE_BUFFER);
    let mut subscription = state.bus.subscribe();
    let shutdown = state.shutdown.clone();
    debug!(subscribers = state.bus.subscriber_count(), "event stream opened");

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tx.closed() => break,
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!("event stream closed");
    });

    let stream = ReceiverStream::new(rx).filter_map(|change| {
        match Event::default().event(CHANGE_EVENT_NAME).json_data(change) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                debug!(error = %e, "change event not encodable");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
