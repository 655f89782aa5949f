//! Catalog access for consumers, either in-process or over HTTP.

mod sse;

pub use sse::{SseParser, CHANGE_EVENT_NAME};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL, PRAGMA};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entity::{PromptFields, PromptMap};
use crate::error::{EffectError, Result};
use crate::propagation::{ChangeBus, ChangeKind};
use crate::storage::{CatalogName, CatalogStore, DeleteOutcome};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Delay before reconnecting a dropped event stream.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// The Persisted Prompt Store as seen by a consumer.
///
/// Only the `custom` catalog is writable through this contract.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch a whole catalog. Missing documents read as empty; transport
    /// failures are errors.
    async fn read_catalog(&self, name: CatalogName) -> Result<PromptMap>;

    /// Insert or replace a custom entry; returns the effective key.
    async fn upsert_custom(&self, key: Option<&str>, fields: &PromptFields) -> Result<String>;

    async fn delete_custom(&self, key: &str) -> Result<DeleteOutcome>;

    async fn clear_custom(&self) -> Result<()>;
}

/// Direct access to the JSON files, for consumers on the same machine.
///
/// Reads degrade per catalog: a corrupt or unreadable document reads as
/// empty and is logged. Writes still refuse to replace a corrupt document.
pub struct LocalCatalogSource {
    store: Arc<CatalogStore>,
}

impl LocalCatalogSource {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }
}

#[async_trait]
impl CatalogSource for LocalCatalogSource {
    async fn read_catalog(&self, name: CatalogName) -> Result<PromptMap> {
        Ok(self.store.read_catalog(name))
    }

    async fn upsert_custom(&self, key: Option<&str>, fields: &PromptFields) -> Result<String> {
        self.store.upsert_entry(CatalogName::Custom, key, fields)
    }

    async fn delete_custom(&self, key: &str) -> Result<DeleteOutcome> {
        self.store.delete_entry(CatalogName::Custom, key)
    }

    async fn clear_custom(&self) -> Result<()> {
        self.store.clear_catalog(CatalogName::Custom)
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(flatten)]
    fields: &'a PromptFields,
}

#[derive(Deserialize)]
struct UpsertResponse {
    ok: bool,
    key: String,
}

#[derive(Deserialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    field: Option<String>,
}

/// Client for the `/api/prompts` HTTP surface.
#[derive(Clone)]
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base: Url,
}

impl HttpCatalogClient {
    /// Client for the server at `base_url`, e.g. `http://127.0.0.1:4317`.
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| EffectError::Transport(format!("Invalid server URL '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(EffectError::Transport(format!(
                "Invalid server URL '{}'",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `<base>/api/prompts/<segments...>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| EffectError::Transport(format!("Invalid server URL '{}'", self.base)))?
            .pop_if_empty()
            .extend(["api", "prompts"])
            .extend(segments);
        Ok(url)
    }

    /// Copy the server's change events onto `bus` until `shutdown` fires,
    /// reconnecting after [`RECONNECT_DELAY`] whenever the stream drops.
    ///
    /// Every reconnect publishes [`ChangeKind::Resync`], since events sent
    /// while disconnected are lost.
    pub async fn forward_events(&self, bus: ChangeBus, shutdown: CancellationToken) {
        let mut reconnecting = false;
        loop {
            match self.pump_events(&bus, &shutdown, reconnecting).await {
                Ok(()) => debug!("change stream closed"),
                Err(e) => warn!(error = %e, "change stream failed"),
            }
            if shutdown.is_cancelled() {
                break;
            }
            reconnecting = true;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    async fn pump_events(
        &self,
        bus: &ChangeBus,
        shutdown: &CancellationToken,
        resync: bool,
    ) -> Result<()> {
        let url = self.endpoint(&["events"])?;
        let request = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        let mut response = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            response = request.send() => error_for_status(response?).await?,
        };
        info!(server = %self.base, "subscribed to change stream");
        if resync {
            bus.publish_external(ChangeKind::Resync);
        }

        let mut parser = SseParser::default();
        loop {
            let chunk = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                return Ok(());
            };
            for event in parser.push(&chunk) {
                debug!(kind = ?event.kind, revision = event.revision, "remote change");
                bus.publish_external(event.kind);
            }
        }
    }
}

/// Pass successful responses through; turn the rest into errors, reading
/// the server's `{ok:false, error}` body when there is one.
async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = if body.error.is_empty() { text } else { body.error };

    Err(match (status, body.field) {
        (StatusCode::BAD_REQUEST, Some(field)) => EffectError::Validation { field, message },
        (StatusCode::METHOD_NOT_ALLOWED, _) => EffectError::ReadOnlyCatalog(message),
        _ => EffectError::Http {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl CatalogSource for HttpCatalogClient {
    async fn read_catalog(&self, name: CatalogName) -> Result<PromptMap> {
        let url = self.endpoint(&[name.as_str()])?;
        let response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .header(CACHE_CONTROL, "no-cache, no-store")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;
        let catalog = error_for_status(response).await?.json().await?;
        Ok(catalog)
    }

    async fn upsert_custom(&self, key: Option<&str>, fields: &PromptFields) -> Result<String> {
        let url = self.endpoint(&[CatalogName::Custom.as_str()])?;
        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .json(&UpsertRequest { key, fields })
            .send()
            .await?;
        let body: UpsertResponse = error_for_status(response).await?.json().await?;
        if !body.ok {
            return Err(EffectError::Storage("server rejected the write".to_string()));
        }
        Ok(body.key)
    }

    async fn delete_custom(&self, key: &str) -> Result<DeleteOutcome> {
        let url = self.endpoint(&[CatalogName::Custom.as_str(), key])?;
        let response = self
            .client
            .delete(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::NotFound);
        }
        let body: OkResponse = error_for_status(response).await?.json().await?;
        Ok(if body.ok {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    async fn clear_custom(&self) -> Result<()> {
        let url = self.endpoint(&[CatalogName::Custom.as_str()])?;
        let response = self
            .client
            .delete(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let body: OkResponse = error_for_status(response).await?.json().await?;
        if body.ok {
            Ok(())
        } else {
            Err(EffectError::Storage("server failed to clear the catalog".to_string()))
        }
    }
}
