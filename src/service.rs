//! The transformation contract consumers program against.
//!
//! [`EffectService`] keeps the last good snapshot of both catalogs, merges
//! it with the override set on demand and routes every mutation to the store
//! that owns it. Fetches are tagged with sequence numbers so a slow response
//! never replaces a newer view.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::CatalogSource;
use crate::entity::{validate_key, BuiltinOverride, EffectDraft, Locale, PromptFields, PromptMap};
use crate::error::{EffectError, Result};
use crate::merge::{merge_with, MergeOptions, MergedPromptItem};
use crate::propagation::{ChangeBus, ChangeKind};
use crate::search;
use crate::storage::{CatalogName, DeleteOutcome, OverrideStore};

/// How a listing treats the override set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    /// Apply hidden keys and patches.
    pub apply_overrides: bool,
    /// Keep hidden built-ins, flagged `is_hidden` (manager view).
    pub include_hidden: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            apply_overrides: true,
            include_hidden: false,
        }
    }
}

impl ListOptions {
    /// Everything, hidden entries included, as the effect manager shows it.
    pub fn manager() -> Self {
        Self {
            apply_overrides: true,
            include_hidden: true,
        }
    }
}

#[derive(Default)]
struct CatalogState {
    default: PromptMap,
    custom: PromptMap,
    /// Highest sequence number reflected in the snapshot.
    applied_seq: u64,
    loaded: bool,
    last_error: Option<String>,
}

pub struct EffectService<S: CatalogSource + ?Sized> {
    source: Arc<S>,
    overrides: Arc<OverrideStore>,
    bus: ChangeBus,
    state: Mutex<CatalogState>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl<S: CatalogSource + ?Sized + 'static> EffectService<S> {
    /// A service with an empty snapshot; call [`reload`](Self::reload) to
    /// fetch the catalogs.
    pub fn new(source: Arc<S>, overrides: Arc<OverrideStore>, bus: ChangeBus) -> Self {
        Self {
            source,
            overrides,
            bus,
            state: Mutex::new(CatalogState::default()),
            next_seq: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(EffectError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop serving: later writes fail and late fetch results are dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("effect service closed");
        }
    }

    /// Whether a fetch has succeeded at least once.
    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    /// Message of the most recent failed fetch, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Fetch both catalogs and replace the snapshot.
    ///
    /// Returns `Ok(false)` when the result arrived after a newer fetch or a
    /// local write had already been applied, or after [`close`](Self::close).
    /// On failure the previous snapshot stays in place and the error is
    /// remembered for [`last_error`](Self::last_error).
    pub async fn reload(&self) -> Result<bool> {
        self.ensure_open()?;
        let seq = self.take_seq();
        let (default, custom) = tokio::join!(
            self.source.read_catalog(CatalogName::Default),
            self.source.read_catalog(CatalogName::Custom),
        );

        if self.is_closed() {
            debug!(seq, "fetch finished after close, discarding");
            return Ok(false);
        }
        let mut state = self.lock();
        if seq < state.applied_seq {
            debug!(seq, applied = state.applied_seq, "stale fetch discarded");
            return Ok(false);
        }
        match (default, custom) {
            (Ok(default), Ok(custom)) => {
                debug!(seq, default = default.len(), custom = custom.len(), "catalogs fetched");
                state.default = default;
                state.custom = custom;
                state.applied_seq = seq;
                state.loaded = true;
                state.last_error = None;
                Ok(true)
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(seq, error = %e, "catalog fetch failed, keeping last snapshot");
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// The merged list for `locale`.
    pub fn list_transformations(&self, locale: &Locale, options: ListOptions) -> Vec<MergedPromptItem> {
        let overrides = options.apply_overrides.then(|| self.overrides.snapshot());
        let state = self.lock();
        merge_with(
            &state.default,
            &state.custom,
            locale,
            MergeOptions {
                overrides: overrides.as_ref(),
                include_hidden: options.include_hidden,
            },
        )
    }

    /// [`list_transformations`](Self::list_transformations) narrowed by a
    /// search query such as `category:style sunset`.
    pub fn search(&self, locale: &Locale, query: &str, options: ListOptions) -> Vec<MergedPromptItem> {
        search::filter_items(&self.list_transformations(locale, options), query)
    }

    /// Whether the current snapshot has a built-in entry for `key`.
    pub fn is_builtin(&self, key: &str) -> bool {
        self.lock().default.contains_key(key)
    }

    /// Record a successful local write in the snapshot and announce it.
    fn apply_local(&self, update: impl FnOnce(&mut CatalogState)) {
        if self.is_closed() {
            return;
        }
        let seq = self.take_seq();
        let mut state = self.lock();
        update(&mut state);
        state.applied_seq = state.applied_seq.max(seq);
        drop(state);
        self.bus.publish(ChangeKind::Catalog(CatalogName::Custom));
    }

    /// Create a custom entry; returns its generated key.
    pub async fn create_custom(&self, draft: &EffectDraft) -> Result<String> {
        self.ensure_open()?;
        draft.validate()?;
        let fields = draft.to_fields();
        let key = self.source.upsert_custom(None, &fields).await?;
        info!(key = %key, "custom effect created");
        self.cache_custom(&key, fields);
        Ok(key)
    }

    /// Replace the custom entry under `key`, creating it if absent. Editing
    /// a built-in this way shadows it with a custom entry.
    pub async fn update_custom(&self, key: &str, draft: &EffectDraft) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;
        draft.validate()?;
        let fields = draft.to_fields();
        let key = self.source.upsert_custom(Some(key), &fields).await?;
        info!(key = %key, "custom effect updated");
        self.cache_custom(&key, fields);
        Ok(())
    }

    fn cache_custom(&self, key: &str, fields: PromptFields) {
        let key = key.to_string();
        self.apply_local(move |state| {
            state.custom.insert(key, fields.normalized());
        });
    }

    /// Delete a custom entry. An absent key is reported as
    /// [`DeleteOutcome::NotFound`], not as an error.
    pub async fn delete_custom(&self, key: &str) -> Result<DeleteOutcome> {
        self.ensure_open()?;
        let outcome = self.source.delete_custom(key).await?;
        match outcome {
            DeleteOutcome::Deleted => {
                info!(key = %key, "custom effect deleted");
                self.apply_local(|state| {
                    state.custom.remove(key);
                });
            }
            DeleteOutcome::NotFound => {
                debug!(key = %key, "delete of unknown custom effect");
                // The store is authoritative; drop any stale cached copy.
                self.lock().custom.remove(key);
            }
        }
        Ok(outcome)
    }

    /// Remove every custom entry. Overrides are untouched.
    pub async fn clear_custom(&self) -> Result<()> {
        self.ensure_open()?;
        self.source.clear_custom().await?;
        info!("custom effects cleared");
        self.apply_local(|state| state.custom.clear());
        Ok(())
    }

    /// Hide a built-in. Keys without a built-in entry are ignored.
    pub fn hide_builtin(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.is_builtin(key) {
            debug!(key = %key, "hide ignored, not a built-in");
            return Ok(());
        }
        self.overrides.disable(key)?;
        Ok(())
    }

    pub fn restore_builtin(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.overrides.enable(key)?;
        Ok(())
    }

    /// Merge `patch` into the built-in's override. Keys without a built-in
    /// entry are ignored.
    pub fn patch_builtin_override(&self, key: &str, patch: &BuiltinOverride) -> Result<()> {
        self.ensure_open()?;
        if !self.is_builtin(key) {
            debug!(key = %key, "patch ignored, not a built-in");
            return Ok(());
        }
        self.overrides.set_patch(key, patch)?;
        Ok(())
    }

    pub fn remove_builtin_override(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.overrides.remove_patch(key)?;
        Ok(())
    }

    /// Forget all hidden keys and patches. The custom catalog is untouched.
    pub fn clear_overrides(&self) -> Result<()> {
        self.ensure_open()?;
        self.overrides.clear_all()?;
        Ok(())
    }

    /// Reload whenever the bus reports a catalog change, until the service
    /// is closed or the bus goes away. Override changes need no fetch: the
    /// override store updates its own copy before announcing.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut subscription = self.bus.subscribe();
        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let Some(service) = service.upgrade() else {
                    break;
                };
                if service.is_closed() {
                    break;
                }
                if !event.touches_catalogs() {
                    continue;
                }
                // Also runs for our own writes; refetching is idempotent.
                if let Err(e) = service.reload().await {
                    debug!(error = %e, "reload after change failed");
                }
            }
            debug!("change listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LocalCatalogSource;
    use crate::config::DeckConfig;
    use crate::entity::{Category, CUSTOM_SENTINEL};
    use crate::storage::CatalogStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct Fixture {
        service: Arc<EffectService<LocalCatalogSource>>,
        store: Arc<CatalogStore>,
        bus: ChangeBus,
        _tmp: TempDir,
    }

    fn builtin(title: &str, prompt: &str) -> PromptFields {
        let mut fields = PromptFields::default();
        fields.set_name("en", title);
        fields.set_prompt("en", prompt);
        fields
    }

    async fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config = DeckConfig::default();
        let store = Arc::new(CatalogStore::open(&config, tmp.path()));
        let mut default = PromptMap::new();
        default.insert("custom_prompt".into(), builtin("Custom", "anything"));
        default.insert("watercolor".into(), builtin("Watercolor", "Paint it"));
        store.seed_default(&default).unwrap();

        let bus = ChangeBus::new();
        let overrides = Arc::new(OverrideStore::open(config.overrides_path(tmp.path()), bus.clone()));
        let source = Arc::new(LocalCatalogSource::new(Arc::clone(&store)));
        let service = Arc::new(EffectService::new(source, overrides, bus.clone()));
        service.reload().await.unwrap();
        Fixture {
            service,
            store,
            bus,
            _tmp: tmp,
        }
    }

    fn keys(items: &[MergedPromptItem]) -> Vec<&str> {
        items.iter().map(|i| i.key.as_str()).collect()
    }

    #[tokio::test]
    async fn test_create_list_delete_round_trip() {
        let f = fixture().await;
        let key = f.service.create_custom(&EffectDraft::new("T", "P")).await.unwrap();

        let items = f.service.list_transformations(&Locale::en(), ListOptions::default());
        let item = items.iter().find(|i| i.key == key).unwrap();
        assert!(!item.is_builtin);
        assert_eq!(item.title, "T");
        assert_eq!(item.prompt, "P");

        assert_eq!(f.service.delete_custom(&key).await.unwrap(), DeleteOutcome::Deleted);
        let items = f.service.list_transformations(&Locale::en(), ListOptions::default());
        assert!(items.iter().all(|i| i.key != key));
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let f = fixture().await;
        let outcome = f.service.delete_custom("ghost").await.unwrap();
        assert_eq!(outcome, DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_validation_happens_before_storage() {
        let f = fixture().await;
        let err = f
            .service
            .create_custom(&EffectDraft::new("", "P"))
            .await
            .unwrap_err();
        assert!(matches!(err, EffectError::Validation { .. }));
        assert!(!f.store.path(CatalogName::Custom).exists());
    }

    #[tokio::test]
    async fn test_write_visible_to_fresh_subscriber_without_reload() {
        let f = fixture().await;
        let mut sub = f.bus.subscribe();
        f.service
            .create_custom(&EffectDraft::new("Fresh", "Now"))
            .await
            .unwrap();
        assert!(sub.try_recv().is_some());

        let items = f.service.list_transformations(&Locale::en(), ListOptions::default());
        assert!(items.iter().any(|i| i.title == "Fresh"));
    }

    #[tokio::test]
    async fn test_hide_and_restore_builtin() {
        let f = fixture().await;
        f.service.hide_builtin("watercolor").unwrap();
        f.service.hide_builtin("watercolor").unwrap();

        let visible = f.service.list_transformations(&Locale::en(), ListOptions::default());
        assert_eq!(keys(&visible), vec!["custom_prompt"]);
        let manager = f.service.list_transformations(&Locale::en(), ListOptions::manager());
        assert_eq!(keys(&manager), vec!["custom_prompt", "watercolor"]);
        assert!(manager[1].is_hidden);

        f.service.restore_builtin("watercolor").unwrap();
        let visible = f.service.list_transformations(&Locale::en(), ListOptions::default());
        assert_eq!(visible.len(), 2);
    }

    #[tokio::test]
    async fn test_overrides_on_unknown_keys_are_noops() {
        let f = fixture().await;
        f.service.hide_builtin("ghost").unwrap();
        f.service
            .patch_builtin_override(
                "ghost",
                &BuiltinOverride {
                    title: Some("Boo".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(f.service.overrides().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_patch_then_custom_shadow() {
        let f = fixture().await;
        f.service
            .patch_builtin_override(
                "watercolor",
                &BuiltinOverride {
                    title: Some("Patched".into()),
                    category: Some(Category::Style),
                    ..Default::default()
                },
            )
            .unwrap();
        let items = f.service.list_transformations(&Locale::en(), ListOptions::default());
        assert_eq!(items[1].title, "Patched");

        f.service
            .update_custom("watercolor", &EffectDraft::new("Mine", "My paint"))
            .await
            .unwrap();
        let items = f.service.list_transformations(&Locale::en(), ListOptions::default());
        assert_eq!(items[1].title, "Mine");
        assert!(items[1].is_overridden);

        f.service.clear_overrides().unwrap();
        f.service.remove_builtin_override("watercolor").unwrap();
        assert!(f.service.overrides().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_clear_custom_keeps_overrides() {
        let f = fixture().await;
        f.service.hide_builtin("watercolor").unwrap();
        f.service.create_custom(&EffectDraft::new("A", "B")).await.unwrap();
        f.service.clear_custom().await.unwrap();

        let items = f.service.list_transformations(&Locale::en(), ListOptions::manager());
        assert_eq!(keys(&items), vec!["custom_prompt", "watercolor"]);
        assert!(f.service.overrides().snapshot().is_disabled("watercolor"));
    }

    #[tokio::test]
    async fn test_custom_prompt_sentinel_through_service() {
        let f = fixture().await;
        let items = f.service.list_transformations(&Locale::zh(), ListOptions::default());
        assert_eq!(items[0].key, "custom_prompt");
        assert_eq!(items[0].prompt, CUSTOM_SENTINEL);
    }

    #[tokio::test]
    async fn test_search() {
        let f = fixture().await;
        let found = f.service.search(&Locale::en(), "paint", ListOptions::default());
        assert_eq!(keys(&found), vec!["watercolor"]);
    }

    #[tokio::test]
    async fn test_closed_service_rejects_writes() {
        let f = fixture().await;
        f.service.close();
        assert!(matches!(
            f.service.create_custom(&EffectDraft::new("A", "B")).await,
            Err(EffectError::Closed)
        ));
        assert!(matches!(f.service.reload().await, Err(EffectError::Closed)));
    }

    #[tokio::test]
    async fn test_listener_picks_up_other_writer() {
        let f = fixture().await;
        let handle = f.service.spawn_listener();

        // Another process writes the file and the change reaches the bus.
        f.store
            .upsert_entry(CatalogName::Custom, Some("ext"), &builtin("External", "x"))
            .unwrap();
        f.bus.publish_external(ChangeKind::Catalog(CatalogName::Custom));

        let mut found = false;
        for _ in 0..100 {
            let items = f.service.list_transformations(&Locale::en(), ListOptions::default());
            if items.iter().any(|i| i.key == "ext") {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(found);
        f.service.close();
        f.bus.publish(ChangeKind::Resync);
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    /// A source whose reads of `custom` block until released, so two fetches
    /// can complete out of order.
    struct GatedSource {
        gate: Notify,
        first_custom: Mutex<Option<PromptMap>>,
        latest_custom: PromptMap,
    }

    #[async_trait]
    impl CatalogSource for GatedSource {
        async fn read_catalog(&self, name: CatalogName) -> Result<PromptMap> {
            if name == CatalogName::Default {
                return Ok(PromptMap::new());
            }
            let stale = self.first_custom.lock().unwrap().take();
            match stale {
                Some(old) => {
                    self.gate.notified().await;
                    Ok(old)
                }
                None => Ok(self.latest_custom.clone()),
            }
        }
        async fn upsert_custom(&self, _: Option<&str>, _: &PromptFields) -> Result<String> {
            Err(EffectError::Storage("read-only test source".into()))
        }
        async fn delete_custom(&self, _: &str) -> Result<DeleteOutcome> {
            Ok(DeleteOutcome::NotFound)
        }
        async fn clear_custom(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_late_stale_fetch_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let mut old = PromptMap::new();
        old.insert("old".into(), builtin("Old", "o"));
        let mut new = PromptMap::new();
        new.insert("new".into(), builtin("New", "n"));

        let source = Arc::new(GatedSource {
            gate: Notify::new(),
            first_custom: Mutex::new(Some(old)),
            latest_custom: new,
        });
        let bus = ChangeBus::new();
        let overrides = Arc::new(OverrideStore::open(tmp.path().join("o.json"), bus.clone()));
        let service = Arc::new(EffectService::new(Arc::clone(&source), overrides, bus));

        let slow = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.reload().await })
        };
        // Let the first fetch take its sequence number and park on the gate.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.reload().await.unwrap());

        source.gate.notify_one();
        assert!(!slow.await.unwrap().unwrap());

        let items = service.list_transformations(&Locale::en(), ListOptions::default());
        assert_eq!(keys(&items), vec!["new"]);
    }

    struct FailingSource;

    #[async_trait]
    impl CatalogSource for FailingSource {
        async fn read_catalog(&self, _: CatalogName) -> Result<PromptMap> {
            Err(EffectError::Transport("connection refused".into()))
        }
        async fn upsert_custom(&self, _: Option<&str>, _: &PromptFields) -> Result<String> {
            Err(EffectError::Transport("connection refused".into()))
        }
        async fn delete_custom(&self, _: &str) -> Result<DeleteOutcome> {
            Err(EffectError::Transport("connection refused".into()))
        }
        async fn clear_custom(&self) -> Result<()> {
            Err(EffectError::Transport("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_empty_view_and_flags_error() {
        let tmp = TempDir::new().unwrap();
        let bus = ChangeBus::new();
        let overrides = Arc::new(OverrideStore::open(tmp.path().join("o.json"), bus.clone()));
        let service = EffectService::new(Arc::new(FailingSource), overrides, bus);

        let err = service.reload().await.unwrap_err();
        assert!(err.is_transport());
        assert!(!service.is_loaded());
        assert!(service.last_error().unwrap().contains("connection refused"));
        assert!(service
            .list_transformations(&Locale::en(), ListOptions::default())
            .is_empty());

        let err = service.delete_custom("a").await.unwrap_err();
        assert!(err.is_transport());
    }
}
