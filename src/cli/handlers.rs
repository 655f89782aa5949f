use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{CatalogSource, HttpCatalogClient, LocalCatalogSource};
use crate::config::{DeckConfig, DATA_DIR};
use crate::entity::{BuiltinOverride, Category, EffectDraft, Locale, OverrideSet, PromptMap};
use crate::error::{EffectError, Result};
use crate::merge::MergedPromptItem;
use crate::propagation::ChangeBus;
use crate::search;
use crate::seed;
use crate::server;
use crate::service::{EffectService, ListOptions};
use crate::storage::{CatalogName, CatalogStore, DeleteOutcome, OverrideStore};

use super::commands::EffectArgs;

type DynService = EffectService<dyn CatalogSource>;

/// Find the project root by looking for .effectdeck/ or .git/
fn find_project_root() -> PathBuf {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut current = cwd.as_path();
    loop {
        if current.join(DATA_DIR).exists() || current.join(".git").exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return cwd,
        }
    }
}

/// An initialized project: its data directory and loaded configuration.
struct Project {
    data_dir: PathBuf,
    config: DeckConfig,
}

impl Project {
    fn open() -> Result<Self> {
        let data_dir = find_project_root().join(DATA_DIR);
        if !data_dir.is_dir() {
            return Err(EffectError::NotInitialized);
        }
        let config = DeckConfig::load(&data_dir)?;
        Ok(Self { data_dir, config })
    }

    fn catalog_store(&self, bus: Option<&ChangeBus>) -> CatalogStore {
        let store = CatalogStore::open(&self.config, &self.data_dir);
        match bus {
            Some(bus) => store.with_bus(bus.clone()),
            None => store,
        }
    }

    /// A loaded service over the local files, or over `--server` /
    /// `server_url` when one is given.
    async fn service(&self, server_url: Option<&str>) -> Result<DynService> {
        let bus = ChangeBus::new();
        let source: Arc<dyn CatalogSource> =
            match server_url.or(self.config.server_url.as_deref()) {
                Some(url) => {
                    debug!(server = url, "using remote catalogs");
                    Arc::new(HttpCatalogClient::new(url)?)
                }
                None => Arc::new(LocalCatalogSource::new(Arc::new(self.catalog_store(None)))),
            };
        let overrides = Arc::new(OverrideStore::open(
            self.config.overrides_path(&self.data_dir),
            bus.clone(),
        ));
        let service = EffectService::new(source, overrides, bus);
        // Listing and local edits carry on with whatever was readable
        if let Err(e) = service.reload().await {
            eprintln!("Warning: {}", e);
        }
        Ok(service)
    }

    fn locale(&self, flag: Option<&str>) -> Result<Locale> {
        match flag {
            Some(raw) => Locale::parse(raw)
                .ok_or_else(|| EffectError::validation("locale", format!("Invalid locale: {}", raw))),
            None => Ok(self.config.locale()),
        }
    }
}

fn runtime() -> Result<Runtime> {
    Ok(Runtime::new()?)
}

/// Run `f` against a loaded service on a fresh runtime.
fn with_service<T, F, Fut>(server_url: Option<String>, f: F) -> Result<T>
where
    F: FnOnce(Project, DynService) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let project = Project::open()?;
    runtime()?.block_on(async move {
        let service = project.service(server_url.as_deref()).await?;
        f(project, service).await
    })
}

fn parse_category(raw: Option<&str>) -> Result<Option<Category>> {
    raw.map(|c| c.parse().map_err(|e: String| EffectError::validation("category", e)))
        .transpose()
}

fn read_stdin() -> Result<String> {
    let mut content = String::new();
    io::stdin().read_to_string(&mut content)?;
    Ok(content)
}

fn build_draft(args: &EffectArgs) -> Result<EffectDraft> {
    let prompt = match (&args.prompt, args.stdin) {
        (Some(_), true) => {
            return Err(EffectError::validation(
                "prompt",
                "Pass the prompt as an argument or with --stdin, not both",
            ))
        }
        (Some(prompt), false) => prompt.clone(),
        (None, true) => read_stdin()?,
        (None, false) => String::new(),
    };

    let mut draft = EffectDraft::new(args.title.clone(), prompt);
    if let Some(ref icon) = args.icon {
        draft = draft.with_icon(icon.clone());
    }
    if let Some(category) = parse_category(args.category.as_deref())? {
        draft = draft.with_category(category);
    }
    if args.zh_title.is_some() || args.zh_prompt.is_some() {
        let title = args.zh_title.clone().unwrap_or_else(|| draft.title.clone());
        let prompt = args.zh_prompt.clone().unwrap_or_else(|| draft.prompt.clone());
        draft = draft.with_translation(Locale::zh(), title, prompt);
    }
    Ok(draft)
}

fn require_builtin(service: &DynService, key: &str) -> Result<()> {
    if service.is_builtin(key) {
        Ok(())
    } else {
        Err(EffectError::NotFound(key.to_string()))
    }
}

pub fn handle_init(empty: bool) -> Result<()> {
    let root = env::current_dir()?;
    let data_dir = root.join(DATA_DIR);
    if data_dir.exists() {
        return Err(EffectError::AlreadyInitialized);
    }
    fs::create_dir_all(&data_dir)?;

    let config = DeckConfig::load(&data_dir)?;
    let store = CatalogStore::open(&config, &data_dir);
    let builtins = if empty {
        PromptMap::new()
    } else {
        seed::default_catalog()
    };
    store.seed_default(&builtins)?;
    store.commit_document(CatalogName::Custom, &PromptMap::new())?;
    OverrideStore::open(config.overrides_path(&data_dir), ChangeBus::new()).persist()?;

    info!(path = %data_dir.display(), builtins = builtins.len(), "project initialized");
    println!("Initialized effectdeck project in {}", root.display());
    if !empty {
        println!("  {} built-in transformations", builtins.len());
    }
    Ok(())
}

pub fn handle_serve(bind: Option<String>) -> Result<()> {
    let project = Project::open()?;
    let bind = bind.unwrap_or_else(|| project.config.bind.clone());

    runtime()?.block_on(async move {
        let bus = ChangeBus::new();
        let store = Arc::new(project.catalog_store(Some(&bus)));
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
            token.cancel();
        });

        server::serve(store, bus, &bind, shutdown).await
    })
}

pub fn handle_list(
    server_url: Option<String>,
    locale: Option<String>,
    all: bool,
    raw: bool,
    query: Option<String>,
    grouped: bool,
    json: bool,
) -> Result<()> {
    with_service(server_url, |project, service| async move {
        let locale = project.locale(locale.as_deref())?;
        let options = ListOptions {
            apply_overrides: !raw,
            include_hidden: all,
        };
        let items = match query.as_deref() {
            Some(q) => service.search(&locale, q, options),
            None => service.list_transformations(&locale, options),
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&items)?);
            return Ok(());
        }
        if items.is_empty() {
            println!("No transformations found.");
            return Ok(());
        }

        if grouped {
            for (category, group) in search::group_by_category(&items) {
                println!("{} ({})", category, group.len());
                for item in &group {
                    print_item(item);
                }
                println!();
            }
        } else {
            for item in &items {
                print_item(item);
            }
            println!();
            println!("{} transformation(s)", items.len());
        }
        Ok(())
    })
}

fn print_item(item: &MergedPromptItem) {
    let mut flags = Vec::new();
    flags.push(if item.is_builtin { "built-in" } else { "custom" });
    if item.is_overridden {
        flags.push("overridden");
    }
    if item.is_patched {
        flags.push("patched");
    }
    if item.is_hidden {
        flags.push("hidden");
    }
    println!(
        "  {:<28} {:<9} {}  [{}]",
        item.key,
        item.display_category().as_str(),
        item.title,
        flags.join(", ")
    );
}

pub fn handle_add(server_url: Option<String>, args: EffectArgs) -> Result<()> {
    let draft = build_draft(&args)?;
    with_service(server_url, |_, service| async move {
        let key = service.create_custom(&draft).await?;
        if args.json {
            println!("{}", serde_json::json!({ "ok": true, "key": key }));
        } else {
            println!("Created {} - {}", key, draft.title);
        }
        Ok(())
    })
}

pub fn handle_update(server_url: Option<String>, key: String, args: EffectArgs) -> Result<()> {
    let draft = build_draft(&args)?;
    with_service(server_url, |_, service| async move {
        let shadows = service.is_builtin(&key);
        service.update_custom(&key, &draft).await?;
        if args.json {
            println!("{}", serde_json::json!({ "ok": true, "key": key }));
        } else {
            println!("Updated {} - {}", key, draft.title);
            if shadows {
                println!("  (a custom entry now shadows the built-in)");
            }
        }
        Ok(())
    })
}

pub fn handle_delete(server_url: Option<String>, key: String) -> Result<()> {
    with_service(server_url, |_, service| async move {
        match service.delete_custom(&key).await? {
            DeleteOutcome::Deleted => {
                println!("Deleted {}", key);
                Ok(())
            }
            DeleteOutcome::NotFound => Err(EffectError::NotFound(key)),
        }
    })
}

pub fn handle_clear(server_url: Option<String>, force: bool) -> Result<()> {
    with_service(server_url, |project, service| async move {
        let count = service
            .list_transformations(&project.config.locale(), ListOptions::manager())
            .iter()
            .filter(|item| !item.is_builtin || item.is_overridden)
            .count();

        // Confirm unless --force is used
        if !force {
            eprint!("Delete all {} custom transformation(s)? [y/N] ", count);
            if atty::is(atty::Stream::Stdin) {
                let mut input = String::new();
                io::stdin().read_line(&mut input)?;
                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("Cancelled.");
                    return Ok(());
                }
            } else {
                // Non-interactive mode without --force, abort
                eprintln!();
                return Err(EffectError::validation(
                    "force",
                    "Use --force to clear in non-interactive mode",
                ));
            }
        }

        service.clear_custom().await?;
        println!("Cleared {} custom transformation(s)", count);
        Ok(())
    })
}

pub fn handle_hide(server_url: Option<String>, key: String) -> Result<()> {
    with_service(server_url, |_, service| async move {
        require_builtin(&service, &key)?;
        service.hide_builtin(&key)?;
        println!("Hid {}", key);
        Ok(())
    })
}

pub fn handle_restore(server_url: Option<String>, key: String) -> Result<()> {
    with_service(server_url, |_, service| async move {
        require_builtin(&service, &key)?;
        service.restore_builtin(&key)?;
        println!("Restored {}", key);
        Ok(())
    })
}

pub fn handle_override(
    server_url: Option<String>,
    key: String,
    title: Option<String>,
    prompt: Option<String>,
    icon: Option<String>,
    category: Option<String>,
) -> Result<()> {
    let patch = BuiltinOverride {
        title,
        prompt,
        icon,
        category: parse_category(category.as_deref())?,
    };
    if patch.is_empty() {
        return Err(EffectError::validation(
            "override",
            "Nothing to override: pass --title, --prompt, --icon or --category",
        ));
    }
    with_service(server_url, |_, service| async move {
        require_builtin(&service, &key)?;
        service.patch_builtin_override(&key, &patch)?;
        println!("Patched {}", key);
        Ok(())
    })
}

pub fn handle_unoverride(server_url: Option<String>, key: String) -> Result<()> {
    with_service(server_url, |_, service| async move {
        require_builtin(&service, &key)?;
        service.remove_builtin_override(&key)?;
        println!("Removed patch on {}", key);
        Ok(())
    })
}

pub fn handle_clear_overrides(server_url: Option<String>) -> Result<()> {
    with_service(server_url, |_, service| async move {
        service.clear_overrides()?;
        println!("Cleared all hidden keys and patches");
        Ok(())
    })
}

/// Outcome of checking one document.
fn check_document<T>(label: &str, path: &Path, read: impl FnOnce() -> Result<T>) -> bool {
    match read() {
        Ok(_) => {
            println!("  ok       {:<10} {}", label, path.display());
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "document failed check");
            println!("  CORRUPT  {:<10} {}", label, path.display());
            eprintln!("    {}", e);
            false
        }
    }
}

pub fn handle_check() -> Result<()> {
    let project = Project::open()?;
    let store = project.catalog_store(None);
    let overrides_path = project.config.overrides_path(&project.data_dir);

    println!("Checking {}", project.data_dir.display());
    let results = [
        check_document("default", store.path(CatalogName::Default), || {
            store.read_catalog_strict(CatalogName::Default)
        }),
        check_document("custom", store.path(CatalogName::Custom), || {
            store.read_catalog_strict(CatalogName::Custom)
        }),
        check_document("overrides", &overrides_path, || -> Result<OverrideSet> {
            Ok(OverrideStore::open_strict(overrides_path.clone(), ChangeBus::new())?.snapshot())
        }),
    ];

    let failed = results.iter().filter(|ok| !**ok).count();
    if failed > 0 {
        return Err(EffectError::Storage(format!(
            "{} document(s) failed the integrity check",
            failed
        )));
    }
    println!("All documents are valid.");
    Ok(())
}
