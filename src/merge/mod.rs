//! Merge engine: combines the `default` and `custom` catalogs (and, for the
//! manager view, the override set) into the ordered list clients display.
//!
//! The merge is a pure function of its inputs. It is re-run in full on every
//! change and keeps no state between runs.

use std::collections::BTreeSet;

use icu_collator::{Collator, CollatorOptions, Strength};
use serde::{Deserialize, Serialize};

use crate::entity::{
    BuiltinOverride, Category, Locale, OverrideSet, PromptFields, PromptMap, CUSTOM_PROMPT_KEY,
    CUSTOM_SENTINEL, FALLBACK_LOCALE,
};

/// Icon shown when neither catalog nor patch names one.
pub const DEFAULT_ICON: &str = "auto_awesome";
/// Icon for the free-form entry when none is stored.
pub const CUSTOM_PROMPT_ICON: &str = "edit";

/// One display-ready transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPromptItem {
    pub key: String,
    pub title: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// A `default` entry exists for this key.
    pub is_builtin: bool,
    /// Both a `default` and a `custom` entry exist for this key.
    pub is_overridden: bool,
    /// A local patch exists for this built-in.
    #[serde(default)]
    pub is_patched: bool,
    /// The built-in is hidden; only present when hidden entries were requested.
    #[serde(default)]
    pub is_hidden: bool,
}

impl MergedPromptItem {
    /// Whether the prompt is replaced by the user's free-form text.
    pub fn is_free_form(&self) -> bool {
        self.prompt == CUSTOM_SENTINEL
    }

    pub fn display_icon(&self) -> &str {
        match self.icon.as_deref() {
            Some(icon) => icon,
            None if self.key == CUSTOM_PROMPT_KEY => CUSTOM_PROMPT_ICON,
            None => DEFAULT_ICON,
        }
    }

    pub fn display_category(&self) -> Category {
        self.category.unwrap_or(Category::Custom)
    }
}

/// Extra inputs for the manager view.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions<'a> {
    /// Hidden keys and patches for built-ins.
    pub overrides: Option<&'a OverrideSet>,
    /// Keep hidden built-ins in the output, flagged `is_hidden`.
    pub include_hidden: bool,
}

/// Merge the two catalogs for `locale`.
pub fn merge_catalogs(default: &PromptMap, custom: &PromptMap, locale: &Locale) -> Vec<MergedPromptItem> {
    merge_with(default, custom, locale, MergeOptions::default())
}

/// Merge the two catalogs for `locale`, applying hide/patch state.
///
/// Patches and hidden keys only affect keys present in `default`; entries
/// naming other keys are ignored. A patch never applies over a `custom`
/// entry sharing its key.
pub fn merge_with(
    default: &PromptMap,
    custom: &PromptMap,
    locale: &Locale,
    options: MergeOptions<'_>,
) -> Vec<MergedPromptItem> {
    let keys: BTreeSet<&String> = default.keys().chain(custom.keys()).collect();
    let mut items = Vec::with_capacity(keys.len());

    for key in keys {
        let d = default.get(key);
        let c = custom.get(key);
        if d.is_none() && c.is_none() {
            continue;
        }

        let overrides = options.overrides.filter(|_| d.is_some());
        let patch = overrides.and_then(|set| set.patch_for(key));
        let hidden = overrides.is_some_and(|set| set.is_disabled(key));
        if hidden && !options.include_hidden {
            continue;
        }

        items.push(resolve_item(key, d, c, patch, locale.as_str(), hidden));
    }

    sort_items(&mut items, locale);
    items
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Custom,
    Default,
}

fn resolve_item(
    key: &str,
    d: Option<&PromptFields>,
    c: Option<&PromptFields>,
    patch: Option<&BuiltinOverride>,
    locale: &str,
    hidden: bool,
) -> MergedPromptItem {
    let applied = patch.filter(|_| c.is_none());
    let patch_title = applied.and_then(|p| non_blank(p.title.as_deref()));
    let patch_prompt = applied.and_then(|p| non_blank(p.prompt.as_deref()));
    let patch_icon = applied.and_then(|p| non_blank(p.icon.as_deref()));

    let title = layered(resolve_text(c, d, locale, PromptFields::name), patch_title)
        .unwrap_or(key)
        .to_string();

    let prompt = if key == CUSTOM_PROMPT_KEY {
        CUSTOM_SENTINEL.to_string()
    } else {
        layered(resolve_text(c, d, locale, PromptFields::prompt), patch_prompt)
            .unwrap_or("")
            .to_string()
    };

    let icon = c
        .and_then(PromptFields::icon)
        .or(patch_icon)
        .or_else(|| d.and_then(PromptFields::icon))
        .map(String::from);
    let category = c
        .and_then(|e| e.category)
        .or_else(|| applied.and_then(|p| p.category))
        .or_else(|| d.and_then(|e| e.category));

    MergedPromptItem {
        key: key.to_string(),
        title,
        prompt,
        icon,
        category,
        is_builtin: d.is_some(),
        is_overridden: d.is_some() && c.is_some(),
        is_patched: patch.is_some(),
        is_hidden: hidden,
    }
}

/// requested(custom), requested(default), fallback(custom), fallback(default).
fn resolve_text<'a, F>(
    c: Option<&'a PromptFields>,
    d: Option<&'a PromptFields>,
    locale: &str,
    read: F,
) -> Option<(&'a str, Source)>
where
    F: Fn(&'a PromptFields, &str) -> Option<&'a str>,
{
    let order = [
        (c, locale, Source::Custom),
        (d, locale, Source::Default),
        (c, FALLBACK_LOCALE, Source::Custom),
        (d, FALLBACK_LOCALE, Source::Default),
    ];
    order.into_iter().find_map(|(entry, loc, source)| {
        entry.and_then(|e| read(e, loc)).map(|text| (text, source))
    })
}

/// A patch replaces text taken from the built-in.
fn layered<'a>(resolved: Option<(&'a str, Source)>, patch: Option<&'a str>) -> Option<&'a str> {
    match (resolved, patch) {
        (Some((text, Source::Custom)), _) => Some(text),
        (_, Some(patched)) => Some(patched),
        (Some((text, Source::Default)), None) => Some(text),
        (None, None) => None,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Free-form entry first, then built-ins, then pure custom entries; each
/// group by title collated for `locale`, with the key as the final tie-break.
fn sort_items(items: &mut [MergedPromptItem], locale: &Locale) {
    let collator = collator_for(locale);
    let titles = |a: &str, b: &str| match &collator {
        Some(collator) => collator.compare(a, b),
        None => a.to_lowercase().cmp(&b.to_lowercase()),
    };
    items.sort_by(|a, b| {
        sort_group(a)
            .cmp(&sort_group(b))
            .then_with(|| titles(&a.title, &b.title))
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.key.cmp(&b.key))
    });
}

fn sort_group(item: &MergedPromptItem) -> u8 {
    if item.key == CUSTOM_PROMPT_KEY {
        0
    } else if item.is_builtin {
        1
    } else {
        2
    }
}

/// Case-insensitive, accent-aware collation for `locale`.
fn collator_for(locale: &Locale) -> Option<Collator> {
    let tag: icu_locid::Locale = locale.as_str().parse().ok()?;
    let mut options = CollatorOptions::new();
    options.strength = Some(Strength::Secondary);
    Collator::try_new(&(&tag).into(), options).ok()
}
