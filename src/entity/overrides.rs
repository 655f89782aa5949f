// src/entity/overrides.rs
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::Category;

pub const OVERRIDES_VERSION: u32 = 1;

/// Partial replacement for a built-in entry's displayed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl BuiltinOverride {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.prompt.is_none() && self.icon.is_none() && self.category.is_none()
    }

    /// Field-level merge: every field set in `patch` replaces ours.
    pub fn apply(&mut self, patch: &BuiltinOverride) {
        if let Some(ref title) = patch.title {
            self.title = Some(title.clone());
        }
        if let Some(ref prompt) = patch.prompt {
            self.prompt = Some(prompt.clone());
        }
        if let Some(ref icon) = patch.icon {
            self.icon = Some(icon.clone());
        }
        if let Some(category) = patch.category {
            self.category = Some(category);
        }
    }
}

/// Client-local visibility and patch state for built-in entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideSet {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub disabled_keys: BTreeSet<String>,
    #[serde(default)]
    pub overrides: BTreeMap<String, BuiltinOverride>,
}

fn default_version() -> u32 {
    OVERRIDES_VERSION
}

impl Default for OverrideSet {
    fn default() -> Self {
        Self {
            version: OVERRIDES_VERSION,
            disabled_keys: BTreeSet::new(),
            overrides: BTreeMap::new(),
        }
    }
}

impl OverrideSet {
    pub fn is_disabled(&self, key: &str) -> bool {
        self.disabled_keys.contains(key)
    }

    pub fn patch_for(&self, key: &str) -> Option<&BuiltinOverride> {
        self.overrides.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.disabled_keys.is_empty() && self.overrides.is_empty()
    }

    // The mutators below return whether anything changed.

    pub fn disable(&mut self, key: &str) -> bool {
        self.disabled_keys.insert(key.to_string())
    }

    pub fn enable(&mut self, key: &str) -> bool {
        self.disabled_keys.remove(key)
    }

    pub fn set_patch(&mut self, key: &str, patch: &BuiltinOverride) -> bool {
        if patch.is_empty() {
            return false;
        }
        let entry = self.overrides.entry(key.to_string()).or_default();
        let before = entry.clone();
        entry.apply(patch);
        *entry != before
    }

    pub fn remove_patch(&mut self, key: &str) -> bool {
        self.overrides.remove(key).is_some()
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.is_empty();
        self.disabled_keys.clear();
        self.overrides.clear();
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_is_idempotent() {
        let mut set = OverrideSet::default();
        assert!(set.disable("watercolor"));
        let once = set.clone();
        assert!(!set.disable("watercolor"));
        assert_eq!(set, once);
        assert!(set.is_disabled("watercolor"));
    }

    #[test]
    fn test_enable_missing_key_is_noop() {
        let mut set = OverrideSet::default();
        assert!(!set.enable("nope"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_set_patch_merges_fields() {
        let mut set = OverrideSet::default();
        set.set_patch(
            "rain",
            &BuiltinOverride {
                title: Some("Storm".into()),
                icon: Some("cloud".into()),
                ..Default::default()
            },
        );
        set.set_patch(
            "rain",
            &BuiltinOverride {
                prompt: Some("Heavy rain".into()),
                icon: Some("umbrella".into()),
                ..Default::default()
            },
        );
        let patch = set.patch_for("rain").unwrap();
        assert_eq!(patch.title.as_deref(), Some("Storm"));
        assert_eq!(patch.prompt.as_deref(), Some("Heavy rain"));
        assert_eq!(patch.icon.as_deref(), Some("umbrella"));
    }

    #[test]
    fn test_empty_patch_changes_nothing() {
        let mut set = OverrideSet::default();
        assert!(!set.set_patch("rain", &BuiltinOverride::default()));
        assert!(set.patch_for("rain").is_none());
    }

    #[test]
    fn test_clear() {
        let mut set = OverrideSet::default();
        set.disable("a");
        set.set_patch(
            "b",
            &BuiltinOverride {
                title: Some("B".into()),
                ..Default::default()
            },
        );
        assert!(set.clear());
        assert!(set.is_empty());
        assert!(!set.clear());
    }

    #[test]
    fn test_serialized_shape() {
        let mut set = OverrideSet::default();
        set.disable("a");
        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["disabledKeys"][0], "a");
        assert!(value["overrides"].is_object());

        let parsed: OverrideSet = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, OverrideSet::default());
    }
}
