mod overrides;

pub use overrides::{BuiltinOverride, OverrideSet, OVERRIDES_VERSION};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EffectError, Result};

/// Key of the canonical free-form entry.
pub const CUSTOM_PROMPT_KEY: &str = "custom_prompt";

/// Prompt text meaning "use the user's free-form text instead".
pub const CUSTOM_SENTINEL: &str = "CUSTOM";

/// Locale consulted when the requested one has no text.
pub const FALLBACK_LOCALE: &str = "en";

/// Locales that always receive a name and prompt on write.
pub const WRITE_LOCALES: &[&str] = &["en", "zh"];

pub mod validation {
    pub const MAX_KEY_LENGTH: usize = 200;
    pub const MAX_TITLE_LENGTH: usize = 500;
    pub const MAX_PROMPT_SIZE: usize = 51_200; // 50KB
}

/// A display locale such as `en` or `zh`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    pub fn en() -> Self {
        Locale("en".to_string())
    }

    pub fn zh() -> Self {
        Locale("zh".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a locale tag, ignoring case and any region suffix (`zh-CN` -> `zh`).
    pub fn parse(value: &str) -> Option<Self> {
        let primary = value.trim().split(['-', '_']).next()?.to_ascii_lowercase();
        if primary.is_empty() || !primary.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        Some(Locale(primary))
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale::en()
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Locale::parse(s).ok_or_else(|| format!("Invalid locale: {}", s))
    }
}

/// Grouping tag for a transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Custom,
    Style,
    Elements,
    Scene,
    Lighting,
    Special,
}

impl Category {
    /// Display order used when grouping.
    pub const ALL: [Category; 6] = [
        Category::Custom,
        Category::Style,
        Category::Elements,
        Category::Scene,
        Category::Lighting,
        Category::Special,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Custom => "custom",
            Category::Style => "style",
            Category::Elements => "elements",
            Category::Scene => "scene",
            Category::Lighting => "lighting",
            Category::Special => "special",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "custom" => Ok(Category::Custom),
            "style" => Ok(Category::Style),
            "elements" => Ok(Category::Elements),
            "scene" => Ok(Category::Scene),
            "lighting" => Ok(Category::Lighting),
            "special" => Ok(Category::Special),
            _ => Err(format!("Invalid category: {}", s)),
        }
    }
}

/// The stored fields of one catalog entry.
///
/// On the wire this is a flat object: `{"en_name": .., "zh_name": ..,
/// "en_prompt": .., "zh_prompt": .., "icon": .., "type": ..}`. Any
/// `<locale>_name` / `<locale>_prompt` pair is accepted, so new locales need
/// no schema change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawFields", into = "RawFields")]
pub struct PromptFields {
    pub names: BTreeMap<String, String>,
    pub prompts: BTreeMap<String, String>,
    pub icon: Option<String>,
    pub category: Option<Category>,
}

/// A catalog document: key -> fields.
pub type PromptMap = BTreeMap<String, PromptFields>;

impl PromptFields {
    /// Name for `locale`, if present and non-empty.
    pub fn name(&self, locale: &str) -> Option<&str> {
        non_empty(self.names.get(locale))
    }

    /// Prompt for `locale`, if present and non-empty.
    pub fn prompt(&self, locale: &str) -> Option<&str> {
        non_empty(self.prompts.get(locale))
    }

    pub fn icon(&self) -> Option<&str> {
        non_empty(self.icon.as_ref())
    }

    pub fn set_name(&mut self, locale: &str, name: impl Into<String>) {
        self.names.insert(locale.to_string(), name.into());
    }

    pub fn set_prompt(&mut self, locale: &str, prompt: impl Into<String>) {
        self.prompts.insert(locale.to_string(), prompt.into());
    }

    /// Shape the fields the way the store writes them: trimmed, empties
    /// dropped, and every write locale filled from the fallback locale.
    pub fn normalized(&self) -> PromptFields {
        let trim_map = |map: &BTreeMap<String, String>| -> BTreeMap<String, String> {
            map.iter()
                .map(|(locale, text)| (locale.clone(), text.trim().to_string()))
                .filter(|(_, text)| !text.is_empty())
                .collect()
        };
        let mut out = PromptFields {
            names: trim_map(&self.names),
            prompts: trim_map(&self.prompts),
            icon: self
                .icon
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            category: self.category,
        };

        let fallback_name = out.names.get(FALLBACK_LOCALE).cloned().unwrap_or_default();
        let fallback_prompt = out.prompts.get(FALLBACK_LOCALE).cloned().unwrap_or_default();
        for locale in WRITE_LOCALES {
            out.names
                .entry(locale.to_string())
                .or_insert_with(|| fallback_name.clone());
            out.prompts
                .entry(locale.to_string())
                .or_insert_with(|| fallback_prompt.clone());
        }
        out
    }

    /// Reject records that have no usable fallback-locale name or prompt.
    pub fn validate_for_write(&self) -> Result<()> {
        let name = self.name(FALLBACK_LOCALE).map(str::trim).unwrap_or("");
        let prompt = self.prompt(FALLBACK_LOCALE).map(str::trim).unwrap_or("");
        validate_title(name)?;
        validate_prompt(prompt)
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
struct RawFields(BTreeMap<String, Value>);

impl From<RawFields> for PromptFields {
    fn from(raw: RawFields) -> Self {
        let mut fields = PromptFields::default();
        for (name, value) in raw.0 {
            // Non-string values are ignored, as are unknown keys.
            let Some(text) = value.as_str() else {
                continue;
            };
            match name.as_str() {
                "icon" => fields.icon = Some(text.to_string()),
                "type" => fields.category = text.parse().ok(),
                _ => {
                    if let Some(locale) = name.strip_suffix("_name").filter(|l| !l.is_empty()) {
                        fields.set_name(locale, text);
                    } else if let Some(locale) =
                        name.strip_suffix("_prompt").filter(|l| !l.is_empty())
                    {
                        fields.set_prompt(locale, text);
                    }
                }
            }
        }
        fields
    }
}

impl From<PromptFields> for RawFields {
    fn from(fields: PromptFields) -> Self {
        let mut raw = BTreeMap::new();
        for (locale, name) in fields.names {
            raw.insert(format!("{}_name", locale), Value::String(name));
        }
        for (locale, prompt) in fields.prompts {
            raw.insert(format!("{}_prompt", locale), Value::String(prompt));
        }
        if let Some(icon) = fields.icon {
            raw.insert("icon".to_string(), Value::String(icon));
        }
        if let Some(category) = fields.category {
            raw.insert("type".to_string(), Value::String(category.to_string()));
        }
        RawFields(raw)
    }
}

pub fn validate_key(key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(EffectError::validation("key", "Key is required"));
    }
    if key.len() > validation::MAX_KEY_LENGTH {
        return Err(EffectError::validation(
            "key",
            format!("Key exceeds {} characters", validation::MAX_KEY_LENGTH),
        ));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(EffectError::validation("title", "Title is required"));
    }
    let len = title.chars().count();
    if len > validation::MAX_TITLE_LENGTH {
        return Err(EffectError::validation(
            "title",
            format!(
                "Title too long: {} characters (max {})",
                len,
                validation::MAX_TITLE_LENGTH
            ),
        ));
    }
    Ok(())
}

fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(EffectError::validation("prompt", "Prompt is required"));
    }
    if prompt.len() > validation::MAX_PROMPT_SIZE {
        return Err(EffectError::validation(
            "prompt",
            format!(
                "Prompt too large: {} bytes (max {})",
                prompt.len(),
                validation::MAX_PROMPT_SIZE
            ),
        ));
    }
    Ok(())
}

/// User-authored input for creating or updating a custom entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectDraft {
    pub title: String,
    pub prompt: String,
    pub icon: Option<String>,
    pub category: Option<Category>,
    /// Per-locale (title, prompt) replacing the mirrored English text.
    pub translations: BTreeMap<Locale, (String, String)>,
}

impl EffectDraft {
    pub fn new(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_translation(
        mut self,
        locale: Locale,
        title: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        self.translations.insert(locale, (title.into(), prompt.into()));
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_prompt(&self.prompt)
    }

    /// The record as the store will persist it.
    pub fn to_fields(&self) -> PromptFields {
        let mut fields = PromptFields {
            icon: self.icon.clone(),
            category: self.category,
            ..Default::default()
        };
        fields.set_name(FALLBACK_LOCALE, self.title.clone());
        fields.set_prompt(FALLBACK_LOCALE, self.prompt.clone());
        for (locale, (title, prompt)) in &self.translations {
            if locale.as_str() == FALLBACK_LOCALE {
                continue;
            }
            fields.set_name(locale.as_str(), title.clone());
            fields.set_prompt(locale.as_str(), prompt.clone());
        }
        fields.normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_parse() {
        assert_eq!(Locale::parse("zh-CN"), Some(Locale::zh()));
        assert_eq!(Locale::parse(" EN_us "), Some(Locale::en()));
        assert_eq!(Locale::parse("ja").unwrap().as_str(), "ja");
        assert_eq!(Locale::parse(""), None);
        assert_eq!(Locale::parse("1x"), None);
    }

    #[test]
    fn test_category_round_trip_strings() {
        for category in Category::ALL {
            assert_eq!(category.to_string().parse::<Category>().unwrap(), category);
        }
        assert!("weather".parse::<Category>().is_err());
    }

    #[test]
    fn test_prompt_fields_wire_shape() {
        let json = r#"{"en_name":"Watercolor","zh_name":"水彩","en_prompt":"Paint it","zh_prompt":"画成水彩","icon":"brush","type":"style"}"#;
        let fields: PromptFields = serde_json::from_str(json).unwrap();
        assert_eq!(fields.name("en"), Some("Watercolor"));
        assert_eq!(fields.name("zh"), Some("水彩"));
        assert_eq!(fields.prompt("zh"), Some("画成水彩"));
        assert_eq!(fields.icon(), Some("brush"));
        assert_eq!(fields.category, Some(Category::Style));

        let value = serde_json::to_value(&fields).unwrap();
        assert_eq!(value["en_name"], "Watercolor");
        assert_eq!(value["type"], "style");
        assert!(value.get("names").is_none());
    }

    #[test]
    fn test_prompt_fields_ignore_unknown_and_non_string() {
        let json = r#"{"en_name":"A","en_prompt":3,"type":"weather","_name":"x","extra":"y"}"#;
        let fields: PromptFields = serde_json::from_str(json).unwrap();
        assert_eq!(fields.name("en"), Some("A"));
        assert_eq!(fields.prompt("en"), None);
        assert_eq!(fields.category, None);
        assert_eq!(fields.names.len(), 1);
    }

    #[test]
    fn test_extra_locales_preserved() {
        let json = r#"{"en_name":"A","ja_name":"エー","en_prompt":"p"}"#;
        let fields: PromptFields = serde_json::from_str(json).unwrap();
        assert_eq!(fields.name("ja"), Some("エー"));
    }

    #[test]
    fn test_empty_strings_are_absent() {
        let mut fields = PromptFields::default();
        fields.set_name("zh", "");
        assert_eq!(fields.name("zh"), None);
    }

    #[test]
    fn test_normalized_mirrors_fallback_locale() {
        let mut fields = PromptFields::default();
        fields.set_name("en", "  Sunset ");
        fields.set_prompt("en", "Make it golden");
        fields.icon = Some("   ".to_string());
        let out = fields.normalized();
        assert_eq!(out.name("en"), Some("Sunset"));
        assert_eq!(out.name("zh"), Some("Sunset"));
        assert_eq!(out.prompt("zh"), Some("Make it golden"));
        assert_eq!(out.icon, None);
    }

    #[test]
    fn test_draft_validation() {
        assert!(EffectDraft::new("T", "P").validate().is_ok());
        let err = EffectDraft::new("  ", "P").validate().unwrap_err();
        assert!(matches!(err, EffectError::Validation { ref field, .. } if field == "title"));
        let err = EffectDraft::new("T", "").validate().unwrap_err();
        assert!(matches!(err, EffectError::Validation { ref field, .. } if field == "prompt"));
        let long = "x".repeat(validation::MAX_TITLE_LENGTH + 1);
        assert!(EffectDraft::new(long, "P").validate().is_err());
    }

    #[test]
    fn test_draft_to_fields_with_translation() {
        let fields = EffectDraft::new("Rain", "Add rain")
            .with_translation(Locale::zh(), "下雨", "添加雨")
            .with_category(Category::Scene)
            .to_fields();
        assert_eq!(fields.name("en"), Some("Rain"));
        assert_eq!(fields.name("zh"), Some("下雨"));
        assert_eq!(fields.prompt("zh"), Some("添加雨"));
        assert_eq!(fields.category, Some(Category::Scene));
    }

    #[test]
    fn test_validate_for_write() {
        let mut fields = PromptFields::default();
        fields.set_name("en", "Name");
        assert!(fields.validate_for_write().is_err());
        fields.set_prompt("en", "Prompt");
        assert!(fields.validate_for_write().is_ok());
    }
}
