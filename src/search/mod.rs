//! Search over merged transformations: filter parsing, matching and grouping.

use crate::entity::Category;
use crate::merge::MergedPromptItem;

/// Which catalog an item must come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    /// Entries with a built-in record
    Builtin,
    /// Entries that exist only in the custom catalog
    Custom,
}

/// Parsed search filter from query string.
///
/// Filters can be specified in the query string using prefixes:
/// - `category:style` - Filter by category (repeat to match any of several)
/// - `source:builtin` / `source:custom` - Filter by origin
///
/// A prefix whose value does not parse is treated as plain text.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    /// Category filters; an item matches if it is in any of them
    pub categories: Vec<Category>,
    /// Origin filter
    pub source: Option<SourceFilter>,
}

impl SearchFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if filter has any constraints.
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.source.is_none()
    }

    pub fn matches(&self, item: &MergedPromptItem) -> bool {
        let category_ok =
            self.categories.is_empty() || self.categories.contains(&item.display_category());
        let source_ok = match self.source {
            None => true,
            Some(SourceFilter::Builtin) => item.is_builtin,
            Some(SourceFilter::Custom) => !item.is_builtin,
        };
        category_ok && source_ok
    }
}

/// Parse a raw query string into (remaining query text, filters).
///
/// # Examples
///
/// ```
/// use effectdeck::entity::Category;
/// use effectdeck::search::parse_query;
///
/// let (text, filter) = parse_query("category:style golden hour");
/// assert_eq!(text, "golden hour");
/// assert_eq!(filter.categories, vec![Category::Style]);
/// ```
pub fn parse_query(raw: &str) -> (String, SearchFilter) {
    let mut filter = SearchFilter::default();
    let mut remaining = Vec::new();

    for token in raw.split_whitespace() {
        if let Some(category) = token
            .strip_prefix("category:")
            .and_then(|v| v.parse::<Category>().ok())
        {
            if !filter.categories.contains(&category) {
                filter.categories.push(category);
            }
        } else if let Some(source) = token.strip_prefix("source:").and_then(parse_source) {
            filter.source = Some(source);
        } else {
            remaining.push(token);
        }
    }

    (remaining.join(" "), filter)
}

fn parse_source(value: &str) -> Option<SourceFilter> {
    match value.to_lowercase().as_str() {
        "builtin" | "built-in" | "default" => Some(SourceFilter::Builtin),
        "custom" => Some(SourceFilter::Custom),
        _ => None,
    }
}

/// Case-insensitive substring match against `title + " " + prompt`.
pub fn matches_text(item: &MergedPromptItem, text: &str) -> bool {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    format!("{} {}", item.title, item.prompt)
        .to_lowercase()
        .contains(&needle)
}

/// Items matching `query`, in their original order.
pub fn filter_items(items: &[MergedPromptItem], query: &str) -> Vec<MergedPromptItem> {
    let (text, filter) = parse_query(query);
    items
        .iter()
        .filter(|item| filter.matches(item) && matches_text(item, &text))
        .cloned()
        .collect()
}

/// Group items by category in display order, skipping empty groups.
/// Items without a category land in [`Category::Custom`].
pub fn group_by_category(items: &[MergedPromptItem]) -> Vec<(Category, Vec<MergedPromptItem>)> {
    Category::ALL
        .iter()
        .filter_map(|&category| {
            let group: Vec<MergedPromptItem> = items
                .iter()
                .filter(|item| item.display_category() == category)
                .cloned()
                .collect();
            (!group.is_empty()).then_some((category, group))
        })
        .collect()
}
