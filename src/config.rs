//! Handler configuration.
//!
//! [`HandlerConfig`] is built once at startup, by hand or from JSON, and handed to
//! every [`ApiHandler`](crate::ApiHandler). Entities may narrow the allow-lists with an
//! [`AllowListOverride`], merged when the handler is attached to the entity.

use serde::Deserialize;

use crate::errors::StatusTable;

/// How filters are spelled in the query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStyle {
    /// `filter[title]=x`, `filter-lk[comments.title]=x*`, `filter[title-lk]=x*`
    #[default]
    Bracketed,
    /// `title=x`, `title-lk=x*`: every non-reserved parameter is a filter
    Flat,
}

/// How `search` is turned into a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDriver {
    /// Engine fulltext: `MATCH (cols) AGAINST (? IN BOOLEAN MODE)`
    #[default]
    Native,
    /// `col LIKE '%keyword%'` for every column and keyword
    Like,
}

/// Glob allow-lists for each capability, see [`crate::matcher::is_allowed`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AllowListConfig {
    pub filterable: Vec<String>,
    pub sortable: Vec<String>,
    pub selectable: Vec<String>,
    pub expandable: Vec<String>,
    /// Columns searched by the search parser (plain names, not patterns)
    pub searchable: Vec<String>,
}

impl Default for AllowListConfig {
    fn default() -> Self {
        Self {
            filterable: Vec::new(),
            sortable: Vec::new(),
            selectable: vec!["*".to_string()],
            expandable: Vec::new(),
            searchable: Vec::new(),
        }
    }
}

impl AllowListConfig {
    /// Allow every capability on every path
    #[must_use]
    pub fn permissive() -> Self {
        let all = vec!["*".to_string()];
        Self {
            filterable: all.clone(),
            sortable: all.clone(),
            selectable: all.clone(),
            expandable: all,
            searchable: Vec::new(),
        }
    }

    /// Apply an entity override; each list present in it replaces the global one.
    #[must_use]
    pub fn merged(&self, over: &AllowListOverride) -> Self {
        let pick = |own: &Vec<String>, other: &Option<Vec<String>>| {
            other.clone().unwrap_or_else(|| own.clone())
        };
        Self {
            filterable: pick(&self.filterable, &over.filterable),
            sortable: pick(&self.sortable, &over.sortable),
            selectable: pick(&self.selectable, &over.selectable),
            expandable: pick(&self.expandable, &over.expandable),
            searchable: pick(&self.searchable, &over.searchable),
        }
    }
}

/// Per-entity allow-list override; `None` keeps the global list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AllowListOverride {
    pub filterable: Option<Vec<String>>,
    pub sortable: Option<Vec<String>>,
    pub selectable: Option<Vec<String>>,
    pub expandable: Option<Vec<String>>,
    pub searchable: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Prepended to every reserved parameter name (`_select`, `_sort`, ...)
    pub prefix: String,
    pub filter_style: FilterStyle,
    pub default_page_size: u64,
    pub max_page_size: u64,
    pub search_driver: SearchDriver,
    /// Alias of the projected relevance score
    pub search_score_column: String,
    /// Render `{meta, data}` instead of a flat body with meta headers
    pub envelope: bool,
    /// Remove relations that were loaded but not requested
    pub clean_expansions: bool,
    /// Remove key columns added only to stitch relations together
    pub clean_selects: bool,
    pub allow: AllowListConfig,
    pub statuses: StatusTable,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            filter_style: FilterStyle::default(),
            default_page_size: 30,
            max_page_size: 500,
            search_driver: SearchDriver::default(),
            search_score_column: "search_score".to_string(),
            envelope: false,
            clean_expansions: true,
            clean_selects: true,
            allow: AllowListConfig::default(),
            statuses: StatusTable::default(),
        }
    }
}

impl HandlerConfig {
    /// Underscore-prefixed parameters with flat filters (`_sort=-id&title-lk=A*`)
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            prefix: "_".to_string(),
            filter_style: FilterStyle::Flat,
            ..Self::default()
        }
    }

    /// Parse a configuration document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn with_allow(mut self, allow: AllowListConfig) -> Self {
        self.allow = allow;
        self
    }

    /// Full name of a reserved parameter
    #[must_use]
    pub fn param(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    /// Whether `key` is one of the reserved parameter names
    #[must_use]
    pub fn is_reserved(&self, key: &str) -> bool {
        let Some(name) = key.strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        matches!(
            name,
            "select" | "fields" | "sort" | "expand" | "with" | "search" | "q" | "limit"
                | "offset" | "page" | "pageSize" | "config" | "filter"
        ) || (self.prefix.is_empty() && name.starts_with("filter"))
            || (!self.prefix.is_empty() && !name.is_empty())
    }
}
