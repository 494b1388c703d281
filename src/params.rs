use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Deserialize;
use std::convert::Infallible;
use utoipa::{IntoParams, ToSchema};

/// Ordered query parameters of one request.
///
/// Keys keep the position of their first occurrence; a repeated key replaces the
/// earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    pairs: Vec<(String, String)>,
}

impl ParameterSet {
    /// Decode an `application/x-www-form-urlencoded` query string (without `?`).
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()).into_owned())
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::default();
        for (key, value) in pairs {
            set.insert(key, value);
        }
        set
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Re-encode the parameters, leaving out `excluded` keys.
    #[must_use]
    pub fn to_query_string(&self, excluded: &[&str]) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.iter().filter(|(k, _)| !excluded.contains(k)) {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

impl<S> FromRequestParts<S> for ParameterSet
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_query(parts.uri.query().unwrap_or_default()))
    }
}

/// Reserved query parameters, for OpenAPI documentation.
///
/// Filters are open-ended (`filter[<path>]`, `filter-<suffix>[<path>]`) and cannot be
/// listed here.
///
/// # Filter suffixes
/// `not`, `lk`, `not-lk`, `in`, `not-in`, `st`, `gt`, `min`, `max`. Without a suffix
/// the filter tests equality. `|` separates alternatives, `null` tests for NULL and
/// `*` is a wildcard in `lk` filters.
#[derive(Deserialize, IntoParams, ToSchema, Default)]
#[into_params(parameter_in = Query)]
pub struct QueryParameters {
    /// Comma-separated columns to return.
    #[param(example = "id,title")]
    pub select: Option<String>,
    /// Comma-separated columns to sort by, `-` for descending.
    #[param(example = "-created_at,id")]
    pub sort: Option<String>,
    /// Comma-separated relations to load, optionally restricted to columns.
    #[param(example = "comments[title],comments.user")]
    pub expand: Option<String>,
    /// Fulltext search term.
    #[param(example = "rust")]
    pub search: Option<String>,
    /// Page size for offset pagination.
    #[param(example = 30)]
    pub limit: Option<u64>,
    /// Rows to skip for offset pagination.
    #[param(example = 0)]
    pub offset: Option<u64>,
    /// Page number (1-based) for page pagination.
    #[param(example = 1)]
    pub page: Option<u64>,
    /// Page size for page pagination.
    #[serde(rename = "pageSize")]
    #[param(example = 30)]
    pub page_size: Option<u64>,
    /// Response options, e.g. `meta-total-count,response-envelope`.
    #[param(example = "meta-total-count")]
    pub config: Option<String>,
}
