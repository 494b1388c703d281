//! Response building: metadata providers, request options, row cleaning and rendering.
//!
//! Metadata is rendered as one header per provider title (`Meta-Total-Count: 42`), or,
//! in envelope mode, inside the body as `{"meta": {"total_count": 42}, "data": [...]}`.
//! Count mode returns the metadata alone.

use async_trait::async_trait;
use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::DatabaseConnection;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::HandlerConfig;
use crate::database::{Row, count_statement, fetch_count};
use crate::errors::ApiError;
use crate::plan::QueryPlan;
use crate::schema::{EntityDescriptor, RelationKind, Schema};

// ============================================================================
// Metadata providers
// ============================================================================

/// Named metric evaluated once the response is built.
#[async_trait]
pub trait MetaProvider: Send + Sync {
    fn title(&self) -> &str;

    /// # Errors
    ///
    /// Returns the error of the underlying query, if any.
    async fn get(&self, db: &DatabaseConnection) -> Result<Value, ApiError>;
}

/// Row count of a plan, ignoring paging, ordering and eager loads.
#[derive(Debug, Clone)]
pub struct CountMetaProvider {
    title: String,
    plan: QueryPlan,
}

impl CountMetaProvider {
    pub const TOTAL: &'static str = "Meta-Total-Count";
    pub const FILTERED: &'static str = "Meta-Filter-Count";

    #[must_use]
    pub fn new(title: &str, plan: &QueryPlan) -> Self {
        Self {
            title: title.to_string(),
            plan: plan.for_count(),
        }
    }

    /// Count of the plan before any request parameter was applied
    #[must_use]
    pub fn total(base: &QueryPlan) -> Self {
        Self::new(Self::TOTAL, base)
    }

    /// Count of the built plan
    #[must_use]
    pub fn filtered(plan: &QueryPlan) -> Self {
        Self::new(Self::FILTERED, plan)
    }
}

#[async_trait]
impl MetaProvider for CountMetaProvider {
    fn title(&self) -> &str {
        &self.title
    }

    async fn get(&self, db: &DatabaseConnection) -> Result<Value, ApiError> {
        let count = fetch_count(db, &count_statement(&self.plan)).await?;
        Ok(Value::from(count))
    }
}

/// Echo of the request's query string without the page parameter.
#[derive(Debug, Clone)]
pub struct QueryMetaProvider {
    query: String,
}

impl QueryMetaProvider {
    pub const TITLE: &'static str = "Meta-Query";

    #[must_use]
    pub fn new(query: String) -> Self {
        Self { query }
    }
}

#[async_trait]
impl MetaProvider for QueryMetaProvider {
    fn title(&self) -> &str {
        Self::TITLE
    }

    async fn get(&self, _db: &DatabaseConnection) -> Result<Value, ApiError> {
        Ok(Value::String(self.query.clone()))
    }
}

/// Evaluate every provider in order, as `(title, value)` pairs.
///
/// # Errors
///
/// Returns the first provider error.
pub async fn evaluate_meta(
    providers: &[Box<dyn MetaProvider>],
    db: &DatabaseConnection,
) -> Result<Vec<(String, Value)>, ApiError> {
    let mut meta = Vec::with_capacity(providers.len());
    for provider in providers {
        meta.push((provider.title().to_string(), provider.get(db).await?));
    }
    Ok(meta)
}

/// `Meta-Total-Count` -> `total_count`
#[must_use]
pub fn meta_key(title: &str) -> String {
    title
        .strip_prefix("Meta-")
        .unwrap_or(title)
        .to_lowercase()
        .replace('-', "_")
}

// ============================================================================
// Request options
// ============================================================================

/// Options of the `config` parameter, e.g. `mode-count,meta-total-count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseOptions {
    /// Respond with the metadata only
    pub count_mode: bool,
    pub envelope: bool,
    pub total_count: bool,
    pub filter_count: bool,
}

impl ResponseOptions {
    #[must_use]
    pub fn new(config: &HandlerConfig) -> Self {
        Self {
            count_mode: false,
            envelope: config.envelope,
            total_count: false,
            filter_count: false,
        }
    }

    /// Parse a comma-separated option list on top of the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidQueryParameter`] for an unknown option.
    pub fn parse(value: &str, config: &HandlerConfig) -> Result<Self, ApiError> {
        let mut options = Self::new(config);
        for option in value.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match option {
                "mode-default" => options.count_mode = false,
                "mode-count" => options.count_mode = true,
                "meta-total-count" => options.total_count = true,
                "meta-filter-count" => options.filter_count = true,
                "response-envelope" => options.envelope = true,
                "response-default" => options.envelope = false,
                _ => {
                    return Err(ApiError::invalid_query_parameter(format!(
                        "Unknown config option \"{option}\""
                    )));
                }
            }
        }
        Ok(options)
    }
}

// ============================================================================
// Cleaning
// ============================================================================

/// Columns explicitly selected by the request, as bare column names.
#[derive(Debug, Clone, Default)]
pub struct SelectedColumns {
    /// `None` when the root projection was not restricted
    pub root: Option<Vec<String>>,
    /// Restricted relation paths
    pub paths: BTreeMap<String, Vec<String>>,
}

fn bare(column: &str) -> &str {
    column.rsplit_once('.').map_or(column, |(_, column)| column)
}

impl SelectedColumns {
    /// Keep `columns` at `path` (`.` for the root)
    pub fn restrict<'c>(&mut self, path: &str, columns: impl IntoIterator<Item = &'c String>) {
        let columns: Vec<String> = columns.into_iter().map(|c| bare(c).to_string()).collect();
        if path == "." {
            self.root = Some(columns);
        } else {
            self.paths.insert(path.to_string(), columns);
        }
    }

    fn at(&self, path: &str) -> Option<&Vec<String>> {
        if path.is_empty() {
            self.root.as_ref()
        } else {
            self.paths.get(path)
        }
    }
}

/// Removes unrequested relations and correlation-only columns from loaded rows.
#[derive(Debug)]
pub struct Cleaner<'a> {
    pub schema: &'a Schema,
    /// Relation paths that may stay; `None` keeps every relation
    pub relations: Option<&'a BTreeSet<String>>,
    /// Restricted projections; `None` keeps every column
    pub columns: Option<&'a SelectedColumns>,
    /// Score alias, kept at the root
    pub score_column: &'a str,
}

impl Cleaner<'_> {
    pub fn clean_rows(&self, entity: &EntityDescriptor, rows: &mut [Row]) {
        for row in rows {
            self.clean_row(entity, row, "");
        }
    }

    fn clean_row(&self, entity: &EntityDescriptor, row: &mut Row, path: &str) {
        for (name, relation) in entity.relations() {
            let relation_path = if path.is_empty() {
                name.to_string()
            } else {
                format!("{path}.{name}")
            };
            if !row.contains_key(name) {
                continue;
            }
            if self
                .relations
                .is_some_and(|allowed| !allowed.contains(&relation_path))
            {
                row.remove(name);
                continue;
            }
            if relation.kind == RelationKind::MorphTo {
                continue;
            }
            let Some(related) = relation.related.as_deref().and_then(|r| self.schema.get(r)) else {
                continue;
            };
            match row.get_mut(name) {
                Some(Value::Object(child)) => self.clean_row(related, child, &relation_path),
                Some(Value::Array(children)) => {
                    for child in children.iter_mut().filter_map(Value::as_object_mut) {
                        self.clean_row(related, child, &relation_path);
                    }
                }
                _ => {}
            }
        }

        if let Some(keep) = self.columns.and_then(|columns| columns.at(path)) {
            row.retain(|key, _| {
                keep.contains(key)
                    || entity.is_relation(key)
                    || entity.computed.iter().any(|(name, _)| name == key)
                    || (path.is_empty() && key == self.score_column)
            });
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Successful response: JSON body plus headers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub headers: HeaderMap,
    pub body: Value,
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, self.headers, Json(self.body)).into_response()
    }
}

fn header_value(value: &Value) -> Option<HeaderValue> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    HeaderValue::from_str(&text).ok()
}

fn meta_headers(meta: &[(String, Value)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (title, value) in meta {
        match (HeaderName::from_bytes(title.as_bytes()), header_value(value)) {
            (Ok(name), Some(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(title = %title, "Skipping metadata that is not a valid header"),
        }
    }
    headers
}

/// Shape `data` and `meta` according to `options`.
///
/// `extra` headers (such as `Content-Range`) are only sent with a flat body.
#[must_use]
pub fn render(options: &ResponseOptions, meta: &[(String, Value)], data: Value, extra: HeaderMap) -> ApiResponse {
    let keyed = |snake: bool| -> Map<String, Value> {
        meta.iter()
            .map(|(title, value)| {
                let key = if snake { meta_key(title) } else { title.clone() };
                (key, value.clone())
            })
            .collect()
    };

    if options.count_mode {
        return ApiResponse {
            headers: meta_headers(meta),
            body: Value::Object(keyed(options.envelope)),
        };
    }

    if options.envelope {
        let mut body = Map::new();
        body.insert("meta".to_string(), Value::Object(keyed(true)));
        body.insert("data".to_string(), data);
        return ApiResponse {
            headers: HeaderMap::new(),
            body: Value::Object(body),
        };
    }

    let mut headers = meta_headers(meta);
    headers.extend(extra);
    ApiResponse { headers, body: data }
}
