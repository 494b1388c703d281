//! # Query Errors
//!
//! Every failure the translation pipeline can produce is an [`ApiError`]. Parsers
//! raise the validation variants while reading the request, before anything is added
//! to the query plan. Database failures are caught once, when the plan is executed,
//! and unknown-column reports from the engine are turned into
//! [`ApiError::UnknownResourceField`].
//!
//! ## Status codes
//!
//! Each variant belongs to an [`ErrorKind`]. The HTTP status for a kind comes from a
//! [`StatusTable`], which carries the defaults below and can be overridden from
//! configuration:
//!
//! | kind | default |
//! |---|---|
//! | query parameter, field, relation, select, sort, filter, expand, search, pagination | 422 |
//! | not found | 404 |
//! | unauthorized | 401 |
//! | forbidden | 403 |
//! | too many requests | 429 |
//! | database, internal | 500 |
//!
//! ## Logging
//!
//! Database and internal details are logged with `tracing` and never sent to the
//! client. Validation errors are logged at debug level.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use regex::Regex;
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Engine messages reporting a column that does not exist (SQLite, MySQL, PostgreSQL).
static UNKNOWN_COLUMN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"no such column: ([\w.]+)",
        r"Unknown column '([^']+)'",
        r#"column "([^"]+)" does not exist"#,
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Errors raised while parsing query parameters or executing the built query.
#[derive(Debug)]
pub enum ApiError {
    /// A parameter is malformed, uses an unsupported filter suffix or an unknown option
    InvalidQueryParameter {
        /// User-facing error message
        message: String,
    },

    /// The database rejected a column that does not exist
    UnknownResourceField {
        /// Column reported by the engine
        field: String,
    },

    /// An expansion segment is not a relation of the entity it was resolved on
    UnknownResourceRelation {
        /// Entity the segment was looked up on
        entity: String,
        /// Offending segment
        relation: String,
    },

    /// Column not selectable
    InvalidSelect { path: String },

    /// Column not sortable, or sort on a relation that was not expanded
    InvalidSort { path: String },

    /// Path not filterable, or filter on a relation that was not expanded
    InvalidFilter { path: String },

    /// Relation not expandable, or an expansion the relation kind cannot honour
    InvalidExpand { path: String, reason: String },

    /// Search requested but no searchable columns are configured
    InvalidSearch { message: String },

    /// Page size or page number out of range
    InvalidPagination { message: String },

    /// 404 Not Found
    NotFound {
        resource: String,
        id: Option<String>,
    },

    /// 401 Unauthorized
    Unauthorized { message: String },

    /// 403 Forbidden
    Forbidden { message: String },

    /// 429 Too Many Requests
    TooManyRequests { message: String },

    /// Database error (details logged, not exposed)
    Database {
        /// User-facing generic message
        message: String,
        /// Internal error (logged, not sent to user)
        internal: DbErr,
    },

    /// Generic internal error (details logged, not exposed)
    Internal {
        message: String,
        internal: Option<String>,
    },
}

/// Category of an [`ApiError`], used to look up its HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQueryParameter,
    UnknownResourceField,
    UnknownResourceRelation,
    InvalidSelect,
    InvalidSort,
    InvalidFilter,
    InvalidExpand,
    InvalidSearch,
    InvalidPagination,
    NotFound,
    Unauthorized,
    Forbidden,
    TooManyRequests,
    Database,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn default_status(self) -> StatusCode {
        match self {
            Self::InvalidQueryParameter
            | Self::UnknownResourceField
            | Self::UnknownResourceRelation
            | Self::InvalidSelect
            | Self::InvalidSort
            | Self::InvalidFilter
            | Self::InvalidExpand
            | Self::InvalidSearch
            | Self::InvalidPagination => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::Database | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error kind to HTTP status mapping.
///
/// Deserializes from a map of kind name to status code, e.g.
/// `{"invalid_filter": 400, "unknown_resource_relation": 400}`. Kinds not listed keep
/// their default status.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StatusTable {
    overrides: HashMap<ErrorKind, u16>,
}

impl StatusTable {
    /// Override the status used for one error kind
    #[must_use]
    pub fn with(mut self, kind: ErrorKind, status: StatusCode) -> Self {
        self.overrides.insert(kind, status.as_u16());
        self
    }

    #[must_use]
    pub fn status_for(&self, kind: ErrorKind) -> StatusCode {
        self.overrides
            .get(&kind)
            .and_then(|code| StatusCode::from_u16(*code).ok())
            .unwrap_or_else(|| kind.default_status())
    }
}

impl ApiError {
    // ============================================================================
    // Constructors
    // ============================================================================

    pub fn invalid_query_parameter(message: impl Into<String>) -> Self {
        Self::InvalidQueryParameter {
            message: message.into(),
        }
    }

    pub fn unknown_resource_field(field: impl Into<String>) -> Self {
        Self::UnknownResourceField {
            field: field.into(),
        }
    }

    pub fn unknown_resource_relation(entity: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::UnknownResourceRelation {
            entity: entity.into(),
            relation: relation.into(),
        }
    }

    pub fn invalid_select(path: impl Into<String>) -> Self {
        Self::InvalidSelect { path: path.into() }
    }

    pub fn invalid_sort(path: impl Into<String>) -> Self {
        Self::InvalidSort { path: path.into() }
    }

    pub fn invalid_filter(path: impl Into<String>) -> Self {
        Self::InvalidFilter { path: path.into() }
    }

    pub fn invalid_expand(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExpand {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_search(message: impl Into<String>) -> Self {
        Self::InvalidSearch {
            message: message.into(),
        }
    }

    pub fn invalid_pagination(message: impl Into<String>) -> Self {
        Self::InvalidPagination {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: Option<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::TooManyRequests {
            message: message.into(),
        }
    }

    /// Wrap a database error; the details are logged but never sent to the user.
    pub fn database(err: DbErr) -> Self {
        Self::Database {
            message: "A database error occurred".to_string(),
            internal: err,
        }
    }

    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    /// Translate an error raised while executing a built query.
    ///
    /// Unknown-column reports become [`ApiError::UnknownResourceField`] with the
    /// column the engine named; anything else is a [`ApiError::Database`].
    #[must_use]
    pub fn from_db_error(err: DbErr) -> Self {
        let text = err.to_string();
        let column = UNKNOWN_COLUMN_PATTERNS
            .iter()
            .find_map(|pattern| pattern.captures(&text))
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string());

        match column {
            Some(field) => {
                tracing::debug!(field = %field, error = %text, "Engine rejected unknown column");
                Self::unknown_resource_field(field)
            }
            None => Self::from(err),
        }
    }

    // ============================================================================
    // Introspection
    // ============================================================================

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidQueryParameter { .. } => ErrorKind::InvalidQueryParameter,
            Self::UnknownResourceField { .. } => ErrorKind::UnknownResourceField,
            Self::UnknownResourceRelation { .. } => ErrorKind::UnknownResourceRelation,
            Self::InvalidSelect { .. } => ErrorKind::InvalidSelect,
            Self::InvalidSort { .. } => ErrorKind::InvalidSort,
            Self::InvalidFilter { .. } => ErrorKind::InvalidFilter,
            Self::InvalidExpand { .. } => ErrorKind::InvalidExpand,
            Self::InvalidSearch { .. } => ErrorKind::InvalidSearch,
            Self::InvalidPagination { .. } => ErrorKind::InvalidPagination,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::TooManyRequests { .. } => ErrorKind::TooManyRequests,
            Self::Database { .. } => ErrorKind::Database,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// HTTP status under the default table
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.kind().default_status()
    }

    /// Get the user-facing error message (sanitized)
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidQueryParameter { message }
            | Self::InvalidSearch { message }
            | Self::InvalidPagination { message }
            | Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::TooManyRequests { message }
            | Self::Database { message, .. }
            | Self::Internal { message, .. } => message.clone(),
            Self::UnknownResourceField { field } => format!("Unknown field '{field}'"),
            Self::UnknownResourceRelation { entity, relation } => {
                format!("Unknown relation '{relation}' on {entity}")
            }
            Self::InvalidSelect { path } => format!("Selecting '{path}' is not allowed"),
            Self::InvalidSort { path } => format!("Sorting by '{path}' is not allowed"),
            Self::InvalidFilter { path } => format!("Filtering by '{path}' is not allowed"),
            Self::InvalidExpand { path, reason } => {
                format!("Cannot expand '{path}': {reason}")
            }
            Self::NotFound { resource, id } => match id {
                Some(id) => format!("{resource} with ID '{id}' not found"),
                None => format!("{resource} not found"),
            },
        }
    }

    fn log_internal(&self, status: StatusCode) {
        match self {
            Self::Database { internal, .. } => {
                tracing::error!(error = ?internal, "Database error occurred");
            }
            Self::Internal {
                internal: Some(details),
                ..
            } => {
                tracing::error!(details = %details, "Internal error occurred");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %status,
                    "Query error"
                );
            }
        }
    }

    /// Render the error with statuses looked up in `statuses`.
    pub fn render(self, statuses: &StatusTable) -> Response {
        let status = statuses.status_for(self.kind());
        self.log_internal(status);

        let body = ErrorResponse {
            error: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Error response sent to users (sanitized)
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.render(&StatusTable::default())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ApiError {}

/// `DbErr::RecordNotFound` becomes 404, everything else a sanitized database error.
impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        match &err {
            DbErr::RecordNotFound(msg) => {
                let resource = msg.split_whitespace().next().unwrap_or("Resource");
                Self::not_found(resource, None)
            }
            _ => Self::database(err),
        }
    }
}
