//! # querycrate
//!
//! Turns REST query parameters into database queries.
//!
//! ```text
//! GET /posts?select=id,title&filter-lk[title]=Rust*&sort=-id&expand=comments[body]&limit=10
//! ```
//!
//! Parameters are validated against glob allow-lists, collected into an
//! engine-independent [`QueryPlan`], translated into `sea-query` statements and executed
//! through `sea-orm`. Related rows are loaded per relation path and attached to their
//! parents; the response is rendered as JSON with metadata in headers or in an envelope.
//!
//! Start with [`ApiHandler`], a [`Schema`] describing the entities and their relations,
//! and a [`HandlerConfig`].

pub mod config;
pub mod database;
pub mod errors;
pub mod handler;
pub mod matcher;
pub mod params;
pub mod parsers;
pub mod plan;
pub mod response;
pub mod schema;

pub use config::{AllowListConfig, AllowListOverride, FilterStyle, HandlerConfig, SearchDriver};
pub use errors::{ApiError, ErrorKind, StatusTable};
pub use handler::{ApiHandler, QueryRequest};
pub use matcher::is_allowed;
pub use params::{ParameterSet, QueryParameters};
pub use parsers::{FilterRegistry, FilterStrategy};
pub use plan::{Predicate, QueryPlan};
pub use response::{ApiResponse, MetaProvider};
pub use schema::{EntityDescriptor, RelationDescriptor, RelationKind, Schema};
