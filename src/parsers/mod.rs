//! # Query Parameter Parsers
//!
//! Each parser owns one parameter family and works in two steps:
//!
//! 1. [`Parser::parse`] reads the [`ParameterSet`], validates every path against the
//!    allow-lists and keeps the result in private state. All validation errors are
//!    raised here, before the plan is touched.
//! 2. [`Parser::apply`] adds that state to the [`QueryPlan`].
//!
//! The handler applies them in a fixed order: select, filter, sort, expansion, search,
//! pagination. Search must come after select and sort because it projects the score
//! column depending on both; pagination comes last.
//!
//! ## Example
//!
//! ```text
//! GET /posts?select=id,title&filter-lk[title]=Rust*&sort=-id&expand=comments[body]&limit=10
//! ```

pub mod expansion;
pub mod filter;
pub mod filters;
pub mod pagination;
pub mod search;
pub mod select;
pub mod sort;

pub use expansion::{ExpansionParser, ExpansionPlan};
pub use filter::FilterParser;
pub use filters::{Combinator, FilterRegistry, FilterStrategy};
pub use pagination::PaginationParser;
pub use search::SearchParser;
pub use select::SelectParser;
pub use sort::SortParser;

use crate::config::{AllowListConfig, HandlerConfig};
use crate::errors::ApiError;
use crate::params::ParameterSet;
use crate::plan::QueryPlan;
use crate::schema::{EntityDescriptor, Schema};

/// Everything a parser may consult while parsing.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub config: &'a HandlerConfig,
    /// Global allow-lists merged with the entity override
    pub allow: &'a AllowListConfig,
    pub schema: &'a Schema,
    pub entity: &'a EntityDescriptor,
    pub filters: &'a FilterRegistry,
}

impl ParseContext<'_> {
    /// Value of a reserved parameter, trying `names` in order
    #[must_use]
    pub fn param<'p>(&self, params: &'p ParameterSet, names: &[&str]) -> Option<&'p str> {
        names
            .iter()
            .find_map(|name| params.get(&self.config.param(name)))
    }
}

pub trait Parser: Send {
    /// Read and validate this parser's parameters.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the first offending parameter.
    fn parse(&mut self, params: &ParameterSet, ctx: &ParseContext<'_>) -> Result<(), ApiError>;

    fn apply(&self, plan: &mut QueryPlan);
}

/// Comma-separated tokens, trimmed, empty ones dropped
pub(crate) fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|token| !token.is_empty())
}
