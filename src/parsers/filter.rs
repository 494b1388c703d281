use regex::Regex;
use std::sync::LazyLock;

use super::filters::FilterRegistry;
use super::{ParseContext, Parser};
use crate::config::FilterStyle;
use crate::errors::ApiError;
use crate::matcher::is_allowed;
use crate::params::ParameterSet;
use crate::plan::{Predicate, QueryPlan, split_path};

/// `filter[path]`, `filter-<suffix>[path]`, `filter[a][b]`
static FILTER_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^filter(?:-([a-z][a-z\-]*))?((?:\[[^\[\]]+\])+)$").expect("valid filter key pattern")
});

/// One validated filter, filed under its relation path (`.` for the root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilter {
    pub relation: String,
    pub path: String,
    pub predicate: Predicate,
}

#[derive(Debug, Default)]
pub struct FilterParser {
    filters: Vec<ParsedFilter>,
}

impl FilterParser {
    #[must_use]
    pub fn filters(&self) -> &[ParsedFilter] {
        &self.filters
    }

    /// Relation filters as `(relation path, full path)`
    pub fn relation_paths(&self) -> impl Iterator<Item = (&str, &str)> {
        self.filters
            .iter()
            .filter(|f| f.relation != ".")
            .map(|f| (f.relation.as_str(), f.path.as_str()))
    }

    fn add(
        &mut self,
        path: &str,
        suffix: &str,
        value: &str,
        ctx: &ParseContext<'_>,
    ) -> Result<(), ApiError> {
        let Some(strategy) = ctx.filters.resolve(suffix) else {
            return Err(ApiError::invalid_query_parameter(format!(
                "No filter registered under the suffix \"{suffix}\""
            )));
        };
        if !is_allowed(path, &ctx.allow.filterable) {
            return Err(ApiError::invalid_filter(path));
        }

        let (relation, column) = split_path(path);
        let predicate = FilterRegistry::build(strategy.as_ref(), column, value);
        tracing::debug!(path = %path, suffix = %suffix, "Parsed filter");

        self.filters.push(ParsedFilter {
            relation: relation.to_string(),
            path: path.to_string(),
            predicate,
        });
        Ok(())
    }

    fn parse_bracketed(&mut self, key: &str, value: &str, ctx: &ParseContext<'_>) -> Result<(), ApiError> {
        let Some(name) = key.strip_prefix(ctx.config.prefix.as_str()) else {
            return Ok(());
        };
        if !(name.starts_with("filter[") || name.starts_with("filter-")) {
            return Ok(());
        }

        let Some(captures) = FILTER_KEY.captures(name) else {
            return Err(ApiError::invalid_query_parameter(format!(
                "Malformed filter parameter \"{key}\""
            )));
        };

        let path = captures[2]
            .trim_matches(|c| c == '[' || c == ']')
            .split("][")
            .collect::<Vec<_>>()
            .join(".");

        match captures.get(1) {
            Some(suffix) => self.add(&path, suffix.as_str(), value, ctx),
            None => {
                let (path, suffix) = ctx.filters.split_suffix(&path);
                self.add(path, &suffix, value, ctx)
            }
        }
    }
}

impl Parser for FilterParser {
    fn parse(&mut self, params: &ParameterSet, ctx: &ParseContext<'_>) -> Result<(), ApiError> {
        for (key, value) in params.iter() {
            match ctx.config.filter_style {
                FilterStyle::Bracketed => self.parse_bracketed(key, value, ctx)?,
                FilterStyle::Flat => {
                    if ctx.config.is_reserved(key) {
                        continue;
                    }
                    let (path, suffix) = ctx.filters.split_suffix(key);
                    self.add(path, &suffix, value, ctx)?;
                }
            }
        }
        Ok(())
    }

    fn apply(&self, plan: &mut QueryPlan) {
        for filter in &self.filters {
            if filter.relation == "." {
                plan.add_predicate(filter.predicate.clone());
            } else {
                plan.eager_load_mut(&filter.relation)
                    .predicates
                    .push(filter.predicate.clone());
            }
        }
    }
}
