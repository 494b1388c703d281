use super::{ParseContext, Parser, split_list};
use crate::config::SearchDriver;
use crate::errors::ApiError;
use crate::matcher::is_allowed;
use crate::params::ParameterSet;
use crate::plan::{OrderBy, QueryPlan, split_path};

/// `sort=-created_at,id`, `sort=comments.created_at`
#[derive(Debug, Default)]
pub struct SortParser {
    sorts: Vec<(String, bool)>,
}

impl SortParser {
    /// `(path, descending)` in request order
    #[must_use]
    pub fn sorts(&self) -> &[(String, bool)] {
        &self.sorts
    }

    /// Relation paths sorted on, in request order
    pub fn relation_paths(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sorts.iter().filter_map(|(path, _)| {
            let (relation, _) = split_path(path);
            (relation != ".").then_some((relation, path.as_str()))
        })
    }
}

impl Parser for SortParser {
    fn parse(&mut self, params: &ParameterSet, ctx: &ParseContext<'_>) -> Result<(), ApiError> {
        let Some(value) = ctx.param(params, &["sort"]) else {
            return Ok(());
        };

        // The score column only exists when a native search runs
        let score_sortable = ctx.config.search_driver == SearchDriver::Native
            && !ctx.allow.searchable.is_empty()
            && ctx
                .param(params, &["search", "q"])
                .is_some_and(|term| !term.trim().is_empty());

        for token in split_list(value) {
            let (path, descending) = match token.strip_prefix('-') {
                Some(path) => (path, true),
                None => (token, false),
            };

            let allowed = if path == ctx.config.search_score_column {
                score_sortable
            } else {
                is_allowed(path, &ctx.allow.sortable)
            };
            if path.is_empty() || !allowed {
                return Err(ApiError::invalid_sort(path));
            }
            self.sorts.push((path.to_string(), descending));
        }
        Ok(())
    }

    fn apply(&self, plan: &mut QueryPlan) {
        for (path, descending) in &self.sorts {
            match split_path(path) {
                (".", column) => plan.add_order(column, *descending),
                (relation, column) => {
                    plan.eager_load_mut(relation).orders.push(OrderBy {
                        column: column.to_string(),
                        descending: *descending,
                    });
                }
            }
        }
    }
}
