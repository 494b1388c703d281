use super::filters::escape_like_wildcards;
use super::{ParseContext, Parser};
use crate::config::SearchDriver;
use crate::errors::ApiError;
use crate::params::ParameterSet;
use crate::plan::{Predicate, QueryPlan, ScoreColumn};

/// `search=term` (or `q=term`)
#[derive(Debug, Default)]
pub struct SearchParser {
    term: Option<String>,
    driver: SearchDriver,
    columns: Vec<String>,
    score_column: String,
}

impl SearchParser {
    #[must_use]
    pub fn term(&self) -> Option<&str> {
        self.term.as_deref()
    }

    fn apply_native(&self, term: &str, plan: &mut QueryPlan) {
        plan.add_predicate(Predicate::Match {
            columns: self.columns.clone(),
            term: term.to_string(),
        });

        let alias = &self.score_column;
        let wanted = plan.select.is_empty()
            || plan.select.iter().any(|column| column == alias)
            || plan.orders.iter().any(|order| order.column == *alias);
        if wanted {
            plan.score = Some(ScoreColumn {
                alias: alias.clone(),
                columns: self.columns.clone(),
                term: term.to_string(),
            });
        }
    }

    fn apply_like(&self, term: &str, plan: &mut QueryPlan) {
        let keywords: Vec<String> = term.split_whitespace().map(escape_like_wildcards).collect();
        let alternatives = self
            .columns
            .iter()
            .flat_map(|column| {
                keywords.iter().map(move |keyword| Predicate::Like {
                    column: column.clone(),
                    pattern: format!("%{keyword}%"),
                    negated: false,
                    escape: Some('\\'),
                })
            })
            .collect();
        plan.add_predicate(Predicate::Any(alternatives));
    }
}

impl Parser for SearchParser {
    fn parse(&mut self, params: &ParameterSet, ctx: &ParseContext<'_>) -> Result<(), ApiError> {
        let Some(term) = ctx.param(params, &["search", "q"]) else {
            return Ok(());
        };
        if ctx.allow.searchable.is_empty() {
            return Err(ApiError::invalid_search(
                "There are no searchable columns for this endpoint",
            ));
        }

        self.term = Some(term.to_string());
        self.driver = ctx.config.search_driver;
        self.columns.clone_from(&ctx.allow.searchable);
        self.score_column.clone_from(&ctx.config.search_score_column);
        Ok(())
    }

    fn apply(&self, plan: &mut QueryPlan) {
        let Some(term) = &self.term else {
            return;
        };
        if term.trim().is_empty() {
            plan.add_predicate(Predicate::Never);
            return;
        }

        match self.driver {
            SearchDriver::Native => self.apply_native(term, plan),
            SearchDriver::Like => self.apply_like(term, plan),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllowListConfig, HandlerConfig};
    use crate::parsers::test_support::{Fixture, params};

    fn searchable_fixture(driver: SearchDriver) -> Fixture {
        let allow = AllowListConfig {
            searchable: vec!["title".to_string(), "body".to_string()],
            ..AllowListConfig::permissive()
        };
        let mut config = HandlerConfig::default().with_allow(allow);
        config.search_driver = driver;
        Fixture::new(config)
    }

    fn applied(fixture: &Fixture, query: &str, plan: &mut QueryPlan) {
        let mut parser = SearchParser::default();
        parser.parse(&params(query), &fixture.ctx()).unwrap();
        parser.apply(plan);
    }

    #[test]
    fn test_absent_search_is_noop() {
        let mut plan = QueryPlan::new("posts");
        applied(&searchable_fixture(SearchDriver::Native), "sort=id", &mut plan);
        assert_eq!(plan, QueryPlan::new("posts"));
    }

    #[test]
    fn test_blank_search_matches_nothing() {
        let mut plan = QueryPlan::new("posts");
        applied(&searchable_fixture(SearchDriver::Native), "search=%20%20", &mut plan);
        assert_eq!(plan.predicates, vec![Predicate::Never]);
        assert!(plan.score.is_none());
    }

    #[test]
    fn test_no_searchable_columns() {
        let fixture = Fixture::permissive();
        let mut parser = SearchParser::default();
        let err = parser.parse(&params("search=rust"), &fixture.ctx()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidSearch { .. }));
    }

    #[test]
    fn test_native_projects_score_for_full_select() {
        let mut plan = QueryPlan::new("posts");
        applied(&searchable_fixture(SearchDriver::Native), "q=rust", &mut plan);

        assert_eq!(
            plan.predicates,
            vec![Predicate::Match {
                columns: vec!["title".to_string(), "body".to_string()],
                term: "rust".to_string(),
            }]
        );
        assert_eq!(plan.score.as_ref().map(|s| s.alias.as_str()), Some("search_score"));
    }

    #[test]
    fn test_native_score_on_restricted_select() {
        let fixture = searchable_fixture(SearchDriver::Native);

        let mut without = QueryPlan::new("posts");
        without.add_columns(["id"]);
        applied(&fixture, "search=rust", &mut without);
        assert!(without.score.is_none());

        let mut selected = QueryPlan::new("posts");
        selected.add_columns(["id", "search_score"]);
        applied(&fixture, "search=rust", &mut selected);
        assert!(selected.score.is_some());

        let mut sorted = QueryPlan::new("posts");
        sorted.add_columns(["id"]);
        sorted.add_order("search_score", true);
        applied(&fixture, "search=rust", &mut sorted);
        assert!(sorted.score.is_some());
    }

    #[test]
    fn test_like_driver_escapes_keywords() {
        let mut plan = QueryPlan::new("posts");
        applied(&searchable_fixture(SearchDriver::Like), "search=100%25+rust", &mut plan);

        let Predicate::Any(alternatives) = &plan.predicates[0] else {
            panic!("expected OR group");
        };
        assert_eq!(alternatives.len(), 4);
        assert!(alternatives.contains(&Predicate::Like {
            column: "body".to_string(),
            pattern: "%100\\%%".to_string(),
            negated: false,
            escape: Some('\\'),
        }));
        assert!(plan.score.is_none());
    }
}
