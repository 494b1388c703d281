use super::{ParseContext, Parser, split_list};
use crate::errors::ApiError;
use crate::matcher::is_allowed;
use crate::params::ParameterSet;
use crate::plan::QueryPlan;

/// `select=id,title`
#[derive(Debug, Default)]
pub struct SelectParser {
    columns: Vec<String>,
}

impl SelectParser {
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Parser for SelectParser {
    fn parse(&mut self, params: &ParameterSet, ctx: &ParseContext<'_>) -> Result<(), ApiError> {
        let Some(value) = ctx.param(params, &["select", "fields"]) else {
            return Ok(());
        };

        for column in split_list(value) {
            if !is_allowed(column, &ctx.allow.selectable) {
                return Err(ApiError::invalid_select(column));
            }
            if !self.columns.iter().any(|c| c == column) {
                self.columns.push(column.to_string());
            }
        }
        Ok(())
    }

    fn apply(&self, plan: &mut QueryPlan) {
        plan.add_columns(&self.columns);
    }
}
