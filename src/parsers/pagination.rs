use axum::http::header::HeaderMap;

use super::{ParseContext, Parser};
use crate::errors::ApiError;
use crate::params::ParameterSet;
use crate::plan::QueryPlan;

/// `limit`/`offset`, or `pageSize`/`page`
#[derive(Debug, Default)]
pub struct PaginationParser {
    limit: Option<u64>,
    offset: Option<u64>,
    page_driven: bool,
}

impl PaginationParser {
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Whether the offset was derived from `page`
    #[must_use]
    pub fn page_driven(&self) -> bool {
        self.page_driven
    }
}

fn parse_number(value: &str, what: &str) -> Result<u64, ApiError> {
    value.trim().parse::<u64>().map_err(|_| {
        ApiError::invalid_pagination(format!(
            "The {what} is expected to be numeric, \"{value}\" given"
        ))
    })
}

impl Parser for PaginationParser {
    fn parse(&mut self, params: &ParameterSet, ctx: &ParseContext<'_>) -> Result<(), ApiError> {
        let max = ctx.config.max_page_size;
        let limit = match ctx.param(params, &["limit", "pageSize"]) {
            Some(value) => parse_number(value, "page size or limit")?,
            None => ctx.config.default_page_size,
        };
        if limit > max {
            return Err(ApiError::invalid_pagination(format!(
                "The page size or limit is expected to be at most {max}, {limit} given"
            )));
        }

        let offset = if let Some(value) = ctx.param(params, &["offset"]) {
            Some(parse_number(value, "offset")?)
        } else if let Some(value) = ctx.param(params, &["page"]) {
            let page = parse_number(value, "page")?;
            if page == 0 {
                return Err(ApiError::invalid_pagination("The page is expected to start at 1"));
            }
            self.page_driven = true;
            let offset = (page - 1).checked_mul(limit).ok_or_else(|| {
                ApiError::invalid_pagination(format!("The page {page} is out of range"))
            })?;
            Some(offset)
        } else {
            None
        };
        if let Some(offset) = offset
            && i64::try_from(offset).is_err()
        {
            return Err(ApiError::invalid_pagination(format!(
                "The offset is expected to be at most {}, {offset} given",
                i64::MAX
            )));
        }

        self.limit = Some(limit);
        self.offset = offset;
        Ok(())
    }

    fn apply(&self, plan: &mut QueryPlan) {
        if let Some(limit) = self.limit {
            plan.limit = Some(limit);
            plan.offset = self.offset;
        }
    }
}

/// Sanitize resource name by removing control characters for HTTP headers
fn sanitize_resource_name(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii() && !c.is_ascii_control()).collect()
}

/// Build the `Content-Range` header for a page of `returned` rows.
///
/// The range is `<resource> <first>-<last>/<total>`; an empty page reports
/// `<resource> */<total>`. Control characters are removed from the resource name.
#[must_use]
pub fn calculate_content_range(offset: u64, returned: u64, total_count: u64, resource_name: &str) -> HeaderMap {
    let safe_name = sanitize_resource_name(resource_name);
    let content_range = if returned == 0 {
        format!("{safe_name} */{total_count}")
    } else {
        let last = offset.saturating_add(returned - 1).min(total_count.saturating_sub(1));
        format!("{safe_name} {offset}-{last}/{total_count}")
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = content_range.parse() {
        headers.insert("Content-Range", value);
    }
    headers
}
