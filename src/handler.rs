//! Request handler.
//!
//! [`ApiHandler`] holds what is shared between requests (configuration, schema and
//! filter registry). Every request gets its own [`QueryRequest`], which runs the
//! parsers, builds the plan and renders the response.
//!
//! ```no_run
//! use axum::{Router, extract::State, response::Response, routing::get};
//! use querycrate::{ApiHandler, HandlerConfig, ParameterSet, Schema, EntityDescriptor};
//! use sea_orm::DatabaseConnection;
//!
//! #[derive(Clone)]
//! struct AppState {
//!     db: DatabaseConnection,
//!     api: ApiHandler,
//! }
//!
//! async fn list_posts(State(state): State<AppState>, params: ParameterSet) -> Response {
//!     state.api.get_all(&state.db, "posts", &params).await
//! }
//!
//! fn router(db: DatabaseConnection) -> Router {
//!     let schema = Schema::new().entity(EntityDescriptor::new("posts", "posts"));
//!     let api = ApiHandler::new(HandlerConfig::default(), schema);
//!     Router::new()
//!         .route("/posts", get(list_posts))
//!         .with_state(AppState { db, api })
//! }
//! ```

use axum::{
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{AllowListConfig, HandlerConfig};
use crate::database::{Loader, Row, fetch_rows, select_statement};
use crate::errors::ApiError;
use crate::params::ParameterSet;
use crate::parsers::pagination::calculate_content_range;
use crate::parsers::{
    ExpansionParser, ExpansionPlan, FilterParser, FilterRegistry, FilterStrategy, PaginationParser,
    ParseContext, Parser, SearchParser, SelectParser, SortParser,
};
use crate::plan::{CompareOp, Predicate, QueryPlan};
use crate::response::{
    ApiResponse, Cleaner, CountMetaProvider, MetaProvider, QueryMetaProvider, ResponseOptions,
    SelectedColumns, evaluate_meta, render,
};
use crate::schema::{EntityDescriptor, Schema};

/// Shared entry point, cheap to clone into every request.
#[derive(Debug, Clone)]
pub struct ApiHandler {
    config: Arc<HandlerConfig>,
    schema: Arc<Schema>,
    filters: Arc<FilterRegistry>,
}

impl ApiHandler {
    #[must_use]
    pub fn new(config: HandlerConfig, schema: Schema) -> Self {
        Self {
            config: Arc::new(config),
            schema: Arc::new(schema),
            filters: Arc::new(FilterRegistry::default()),
        }
    }

    /// Register an additional filter strategy under `suffix`
    #[must_use]
    pub fn with_filter(mut self, suffix: &str, strategy: impl FilterStrategy + 'static) -> Self {
        Arc::make_mut(&mut self.filters).register(suffix, Arc::new(strategy));
        self
    }

    #[must_use]
    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Parse a collection request for `entity`.
    ///
    /// # Errors
    ///
    /// Returns the first validation error; nothing is executed.
    pub fn parse_multiple(&self, entity: &str, params: &ParameterSet) -> Result<QueryRequest, ApiError> {
        QueryRequest::parse(self.clone(), entity, params.clone(), None)
    }

    /// Parse a request for the row of `entity` whose primary key is `id`.
    ///
    /// Only `select`, `sort`, `expand` and `config` are read; filters, search and
    /// pagination do not apply to a single row.
    ///
    /// # Errors
    ///
    /// Returns the first validation error; nothing is executed.
    pub fn parse_single(&self, entity: &str, id: &str, params: &ParameterSet) -> Result<QueryRequest, ApiError> {
        QueryRequest::parse(self.clone(), entity, params.clone(), Some(id))
    }

    /// Render an error with the configured status table
    #[must_use]
    pub fn render_error(&self, err: ApiError) -> Response {
        err.render(&self.config.statuses)
    }

    /// Parse, execute and render a collection request.
    pub async fn get_all(&self, db: &DatabaseConnection, entity: &str, params: &ParameterSet) -> Response {
        match self.parse_multiple(entity, params) {
            Ok(request) => self.finish(request, db).await,
            Err(err) => self.render_error(err),
        }
    }

    /// Parse, execute and render a single-row request.
    pub async fn get_one(&self, db: &DatabaseConnection, entity: &str, id: &str, params: &ParameterSet) -> Response {
        match self.parse_single(entity, id, params) {
            Ok(request) => self.finish(request, db).await,
            Err(err) => self.render_error(err),
        }
    }

    async fn finish(&self, mut request: QueryRequest, db: &DatabaseConnection) -> Response {
        match request.response(db).await {
            Ok(response) => response.into_response(),
            Err(err) => self.render_error(err),
        }
    }
}

/// Parsed state and plan of one request.
#[derive(Debug)]
pub struct QueryRequest {
    handler: ApiHandler,
    entity: EntityDescriptor,
    allow: AllowListConfig,
    params: ParameterSet,
    select: SelectParser,
    filter: FilterParser,
    sort: SortParser,
    expansion: ExpansionParser,
    search: SearchParser,
    pagination: PaginationParser,
    options: ResponseOptions,
    /// Plan before any request parameter, used for the total count
    base: QueryPlan,
    plan: QueryPlan,
    applied: bool,
    multiple: bool,
}

impl QueryRequest {
    fn parse(handler: ApiHandler, entity: &str, params: ParameterSet, id: Option<&str>) -> Result<Self, ApiError> {
        let Some(entity) = handler.schema.get(entity).cloned() else {
            return Err(ApiError::internal(
                format!("Entity '{entity}' is not registered"),
                None,
            ));
        };
        let allow = match &entity.allow {
            Some(allow) => handler.config.allow.merged(allow),
            None => handler.config.allow.clone(),
        };

        let mut base = QueryPlan::new(&entity.table);
        if let Some(id) = id {
            base.add_predicate(Predicate::Compare {
                column: entity.primary_key.clone(),
                op: CompareOp::Eq,
                value: id.to_string(),
            });
        }

        let options = ResponseOptions::new(&handler.config);
        let mut request = Self {
            handler,
            entity,
            allow,
            params,
            select: SelectParser::default(),
            filter: FilterParser::default(),
            sort: SortParser::default(),
            expansion: ExpansionParser::default(),
            search: SearchParser::default(),
            pagination: PaginationParser::default(),
            options,
            plan: base.clone(),
            base,
            applied: false,
            multiple: id.is_none(),
        };
        request.parse_parameters()?;
        tracing::debug!(
            entity = %request.entity.name,
            multiple = request.multiple,
            "Parsed query parameters"
        );
        Ok(request)
    }

    fn parse_parameters(&mut self) -> Result<(), ApiError> {
        let ctx = ParseContext {
            config: &self.handler.config,
            allow: &self.allow,
            schema: &self.handler.schema,
            entity: &self.entity,
            filters: &self.handler.filters,
        };
        let params = &self.params;

        self.select.parse(params, &ctx)?;
        if self.multiple {
            self.filter.parse(params, &ctx)?;
        }
        self.sort.parse(params, &ctx)?;
        self.expansion.parse(params, &ctx)?;
        if self.multiple {
            self.search.parse(params, &ctx)?;
            self.pagination.parse(params, &ctx)?;
        }
        if let Some(value) = ctx.param(params, &["config"]) {
            self.options = ResponseOptions::parse(value, ctx.config)?;
        }

        let expanded = self.expansion.plan();
        if let Some((_, path)) = self
            .filter
            .relation_paths()
            .find(|(relation, _)| !expanded.contains(relation))
        {
            return Err(ApiError::invalid_filter(path));
        }
        if let Some((_, path)) = self
            .sort
            .relation_paths()
            .find(|(relation, _)| !expanded.contains(relation))
        {
            return Err(ApiError::invalid_sort(path));
        }
        Ok(())
    }

    /// Restrict the request to `predicate`, regardless of the parameters.
    ///
    /// The scope also applies to the total count.
    pub fn scope(&mut self, predicate: Predicate) -> &mut Self {
        self.base.add_predicate(predicate.clone());
        self.plan.add_predicate(predicate);
        self
    }

    /// Apply every parser to the plan, once.
    pub fn apply(&mut self) -> &QueryPlan {
        if !self.applied {
            let parsers: [&dyn Parser; 6] = [
                &self.select,
                &self.filter,
                &self.sort,
                &self.expansion,
                &self.search,
                &self.pagination,
            ];
            for parser in parsers {
                parser.apply(&mut self.plan);
            }
            self.applied = true;
        }
        &self.plan
    }

    #[must_use]
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    #[must_use]
    pub fn expansion_plan(&self) -> &ExpansionPlan {
        self.expansion.plan()
    }

    #[must_use]
    pub fn options(&self) -> &ResponseOptions {
        &self.options
    }

    #[must_use]
    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    /// Execute the plan and return every row.
    ///
    /// # Errors
    ///
    /// Returns the first failing statement, see [`crate::database::fetch_rows`].
    pub async fn get(&mut self, db: &DatabaseConnection) -> Result<Vec<Row>, ApiError> {
        self.apply();
        self.fetch(db, &self.plan).await
    }

    /// Execute the plan for its first row only.
    ///
    /// # Errors
    ///
    /// Same as [`QueryRequest::get`].
    pub async fn first(&mut self, db: &DatabaseConnection) -> Result<Option<Row>, ApiError> {
        self.apply();
        let mut plan = self.plan.clone();
        plan.limit = Some(1);
        plan.offset = None;
        Ok(self.fetch(db, &plan).await?.into_iter().next())
    }

    async fn fetch(&self, db: &DatabaseConnection, plan: &QueryPlan) -> Result<Vec<Row>, ApiError> {
        let mut rows = fetch_rows(db, &select_statement(plan)).await?;
        Loader::new(db, &self.handler.schema, &plan.eager_loads)
            .load(&self.entity, &mut rows)
            .await?;
        self.clean(&mut rows);
        Ok(rows)
    }

    fn clean(&self, rows: &mut [Row]) {
        let config = &self.handler.config;

        let mut selected = SelectedColumns::default();
        if !self.select.columns().is_empty() {
            selected.restrict(".", self.select.columns());
        }
        let expansion = self.expansion.plan();
        for path in expansion.relation_paths() {
            if let Some(columns) = expansion.get(path)
                && !columns.requested.is_empty()
            {
                selected.restrict(path, &columns.requested);
            }
        }
        let expanded = self.expansion.expanded();

        let cleaner = Cleaner {
            schema: &self.handler.schema,
            relations: config.clean_expansions.then_some(&expanded),
            columns: config.clean_selects.then_some(&selected),
            score_column: &config.search_score_column,
        };
        cleaner.clean_rows(&self.entity, rows);
    }

    fn meta_providers(&self) -> Vec<Box<dyn MetaProvider>> {
        let mut providers: Vec<Box<dyn MetaProvider>> = Vec::new();
        if self.options.total_count {
            providers.push(Box::new(CountMetaProvider::total(&self.base)));
        }
        if self.options.filter_count {
            providers.push(Box::new(CountMetaProvider::filtered(&self.plan)));
        }
        if self.pagination.page_driven() {
            let page = self.handler.config.param("page");
            providers.push(Box::new(QueryMetaProvider::new(
                self.params.to_query_string(&[page.as_str()]),
            )));
        }
        providers
    }

    /// Execute the request and render it according to the request options.
    ///
    /// # Errors
    ///
    /// Returns the first failing statement or metadata provider.
    pub async fn response(&mut self, db: &DatabaseConnection) -> Result<ApiResponse, ApiError> {
        self.apply();

        let mut returned = 0;
        let data = if self.options.count_mode {
            Value::Null
        } else if self.multiple {
            let rows = self.get(db).await?;
            returned = u64::try_from(rows.len()).unwrap_or_default();
            Value::Array(rows.into_iter().map(Value::Object).collect())
        } else {
            self.first(db).await?.map_or(Value::Null, Value::Object)
        };

        let meta = evaluate_meta(&self.meta_providers(), db).await?;

        // Content-Range spans the filtered rows, like `filter_count`
        let mut extra = HeaderMap::new();
        if self.multiple
            && self.options.total_count
            && !self.options.count_mode
            && !self.options.envelope
        {
            let filtered = match meta.iter().find(|(title, _)| title == CountMetaProvider::FILTERED) {
                Some((_, value)) => value.clone(),
                None => CountMetaProvider::filtered(&self.plan).get(db).await?,
            };
            extra = calculate_content_range(
                self.plan.offset.unwrap_or_default(),
                returned,
                filtered.as_u64().unwrap_or_default(),
                &self.entity.table,
            );
        }

        Ok(render(&self.options, &meta, data, extra))
    }
}
