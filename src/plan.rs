//! Engine-independent query plan.
//!
//! Parsers never touch SQL. Each one adds its part to a [`QueryPlan`], which
//! [`crate::database::statements`] later translates into `sea-query` statements.
//! Columns are stored as written: bare names are resolved against the table of the
//! scope they belong to (the root table, or the related table of an eager load).

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: String,
    },
    /// `IS NULL`, or `IS NOT NULL` when negated
    Null { column: String, negated: bool },
    Like {
        column: String,
        pattern: String,
        negated: bool,
        /// Escape character used in `pattern`, if any
        escape: Option<char>,
    },
    In {
        column: String,
        values: Vec<String>,
        negated: bool,
    },
    /// Fulltext match; the term is always bound, never inlined
    Match { columns: Vec<String>, term: String },
    /// OR group
    Any(Vec<Predicate>),
    /// AND group
    All(Vec<Predicate>),
    Always,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// Fulltext relevance projected as `alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreColumn {
    pub alias: String,
    pub columns: Vec<String>,
    pub term: String,
}

/// Query scope of one expanded relation path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EagerLoad {
    /// `None` loads every column
    pub columns: Option<Vec<String>>,
    pub predicates: Vec<Predicate>,
    pub orders: Vec<OrderBy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub table: String,
    /// Projection; empty selects every column
    pub select: Vec<String>,
    pub score: Option<ScoreColumn>,
    /// AND-ed together
    pub predicates: Vec<Predicate>,
    pub orders: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Keyed by dotted relation path
    pub eager_loads: BTreeMap<String, EagerLoad>,
}

impl QueryPlan {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            select: Vec::new(),
            score: None,
            predicates: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            eager_loads: BTreeMap::new(),
        }
    }

    /// `column` qualified with the root table unless already qualified
    #[must_use]
    pub fn qualify(&self, column: &str) -> String {
        qualify(&self.table, column)
    }

    /// Add columns to the projection, skipping ones already present.
    pub fn add_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for column in columns {
            let column = column.as_ref();
            let qualified = self.qualify(column);
            if !self.select.iter().any(|c| self.qualify(c) == qualified) {
                self.select.push(column.to_string());
            }
        }
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    pub fn add_order(&mut self, column: &str, descending: bool) {
        self.orders.push(OrderBy {
            column: column.to_string(),
            descending,
        });
    }

    /// Eager load for `path`, created with every column selected if missing
    pub fn eager_load_mut(&mut self, path: &str) -> &mut EagerLoad {
        self.eager_loads.entry(path.to_string()).or_default()
    }

    /// Copy used for counting: no paging, ordering, or eager loads
    #[must_use]
    pub fn for_count(&self) -> Self {
        let mut plan = self.clone();
        plan.limit = None;
        plan.offset = None;
        plan.orders.clear();
        plan.eager_loads.clear();
        plan
    }
}

pub(crate) fn qualify(table: &str, column: &str) -> String {
    if column.contains('.') {
        column.to_string()
    } else {
        format!("{table}.{column}")
    }
}

/// Split `comments.user.name` into `("comments.user", "name")`.
///
/// Plain columns are filed under the root path `.`.
#[must_use]
pub fn split_path(path: &str) -> (&str, &str) {
    path.rsplit_once('.').unwrap_or((".", path))
}
