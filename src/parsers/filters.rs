//! Filter strategies and the suffix registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plan::{CompareOp, Predicate};

/// How alternatives separated by `|` are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Or,
    And,
}

/// Turns `(column, raw value)` into a predicate.
pub trait FilterStrategy: Send + Sync {
    fn predicate(&self, column: &str, value: &str) -> Predicate;

    /// Combinator for `|` alternatives; negations use AND
    fn combinator(&self) -> Combinator {
        Combinator::Or
    }
}

fn is_null(value: &str) -> bool {
    value.eq_ignore_ascii_case("null")
}
/// Escape LIKE wildcards so `input` matches literally, with backslash as the escape character
/// Escape LIKE wildcards so `input` matches literally; `\\` is the escape character
#[must_use]
pub fn escape_like_wildcards(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct EqualFilter;

impl FilterStrategy for EqualFilter {
    fn predicate(&self, column: &str, value: &str) -> Predicate {
        if is_null(value) {
            return Predicate::Null {
                column: column.to_string(),
                negated: false,
            };
        }
        Predicate::Compare {
            column: column.to_string(),
            op: CompareOp::Eq,
            value: value.to_string(),
        }
    }
}

pub struct NotEqualFilter;

impl FilterStrategy for NotEqualFilter {
    fn predicate(&self, column: &str, value: &str) -> Predicate {
        if is_null(value) {
            return Predicate::Null {
                column: column.to_string(),
                negated: true,
            };
        }
        Predicate::Compare {
            column: column.to_string(),
            op: CompareOp::Ne,
            value: value.to_string(),
        }
    }

    fn combinator(&self) -> Combinator {
        Combinator::And
    }
}

pub struct LikeFilter {
    pub negated: bool,
}

impl FilterStrategy for LikeFilter {
    fn predicate(&self, column: &str, value: &str) -> Predicate {
        Predicate::Like {
            column: column.to_string(),
            pattern: escape_like_wildcards(value).replace('*', "%"),
            negated: self.negated,
            escape: Some('\\'),
        }
    }

    fn combinator(&self) -> Combinator {
        if self.negated { Combinator::And } else { Combinator::Or }
    }
}

/// Comma-separated set membership.
///
/// An empty list matches nothing; an empty negated list matches everything.
pub struct InFilter {
    pub negated: bool,
}

impl FilterStrategy for InFilter {
    fn predicate(&self, column: &str, value: &str) -> Predicate {
        let values = comma_list(value);
        if values.is_empty() {
            return if self.negated {
                Predicate::Always
            } else {
                Predicate::Never
            };
        }
        Predicate::In {
            column: column.to_string(),
            values,
            negated: self.negated,
        }
    }

    fn combinator(&self) -> Combinator {
        if self.negated { Combinator::And } else { Combinator::Or }
    }
}

pub struct CompareFilter(pub CompareOp);

impl FilterStrategy for CompareFilter {
    fn predicate(&self, column: &str, value: &str) -> Predicate {
        Predicate::Compare {
            column: column.to_string(),
            op: self.0,
            value: value.to_string(),
        }
    }
}

/// Suffix token to strategy.
///
/// The empty suffix (also accepted as `default`) is equality.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn FilterStrategy>>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("", Arc::new(EqualFilter));
        registry.register("not", Arc::new(NotEqualFilter));
        registry.register("lk", Arc::new(LikeFilter { negated: false }));
        registry.register("not-lk", Arc::new(LikeFilter { negated: true }));
        registry.register("in", Arc::new(InFilter { negated: false }));
        registry.register("not-in", Arc::new(InFilter { negated: true }));
        registry.register("st", Arc::new(CompareFilter(CompareOp::Lt)));
        registry.register("gt", Arc::new(CompareFilter(CompareOp::Gt)));
        registry.register("min", Arc::new(CompareFilter(CompareOp::Gte)));
        registry.register("max", Arc::new(CompareFilter(CompareOp::Lte)));
        registry
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut suffixes: Vec<_> = self.filters.keys().collect();
        suffixes.sort();
        f.debug_struct("FilterRegistry").field("suffixes", &suffixes).finish()
    }
}

impl FilterRegistry {
    /// Registry without any filter, not even equality
    #[must_use]
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// Register (or replace) the strategy for `suffix`
    pub fn register(&mut self, suffix: &str, strategy: Arc<dyn FilterStrategy>) {
        self.filters.insert(suffix.to_string(), strategy);
    }

    #[must_use]
    pub fn resolve(&self, suffix: &str) -> Option<Arc<dyn FilterStrategy>> {
        let suffix = if suffix == "default" { "" } else { suffix };
        self.filters.get(suffix).cloned()
    }

    /// Split a trailing registered suffix off `path`, longest suffix first.
    ///
    /// `title-not-lk` gives `("title", "not-lk")`; without a suffix the whole path is
    /// returned with `""`.
    #[must_use]
    pub fn split_suffix<'a>(&self, path: &'a str) -> (&'a str, String) {
        let mut suffixes: Vec<&String> = self.filters.keys().filter(|s| !s.is_empty()).collect();
        suffixes.sort_by_key(|s| std::cmp::Reverse(s.len()));

        for suffix in suffixes {
            if let Some(column) = path.strip_suffix(suffix.as_str()).and_then(|p| p.strip_suffix('-'))
                && !column.is_empty()
            {
                return (column, suffix.clone());
            }
        }
        (path, String::new())
    }

    /// Build the predicate for one filter value, splitting `|` alternatives.
    #[must_use]
    pub fn build(strategy: &dyn FilterStrategy, column: &str, raw: &str) -> Predicate {
        let mut alternatives: Vec<Predicate> = raw
            .split('|')
            .map(|value| strategy.predicate(column, value))
            .collect();

        if alternatives.len() == 1 {
            return alternatives.remove(0);
        }
        match strategy.combinator() {
            Combinator::Or => Predicate::Any(alternatives),
            Combinator::And => Predicate::All(alternatives),
        }
    }
}
