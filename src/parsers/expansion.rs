//! Relation expansion.
//!
//! `expand=comments[title],comments.user,tags` loads `comments` (restricted to
//! `title`), the `user` of every comment and all columns of `tags`.
//!
//! Restricting a projection must never drop the keys that tie rows to their parent.
//! While walking each path the parser records, per relation path:
//!
//! - the parent-side keys every child relation needs (added to the parent path, `.`
//!   being the root), and
//! - when columns were requested for the path, the related-side keys of the relation
//!   itself.
//!
//! A path with requested columns selects those columns plus its required keys. A path
//! without requested columns selects everything. Root keys are only added to the base
//! projection when that projection is already restricted.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use super::{ParseContext, Parser};
use crate::errors::ApiError;
use crate::matcher::is_allowed;
use crate::params::ParameterSet;
use crate::plan::QueryPlan;
use crate::schema::{EntityDescriptor, RelationKind};

static EXPANSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\[,]+)(?:\[([^\]]*)\])?,?").expect("valid expansion pattern"));

/// Columns of one relation path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathColumns {
    /// Keys needed to stitch this path to its parent and children
    pub required: Vec<String>,
    /// Columns named in the request
    pub requested: Vec<String>,
}

impl PathColumns {
    fn require(&mut self, columns: impl IntoIterator<Item = String>) {
        extend_unique(&mut self.required, columns);
    }

    fn request(&mut self, columns: impl IntoIterator<Item = String>) {
        extend_unique(&mut self.requested, columns);
    }

    /// Union of required and requested columns
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        let mut columns = self.required.clone();
        extend_unique(&mut columns, self.requested.iter().cloned());
        columns
    }
}

fn extend_unique(target: &mut Vec<String>, columns: impl IntoIterator<Item = String>) {
    for column in columns {
        if !target.contains(&column) {
            target.push(column);
        }
    }
}

/// Fully-qualified columns required at every expanded path, `.` being the root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionPlan {
    paths: BTreeMap<String, PathColumns>,
}

impl ExpansionPlan {
    /// Required and requested columns at `path`, empty if the path is unknown
    #[must_use]
    pub fn columns(&self, path: &str) -> Vec<String> {
        self.paths.get(path).map(PathColumns::all).unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&PathColumns> {
        self.paths.get(path)
    }

    /// Projection for a relation path; `None` selects every column
    #[must_use]
    pub fn projection(&self, path: &str) -> Option<Vec<String>> {
        self.paths
            .get(path)
            .filter(|columns| !columns.requested.is_empty())
            .map(PathColumns::all)
    }

    /// Every expanded relation path, root excluded
    pub fn relation_paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str).filter(|path| *path != ".")
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        path != "." && self.paths.contains_key(path)
    }

    fn entry(&mut self, path: &str) -> &mut PathColumns {
        self.paths.entry(path.to_string()).or_default()
    }
}

#[derive(Debug, Default)]
pub struct ExpansionParser {
    plan: ExpansionPlan,
}

impl ExpansionParser {
    #[must_use]
    pub fn plan(&self) -> &ExpansionPlan {
        &self.plan
    }

    /// Expanded relation paths, prefixes included
    #[must_use]
    pub fn expanded(&self) -> BTreeSet<String> {
        self.plan.relation_paths().map(str::to_string).collect()
    }

    fn expand(&mut self, path: &str, columns: &[&str], ctx: &ParseContext<'_>) -> Result<(), ApiError> {
        // `comments.*` grants `comments` itself
        let allowed = is_allowed(path, &ctx.allow.expandable)
            || is_allowed(&format!("{path}.*"), &ctx.allow.expandable);
        if !allowed {
            return Err(ApiError::invalid_expand(path, "not allowed on this endpoint"));
        }

        let segments: Vec<&str> = path.split('.').collect();
        let mut entity: &EntityDescriptor = ctx.entity;
        let mut parent_path = ".".to_string();
        let mut morph_to: Option<&str> = None;

        for (index, segment) in segments.iter().enumerate() {
            if let Some(previous) = morph_to {
                return Err(ApiError::invalid_expand(
                    path,
                    format!("'{previous}' is polymorphic and cannot be expanded further"),
                ));
            }

            let relation = entity
                .get_relation(segment)
                .ok_or_else(|| ApiError::unknown_resource_relation(&entity.name, *segment))?;
            let related = match &relation.related {
                Some(name) => Some(ctx.schema.get(name).ok_or_else(|| {
                    ApiError::internal(
                        "Relation points at an unregistered entity",
                        Some(format!("{}.{segment} -> {name}", entity.name)),
                    )
                })?),
                None => None,
            };

            let current_path = segments[..=index].join(".");
            let terminal = index + 1 == segments.len();

            if terminal && !columns.is_empty() && relation.kind.rejects_columns() {
                return Err(ApiError::invalid_expand(
                    path,
                    "polymorphic relations do not accept columns",
                ));
            }

            let parent_keys: Vec<String> = relation
                .parent_keys(entity)
                .iter()
                .map(|column| entity.qualified(column))
                .collect();
            self.plan.entry(&parent_path).require(parent_keys);

            let current = self.plan.entry(&current_path);
            if terminal
                && !columns.is_empty()
                && let Some(related) = related
            {
                current.require(
                    relation
                        .related_keys(Some(related))
                        .iter()
                        .map(|column| related.qualified(column)),
                );
                current.request(columns.iter().map(|column| related.qualified(column)));
            }

            if relation.kind == RelationKind::MorphTo {
                morph_to = Some(*segment);
            } else if let Some(related) = related {
                entity = related;
            }
            parent_path = current_path;
        }

        tracing::debug!(path = %path, columns = ?columns, "Resolved expansion");
        Ok(())
    }
}

impl Parser for ExpansionParser {
    fn parse(&mut self, params: &ParameterSet, ctx: &ParseContext<'_>) -> Result<(), ApiError> {
        let Some(value) = ctx.param(params, &["expand", "with"]) else {
            return Ok(());
        };

        for captures in EXPANSION.captures_iter(value) {
            let path = captures[1].trim();
            if path.is_empty() {
                continue;
            }
            let columns: Vec<&str> = captures
                .get(2)
                .map(|m| super::split_list(m.as_str()).collect())
                .unwrap_or_default();
            self.expand(path, &columns, ctx)?;
        }
        Ok(())
    }

    fn apply(&self, plan: &mut QueryPlan) {
        for path in self.plan.relation_paths() {
            let projection = self.plan.projection(path);
            plan.eager_load_mut(path).columns = projection;
        }

        let root = self.plan.columns(".");
        if !root.is_empty() && !plan.select.is_empty() {
            plan.add_columns(root);
        }
    }
}
