//! Row fetching and eager loading.
//!
//! Relations are loaded one statement per relation path and level: the parent key
//! values of the whole level go into a single `IN`, and the children are grouped by
//! their correlation column and attached under the relation name. Keys are compared
//! as strings so an integer key matches the same key read back as text.

use sea_orm::{
    ConnectionTrait, DatabaseConnection, FromQueryResult, JsonValue, Value as DbValue,
    sea_query::SelectStatement,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;

use super::statements::{COUNT_ALIAS, PIVOT_KEY, related_join_column, relation_statement};
use crate::errors::ApiError;
use crate::plan::EagerLoad;
use crate::schema::{EntityDescriptor, RelationDescriptor, RelationKind, Schema};

pub type Row = Map<String, Value>;

/// Entity default relations are followed at most this many levels deep
pub const MAX_DEFAULT_DEPTH: usize = 3;

type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + 'a>>;

/// Execute a select and return every row as a JSON object.
///
/// # Errors
///
/// Returns [`ApiError::UnknownResourceField`] when the engine rejects a column, or a
/// database error otherwise.
pub async fn fetch_rows(db: &DatabaseConnection, stmt: &SelectStatement) -> Result<Vec<Row>, ApiError> {
    let statement = db.get_database_backend().build(stmt);
    tracing::debug!(sql = %statement, "Executing select");

    let rows = db.query_all(statement).await.map_err(ApiError::from_db_error)?;
    rows.iter()
        .map(|row| match JsonValue::from_query_result(row, "") {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ApiError::internal(
                "Unexpected row shape",
                Some(other.to_string()),
            )),
            Err(err) => Err(ApiError::from_db_error(err)),
        })
        .collect()
}

/// Execute a count statement built by [`super::count_statement`].
///
/// # Errors
///
/// Same as [`fetch_rows`].
pub async fn fetch_count(db: &DatabaseConnection, stmt: &SelectStatement) -> Result<u64, ApiError> {
    let statement = db.get_database_backend().build(stmt);
    tracing::debug!(sql = %statement, "Executing count");

    let Some(row) = db.query_one(statement).await.map_err(ApiError::from_db_error)? else {
        return Ok(0);
    };
    let count: i64 = row.try_get("", COUNT_ALIAS).map_err(ApiError::from_db_error)?;
    Ok(u64::try_from(count).unwrap_or_default())
}

fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn db_value(value: &Value) -> Option<DbValue> {
    match value {
        Value::String(s) => Some(s.clone().into()),
        Value::Number(n) => n
            .as_i64()
            .map(DbValue::from)
            .or_else(|| n.as_f64().map(DbValue::from)),
        Value::Bool(b) => Some((*b).into()),
        _ => None,
    }
}

/// Distinct non-null key values, first occurrence order
fn unique_keys<'v>(values: impl Iterator<Item = &'v Value>) -> Vec<DbValue> {
    let mut seen = BTreeSet::new();
    values
        .filter(|value| key_string(value).is_some_and(|key| seen.insert(key)))
        .filter_map(db_value)
        .collect()
}

/// Attach `children` to `rows` under `name`, matching `parent_column` to `child_column`.
fn stitch(
    rows: &mut [Row],
    children: Vec<Row>,
    name: &str,
    parent_column: &str,
    child_column: &str,
    to_many: bool,
) {
    let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
    for mut child in children {
        let key = child.get(child_column).and_then(key_string);
        if child_column == PIVOT_KEY {
            child.remove(PIVOT_KEY);
        }
        if let Some(key) = key {
            grouped.entry(key).or_default().push(Value::Object(child));
        }
    }

    for row in rows {
        let matched = row
            .get(parent_column)
            .and_then(key_string)
            .and_then(|key| grouped.get(&key));
        let value = match (matched, to_many) {
            (Some(children), true) => Value::Array(children.clone()),
            (Some(children), false) => children.first().cloned().unwrap_or(Value::Null),
            (None, true) => Value::Array(Vec::new()),
            (None, false) => Value::Null,
        };
        row.insert(name.to_string(), value);
    }
}

fn apply_computed(entity: &EntityDescriptor, rows: &mut [Row]) {
    for row in rows {
        for (name, field) in &entity.computed {
            let value = field(row);
            row.insert(name.clone(), value);
        }
    }
}

/// Loads the eager loads of a plan onto already fetched rows.
pub struct Loader<'a> {
    db: &'a DatabaseConnection,
    schema: &'a Schema,
    loads: &'a BTreeMap<String, EagerLoad>,
}

impl<'a> Loader<'a> {
    #[must_use]
    pub fn new(db: &'a DatabaseConnection, schema: &'a Schema, loads: &'a BTreeMap<String, EagerLoad>) -> Self {
        Self { db, schema, loads }
    }

    /// Load every requested and default relation of `entity` onto `rows`, then
    /// evaluate computed fields.
    ///
    /// # Errors
    ///
    /// Propagates the first failing statement. A default relation naming an
    /// undeclared relation is an [`ApiError::UnknownResourceRelation`].
    pub async fn load(&self, entity: &EntityDescriptor, rows: &mut [Row]) -> Result<(), ApiError> {
        self.load_level(entity, String::new(), rows, 0, Vec::new()).await
    }

    /// Relations to load at one level, keyed by name, with the nested remainder paths
    fn level_paths(
        &self,
        entity: &EntityDescriptor,
        prefix: &str,
        depth: usize,
        extra: Vec<String>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut relative: BTreeSet<String> = extra.into_iter().collect();
        relative.extend(
            self.loads
                .keys()
                .filter_map(|path| path.strip_prefix(prefix))
                .filter(|path| !path.is_empty())
                .map(str::to_string),
        );
        if depth < MAX_DEFAULT_DEPTH {
            relative.extend(entity.default_relations.iter().cloned());
        }

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for path in relative {
            match path.split_once('.') {
                Some((head, rest)) => grouped
                    .entry(head.to_string())
                    .or_default()
                    .push(rest.to_string()),
                None => {
                    grouped.entry(path).or_default();
                }
            }
        }
        grouped
    }

    fn load_level<'b>(
        &'b self,
        entity: &'b EntityDescriptor,
        prefix: String,
        rows: &'b mut [Row],
        depth: usize,
        extra: Vec<String>,
    ) -> LoadFuture<'b> {
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(());
            }

            for (name, nested) in self.level_paths(entity, &prefix, depth, extra) {
                let Some(relation) = entity.get_relation(&name) else {
                    return Err(ApiError::unknown_resource_relation(&entity.name, &name));
                };
                let path = format!("{prefix}{name}");
                if relation.kind == RelationKind::MorphTo {
                    self.load_morph_to(relation, &name, &path, rows).await?;
                } else {
                    self.load_relation(entity, relation, &name, &path, rows, depth, nested)
                        .await?;
                }
            }

            apply_computed(entity, rows);
            Ok(())
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn load_relation(
        &self,
        parent: &EntityDescriptor,
        relation: &RelationDescriptor,
        name: &str,
        path: &str,
        rows: &mut [Row],
        depth: usize,
        nested: Vec<String>,
    ) -> Result<(), ApiError> {
        let related_name = relation.related.as_deref().unwrap_or_default();
        let Some(related) = self.schema.get(related_name) else {
            return Err(ApiError::internal(
                format!("Relation '{name}' points at an unregistered entity"),
                Some(related_name.to_string()),
            ));
        };

        let parent_column = relation.parent_join_column(parent);
        let to_many = relation.kind.is_to_many();
        let keys = unique_keys(rows.iter().filter_map(|row| row.get(&parent_column)));
        if keys.is_empty() {
            stitch(rows, Vec::new(), name, &parent_column, PIVOT_KEY, to_many);
            return Ok(());
        }

        let load = self.loads.get(path).cloned().unwrap_or_default();
        let stmt = relation_statement(relation, related, &load, keys);
        let mut children = fetch_rows(self.db, &stmt).await?;
        tracing::debug!(path = %path, count = children.len(), "Loaded relation");

        self.load_level(related, format!("{path}."), &mut children, depth + 1, nested)
            .await?;
        stitch(
            rows,
            children,
            name,
            &parent_column,
            related_join_column(relation),
            to_many,
        );
        Ok(())
    }

    /// One statement per morph type found on the parent rows. Owners are not
    /// expanded further.
    async fn load_morph_to(
        &self,
        relation: &RelationDescriptor,
        name: &str,
        path: &str,
        rows: &mut [Row],
    ) -> Result<(), ApiError> {
        let Some(type_column) = relation.morph_type.as_deref() else {
            return Err(ApiError::internal(
                format!("Relation '{name}' has no morph type column"),
                None,
            ));
        };
        let id_column = relation.foreign_key.as_str();

        let mut by_type: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, row) in rows.iter().enumerate() {
            if let Some(type_value) = row.get(type_column).and_then(Value::as_str) {
                by_type.entry(type_value.to_string()).or_default().push(index);
            }
        }
        for row in rows.iter_mut() {
            row.insert(name.to_string(), Value::Null);
        }

        let load = self.loads.get(path).cloned().unwrap_or_default();
        for (type_value, indices) in by_type {
            let Some(target) = self.schema.resolve_morph(&type_value) else {
                tracing::warn!(morph_type = %type_value, relation = %name, "No entity registered for morph type");
                continue;
            };
            let keys = unique_keys(indices.iter().filter_map(|&index| rows[index].get(id_column)));
            if keys.is_empty() {
                continue;
            }

            let mut owners = fetch_rows(self.db, &relation_statement(relation, target, &load, keys)).await?;
            apply_computed(target, &mut owners);
            let owners: HashMap<String, Row> = owners
                .into_iter()
                .filter_map(|owner| {
                    let key = owner.get(&relation.local_key).and_then(key_string)?;
                    Some((key, owner))
                })
                .collect();

            for index in indices {
                let key = rows[index].get(id_column).and_then(key_string);
                let owner = key.and_then(|key| owners.get(&key)).cloned();
                if let Some(owner) = owner {
                    rows[index].insert(name.to_string(), Value::Object(owner));
                }
            }
        }
        Ok(())
    }
}
