//! Entity and relation registry.
//!
//! Relations are declared up front instead of being discovered at runtime. The
//! expansion parser walks these descriptors to find the key columns each side of a
//! relation needs, and the loader uses the same descriptors to fetch and stitch the
//! related rows.
//!
//! ```
//! use querycrate::schema::{EntityDescriptor, RelationDescriptor, Schema};
//!
//! let schema = Schema::new()
//!     .entity(
//!         EntityDescriptor::new("posts", "posts")
//!             .relation("comments", RelationDescriptor::has_many("comments", "post_id", "id"))
//!             .relation("user", RelationDescriptor::belongs_to("users", "user_id", "id")),
//!     )
//!     .entity(EntityDescriptor::new("comments", "comments"))
//!     .entity(EntityDescriptor::new("users", "users"));
//!
//! assert!(schema.get("posts").unwrap().get_relation("comments").is_some());
//! ```

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::AllowListOverride;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
    HasManyThrough,
    MorphMany,
    MorphTo,
    MorphToMany,
    MorphedByMany,
}

impl RelationKind {
    /// Whether the relation yields a list rather than a single row
    #[must_use]
    pub fn is_to_many(self) -> bool {
        !matches!(self, Self::HasOne | Self::BelongsTo | Self::MorphTo)
    }

    /// Morph relations whose related columns cannot be restricted
    #[must_use]
    pub fn rejects_columns(self) -> bool {
        matches!(self, Self::MorphMany | Self::MorphTo | Self::MorphToMany)
    }
}

/// Intermediate table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pivot {
    pub table: String,
    /// Pivot column holding the parent key
    pub parent_key: String,
    /// Pivot column holding the related key
    pub related_key: String,
    /// `(type column, type value)` restricting a polymorphic pivot
    pub morph: Option<(String, String)>,
}

/// Intermediate table of a has-many-through relation.
///
/// For `countries -> users -> posts`: `table = users`, `first_key = country_id`,
/// `second_local_key = id`, and the relation's foreign key is `posts.user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Through {
    pub table: String,
    /// Through column referencing the parent
    pub first_key: String,
    /// Through column referenced by the related table
    pub second_local_key: String,
}

/// Declared relation between two entities.
///
/// Key meaning by kind:
///
/// | kind | `foreign_key` | `local_key` |
/// |---|---|---|
/// | HasOne / HasMany | related column | parent column |
/// | BelongsTo | parent column | related owner column |
/// | HasManyThrough | related column pointing into the through table | parent column |
/// | MorphMany | related morph id column | parent column |
/// | MorphTo | parent morph id column | owner column on the target |
/// | pivot kinds | unused, see [`Pivot`] | parent column |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    /// Related entity name; `None` for `MorphTo`, resolved per row through the morph map
    pub related: Option<String>,
    pub foreign_key: String,
    pub local_key: String,
    /// Morph type column (related side for MorphMany, parent side for MorphTo)
    pub morph_type: Option<String>,
    /// Type value identifying the parent for MorphMany
    pub morph_value: Option<String>,
    pub pivot: Option<Pivot>,
    pub through: Option<Through>,
}

impl RelationDescriptor {
    fn base(kind: RelationKind, related: Option<&str>, foreign_key: &str, local_key: &str) -> Self {
        Self {
            kind,
            related: related.map(str::to_string),
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
            morph_type: None,
            morph_value: None,
            pivot: None,
            through: None,
        }
    }

    #[must_use]
    pub fn has_one(related: &str, foreign_key: &str, local_key: &str) -> Self {
        Self::base(RelationKind::HasOne, Some(related), foreign_key, local_key)
    }

    #[must_use]
    pub fn has_many(related: &str, foreign_key: &str, local_key: &str) -> Self {
        Self::base(RelationKind::HasMany, Some(related), foreign_key, local_key)
    }

    #[must_use]
    pub fn belongs_to(related: &str, foreign_key: &str, owner_key: &str) -> Self {
        Self::base(RelationKind::BelongsTo, Some(related), foreign_key, owner_key)
    }

    #[must_use]
    pub fn belongs_to_many(related: &str, pivot_table: &str, parent_key: &str, related_key: &str) -> Self {
        let mut relation = Self::base(RelationKind::BelongsToMany, Some(related), related_key, "id");
        relation.pivot = Some(Pivot {
            table: pivot_table.to_string(),
            parent_key: parent_key.to_string(),
            related_key: related_key.to_string(),
            morph: None,
        });
        relation
    }

    /// `related.foreign_key` points at `through.second_local_key`, and
    /// `through.first_key` points at `parent.local_key`.
    #[must_use]
    pub fn has_many_through(
        related: &str,
        through_table: &str,
        first_key: &str,
        foreign_key: &str,
        local_key: &str,
        second_local_key: &str,
    ) -> Self {
        let mut relation = Self::base(RelationKind::HasManyThrough, Some(related), foreign_key, local_key);
        relation.through = Some(Through {
            table: through_table.to_string(),
            first_key: first_key.to_string(),
            second_local_key: second_local_key.to_string(),
        });
        relation
    }

    /// Related rows point back with `(morph_id, morph_type = morph_value)`.
    #[must_use]
    pub fn morph_many(related: &str, morph_id: &str, morph_type: &str, morph_value: &str) -> Self {
        let mut relation = Self::base(RelationKind::MorphMany, Some(related), morph_id, "id");
        relation.morph_type = Some(morph_type.to_string());
        relation.morph_value = Some(morph_value.to_string());
        relation
    }

    /// Parent row carries `(morph_id, morph_type)`; the target entity comes from the morph map.
    #[must_use]
    pub fn morph_to(morph_id: &str, morph_type: &str, owner_key: &str) -> Self {
        let mut relation = Self::base(RelationKind::MorphTo, None, morph_id, owner_key);
        relation.morph_type = Some(morph_type.to_string());
        relation
    }

    /// Polymorphic many-to-many from the owning side, e.g. `posts -> tags` via `taggables`.
    #[must_use]
    pub fn morph_to_many(
        related: &str,
        pivot_table: &str,
        parent_key: &str,
        related_key: &str,
        type_column: &str,
        type_value: &str,
    ) -> Self {
        Self::morph_pivot(
            RelationKind::MorphToMany,
            related,
            pivot_table,
            parent_key,
            related_key,
            type_column,
            type_value,
        )
    }

    /// Inverse of [`RelationDescriptor::morph_to_many`], e.g. `tags -> posts`.
    #[must_use]
    pub fn morphed_by_many(
        related: &str,
        pivot_table: &str,
        parent_key: &str,
        related_key: &str,
        type_column: &str,
        type_value: &str,
    ) -> Self {
        Self::morph_pivot(
            RelationKind::MorphedByMany,
            related,
            pivot_table,
            parent_key,
            related_key,
            type_column,
            type_value,
        )
    }

    fn morph_pivot(
        kind: RelationKind,
        related: &str,
        pivot_table: &str,
        parent_key: &str,
        related_key: &str,
        type_column: &str,
        type_value: &str,
    ) -> Self {
        let mut relation = Self::base(kind, Some(related), related_key, "id");
        relation.pivot = Some(Pivot {
            table: pivot_table.to_string(),
            parent_key: parent_key.to_string(),
            related_key: related_key.to_string(),
            morph: Some((type_column.to_string(), type_value.to_string())),
        });
        relation
    }

    /// Use a parent column other than `id` as the local key
    #[must_use]
    pub fn local_key(mut self, local_key: &str) -> Self {
        self.local_key = local_key.to_string();
        self
    }

    /// Parent column whose value correlates parent and related rows
    #[must_use]
    pub fn parent_join_column(&self, parent: &EntityDescriptor) -> String {
        match self.kind {
            RelationKind::HasOne | RelationKind::HasMany | RelationKind::HasManyThrough => {
                self.local_key.clone()
            }
            RelationKind::BelongsTo | RelationKind::MorphTo => self.foreign_key.clone(),
            RelationKind::BelongsToMany
            | RelationKind::MorphToMany
            | RelationKind::MorphedByMany
            | RelationKind::MorphMany => parent.primary_key.clone(),
        }
    }

    /// Parent columns that must be fetched to load this relation
    #[must_use]
    pub fn parent_keys(&self, parent: &EntityDescriptor) -> Vec<String> {
        let mut keys = vec![self.parent_join_column(parent)];
        if self.kind == RelationKind::MorphTo {
            keys.extend(self.morph_type.clone());
        }
        keys
    }

    /// Related columns that must be fetched to stitch rows to their parent.
    ///
    /// Empty for `MorphTo`, whose target table is only known per row.
    #[must_use]
    pub fn related_keys(&self, related: Option<&EntityDescriptor>) -> Vec<String> {
        match self.kind {
            RelationKind::HasOne
            | RelationKind::HasMany
            | RelationKind::HasManyThrough => vec![self.foreign_key.clone()],
            RelationKind::BelongsTo => vec![self.local_key.clone()],
            RelationKind::BelongsToMany
            | RelationKind::MorphToMany
            | RelationKind::MorphedByMany
            | RelationKind::MorphMany => related
                .map(|entity| vec![entity.primary_key.clone()])
                .unwrap_or_default(),
            RelationKind::MorphTo => Vec::new(),
        }
    }
}

/// Derived attribute evaluated on a materialized row.
pub type ComputedField = Arc<dyn Fn(&Map<String, Value>) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    relations: BTreeMap<String, RelationDescriptor>,
    /// Relation paths loaded on every request
    pub default_relations: Vec<String>,
    pub computed: Vec<(String, ComputedField)>,
    pub allow: Option<AllowListOverride>,
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("relations", &self.relations)
            .field("default_relations", &self.default_relations)
            .field(
                "computed",
                &self.computed.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("allow", &self.allow)
            .finish()
    }
}

impl EntityDescriptor {
    #[must_use]
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: "id".to_string(),
            relations: BTreeMap::new(),
            default_relations: Vec::new(),
            computed: Vec::new(),
            allow: None,
        }
    }

    #[must_use]
    pub fn primary_key(mut self, column: &str) -> Self {
        self.primary_key = column.to_string();
        self
    }

    #[must_use]
    pub fn relation(mut self, name: &str, relation: RelationDescriptor) -> Self {
        self.relations.insert(name.to_string(), relation);
        self
    }

    /// Always load `path`, even when not requested
    #[must_use]
    pub fn with_default(mut self, path: &str) -> Self {
        self.default_relations.push(path.to_string());
        self
    }

    #[must_use]
    pub fn computed<F>(mut self, name: &str, field: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Value + Send + Sync + 'static,
    {
        self.computed.push((name.to_string(), Arc::new(field)));
        self
    }

    #[must_use]
    pub fn allow(mut self, allow: AllowListOverride) -> Self {
        self.allow = Some(allow);
        self
    }

    #[must_use]
    pub fn get_relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.get(name)
    }

    /// Declared relations by name
    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationDescriptor)> {
        self.relations.iter().map(|(name, relation)| (name.as_str(), relation))
    }

    #[must_use]
    pub fn is_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    #[must_use]
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{column}", self.table)
    }
}

/// Registry of every entity reachable through expansions.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: BTreeMap<String, EntityDescriptor>,
    morph_map: BTreeMap<String, String>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entity(mut self, entity: EntityDescriptor) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Map a stored morph type value to an entity name
    #[must_use]
    pub fn morph(mut self, type_value: &str, entity: &str) -> Self {
        self.morph_map.insert(type_value.to_string(), entity.to_string());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    /// Entity for a morph type value; unmapped values are tried as entity names.
    #[must_use]
    pub fn resolve_morph(&self, type_value: &str) -> Option<&EntityDescriptor> {
        let name = self
            .morph_map
            .get(type_value)
            .map_or(type_value, String::as_str);
        self.entities.get(name)
    }
}
