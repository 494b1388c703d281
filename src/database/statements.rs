//! Translation of a [`QueryPlan`] into `sea-query` statements.
//!
//! Bare column names are qualified with the table of the scope they belong to.
//! The fulltext score alias is the exception: it is emitted as
//! `MATCH (...) AGAINST (? IN BOOLEAN MODE) AS <alias>` and ordered by alias.

use sea_orm::{
    Condition, Value,
    sea_query::{Alias, Asterisk, Expr, Func, LikeExpr, Order, Query, SelectStatement, SimpleExpr},
};

use crate::plan::{CompareOp, EagerLoad, OrderBy, Predicate, QueryPlan, ScoreColumn};
use crate::schema::{EntityDescriptor, RelationDescriptor, RelationKind};

/// Alias of the pivot (or through) column carrying the parent key in relation queries
pub const PIVOT_KEY: &str = "__pivot";

/// Alias of the count in count statements
pub const COUNT_ALIAS: &str = "aggregate";

fn column_ref(table: &str, column: &str) -> (Alias, Alias) {
    match column.split_once('.') {
        Some((table, column)) => (Alias::new(table), Alias::new(column)),
        None => (Alias::new(table), Alias::new(column)),
    }
}

fn quote_mysql(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

fn match_expr(table: &str, columns: &[String], term: &str) -> SimpleExpr {
    let columns = columns
        .iter()
        .map(|column| {
            let (table, column) = column.split_once('.').unwrap_or((table, column));
            format!("{}.{}", quote_mysql(table), quote_mysql(column))
        })
        .collect::<Vec<_>>()
        .join(", ");
    Expr::cust_with_values(
        format!("MATCH ({columns}) AGAINST (? IN BOOLEAN MODE)"),
        [term.to_string()],
    )
}

/// Bind value for a raw filter literal.
///
/// Canonical integers, decimal numbers and `true`/`false` are bound typed so that
/// engines with strict operator typing can compare them against numeric and
/// boolean columns. Anything else, including `007`, is bound as text.
#[must_use]
pub fn bind_value(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>()
        && int.to_string() == raw
    {
        return Value::from(int);
    }
    let decimal = raw.strip_prefix('-').unwrap_or(raw);
    if decimal.contains('.')
        && !decimal.starts_with('.')
        && !decimal.ends_with('.')
        && !(decimal.starts_with('0') && !decimal.starts_with("0."))
        && decimal.chars().all(|c| c.is_ascii_digit() || c == '.')
        && let Ok(float) = raw.parse::<f64>()
    {
        return Value::from(float);
    }
    match raw {
        "true" => Value::from(true),
        "false" => Value::from(false),
        _ => Value::from(raw.to_string()),
    }
}

/// Condition for one predicate, columns resolved against `table`
#[must_use]
pub fn predicate_condition(table: &str, predicate: &Predicate) -> Condition {
    let expr = match predicate {
        Predicate::Compare { column, op, value } => {
            let column = Expr::col(column_ref(table, column));
            let value = bind_value(value);
            match op {
                CompareOp::Eq => column.eq(value),
                CompareOp::Ne => column.ne(value),
                CompareOp::Lt => column.lt(value),
                CompareOp::Gt => column.gt(value),
                CompareOp::Lte => column.lte(value),
                CompareOp::Gte => column.gte(value),
            }
        }
        Predicate::Null { column, negated } => {
            let column = Expr::col(column_ref(table, column));
            if *negated { column.is_not_null() } else { column.is_null() }
        }
        Predicate::Like {
            column,
            pattern,
            negated,
            escape,
        } => {
            let column = Expr::col(column_ref(table, column));
            let like = match escape {
                Some(escape) => LikeExpr::new(pattern.clone()).escape(*escape),
                None => LikeExpr::new(pattern.clone()),
            };
            if *negated { column.not_like(like) } else { column.like(like) }
        }
        Predicate::In {
            column,
            values,
            negated,
        } => {
            let column = Expr::col(column_ref(table, column));
            let values = values.iter().map(|value| bind_value(value));
            if *negated { column.is_not_in(values) } else { column.is_in(values) }
        }
        Predicate::Match { columns, term } => match_expr(table, columns, term),
        Predicate::Any(parts) => {
            return parts
                .iter()
                .fold(Condition::any(), |any, part| any.add(predicate_condition(table, part)));
        }
        Predicate::All(parts) => {
            return parts
                .iter()
                .fold(Condition::all(), |all, part| all.add(predicate_condition(table, part)));
        }
        Predicate::Always => Expr::cust("1 = 1"),
        Predicate::Never => Expr::cust("0 = 1"),
    };
    Condition::all().add(expr)
}

fn apply_predicates(stmt: &mut SelectStatement, table: &str, predicates: &[Predicate]) {
    if predicates.is_empty() {
        return;
    }
    let condition = predicates
        .iter()
        .fold(Condition::all(), |all, predicate| all.add(predicate_condition(table, predicate)));
    stmt.cond_where(condition);
}

fn apply_orders(stmt: &mut SelectStatement, table: &str, orders: &[OrderBy], score: Option<&ScoreColumn>) {
    for order in orders {
        let direction = if order.descending { Order::Desc } else { Order::Asc };
        match score {
            Some(score) if score.alias == order.column => {
                stmt.order_by(Alias::new(&score.alias), direction);
            }
            _ => {
                stmt.order_by(column_ref(table, &order.column), direction);
            }
        }
    }
}

fn apply_projection(stmt: &mut SelectStatement, table: &str, columns: &[String], score: Option<&ScoreColumn>) {
    let score_expr = |score: &ScoreColumn| match_expr(table, &score.columns, &score.term);

    if columns.is_empty() {
        stmt.column((Alias::new(table), Asterisk));
        if let Some(score) = score {
            stmt.expr_as(score_expr(score), Alias::new(&score.alias));
        }
        return;
    }

    let mut score_placed = false;
    for column in columns {
        match score {
            Some(score) if score.alias == *column => {
                stmt.expr_as(score_expr(score), Alias::new(&score.alias));
                score_placed = true;
            }
            _ => {
                stmt.column(column_ref(table, column));
            }
        }
    }
    if let Some(score) = score
        && !score_placed
    {
        stmt.expr_as(score_expr(score), Alias::new(&score.alias));
    }
}

/// Root select of a plan, eager loads excluded
#[must_use]
pub fn select_statement(plan: &QueryPlan) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.from(Alias::new(&plan.table));
    apply_projection(&mut stmt, &plan.table, &plan.select, plan.score.as_ref());
    apply_predicates(&mut stmt, &plan.table, &plan.predicates);
    apply_orders(&mut stmt, &plan.table, &plan.orders, plan.score.as_ref());
    if let Some(limit) = plan.limit {
        stmt.limit(limit);
    }
    if let Some(offset) = plan.offset {
        stmt.offset(offset);
    }
    stmt
}

/// `SELECT COUNT(*) AS aggregate FROM (<plan>) AS count_table`
///
/// Paging, ordering and eager loads are dropped from the plan first.
#[must_use]
pub fn count_statement(plan: &QueryPlan) -> SelectStatement {
    let inner = select_statement(&plan.for_count());
    Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new(COUNT_ALIAS))
        .from_subquery(inner, Alias::new("count_table"))
        .to_owned()
}

/// Related rows of `relation` for the given parent key values.
///
/// Pivot and through relations project the parent key as [`PIVOT_KEY`]; the other
/// kinds are correlated on a column of the related table itself. `MorphTo` is built
/// once per target type, with that type's entity as `related`.
#[must_use]
pub fn relation_statement(
    relation: &RelationDescriptor,
    related: &EntityDescriptor,
    load: &EagerLoad,
    keys: Vec<Value>,
) -> SelectStatement {
    let table = related.table.as_str();
    let mut stmt = Query::select();
    stmt.from(Alias::new(table));
    apply_projection(&mut stmt, table, load.columns.as_deref().unwrap_or_default(), None);

    match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany => {
            stmt.and_where(Expr::col(column_ref(table, &relation.foreign_key)).is_in(keys));
        }
        RelationKind::BelongsTo | RelationKind::MorphTo => {
            stmt.and_where(Expr::col(column_ref(table, &relation.local_key)).is_in(keys));
        }
        RelationKind::MorphMany => {
            stmt.and_where(Expr::col(column_ref(table, &relation.foreign_key)).is_in(keys));
            if let (Some(morph_type), Some(morph_value)) = (&relation.morph_type, &relation.morph_value) {
                stmt.and_where(Expr::col(column_ref(table, morph_type)).eq(morph_value.clone()));
            }
        }
        RelationKind::BelongsToMany | RelationKind::MorphToMany | RelationKind::MorphedByMany => {
            if let Some(pivot) = &relation.pivot {
                let pivot_table = pivot.table.as_str();
                stmt.expr_as(
                    Expr::col(column_ref(pivot_table, &pivot.parent_key)),
                    Alias::new(PIVOT_KEY),
                )
                .inner_join(
                    Alias::new(pivot_table),
                    Expr::col(column_ref(pivot_table, &pivot.related_key))
                        .equals(column_ref(table, &related.primary_key)),
                )
                .and_where(Expr::col(column_ref(pivot_table, &pivot.parent_key)).is_in(keys));
                if let Some((type_column, type_value)) = &pivot.morph {
                    stmt.and_where(Expr::col(column_ref(pivot_table, type_column)).eq(type_value.clone()));
                }
            }
        }
        RelationKind::HasManyThrough => {
            if let Some(through) = &relation.through {
                let through_table = through.table.as_str();
                stmt.expr_as(
                    Expr::col(column_ref(through_table, &through.first_key)),
                    Alias::new(PIVOT_KEY),
                )
                .inner_join(
                    Alias::new(through_table),
                    Expr::col(column_ref(through_table, &through.second_local_key))
                        .equals(column_ref(table, &relation.foreign_key)),
                )
                .and_where(Expr::col(column_ref(through_table, &through.first_key)).is_in(keys));
            }
        }
    }

    apply_predicates(&mut stmt, table, &load.predicates);
    apply_orders(&mut stmt, table, &load.orders, None);
    stmt
}

/// Column of a related row that holds the parent key, see [`relation_statement`]
#[must_use]
pub fn related_join_column(relation: &RelationDescriptor) -> &str {
    match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany | RelationKind::MorphMany => &relation.foreign_key,
        RelationKind::BelongsTo | RelationKind::MorphTo => &relation.local_key,
        RelationKind::BelongsToMany
        | RelationKind::MorphToMany
        | RelationKind::MorphedByMany
        | RelationKind::HasManyThrough => PIVOT_KEY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::sea_query::{MysqlQueryBuilder, PostgresQueryBuilder, SqliteQueryBuilder};

    fn sqlite(stmt: &SelectStatement) -> String {
        stmt.to_string(SqliteQueryBuilder)
    }

    fn like(column: &str, pattern: &str) -> Predicate {
        Predicate::Like {
            column: column.to_string(),
            pattern: pattern.to_string(),
            negated: false,
            escape: None,
        }
    }

    #[test]
    fn test_plain_plan() {
        let plan = QueryPlan::new("posts");
        assert_eq!(sqlite(&select_statement(&plan)), r#"SELECT "posts".* FROM "posts""#);
    }

    #[test]
    fn test_projection_filters_orders_paging() {
        let mut plan = QueryPlan::new("posts");
        plan.add_columns(["id", "title"]);
        plan.add_predicate(Predicate::Compare {
            column: "id".to_string(),
            op: CompareOp::Gte,
            value: "5".to_string(),
        });
        plan.add_order("id", true);
        plan.limit = Some(10);
        plan.offset = Some(20);

        let sql = sqlite(&select_statement(&plan));
        assert!(sql.starts_with(r#"SELECT "posts"."id", "posts"."title" FROM "posts""#), "{sql}");
        assert!(sql.contains(r#""posts"."id" >= 5"#), "{sql}");
        assert!(sql.contains(r#"ORDER BY "posts"."id" DESC"#), "{sql}");
        assert!(sql.contains("LIMIT 10 OFFSET 20"), "{sql}");
    }

    #[test]
    fn test_or_group() {
        let mut plan = QueryPlan::new("posts");
        plan.add_predicate(Predicate::Any(vec![like("title", "A"), like("title", "B")]));
        let sql = sqlite(&select_statement(&plan));
        assert!(
            sql.contains(r#""posts"."title" LIKE 'A' OR "posts"."title" LIKE 'B'"#),
            "{sql}"
        );
    }

    #[test]
    fn test_and_group_inside_other_filters() {
        let mut plan = QueryPlan::new("posts");
        plan.add_predicate(Predicate::Compare {
            column: "user_id".to_string(),
            op: CompareOp::Eq,
            value: "1".to_string(),
        });
        plan.add_predicate(Predicate::Any(vec![like("title", "A%"), like("title", "B%")]));
        let sql = sqlite(&select_statement(&plan));
        assert!(sql.contains(r#""posts"."user_id" = 1 AND "#), "{sql}");
        assert!(sql.contains(r#""posts"."title" LIKE 'A%' OR "posts"."title" LIKE 'B%'"#), "{sql}");
    }

    #[test]
    fn test_null_in_and_constants() {
        let mut plan = QueryPlan::new("posts");
        plan.add_predicate(Predicate::Null {
            column: "deleted_at".to_string(),
            negated: false,
        });
        plan.add_predicate(Predicate::In {
            column: "id".to_string(),
            values: vec!["1".to_string(), "2".to_string()],
            negated: true,
        });
        plan.add_predicate(Predicate::Never);
        let sql = sqlite(&select_statement(&plan));
        assert!(sql.contains(r#""posts"."deleted_at" IS NULL"#), "{sql}");
        assert!(sql.contains(r#""posts"."id" NOT IN (1, 2)"#), "{sql}");
        assert!(sql.contains("0 = 1"), "{sql}");
    }

    #[test]
    fn test_filter_literals_bind_typed() {
        assert_eq!(bind_value("42"), Value::from(42_i64));
        assert_eq!(bind_value("-7"), Value::from(-7_i64));
        assert_eq!(bind_value("2.50"), Value::from(2.5_f64));
        assert_eq!(bind_value("-0.5"), Value::from(-0.5_f64));
        assert_eq!(bind_value("true"), Value::from(true));
        assert_eq!(bind_value("false"), Value::from(false));

        for text in ["007", "1e5", "NaN", "inf", ".5", "5.", "1.2.3", "True", "Example", ""] {
            assert_eq!(bind_value(text), Value::from(text.to_string()), "{text}");
        }
    }

    #[test]
    fn test_compare_and_in_values_are_typed() {
        let mut plan = QueryPlan::new("posts");
        plan.add_predicate(Predicate::Compare {
            column: "id".to_string(),
            op: CompareOp::Gt,
            value: "1".to_string(),
        });
        plan.add_predicate(Predicate::In {
            column: "user_id".to_string(),
            values: vec!["1".to_string(), "two".to_string()],
            negated: false,
        });
        plan.add_predicate(Predicate::Compare {
            column: "title".to_string(),
            op: CompareOp::Eq,
            value: "Hello".to_string(),
        });

        let (_, values) = select_statement(&plan).build(PostgresQueryBuilder);
        assert_eq!(
            values.0,
            vec![
                Value::from(1_i64),
                Value::from(1_i64),
                Value::from("two".to_string()),
                Value::from("Hello".to_string()),
            ]
        );
    }

    #[test]
    fn test_escaped_like() {
        let mut plan = QueryPlan::new("posts");
        plan.add_predicate(Predicate::Like {
            column: "title".to_string(),
            pattern: "%100\\%%".to_string(),
            negated: false,
            escape: Some('\\'),
        });
        let sql = sqlite(&select_statement(&plan));
        assert!(sql.contains("ESCAPE"), "{sql}");
    }

    #[test]
    fn test_score_projection_and_order() {
        let mut plan = QueryPlan::new("posts");
        plan.score = Some(ScoreColumn {
            alias: "search_score".to_string(),
            columns: vec!["title".to_string(), "body".to_string()],
            term: "rust".to_string(),
        });
        plan.add_predicate(Predicate::Match {
            columns: vec!["title".to_string(), "body".to_string()],
            term: "rust".to_string(),
        });
        plan.add_order("search_score", true);

        let sql = select_statement(&plan).to_string(MysqlQueryBuilder);
        assert!(sql.starts_with("SELECT `posts`.*, MATCH (`posts`.`title`, `posts`.`body`) AGAINST ('rust' IN BOOLEAN MODE) AS `search_score`"), "{sql}");
        assert!(sql.contains("ORDER BY `search_score` DESC"), "{sql}");
    }

    #[test]
    fn test_score_replaces_selected_alias() {
        let mut plan = QueryPlan::new("posts");
        plan.add_columns(["search_score", "id"]);
        plan.score = Some(ScoreColumn {
            alias: "search_score".to_string(),
            columns: vec!["title".to_string()],
            term: "rust".to_string(),
        });
        let sql = select_statement(&plan).to_string(MysqlQueryBuilder);
        assert!(sql.starts_with("SELECT MATCH (`posts`.`title`) AGAINST ('rust' IN BOOLEAN MODE) AS `search_score`, `posts`.`id`"), "{sql}");
    }

    #[test]
    fn test_count_statement_drops_paging() {
        let mut plan = QueryPlan::new("posts");
        plan.add_predicate(Predicate::Never);
        plan.add_order("id", false);
        plan.limit = Some(5);
        let sql = sqlite(&count_statement(&plan));
        assert!(sql.starts_with(r#"SELECT COUNT(*) AS "aggregate" FROM (SELECT "posts".* FROM "posts" WHERE"#), "{sql}");
        assert!(sql.ends_with(r#"AS "count_table""#), "{sql}");
        assert!(!sql.contains("LIMIT"), "{sql}");
        assert!(!sql.contains("ORDER BY"), "{sql}");
    }

    #[test]
    fn test_has_many_statement() {
        let relation = RelationDescriptor::has_many("comments", "post_id", "id");
        let comments = EntityDescriptor::new("comments", "comments");
        let load = EagerLoad {
            columns: Some(vec!["comments.post_id".to_string(), "comments.body".to_string()]),
            ..EagerLoad::default()
        };
        let sql = sqlite(&relation_statement(&relation, &comments, &load, vec![1.into(), 2.into()]));
        assert_eq!(
            sql,
            r#"SELECT "comments"."post_id", "comments"."body" FROM "comments" WHERE "comments"."post_id" IN (1, 2)"#
        );
        assert_eq!(related_join_column(&relation), "post_id");
    }

    #[test]
    fn test_belongs_to_many_statement() {
        let relation = RelationDescriptor::belongs_to_many("tags", "post_tag", "post_id", "tag_id");
        let tags = EntityDescriptor::new("tags", "tags");
        let sql = sqlite(&relation_statement(&relation, &tags, &EagerLoad::default(), vec![1.into()]));
        assert!(sql.contains(r#""post_tag"."post_id" AS "__pivot""#), "{sql}");
        assert!(sql.contains(r#"INNER JOIN "post_tag" ON "post_tag"."tag_id" = "tags"."id""#), "{sql}");
        assert!(sql.contains(r#""post_tag"."post_id" IN (1)"#), "{sql}");
        assert_eq!(related_join_column(&relation), PIVOT_KEY);
    }

    #[test]
    fn test_morph_many_statement() {
        let relation = RelationDescriptor::morph_many("images", "imageable_id", "imageable_type", "post");
        let images = EntityDescriptor::new("images", "images");
        let sql = sqlite(&relation_statement(&relation, &images, &EagerLoad::default(), vec![3.into()]));
        assert!(sql.contains(r#""images"."imageable_id" IN (3)"#), "{sql}");
        assert!(sql.contains(r#""images"."imageable_type" = 'post'"#), "{sql}");
    }

    #[test]
    fn test_has_many_through_statement() {
        let relation =
            RelationDescriptor::has_many_through("replies", "comments", "post_id", "comment_id", "id", "id");
        let replies = EntityDescriptor::new("replies", "replies");
        let sql = sqlite(&relation_statement(&relation, &replies, &EagerLoad::default(), vec![1.into()]));
        assert!(sql.contains(r#""comments"."post_id" AS "__pivot""#), "{sql}");
        assert!(sql.contains(r#"INNER JOIN "comments" ON "comments"."id" = "replies"."comment_id""#), "{sql}");
    }

    #[test]
    fn test_relation_scope_filters_and_orders() {
        let relation = RelationDescriptor::has_many("comments", "post_id", "id");
        let comments = EntityDescriptor::new("comments", "comments");
        let load = EagerLoad {
            columns: None,
            predicates: vec![like("body", "%rust%")],
            orders: vec![OrderBy {
                column: "id".to_string(),
                descending: true,
            }],
        };
        let sql = sqlite(&relation_statement(&relation, &comments, &load, vec![1.into()]));
        assert!(sql.contains(r#""comments"."body" LIKE '%rust%'"#), "{sql}");
        assert!(sql.ends_with(r#"ORDER BY "comments"."id" DESC"#), "{sql}");
    }
}
