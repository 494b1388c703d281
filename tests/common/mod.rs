#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode},
    response::Response,
    routing::get,
};
use querycrate::{
    AllowListConfig, ApiHandler, EntityDescriptor, HandlerConfig, ParameterSet, RelationDescriptor,
    Schema, SearchDriver,
};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::prelude::*;
use serde_json::Value;
use tower::ServiceExt;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub api: ApiHandler,
}

/// Route `tracing` output through the test harness
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_target(false)
        .compact()
        .try_init();
}

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    init_tracing();
    let db = Database::connect("sqlite::memory:").await?;

    // Run migrations
    Migrator::up(&db, None).await?;
    seed(&db).await?;

    Ok(db)
}

/// posts, users, comments, tags and polymorphic images
pub fn blog_schema() -> Schema {
    Schema::new()
        .entity(
            EntityDescriptor::new("posts", "posts")
                .relation("comments", RelationDescriptor::has_many("comments", "post_id", "id"))
                .relation("user", RelationDescriptor::belongs_to("users", "user_id", "id"))
                .relation(
                    "tags",
                    RelationDescriptor::belongs_to_many("tags", "post_tag", "post_id", "tag_id"),
                )
                .relation(
                    "images",
                    RelationDescriptor::morph_many("images", "imageable_id", "imageable_type", "post"),
                ),
        )
        .entity(
            EntityDescriptor::new("users", "users")
                .relation("posts", RelationDescriptor::has_many("posts", "user_id", "id"))
                .relation(
                    "post_comments",
                    RelationDescriptor::has_many_through("comments", "posts", "user_id", "post_id", "id", "id"),
                )
                .relation(
                    "images",
                    RelationDescriptor::morph_many("images", "imageable_id", "imageable_type", "user"),
                ),
        )
        .entity(
            EntityDescriptor::new("comments", "comments")
                .relation("user", RelationDescriptor::belongs_to("users", "user_id", "id")),
        )
        .entity(
            EntityDescriptor::new("tags", "tags").relation(
                "posts",
                RelationDescriptor::belongs_to_many("posts", "post_tag", "tag_id", "post_id"),
            ),
        )
        .entity(
            EntityDescriptor::new("images", "images").relation(
                "imageable",
                RelationDescriptor::morph_to("imageable_id", "imageable_type", "id"),
            ),
        )
        .morph("post", "posts")
        .morph("user", "users")
}

/// Everything allowed, LIKE search over title and body
pub fn test_config() -> HandlerConfig {
    let mut config = HandlerConfig::default().with_allow(AllowListConfig {
        searchable: vec!["title".to_string(), "body".to_string()],
        ..AllowListConfig::permissive()
    });
    config.search_driver = SearchDriver::Like;
    config
}

async fn list(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    params: ParameterSet,
) -> Response {
    state.api.get_all(&state.db, &entity, &params).await
}

async fn show(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    params: ParameterSet,
) -> Response {
    state.api.get_one(&state.db, &entity, &id, &params).await
}

pub fn setup_test_app(db: DatabaseConnection, api: ApiHandler) -> Router {
    let api = Router::new()
        .route("/{entity}", get(list))
        .route("/{entity}/{id}", get(show))
        .with_state(AppState { db, api });

    Router::new().nest("/api/v1", api)
}

pub async fn app_with(config: HandlerConfig) -> Router {
    let db = setup_test_db()
        .await
        .expect("Failed to setup test database");
    setup_test_app(db, ApiHandler::new(config, blog_schema()))
}

/// `/api/v1<path>?<encoded pairs>`
pub fn uri(path: &str, pairs: &[(&str, &str)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    if query.is_empty() {
        format!("/api/v1{path}")
    } else {
        format!("/api/v1{path}?{query}")
    }
}

/// GET `uri` and decode the JSON body
pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, HeaderMap, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, headers, json)
}

/// Values of `key` in every object of an array body
pub fn pluck(body: &Value, key: &str) -> Vec<Value> {
    body.as_array()
        .map(|rows| rows.iter().map(|row| row[key].clone()).collect())
        .unwrap_or_default()
}

async fn seed(db: &DatabaseConnection) -> Result<(), DbErr> {
    for statement in [
        "INSERT INTO users (id, name) VALUES (1, 'Ada'), (2, 'Grace')",
        "INSERT INTO posts (id, user_id, title, body) VALUES \
            (1, 1, 'Example post', 'Rust and SQL'), \
            (2, 1, 'Example two', 'Axum handlers'), \
            (3, 2, 'Another title', 'Nothing here'), \
            (4, 2, '100% done', 'Percent signs')",
        "INSERT INTO comments (id, post_id, user_id, body) VALUES \
            (1, 1, 2, 'Great read'), \
            (2, 1, 1, 'Thanks'), \
            (3, 2, 2, 'Nice')",
        "INSERT INTO tags (id, name) VALUES (1, 'rust'), (2, 'sql')",
        "INSERT INTO post_tag (post_id, tag_id) VALUES (1, 1), (1, 2), (2, 1)",
        "INSERT INTO images (id, imageable_id, imageable_type, url) VALUES \
            (1, 1, 'post', 'cover.png'), \
            (2, 1, 'user', 'ada.png'), \
            (3, 3, 'post', 'other.png'), \
            (4, 9, 'video', 'orphan.png')",
    ] {
        db.execute_unprepared(statement).await?;
    }
    Ok(())
}

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateBlogTables)]
    }
}

pub struct CreateBlogTables;

#[async_trait::async_trait]
impl MigrationName for CreateBlogTables {
    fn name(&self) -> &'static str {
        "m20240101_000001_create_blog_tables"
    }
}

fn id_column<T: IntoIden + 'static>(column: T) -> ColumnDef {
    ColumnDef::new(column)
        .integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for CreateBlogTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(id_column(Users::Id))
                    .col(ColumnDef::new(Users::Name).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Posts::Table)
                    .if_not_exists()
                    .col(id_column(Posts::Id))
                    .col(ColumnDef::new(Posts::UserId).integer().not_null())
                    .col(ColumnDef::new(Posts::Title).string().not_null())
                    .col(ColumnDef::new(Posts::Body).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Comments::Table)
                    .if_not_exists()
                    .col(id_column(Comments::Id))
                    .col(ColumnDef::new(Comments::PostId).integer().not_null())
                    .col(ColumnDef::new(Comments::UserId).integer().not_null())
                    .col(ColumnDef::new(Comments::Body).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Tags::Table)
                    .if_not_exists()
                    .col(id_column(Tags::Id))
                    .col(ColumnDef::new(Tags::Name).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PostTag::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PostTag::PostId).integer().not_null())
                    .col(ColumnDef::new(PostTag::TagId).integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Images::Table)
                    .if_not_exists()
                    .col(id_column(Images::Id))
                    .col(ColumnDef::new(Images::ImageableId).integer().not_null())
                    .col(ColumnDef::new(Images::ImageableType).string().not_null())
                    .col(ColumnDef::new(Images::Url).string().not_null())
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Images::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PostTag::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tags::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Comments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Posts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Name,
}

#[derive(DeriveIden)]
enum Posts {
    Table,
    Id,
    UserId,
    Title,
    Body,
}

#[derive(DeriveIden)]
enum Comments {
    Table,
    Id,
    PostId,
    UserId,
    Body,
}

#[derive(DeriveIden)]
enum Tags {
    Table,
    Id,
    Name,
}

#[derive(DeriveIden)]
enum PostTag {
    Table,
    PostId,
    TagId,
}

#[derive(DeriveIden)]
enum Images {
    Table,
    Id,
    ImageableId,
    ImageableType,
    Url,
}
