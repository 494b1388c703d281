use axum::http::StatusCode;
use querycrate::{AllowListConfig, AllowListOverride, ApiHandler, EntityDescriptor, ErrorKind, HandlerConfig, StatusTable};
use serde_json::json;

mod common;
use common::{app_with, blog_schema, get_json, setup_test_app, setup_test_db, test_config, uri};

#[tokio::test]
async fn test_unknown_column_reported_by_engine() {
    let app = app_with(test_config()).await;
    let (status, _, body) = get_json(&app, &uri("/posts", &[("select", "id,nope")])).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("Unknown field"), "{message}");
    assert!(message.contains("nope"), "{message}");
}

#[tokio::test]
async fn test_unknown_sort_column_reported_by_engine() {
    let app = app_with(test_config()).await;
    let (status, _, _) = get_json(&app, &uri("/posts", &[("sort", "-rating")])).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unregistered_entity_is_internal() {
    let app = app_with(test_config()).await;
    let (status, _, body) = get_json(&app, "/api/v1/widgets").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Entity 'widgets' is not registered"}));
}

#[tokio::test]
async fn test_select_not_allowed() {
    let config = HandlerConfig::default().with_allow(AllowListConfig {
        selectable: vec!["id".to_string(), "title".to_string()],
        ..AllowListConfig::default()
    });
    let app = app_with(config).await;

    let (status, _, body) = get_json(&app, &uri("/posts", &[("select", "id,body")])).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, json!({"error": "Selecting 'body' is not allowed"}));

    let (status, _, body) = get_json(&app, &uri("/posts/1", &[("select", "title")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"title": "Example post"}));
}

#[tokio::test]
async fn test_sort_not_allowed() {
    let app = app_with(HandlerConfig::default()).await;
    let (status, _, body) = get_json(&app, &uri("/posts", &[("sort", "title")])).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, json!({"error": "Sorting by 'title' is not allowed"}));
}

#[tokio::test]
async fn test_expand_not_allowed() {
    let app = app_with(HandlerConfig::default()).await;
    let (status, _, body) = get_json(&app, &uri("/posts", &[("expand", "comments")])).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        json!({"error": "Cannot expand 'comments': not allowed on this endpoint"})
    );
}

#[tokio::test]
async fn test_entity_override_replaces_global_lists() {
    let db = setup_test_db()
        .await
        .expect("Failed to setup test database");
    let schema = blog_schema().entity(EntityDescriptor::new("tags", "tags").allow(AllowListOverride {
        filterable: Some(vec![]),
        ..AllowListOverride::default()
    }));
    let app = setup_test_app(db, ApiHandler::new(test_config(), schema));

    let (status, _, _) = get_json(&app, &uri("/tags", &[("filter[name]", "rust")])).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _, _) = get_json(&app, &uri("/posts", &[("filter[title]", "x")])).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_status_table_applies_to_every_kind() {
    let mut config = HandlerConfig::default();
    config.statuses = StatusTable::default()
        .with(ErrorKind::InvalidSort, StatusCode::BAD_REQUEST)
        .with(ErrorKind::InvalidPagination, StatusCode::BAD_REQUEST);
    let app = app_with(config).await;

    let (status, _, _) = get_json(&app, &uri("/posts", &[("sort", "id")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = get_json(&app, &uri("/posts", &[("limit", "x")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Kinds left out keep their default
    let (status, _, _) = get_json(&app, &uri("/posts", &[("filter[id]", "1")])).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
