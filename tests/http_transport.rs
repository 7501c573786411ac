//! `HttpTransport` and `HttpRevalidator` against a throwaway axum backend.
//!
//! The backend serves the resource routes from an `InMemoryTransport`, so
//! every request exercises real HTTP framing and status mapping.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use rstest::rstest;
use serde_json::{Map, Value, json};

use mutation_sync::domain::{Entity, EntityId, ListQuery, ResourceDescriptor, ViewKey};
use mutation_sync::error::{SyncError, TransportError};
use mutation_sync::infrastructure::{
    CacheStore, HttpRevalidator, HttpTransport, InMemoryCacheStore, InMemoryTransport, Revalidator,
    ScriptedWrite, Transport,
};
use mutation_sync::sync::{SyncOptions, Synchronizer};

// =============================================================================
// Test server
// =============================================================================

#[derive(Clone)]
struct Backend {
    store: InMemoryTransport,
    revalidations: Arc<AtomicUsize>,
}

fn respond(result: Result<Value, TransportError>) -> Response {
    match result {
        Ok(Value::Null) => StatusCode::NO_CONTENT.into_response(),
        Ok(body) => Json(body).into_response(),
        Err(TransportError::NotFound(message)) => (StatusCode::NOT_FOUND, message).into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
    }
}

fn id_from(query: &HashMap<String, String>) -> EntityId {
    EntityId::new(query.get("id").cloned().unwrap_or_default())
}

async fn read(
    State(backend): State<Backend>,
    Path((endpoint, action)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match action.as_str() {
        "find-many" => {
            let mut list = ListQuery::new(
                query.get("page").and_then(|v| v.parse().ok()).unwrap_or(1),
                query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(10),
            );
            for (name, value) in &query {
                if name != "page" && name != "limit" {
                    list = list.with_filter(name.clone(), value.clone());
                }
            }
            respond(backend.store.find_many(&endpoint, &list).await)
        }
        "find-by-id" => respond(backend.store.find_by_id(&endpoint, &id_from(&query)).await),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn create(
    State(backend): State<Backend>,
    Path((endpoint, _action)): Path<(String, String)>,
    Json(payload): Json<Map<String, Value>>,
) -> Response {
    respond(backend.store.create(&endpoint, &payload).await)
}

async fn update(
    State(backend): State<Backend>,
    Path((endpoint, _action)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    Json(payload): Json<Map<String, Value>>,
) -> Response {
    respond(backend.store.update(&endpoint, &id_from(&query), &payload).await)
}

async fn remove(
    State(backend): State<Backend>,
    Path((endpoint, _action)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    respond(backend.store.delete(&endpoint, &id_from(&query)).await)
}

async fn revalidate(State(backend): State<Backend>) -> StatusCode {
    backend.revalidations.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn revalidate_unavailable() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn broken() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "database offline").into_response()
}

async fn garbage() -> Response {
    (StatusCode::OK, "not json").into_response()
}

async fn slow() -> Response {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Json(json!({})).into_response()
}

/// Starts the backend; returns its base URL.
async fn serve(backend: Backend) -> String {
    let app = Router::new()
        .route("/revalidate", post(revalidate))
        .route("/revalidate-unavailable", post(revalidate_unavailable))
        .route("/broken/find-many", get(broken))
        .route("/garbage/find-many", get(garbage))
        .route("/slow/find-many", get(slow))
        .route(
            "/{endpoint}/{action}",
            get(read).post(create).patch(update).delete(remove),
        )
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{address}")
}

async fn backend() -> (Backend, String) {
    let backend = Backend {
        store: InMemoryTransport::with_sequential_ids(),
        revalidations: Arc::new(AtomicUsize::new(0)),
    };
    let url = serve(backend.clone()).await;
    (backend, url)
}

fn transport(url: &str) -> HttpTransport {
    HttpTransport::new(Some(format!("{url}/")), Duration::from_secs(5))
}

// =============================================================================
// Transport
// =============================================================================

#[rstest]
#[tokio::test]
async fn synchronizer_round_trips_over_http() {
    let (backend, url) = backend().await;
    let cache = InMemoryCacheStore::new();
    let options = SyncOptions::default().with_revalidator(Arc::new(HttpRevalidator::new(
        format!("{url}/revalidate"),
        Duration::from_secs(5),
    )));
    let sync = Synchronizer::new(
        ResourceDescriptor::new("igps", "igp"),
        Arc::new(cache.clone()),
        Arc::new(transport(&url)),
        options,
    );

    sync.fetch_page(&ListQuery::default()).await.unwrap();
    let created = sync
        .create(json!({"projectTitle": "Bake sale"}).as_object().cloned().unwrap())
        .await
        .unwrap();
    assert_eq!(created.id, EntityId::new("1"));

    let updated = sync
        .update(
            created.id.clone(),
            json!({"status": "approved"}).as_object().cloned().unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(updated.field("projectTitle"), Some(&json!("Bake sale")));

    let list = cache.view(&ViewKey::list("igps", &ListQuery::default())).unwrap();
    assert_eq!(list.entities().next(), Some(&updated));

    sync.delete(created.id.clone()).await.unwrap();
    assert!(backend.store.entities("igp").await.is_empty());
    assert_eq!(backend.revalidations.load(Ordering::SeqCst), 3);
}

#[rstest]
#[tokio::test]
async fn list_query_reaches_the_server() {
    let (backend, url) = backend().await;
    backend
        .store
        .seed(
            "igp",
            vec![
                Entity::from_value(json!({"id": "b", "status": "approved"})).unwrap(),
                Entity::from_value(json!({"id": "a", "status": "pending"})).unwrap(),
            ],
        )
        .await;

    let body = transport(&url)
        .find_many("igp", &ListQuery::new(1, 5).with_filter("status", "pending"))
        .await
        .unwrap();

    assert_eq!(body["data"][0]["id"], json!("a"));
    assert_eq!(body["meta"]["totalItems"], json!(1));
    assert_eq!(body["meta"]["limit"], json!(5));
}

#[rstest]
#[tokio::test]
async fn not_found_maps_to_sync_not_found() {
    let (_backend, url) = backend().await;
    let result = transport(&url)
        .find_by_id("igp", &EntityId::new("missing"))
        .await;

    assert!(matches!(result, Err(TransportError::NotFound(_))));
    assert!(matches!(
        result.map_err(SyncError::from),
        Err(SyncError::NotFound(_))
    ));
}

#[rstest]
#[tokio::test]
async fn server_error_keeps_status_and_body() {
    let (_backend, url) = backend().await;
    let result = transport(&url).find_many("broken", &ListQuery::default()).await;
    assert_eq!(
        result,
        Err(TransportError::Status {
            status: 500,
            message: "database offline".to_string(),
        })
    );
}

#[rstest]
#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let (_backend, url) = backend().await;
    let result = transport(&url).find_many("garbage", &ListQuery::default()).await;
    assert!(matches!(result, Err(TransportError::Decode(_))));
}

#[rstest]
#[tokio::test]
async fn empty_delete_response_is_null() {
    let (backend, url) = backend().await;
    backend
        .store
        .seed("igp", vec![Entity::new(EntityId::new("a"), Map::new())])
        .await;
    backend
        .store
        .script_next_write(ScriptedWrite::Respond(Value::Null))
        .await;

    let result = transport(&url).delete("igp", &EntityId::new("a")).await;
    assert_eq!(result, Ok(Value::Null));
}

#[rstest]
#[tokio::test]
async fn slow_server_times_out() {
    let (_backend, url) = backend().await;
    let result = HttpTransport::new(Some(url), Duration::from_millis(50))
        .find_many("slow", &ListQuery::default())
        .await;
    assert_eq!(result, Err(TransportError::Timeout(50)));
}

#[rstest]
#[tokio::test]
async fn refused_connection_is_connection_failed() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let result = HttpTransport::new(Some(format!("http://{address}")), Duration::from_secs(1))
        .find_many("igp", &ListQuery::default())
        .await;
    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
}

// =============================================================================
// Revalidator
// =============================================================================

#[rstest]
#[tokio::test]
async fn revalidator_posts_and_maps_status() {
    let (backend, url) = backend().await;

    HttpRevalidator::new(format!("{url}/revalidate"), Duration::from_secs(5))
        .force_revalidate()
        .await
        .unwrap();
    assert_eq!(backend.revalidations.load(Ordering::SeqCst), 1);

    let result = HttpRevalidator::new(format!("{url}/revalidate-unavailable"), Duration::from_secs(5))
        .force_revalidate()
        .await;
    assert!(matches!(result, Err(TransportError::Status { status: 503, .. })));
}
