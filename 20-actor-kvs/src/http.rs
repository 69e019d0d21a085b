//! REST interface over the store.
//!
//! | Method   | Path        | Success                    |
//! |----------|-------------|----------------------------|
//! | `POST`   | `/kvs`      | `200 {"id": "<id>"}`       |
//! | `GET`    | `/kvs/:id`  | `200 <value>` or `404`     |
//! | `PUT`    | `/kvs/:id`  | `202`                      |
//! | `DELETE` | `/kvs/:id`  | `202`                      |
//! | `GET`    | `/metrics`  | `200 {"size": .., ..}`     |
//!
//! Request bodies are `{"value": <any JSON>}`. Every rejected input maps to a
//! `400` with a short plain-text message.

use std::future::Future;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{engine::StoreHandle, error::StoreError, id::Identifier};

#[derive(Debug, Deserialize)]
struct ValueBody {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Serialize)]
struct Created {
    id: Identifier,
}

/// A failed request: status plus the plain-text body sent to the client.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn from_store(err: StoreError, message: String) -> Self {
        warn!(error = %err, "{message}");
        if err.is_caller_error() {
            Self::bad_request(message)
        } else {
            Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: err.to_string(),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub fn router(store: StoreHandle) -> Router {
    Router::new()
        .route("/kvs", post(create_entry))
        .route(
            "/kvs/:id",
            get(fetch_entry).put(update_entry).delete(delete_entry),
        )
        .route("/metrics", get(metrics_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// Serves [`router`] on `listener` until `shutdown` resolves and every
/// in-flight request has completed.
pub async fn serve<F>(listener: TcpListener, store: StoreHandle, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")?;
    info!("http server stopped");
    Ok(())
}

fn decode_body(body: &[u8]) -> Result<ValueBody, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        debug!(error = %err, "rejecting request body");
        ApiError::bad_request(err.to_string())
    })
}

async fn create_entry(
    State(store): State<StoreHandle>,
    body: Bytes,
) -> Result<Json<Created>, ApiError> {
    let ValueBody { value } = decode_body(&body)?;
    let id = store
        .set(value)
        .await
        .map_err(|err| ApiError::from_store(err, "Could not POST value".to_string()))?;
    Ok(Json(Created { id }))
}

async fn fetch_entry(
    State(store): State<StoreHandle>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let value = store
        .get(&id)
        .await
        .map_err(|err| ApiError::from_store(err, format!("Could not GET on id {id}")))?;
    value.map(Json).ok_or_else(|| ApiError {
        status: StatusCode::NOT_FOUND,
        message: "Requested resource does not exist.".to_string(),
    })
}

async fn update_entry(
    State(store): State<StoreHandle>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let ValueBody { value } = decode_body(&body)?;
    store
        .update(&id, value)
        .await
        .map_err(|err| ApiError::from_store(err, format!("Could not PUT on id {id}")))?;
    Ok(StatusCode::ACCEPTED)
}

async fn delete_entry(
    State(store): State<StoreHandle>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    store
        .delete(&id)
        .await
        .map_err(|err| ApiError::from_store(err, format!("Could not DELETE on id {id}")))?;
    Ok(StatusCode::ACCEPTED)
}

async fn metrics_snapshot(State(store): State<StoreHandle>) -> Response {
    match store.metrics().snapshot().await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics unavailable").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        engine::{Engine, EngineConfig, Seed},
        metrics::Metrics,
    };

    fn start_store() -> (Engine, Metrics) {
        let metrics = Metrics::start();
        let engine = Engine::start(EngineConfig::default(), Seed::new(), metrics.handle());
        (engine, metrics)
    }

    async fn call(
        store: &StoreHandle,
        method: Method,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .expect("request");
        let response = router(store.clone())
            .oneshot(request)
            .await
            .expect("infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, bytes)
    }

    #[tokio::test]
    async fn post_then_get_returns_the_value() {
        let (engine, _metrics) = start_store();
        let store = engine.handle();

        let (status, body) = call(&store, Method::POST, "/kvs", Some(r#"{"value":{"n":1}}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let created: Value = serde_json::from_slice(&body).expect("json");
        let id = created["id"].as_str().expect("id").to_string();
        assert!(crate::id::is_valid(&id));

        let (status, body) = call(&store, Method::GET, &format!("/kvs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).expect("json"),
            json!({"n": 1})
        );
    }

    #[tokio::test]
    async fn rejects_bad_bodies_and_ids() {
        let (engine, _metrics) = start_store();
        let store = engine.handle();
        let id = Identifier::generate();

        let (status, _) = call(&store, Method::POST, "/kvs", Some("not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&store, Method::POST, "/kvs", Some(r#"{"value":null}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&store, Method::POST, "/kvs", Some("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&store, Method::GET, "/kvs/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&store, Method::PUT, &format!("/kvs/{id}"), Some("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&store, Method::DELETE, "/kvs/1234", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_entries_are_404_and_delete_is_idempotent() {
        let (engine, _metrics) = start_store();
        let store = engine.handle();
        let id = Identifier::generate();

        let (status, body) = call(&store, Method::GET, &format!("/kvs/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(&body[..], b"Requested resource does not exist.");

        for _ in 0..2 {
            let (status, _) = call(&store, Method::DELETE, &format!("/kvs/{id}"), None).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }
    }

    #[tokio::test]
    async fn put_upserts_and_metrics_reflect_it() {
        let (engine, _metrics) = start_store();
        let store = engine.handle();
        let id = Identifier::generate();

        let (status, _) = call(
            &store,
            Method::PUT,
            &format!("/kvs/{id}"),
            Some(r#"{"value":[1,2,3]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = call(&store, Method::GET, &format!("/kvs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"[1,2,3]");

        let (status, body) = call(&store, Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).expect("json"),
            json!({"size": 1, "operations": 2, "successful_operations": 2})
        );
    }

    #[tokio::test]
    async fn stopped_store_is_service_unavailable() {
        let (engine, _metrics) = start_store();
        let store = engine.handle();
        engine.stop().await;

        let (status, _) = call(&store, Method::POST, "/kvs", Some(r#"{"value":1}"#)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
