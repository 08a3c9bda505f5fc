//! Shared helpers for HTTP integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tower::ServiceExt;

use cineflow::bus::{BrokerConnectionManager, InMemoryBroker, PlaybackPublisher};
use cineflow::clients::InMemoryLookup;
use cineflow::handlers::{streaming_router, user_router, UserState};
use cineflow::orchestration::{DependencyVerifier, PlaybackOrchestrator};
use cineflow::services::{InMemoryUserStore, PlaybackHistory};

/// Streaming router over in-memory peers and broker.
pub struct StreamingApp {
    pub router: Router,
    pub broker: InMemoryBroker,
    pub connection: Arc<BrokerConnectionManager>,
    pub users: InMemoryLookup,
    pub movies: InMemoryLookup,
}

/// Users "1" and "2"; movies "tt0110912" and "tt0068646". Not yet connected.
pub fn streaming_app() -> StreamingApp {
    let broker = InMemoryBroker::new();
    let users = InMemoryLookup::with_ids(["1", "2"]);
    let movies = InMemoryLookup::with_ids(["tt0110912", "tt0068646"]);
    let connection = Arc::new(BrokerConnectionManager::new(Arc::new(broker.clone())));
    let orchestrator = Arc::new(PlaybackOrchestrator::new(
        DependencyVerifier::new(Arc::new(users.clone()), Arc::new(movies.clone())),
        Arc::new(PlaybackPublisher::new(Arc::clone(&connection))),
    ));
    StreamingApp {
        router: streaming_router(orchestrator),
        broker,
        connection,
        users,
        movies,
    }
}

/// User router with an empty registry.
pub fn user_app() -> (Router, PlaybackHistory) {
    let history = PlaybackHistory::new();
    let state = UserState {
        store: Arc::new(InMemoryUserStore::new()),
        history: history.clone(),
    };
    (user_router(state), history)
}

/// Serve `router` on an ephemeral local port. Returns the base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null)
    };

    (status, json)
}
