#![allow(dead_code)]

//! Local stand-in for the hosted PostgREST endpoint.
//!
//! Serves a canned status and body on `/rest/v1/post_likes` and records every
//! request it receives.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use likes_digest::event_source::PostgrestConfig;
use likes_digest::PostgrestEventSource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const STUB_API_KEY: &str = "anon-key";

/// What the stub saw of one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub query: HashMap<String, String>,
    pub api_key: Option<String>,
    pub authorization: Option<String>,
}

struct StubState {
    status: StatusCode,
    body: String,
    requests: Vec<RecordedRequest>,
}

type SharedState = Arc<Mutex<StubState>>;

/// Stub backend bound to a random local port. Shuts down when dropped.
pub struct StubBackend {
    /// Base URL for the event source (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
    state: SharedState,
    _shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl StubBackend {
    pub async fn spawn(status: StatusCode, body: impl Into<String>) -> Self {
        let state = Arc::new(Mutex::new(StubState {
            status,
            body: body.into(),
            requests: Vec::new(),
        }));
        let app = Router::new()
            .route("/rest/v1/post_likes", get(post_likes))
            .with_state(state.clone());

        // Connections queue on the bound listener until the server task runs.
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Stub backend failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: shutdown_tx,
        }
    }

    pub fn respond_with(&self, status: StatusCode, body: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.status = status;
        state.body = body.into();
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn source(&self, access_token: Option<&str>) -> PostgrestEventSource {
        PostgrestEventSource::new(PostgrestConfig {
            base_url: self.base_url.clone(),
            api_key: STUB_API_KEY.to_string(),
            access_token: access_token.map(str::to_string),
            timeout: Duration::from_secs(5),
        })
        .expect("Failed to build PostgREST source")
    }
}

async fn post_likes(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest {
        query,
        api_key: header_value("apikey"),
        authorization: header_value(header::AUTHORIZATION.as_str()),
    });
    (
        state.status,
        [(header::CONTENT_TYPE, "application/json")],
        state.body.clone(),
    )
}
