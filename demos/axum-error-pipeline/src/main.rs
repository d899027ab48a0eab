//! Axum adapter for the error-analysis pipeline.
//!
//! `triage` itself depends on no web framework; this binary shows the
//! `Responder` seam wired to Axum's `Response` type, mirroring the shape of
//! the crate's own `axum-resilient-kv-store` example — a plain handler
//! function, `AppState` carrying the shared middleware, and an admin-style
//! endpoint for inspecting state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use triage::ratelimiter::RateLimitOutcome;
use triage::{Config, ErrorPipeline, RawError, Responder};
use triage_core::{Advice, ErrorRecord};
use triage_provider::{Provider, ProviderRegistry};
use triage_secrets::SecretsStore;

/// A provider that never produces advice, standing in for a real
/// OpenAI/Gemini credential until one is configured via `OPENAI_API_KEY` or
/// `GEMINI_API_KEY` — the demo runs end to end either way.
struct NullProvider;

#[async_trait::async_trait]
impl Provider for NullProvider {
    async fn analyze(&self, _prompt: &str) -> Option<Advice> {
        None
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<ErrorPipeline>,
}

/// Collects what the pipeline wants written and hands it back to the Axum
/// handler as a real `Response` once `handle()` returns. `triage` never
/// touches `axum::response::Response` directly — this struct is the entire
/// translation layer.
struct AxumResponder {
    response: Option<Response>,
}

impl AxumResponder {
    fn new() -> Self {
        Self { response: None }
    }

    fn take(self) -> Response {
        self.response
            .unwrap_or_else(|| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

impl Responder for AxumResponder {
    fn headers_sent(&self) -> bool {
        self.response.is_some()
    }

    fn prefers_html(&self) -> bool {
        false
    }

    fn write_html(&mut self, status_code: u16, message: &str, stack: &str) {
        let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = format!("<h1>Error</h1><p>{message}</p><pre>{stack}</pre>");
        self.response = Some((status, Html(body)).into_response());
    }

    fn write_json(&mut self, status_code: u16, record: &ErrorRecord) {
        let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "error": {
                "uniqueName": record.unique_name,
                "message": record.message,
                "statusCode": record.status_code,
            }
        });
        self.response = Some((status, Json(body)).into_response());
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(NullProvider));

    let secrets_dir = std::env::temp_dir().join("triage-demo-secrets.json");
    let secrets = Arc::new(
        SecretsStore::builder()
            .path(secrets_dir)
            .build()
            .expect("secrets store builds with an ephemeral passphrase"),
    );

    let pipeline = ErrorPipeline::new(Config::from_env(), registry, secrets)
        .expect("pipeline assembles with at least one registered provider");

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = TcpListener::bind(addr).await.expect("bind error");
    tracing::info!("listening on http://{addr}");
    tracing::info!("try it: curl http://{addr}/fail");

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/fail", get(fail_handler))
        .route("/errors", get(errors_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// A handler that always errors, demonstrating §4.H's response-then-schedule
/// behavior: the caller gets a JSON error body immediately; the background
/// analysis call happens afterward, unobserved by this request.
async fn fail_handler(State(state): State<AppState>) -> Response {
    let mut responder = AxumResponder::new();
    state.pipeline.handle(
        Some(
            RawError::new("DatabaseTimeout", "connection to primary replica timed out")
                .with_stack_trace("db.rs:42\npool.rs:118")
                .with_status_code(503),
        ),
        Some(&mut responder),
        None::<fn(&ErrorRecord)>,
    );
    responder.take()
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Demonstrates §4.G's `Middleware(endpoint, opts) -> requestInterceptor`
/// and §6's rate-limit response surface: every reply carries the
/// `X-RateLimit-*` headers, and once the caller is over budget this answers
/// with a 429 instead of touching the error pipeline at all.
async fn errors_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let outcome = state
        .pipeline
        .rate_limiter()
        .intercept(&addr.ip().to_string(), "demo-client", "/errors")
        .await;

    let headers = outcome.headers().clone();
    let mut response = match &outcome {
        RateLimitOutcome::Admitted { .. } => {
            Json(serde_json::json!({ "status": "ok" })).into_response()
        }
        RateLimitOutcome::Limited { body, .. } => {
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
    };

    let response_headers = response.headers_mut();
    for (name, value) in headers.as_pairs() {
        if let Ok(value) = value.parse() {
            response_headers.insert(name, value);
        }
    }
    if let RateLimitOutcome::Limited { retry_after_secs, .. } = outcome {
        response_headers.insert("retry-after", retry_after_secs.into());
    }

    response
}
