//! HTTP route handlers for the Greenlight server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /v1/healthcheck` - Health check endpoint
//! - `GET /v1/events` - List events with filtering, sorting and pagination
//! - `POST /v1/events` - Create an event
//! - `GET /v1/events/{id}` - Show one event
//! - `PATCH /v1/events/{id}` - Partially update an event
//! - `DELETE /v1/events/{id}` - Delete an event
//! - `GET /debug/vars` - Request metrics
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (including rate limiter settings)
//! - The client registry backing the admission gate
//! - The event store
//! - Request metrics
//!
//! Every route, including the fallbacks, sits behind the middleware stack
//! described in [`crate::middleware`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//!
//! use greenlight_server::config::Config;
//! use greenlight_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config);
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await.unwrap();
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
//!         .await
//!         .unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::identity::ClientIdentity;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::middleware::{cors_layer, rate_limit, recover_panic, track_metrics};
use crate::rate_limit::ClientRegistry;
use crate::store::EventStore;
use crate::types::{
    CreateEventInput, Event, EventFilter, ListEventsQuery, Metadata, UpdateEventInput,
};

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the version a client expects to update.
pub const HEADER_EXPECTED_VERSION: &str = "X-Expected-Version";

/// Maximum JSON body size (1 MiB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Version reported by the healthcheck.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers and middleware.
///
/// Cloning is cheap: every component is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration, immutable after startup.
    pub config: Arc<Config>,

    /// Per-client limiter state used by the admission gate.
    pub registry: ClientRegistry,

    /// Event storage.
    pub events: EventStore,

    /// Request and response counters.
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Creates a new application state with the given configuration.
    ///
    /// The client registry is sized from `config.limiter`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = ClientRegistry::new(config.limiter.rps, config.limiter.burst);
        Self::with_components(config, registry, EventStore::new())
    }

    /// Creates application state with a custom registry and store.
    #[must_use]
    pub fn with_components(config: Config, registry: ClientRegistry, events: EventStore) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            events,
            metrics: Arc::new(Metrics::new()),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("events", &"<EventStore>")
            .field("metrics", &self.metrics)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes and middleware configured.
///
/// The router reads the client address from `ConnectInfo<SocketAddr>`, so it
/// must be served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthcheck", get(get_healthcheck))
        .route("/v1/events", get(list_events).post(create_event))
        .route(
            "/v1/events/{id}",
            get(show_event).patch(update_event).delete(delete_event),
        )
        .route("/debug/vars", get(get_debug_vars))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(cors_layer(&state.config.trusted_origins))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(recover_panic))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_metrics,
        ))
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn method_not_allowed(method: Method) -> ApiError {
    ApiError::MethodNotAllowed(method)
}

// ============================================================================
// Helpers
// ============================================================================

/// Decodes a JSON request body.
///
/// Unknown fields, trailing data, an empty body and a body over
/// [`MAX_BODY_SIZE`] are all bad requests.
fn read_json<T: DeserializeOwned>(body: std::result::Result<Bytes, BytesRejection>) -> Result<T> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::bad_request(format!(
                "body must not be larger than {MAX_BODY_SIZE} bytes"
            ))
        } else {
            ApiError::bad_request(rejection.body_text())
        }
    })?;

    if body.is_empty() {
        return Err(ApiError::bad_request("body must not be empty"));
    }

    serde_json::from_slice(&body).map_err(|err| {
        use serde_json::error::Category;

        let message = match err.classify() {
            Category::Syntax | Category::Eof => {
                format!("body contains badly-formed JSON: {err}")
            }
            Category::Data => format!("body contains invalid JSON: {err}"),
            Category::Io => format!("failed to read body: {err}"),
        };
        ApiError::bad_request(message)
    })
}

/// Parses the `{id}` path segment; anything but a positive integer is a 404.
fn parse_id(path: std::result::Result<Path<String>, PathRejection>) -> Result<i64> {
    let Ok(Path(raw)) = path else {
        return Err(ApiError::NotFound);
    };

    match raw.parse::<i64>() {
        Ok(id) if id >= 1 => Ok(id),
        _ => Err(ApiError::NotFound),
    }
}

/// Reads the optional `X-Expected-Version` header.
fn expected_version(headers: &HeaderMap) -> Result<Option<i32>> {
    headers
        .get(HEADER_EXPECTED_VERSION)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| ApiError::bad_request("X-Expected-Version must be an integer"))
        })
        .transpose()
}

// ============================================================================
// GET /v1/healthcheck
// ============================================================================

/// Health check response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: &'static str,
    pub version: &'static str,
}

/// GET /v1/healthcheck - Reports availability, environment and version.
async fn get_healthcheck(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "available",
        system_info: SystemInfo {
            environment: state.config.env.as_str(),
            version: VERSION,
        },
    })
}

// ============================================================================
// /v1/events
// ============================================================================

/// Body of `GET /v1/events`.
#[derive(Debug, Serialize)]
struct EventList {
    events: Vec<Event>,
    metadata: Metadata,
}

/// GET /v1/events - Lists events.
///
/// # Query Parameters
///
/// - `title` - case-insensitive substring match
/// - `tags` - comma separated, all must be present
/// - `page`, `page_size` - pagination (defaults 1 and 20)
/// - `sort` - `id`, `title` or `start`, prefixed with `-` for descending
async fn list_events(
    State(state): State<AppState>,
    query: std::result::Result<Query<ListEventsQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let filter = EventFilter::try_from(query)?;
    let (events, metadata) = state.events.list(&filter).await;

    Ok(Json(EventList { events, metadata }).into_response())
}

/// POST /v1/events - Creates an event.
///
/// # Responses
///
/// - `201 Created` - with a `Location` header and the stored event
/// - `400 Bad Request` - malformed JSON
/// - `422 Unprocessable Entity` - validation failure
async fn create_event(
    State(state): State<AppState>,
    Extension(client): Extension<ClientIdentity>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Response> {
    let input: CreateEventInput = read_json(body)?;
    let event = state.events.insert(input.into_new_event()?).await;

    info!(client = %client, event_id = event.id, "Event created");

    let location = HeaderValue::from_str(&format!("/v1/events/{}", event.id))
        .map_err(|err| ApiError::internal(err.to_string()))?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(json!({ "event": event })),
    )
        .into_response())
}

/// GET /v1/events/{id} - Shows one event.
async fn show_event(
    State(state): State<AppState>,
    id: std::result::Result<Path<String>, PathRejection>,
) -> Result<Response> {
    let id = parse_id(id)?;
    let event = state.events.get(id).await?;

    Ok(Json(json!({ "event": event })).into_response())
}

/// PATCH /v1/events/{id} - Partially updates an event.
///
/// If the `X-Expected-Version` header is present and does not match the
/// stored version, responds with `409 Conflict`. A concurrent update landing
/// between the read and the write also yields `409`.
async fn update_event(
    State(state): State<AppState>,
    id: std::result::Result<Path<String>, PathRejection>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Response> {
    let id = parse_id(id)?;
    let mut event = state.events.get(id).await?;

    if let Some(expected) = expected_version(&headers)? {
        if expected != event.version {
            debug!(event_id = id, expected, actual = event.version, "Version mismatch");
            return Err(ApiError::EditConflict);
        }
    }

    let input: UpdateEventInput = read_json(body)?;
    input.apply(&mut event)?;

    let event = state.events.update(event).await?;

    info!(event_id = event.id, version = event.version, "Event updated");

    Ok(Json(json!({ "event": event })).into_response())
}

/// DELETE /v1/events/{id} - Deletes an event.
async fn delete_event(
    State(state): State<AppState>,
    id: std::result::Result<Path<String>, PathRejection>,
) -> Result<Response> {
    let id = parse_id(id)?;
    state.events.delete(id).await?;

    info!(event_id = id, "Event deleted");

    Ok(Json(json!({ "message": "event successfully deleted" })).into_response())
}

// ============================================================================
// GET /debug/vars
// ============================================================================

/// GET /debug/vars - Request metrics and the number of rate limited clients.
async fn get_debug_vars(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot: MetricsSnapshot = state.metrics.snapshot();
    let tracked_clients = state.registry.len().await;

    Json(json!({
        "metrics": snapshot,
        "rate_limiter": {
            "enabled": state.config.limiter.enabled,
            "tracked_clients": tracked_clients,
        },
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::LimiterConfig;

    /// Creates a test configuration with the limiter set as given.
    fn test_config(limiter: LimiterConfig) -> Config {
        Config {
            limiter,
            ..Config::default()
        }
    }

    fn limiter(enabled: bool, rps: f64, burst: u32) -> LimiterConfig {
        LimiterConfig {
            rps,
            burst,
            enabled,
            ..LimiterConfig::default()
        }
    }

    fn request(method: Method, uri: &str, ip: &str, body: Body) -> Request<Body> {
        let addr: SocketAddr = format!("{ip}:50000").parse().unwrap();
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    fn get_req(uri: &str) -> Request<Body> {
        request(Method::GET, uri, "127.0.0.1", Body::empty())
    }

    fn json_req(method: Method, uri: &str, body: Value) -> Request<Body> {
        request(method, uri, "127.0.0.1", Body::from(body.to_string()))
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn unlimited_app() -> (AppState, Router) {
        let state = AppState::new(test_config(limiter(false, 2.0, 4)));
        let app = create_router(state.clone());
        (state, app)
    }

    fn sample_event() -> Value {
        serde_json::json!({
            "title": "Standup",
            "description": "Daily sync",
            "tags": ["work"],
            "all_day": false,
            "start": "2026-03-14T09:00:00Z",
            "end": "2026-03-14T09:15:00Z"
        })
    }

    // ========================================================================
    // Admission gate through the full router
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn fifth_back_to_back_request_is_rate_limited() {
        let state = AppState::new(test_config(limiter(true, 2.0, 4)));
        let app = create_router(state);

        let mut statuses = Vec::new();
        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request(Method::GET, "/v1/healthcheck", "10.0.0.1", Body::empty()))
                .await
                .unwrap();
            statuses.push(response);
        }

        let codes: Vec<_> = statuses.iter().map(|r| r.status()).collect();
        assert_eq!(
            codes,
            vec![
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::TOO_MANY_REQUESTS,
            ]
        );

        let rejected = statuses.pop().unwrap();
        assert!(rejected.headers().get(header::RETRY_AFTER).is_none());
        assert_eq!(
            body_json(rejected).await,
            serde_json::json!({ "error": "rate limit exceeded" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_client_has_separate_bucket() {
        let state = AppState::new(test_config(limiter(true, 2.0, 4)));
        let app = create_router(state.clone());

        let burst = async {
            let mut codes = Vec::new();
            for _ in 0..5 {
                let response = app
                    .clone()
                    .oneshot(request(Method::GET, "/v1/healthcheck", "10.0.0.1", Body::empty()))
                    .await
                    .unwrap();
                codes.push(response.status());
            }
            codes
        };
        let other = app
            .clone()
            .oneshot(request(Method::GET, "/v1/healthcheck", "10.0.0.2", Body::empty()));

        let (codes, other) = tokio::join!(burst, other);

        assert_eq!(codes.last(), Some(&StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(codes.iter().filter(|c| **c == StatusCode::OK).count(), 4);
        assert_eq!(other.unwrap().status(), StatusCode::OK);
        assert_eq!(state.registry.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn limited_client_recovers_after_refill() {
        let state = AppState::new(test_config(limiter(true, 2.0, 4)));
        let app = create_router(state);

        for _ in 0..4 {
            app.clone().oneshot(get_req("/v1/healthcheck")).await.unwrap();
        }
        let response = app.clone().oneshot(get_req("/v1/healthcheck")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        tokio::time::advance(std::time::Duration::from_millis(500)).await;

        let response = app.clone().oneshot(get_req("/v1/healthcheck")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(get_req("/v1/healthcheck")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn disabled_limiter_never_populates_registry() {
        let (state, app) = unlimited_app();

        for i in 0..25 {
            let ip = format!("10.0.0.{}", i % 3);
            let response = app
                .clone()
                .oneshot(request(Method::GET, "/v1/healthcheck", &ip, Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert!(state.registry.is_empty().await);
    }

    #[tokio::test]
    async fn missing_connect_info_is_server_error() {
        let (_, app) = unlimited_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/healthcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("server encountered a problem"));
    }

    // ========================================================================
    // Healthcheck and fallbacks
    // ========================================================================

    #[tokio::test]
    async fn healthcheck_reports_environment_and_version() {
        let (_, app) = unlimited_app();

        let response = app.oneshot(get_req("/v1/healthcheck")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "available");
        assert_eq!(body["system_info"]["environment"], "development");
        assert_eq!(body["system_info"]["version"], VERSION);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found_envelope() {
        let (_, app) = unlimited_app();

        let response = app.oneshot(get_req("/v1/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "the requested resource could not be found" })
        );
    }

    #[tokio::test]
    async fn wrong_method_is_method_not_allowed() {
        let (_, app) = unlimited_app();

        let response = app
            .oneshot(request(Method::PUT, "/v1/healthcheck", "127.0.0.1", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            body_json(response).await["error"],
            "the PUT method is not supported for this resource"
        );
    }

    // ========================================================================
    // Events CRUD
    // ========================================================================

    #[tokio::test]
    async fn create_event_returns_location() {
        let (_, app) = unlimited_app();

        let response = app
            .oneshot(json_req(Method::POST, "/v1/events", sample_event()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/v1/events/1"
        );
        let body = body_json(response).await;
        assert_eq!(body["event"]["id"], 1);
        assert_eq!(body["event"]["title"], "Standup");
        assert_eq!(body["event"]["version"], 1);
    }

    #[tokio::test]
    async fn create_event_rejects_invalid_input() {
        let (_, app) = unlimited_app();

        let response = app
            .clone()
            .oneshot(json_req(
                Method::POST,
                "/v1/events",
                serde_json::json!({ "title": "", "start": "2026-03-14T09:00:00Z" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["title"], "must be provided");
        assert_eq!(body["error"]["end"], "must be provided");

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/events",
                "127.0.0.1",
                Body::from("{\"title\": "),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request(Method::POST, "/v1/events", "127.0.0.1", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "body must not be empty");
    }

    #[tokio::test]
    async fn create_event_rejects_unknown_fields() {
        let (_, app) = unlimited_app();

        let mut event = sample_event();
        event["location"] = serde_json::json!("room 1");

        let response = app
            .oneshot(json_req(Method::POST, "/v1/events", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn show_update_delete_lifecycle() {
        let (_, app) = unlimited_app();

        app.clone()
            .oneshot(json_req(Method::POST, "/v1/events", sample_event()))
            .await
            .unwrap();

        let response = app.clone().oneshot(get_req("/v1/events/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["event"]["title"], "Standup");

        let response = app
            .clone()
            .oneshot(json_req(
                Method::PATCH,
                "/v1/events/1",
                serde_json::json!({ "title": "Retro", "tags": ["work", "team"] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["event"]["title"], "Retro");
        assert_eq!(body["event"]["description"], "Daily sync");
        assert_eq!(body["event"]["version"], 2);

        let response = app
            .clone()
            .oneshot(request(Method::DELETE, "/v1/events/1", "127.0.0.1", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["message"],
            "event successfully deleted"
        );

        let response = app.oneshot(get_req("/v1/events/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_with_stale_expected_version_conflicts() {
        let (_, app) = unlimited_app();

        app.clone()
            .oneshot(json_req(Method::POST, "/v1/events", sample_event()))
            .await
            .unwrap();

        let mut req = json_req(
            Method::PATCH,
            "/v1/events/1",
            serde_json::json!({ "title": "Retro" }),
        );
        req.headers_mut()
            .insert(HEADER_EXPECTED_VERSION, HeaderValue::from_static("7"));

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn update_rejects_invalid_result() {
        let (_, app) = unlimited_app();

        app.clone()
            .oneshot(json_req(Method::POST, "/v1/events", sample_event()))
            .await
            .unwrap();

        let response = app
            .oneshot(json_req(
                Method::PATCH,
                "/v1/events/1",
                serde_json::json!({ "end": "2026-03-14T08:00:00Z" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn invalid_ids_are_not_found() {
        let (_, app) = unlimited_app();

        for uri in [
            "/v1/events/0",
            "/v1/events/-4",
            "/v1/events/abc",
            "/v1/events/99",
            "/v1/events/%FF",
        ] {
            let response = app.clone().oneshot(get_req(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn oversized_body_is_bad_request_envelope() {
        let (state, app) = unlimited_app();

        let mut event = sample_event();
        event["description"] = serde_json::json!("x".repeat(2 * 1024 * 1024));

        let response = app
            .oneshot(json_req(Method::POST, "/v1/events", event))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "body must not be larger than 1048576 bytes" })
        );
        assert!(state.events.get(1).await.is_err());
    }

    #[tokio::test]
    async fn oversized_patch_body_is_bad_request_envelope() {
        let (_, app) = unlimited_app();

        app.clone()
            .oneshot(json_req(Method::POST, "/v1/events", sample_event()))
            .await
            .unwrap();

        let response = app
            .oneshot(json_req(
                Method::PATCH,
                "/v1/events/1",
                serde_json::json!({ "title": "x".repeat(2 * 1024 * 1024) }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            "body must not be larger than 1048576 bytes"
        );
    }

    #[tokio::test]
    async fn malformed_query_is_bad_request_envelope() {
        let (_, app) = unlimited_app();

        let response = app
            .oneshot(get_req("/v1/events?page=1&page=2"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = body_json(response).await;
        assert!(
            body["error"].as_str().unwrap().contains("page"),
            "unexpected body: {body}"
        );
    }

    #[tokio::test]
    async fn preflight_from_untrusted_origin_gets_no_cors_grant() {
        let mut config = test_config(limiter(true, 2.0, 1));
        config.trusted_origins = vec!["https://trusted.example.com".to_string()];
        let state = AppState::new(config);
        let app = create_router(state.clone());

        let mut req = request(Method::OPTIONS, "/v1/events", "10.0.0.5", Body::empty());
        req.headers_mut().insert(
            header::ORIGIN,
            HeaderValue::from_static("https://evil.example.com"),
        );
        req.headers_mut().insert(
            header::ACCESS_CONTROL_REQUEST_METHOD,
            HeaderValue::from_static("DELETE"),
        );

        let response = app.oneshot(req).await.unwrap();

        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
        assert!(
            !state.registry.contains("10.0.0.5").await,
            "preflights are answered before the admission gate"
        );
    }

    #[tokio::test]
    async fn list_events_filters_and_paginates() {
        let (_, app) = unlimited_app();

        for (title, start) in [
            ("Standup", "2026-03-14T09:00:00Z"),
            ("Lunch", "2026-03-14T12:00:00Z"),
            ("Stand-in", "2026-03-14T15:00:00Z"),
        ] {
            let mut event = sample_event();
            event["title"] = serde_json::json!(title);
            event["start"] = serde_json::json!(start);
            event["end"] = serde_json::json!(start);
            app.clone()
                .oneshot(json_req(Method::POST, "/v1/events", event))
                .await
                .unwrap();
        }

        let response = app
            .clone()
            .oneshot(get_req("/v1/events?title=stand&sort=-start&page_size=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["events"].as_array().unwrap().len(), 1);
        assert_eq!(body["events"][0]["title"], "Stand-in");
        assert_eq!(body["metadata"]["total_records"], 2);
        assert_eq!(body["metadata"]["last_page"], 2);

        let response = app
            .oneshot(get_req("/v1/events?page=0&sort=bogus"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn debug_vars_reports_metrics() {
        let (_, app) = unlimited_app();

        app.clone().oneshot(get_req("/v1/healthcheck")).await.unwrap();
        let response = app.oneshot(get_req("/debug/vars")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["metrics"]["total_requests_received"], 2);
        assert_eq!(body["metrics"]["total_responses_sent"], 1);
        assert_eq!(body["rate_limiter"]["enabled"], false);
        assert_eq!(body["rate_limiter"]["tracked_clients"], 0);
    }
}
