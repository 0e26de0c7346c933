//! Middleware wrapping the Greenlight router.
//!
//! From the outside in, every request passes through:
//!
//! 1. [`track_metrics`] - request/response counters
//! 2. panic recovery ([`recover_panic`] behind `CatchPanicLayer`)
//! 3. request tracing (`TraceLayer`)
//! 4. CORS ([`cors_layer`])
//! 5. [`rate_limit`] - the per-client admission gate
//!
//! Panic recovery sits outside the admission gate, so a panicking handler can
//! never interrupt the gate's registry update: the gate has already released
//! the registry lock by the time the handler runs.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::identity::ClientIdentity;
use crate::metrics::Metrics;
use crate::routes::AppState;

/// Per-client admission gate.
///
/// Derives the client identity from the peer address, then, when the limiter
/// is enabled, takes one token from the client's bucket. The request is
/// forwarded with the [`ClientIdentity`] attached as an extension, or
/// rejected with 429 without reaching the handler.
///
/// # Errors
///
/// - [`ApiError::Internal`] if the peer address is unavailable
/// - [`ApiError::RateLimitExceeded`] if the client has no token left
pub async fn rate_limit(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = ClientIdentity::from_extensions(req.extensions())?;

    if state.config.limiter.enabled && !state.registry.check(identity.as_str()).await {
        debug!(client = %identity, "Rate limit exceeded");
        return Err(ApiError::RateLimitExceeded);
    }

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Counts every request and response passing through the server.
pub async fn track_metrics(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    metrics.record_request();
    let started = Instant::now();

    let response = next.run(req).await;

    metrics.record_response(response.status().as_u16(), started.elapsed());
    response
}

/// Turns a handler panic into a 500 response and asks the client to close
/// the connection.
pub fn recover_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    let mut response = ApiError::internal(format!("handler panicked: {detail}")).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Builds the CORS layer allowing `trusted_origins`.
///
/// Preflight requests from a trusted origin are answered directly with the
/// allowed methods and headers. Origins that are not valid header values are
/// skipped with a warning.
pub fn cors_layer(trusted_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = trusted_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(origin = %origin, error = %err, "Ignoring invalid trusted origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::OPTIONS, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
