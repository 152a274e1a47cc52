use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use slipway_common::SlipwayError;
use slipway_rate_limit::normalize_client_addr;
use tracing::{debug, error, warn};

use crate::state::SharedState;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Largest JSON body the plan lookup will buffer. Bigger bodies skip the
/// lookup and fall back to the default plan.
const PLAN_SNIFF_LIMIT: usize = 256 * 1024;

/// Admission gate applied in front of rate-limited API routes.
///
/// Resolves the caller's identity and plan, runs one admission check
/// against the shared bucket store, and either forwards the request or
/// rejects it with 429. Store outages are handled by the configured
/// degradation policy; this function never panics on request input.
pub async fn admission(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    if !state.config.rate_limit.enabled {
        return next.run(req).await;
    }

    let started = Instant::now();
    let method = req.method().to_string();

    let response = check(&state, req, next).await;

    state
        .metrics
        .request_duration
        .with_label_values(&[&method, response.status().as_str()])
        .observe(started.elapsed().as_secs_f64());

    response
}

async fn check(state: &SharedState, req: Request, next: Next) -> Response {
    state.metrics.requests_total.inc();

    let Some(identifier) = resolve_identifier(&req) else {
        error!("admission check could not derive an identifier");
        state.metrics.admission_errors.inc();
        return internal_error();
    };

    let (plan, req) = extract_plan(req).await;
    let limit = state.plans.resolve(plan.as_deref());
    if !(limit.capacity.is_finite()
        && limit.capacity > 0.0
        && limit.rate.is_finite()
        && limit.rate > 0.0)
    {
        error!(plan = ?plan, "plan resolved to invalid limits");
        state.metrics.admission_errors.inc();
        return internal_error();
    }

    if !state.store.available() {
        return degrade(state, req, next).await;
    }

    match state
        .buckets
        .acquire(&identifier, limit.capacity, limit.rate, epoch_ms())
        .await
    {
        Ok(decision) if decision.allowed => {
            state.metrics.admissions_allowed.inc();
            let mut response = next.run(req).await;
            set_limit_headers(&mut response, limit.capacity, decision.remaining);
            response
        }
        Ok(decision) => {
            state.metrics.admissions_denied.inc();
            debug!(
                identifier = %identifier,
                retry_after = decision.retry_after_secs,
                "request rate limited"
            );
            too_many_requests(limit.capacity, decision.retry_after_secs)
        }
        Err(SlipwayError::InvalidRequest(reason)) => {
            state.metrics.admission_errors.inc();
            (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response()
        }
        Err(SlipwayError::PolicyMisconfig(reason)) => {
            error!(reason = %reason, "admission check hit broken limiter configuration");
            state.metrics.admission_errors.inc();
            internal_error()
        }
        Err(e) => {
            warn!(error = %e, "admission check failed, applying degradation policy");
            degrade(state, req, next).await
        }
    }
}

/// Apply the degradation policy for an unavailable or failing store:
/// fail-open forwards the request with no rate-limit headers, fail-closed
/// rejects with 503.
async fn degrade(state: &SharedState, req: Request, next: Next) -> Response {
    state.metrics.store_unavailable_total.inc();

    if state.config.rate_limit.fail_open {
        warn!("rate limit store unavailable, passing request through");
        next.run(req).await
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "rate limiter unavailable" })),
        )
            .into_response()
    }
}

/// Identifier selection, first match wins: the `x-api-key` header literal,
/// else the normalized client address.
fn resolve_identifier(req: &Request) -> Option<String> {
    // The API key is used literally; only the address path is normalized.
    if let Some(key) = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    let addr = normalize_client_addr(&client_addr(req)?);
    (!addr.is_empty()).then_some(addr)
}

fn client_addr(req: &Request) -> Option<String> {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return Some(real_ip.to_string());
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Pull the plan name from the query string or a JSON body.
///
/// The body is buffered only when the declared content length fits the
/// sniff limit, and the bytes are re-attached afterwards so downstream
/// extractors see the original body.
async fn extract_plan(req: Request) -> (Option<String>, Request) {
    if let Some(plan) = query_param(req.uri().query(), "plan") {
        return (Some(plan), req);
    }

    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    let length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if !is_json || !length.is_some_and(|len| len > 0 && len <= PLAN_SNIFF_LIMIT) {
        return (None, req);
    }

    let (parts, body) = req.into_parts();
    match to_bytes(body, PLAN_SNIFF_LIMIT).await {
        Ok(bytes) => {
            let plan = serde_json::from_slice::<Value>(&bytes).ok().and_then(|v| {
                if let Some(user) = v.get("userId") {
                    debug!(user = %user, "admission check for user");
                }
                v.get("plan").and_then(Value::as_str).map(str::to_string)
            });
            (plan, Request::from_parts(parts, Body::from(bytes)))
        }
        Err(e) => {
            warn!(error = %e, "failed to buffer request body for plan lookup");
            (None, Request::from_parts(parts, Body::empty()))
        }
    }
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

fn set_limit_headers(response: &mut Response, capacity: f64, remaining: u64) {
    let headers = response.headers_mut();
    headers.insert(HEADER_LIMIT, header_value(capacity as u64));
    headers.insert(HEADER_REMAINING, header_value(remaining));
}

fn header_value(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).expect("numeric header value")
}

fn too_many_requests(capacity: f64, retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too Many Requests",
            "retryAfter": retry_after_secs,
        })),
    )
        .into_response();

    set_limit_headers(&mut response, capacity, 0);
    if retry_after_secs > 0 {
        response
            .headers_mut()
            .insert(HEADER_RETRY_AFTER, header_value(retry_after_secs));
    }

    response
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error" })),
    )
        .into_response()
}

/// Wall-clock milliseconds since the epoch.
pub(crate) fn epoch_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(e) => {
            error!(error = %e, "system clock is before the epoch");
            0
        }
    }
}
