use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 64;

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    /// Raw `{session}` path segment, unvalidated.
    pub session: Option<String>,
}

impl RequestContext {
    fn from_request(request: &Request<Body>) -> Self {
        let request_id = request
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|id| is_acceptable_request_id(id))
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id,
            session: session_segment(request.uri().path()).map(str::to_string),
        }
    }
}

fn is_acceptable_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn session_segment(path: &str) -> Option<&str> {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next()) {
        (Some("sessions"), Some(session)) if !session.is_empty() => Some(session),
        _ => None,
    }
}

/// Attaches a [`RequestContext`] and echoes its id in `x-request-id`.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext::from_request(&request);
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let ctx = request.extensions().get::<RequestContext>().cloned();

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let report = response.extensions_mut().remove::<ErrorReport>();
    let (source, messages) = report
        .map(|report| (report.source, report.messages))
        .unwrap_or(("unknown", Vec::new()));
    let detail = messages
        .first()
        .map(String::as_str)
        .unwrap_or("no diagnostic available");
    let elapsed_ms = start.elapsed().as_millis();
    let request_id = ctx.as_ref().map(|ctx| ctx.request_id.as_str()).unwrap_or("");
    let session = ctx
        .as_ref()
        .and_then(|ctx| ctx.session.as_deref())
        .unwrap_or("");

    if status.is_server_error() {
        error!(
            target: "tidecache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            session,
            elapsed_ms,
            source,
            detail,
            chain = ?messages,
            request_id,
            "request failed",
        );
    } else {
        warn!(
            target: "tidecache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            session,
            elapsed_ms,
            source,
            detail,
            request_id,
            "client request error",
        );
    }

    response
}
