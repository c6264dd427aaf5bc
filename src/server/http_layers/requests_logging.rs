//! Request logging middleware

use super::super::metrics::record_http_request;
use super::super::state::ServerState;
use axum::extract::State;
use axum::{
    body::Body,
    http::{header::HeaderMap, Request, Response},
    middleware::Next,
    response::IntoResponse,
};
use std::time::Instant;
use tracing::{error, info};

#[derive(PartialEq, PartialOrd, Clone, Debug, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    Path,
    Headers,
    Body,
}

impl Default for RequestsLoggingLevel {
    fn default() -> Self {
        Self::Path
    }
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

const MAX_LOGGABLE_BODY_LENGTH: usize = 1024;

enum ContentLengthParseResult {
    Ok(usize),
    No(&'static str),
}

fn parse_content_length(headers: &HeaderMap) -> ContentLengthParseResult {
    let value = match headers.get("content-length") {
        Some(x) => x,
        None => return ContentLengthParseResult::No("Content-length not set."),
    };

    let str_value = match value.to_str() {
        Ok(x) => x,
        Err(_) => {
            return ContentLengthParseResult::No("Could not get Content-length string value.")
        }
    };

    match str_value.parse::<usize>() {
        Ok(x) => ContentLengthParseResult::Ok(x),
        Err(_) => ContentLengthParseResult::No("Could not parse Content-length numeric value."),
    }
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::from("Internal Server Error"));
    *response.status_mut() = axum::http::StatusCode::INTERNAL_SERVER_ERROR;
    response
}

fn log_headers(label: &str, headers: &HeaderMap) {
    info!("  {} Headers:", label);
    for header in headers.iter() {
        info!("    {:?}: {:?}", header.0, header.1);
    }
}

/// Buffers a small body so it can be logged, returns `None` if it could not be read.
async fn log_body(label: &str, headers: &HeaderMap, body: Body) -> Option<Body> {
    match parse_content_length(headers) {
        ContentLengthParseResult::No(reason) => {
            info!("  {} Body: {}", label, reason);
            Some(body)
        }
        ContentLengthParseResult::Ok(size) if size < MAX_LOGGABLE_BODY_LENGTH => {
            let bytes = match axum::body::to_bytes(body, size).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!("Failed to read {} body: {:?}", label, err);
                    return None;
                }
            };
            info!("  {} Body:\n{}", label, String::from_utf8_lossy(&bytes));
            Some(Body::from(bytes))
        }
        ContentLengthParseResult::Ok(size) => {
            info!(
                "  {} Body: Too big to log ({:#})",
                label,
                byte_unit::Byte::from(size)
            );
            Some(body)
        }
    }
}

pub async fn log_requests(
    State(state): State<ServerState>,
    mut request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let level = state.config.requests_logging_level.clone();

    let start = Instant::now();

    let method = request.method().to_string();
    let uri = request.uri().to_string();
    let path = request.uri().path().to_string();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, uri);
    }

    if level >= RequestsLoggingLevel::Headers {
        log_headers("Req", request.headers());
    }

    if level >= RequestsLoggingLevel::Body {
        let (parts, body) = request.into_parts();
        match log_body("Req", &parts.headers, body).await {
            Some(body) => request = Request::from_parts(parts, body),
            None => return internal_error(),
        }
    }

    let mut response = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        log_headers("Resp", response.headers());
    }

    if level >= RequestsLoggingLevel::Body {
        let (parts, body) = response.into_parts();
        match log_body("Resp", &parts.headers, body).await {
            Some(body) => response = Response::from_parts(parts, body),
            None => return internal_error(),
        }
    }

    let status = response.status().as_u16();
    let duration = start.elapsed();

    if level > RequestsLoggingLevel::None {
        info!("<<< {} ({}ms)", status, duration.as_millis());
    }

    record_http_request(&method, &path, status, duration);

    response
}
