use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use sea_orm::prelude::Uuid;
use tracing::Instrument;

use crate::auth::{ACCESS_COOKIE_NAME, CSRF_COOKIE_NAME, json_error, validate_access_jwt};
use crate::config::ControlConfig;
use crate::request_meta::{REQUEST_ID_HEADER, RequestMeta};
use crate::rpc::AuthUser;
use crate::state::AppState;

const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Procedures reachable without a session.
const PUBLIC_PROCEDURES: &[&str] = &["control.ping"];

fn is_unsafe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn origin_is_allowed(config: &ControlConfig, headers: &HeaderMap) -> bool {
    // Treat missing Origin as a non-browser client (curl, service-to-service).
    match headers.get(axum::http::header::ORIGIN) {
        Some(v) => v.to_str().is_ok_and(|o| config.origin_is_allowed(o)),
        None => true,
    }
}

fn request_has_cookie_header(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().is_empty())
}

fn csrf_is_valid(headers: &HeaderMap) -> bool {
    let jar = CookieJar::from_headers(headers);
    let Some(cookie) = jar.get(CSRF_COOKIE_NAME) else {
        return false;
    };
    headers
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|h| h == cookie.value())
}

/// Attaches a request id (reusing a sane inbound `x-request-id`) and echoes it
/// on the response.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let inbound = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 64 && v.chars().all(|c| c.is_ascii_graphic()))
        .map(str::to_string);
    let request_id = inbound.unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestMeta {
        request_id: request_id.clone(),
    });

    let span = tracing::info_span!(
        "http",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut resp = next.run(req).instrument(span).await;
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

// Middleware: double-submit CSRF + Origin allowlist.
//
// Covers every state-changing route, rspc mutations included.
pub async fn csrf_and_origin(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !is_unsafe_method(req.method()) {
        return next.run(req).await;
    }

    let headers = req.headers();
    if !origin_is_allowed(&state.config, headers) {
        tracing::warn!("rejected request from disallowed origin");
        return json_error(StatusCode::FORBIDDEN, "origin not allowed");
    }

    // Only enforce CSRF when cookies are present; non-browser clients send none.
    if request_has_cookie_header(headers) && !csrf_is_valid(headers) {
        return json_error(StatusCode::FORBIDDEN, "csrf invalid");
    }

    next.run(req).await
}

fn procedure_key(path: &str) -> &str {
    path.trim_start_matches("/rspc").trim_start_matches('/')
}

/// Resolves the access cookie into an `AuthUser` extension. Requests without
/// a valid session are refused unless the procedure is public.
pub async fn rspc_auth_guard(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    let user = jar.get(ACCESS_COOKIE_NAME).and_then(|c| {
        validate_access_jwt(c.value(), state.config.jwt_secret.as_bytes())
            .ok()
            .map(|me| AuthUser {
                user_id: me.user_id,
                email: me.email,
                role: me.role,
            })
    });

    match user {
        Some(u) => {
            req.extensions_mut().insert(u);
        }
        None => {
            let key = procedure_key(req.uri().path());
            if !PUBLIC_PROCEDURES.contains(&key) {
                return json_error(StatusCode::UNAUTHORIZED, "Nicht angemeldet");
            }
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(origins: &[&str]) -> ControlConfig {
        ControlConfig {
            database_url: String::new(),
            bind_addr: ([127, 0, 0, 1], 0).into(),
            jwt_secret: "test".to_string(),
            admin_email: String::new(),
            admin_password: String::new(),
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
            geocoding_url: String::new(),
            geocoding_cache_ttl: Duration::from_secs(1),
            setup_token_ttl: Duration::from_secs(1),
        }
    }

    #[test]
    fn origin_allowlist() {
        let cfg = config(&["https://emg.hmq.ch"]);
        let mut headers = HeaderMap::new();
        assert!(origin_is_allowed(&cfg, &headers));

        headers.insert(axum::http::header::ORIGIN, HeaderValue::from_static("https://emg.hmq.ch"));
        assert!(origin_is_allowed(&cfg, &headers));

        headers.insert(axum::http::header::ORIGIN, HeaderValue::from_static("https://evil.example"));
        assert!(!origin_is_allowed(&cfg, &headers));
    }

    #[test]
    fn csrf_requires_matching_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, HeaderValue::from_static("csrf=abc"));
        assert!(!csrf_is_valid(&headers));

        headers.insert(CSRF_HEADER_NAME, HeaderValue::from_static("abd"));
        assert!(!csrf_is_valid(&headers));

        headers.insert(CSRF_HEADER_NAME, HeaderValue::from_static("abc"));
        assert!(csrf_is_valid(&headers));
    }

    #[test]
    fn procedure_key_strips_mount_point() {
        assert_eq!(procedure_key("/rspc/control.ping"), "control.ping");
        assert_eq!(procedure_key("/device.list"), "device.list");
    }
}
