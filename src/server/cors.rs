//! CORS layer construction from `CorsConfig`

use crate::config::CorsConfig;
use crate::error::{BgRemovalError, Result};
use axum::http::{header, HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};

/// Build the CORS middleware for `cors`
///
/// `"*"` entries become wildcards. With credentials enabled, browsers reject a
/// literal `*`, so wildcards are honored by mirroring the request instead.
///
/// # Errors
/// - No valid origin left after parsing
pub fn build_cors_layer(cors: &CorsConfig) -> Result<CorsLayer> {
    let (any_origin, origins) = parse_allowed_origins(&cors.allowed_origins);
    if !any_origin && origins.is_empty() {
        return Err(BgRemovalError::invalid_config(format!(
            "CORS policy has no valid origin in {:?}",
            cors.allowed_origins
        )));
    }

    let (any_methods, methods) = parse_allowed_methods(&cors.allowed_methods);
    let (any_headers, headers) = parse_header_names(&cors.allowed_headers);

    let mut layer = CorsLayer::new();

    layer = match (any_origin, cors.allow_credentials) {
        (true, true) => layer.allow_origin(AllowOrigin::mirror_request()),
        (true, false) => layer.allow_origin(Any),
        (false, _) => layer.allow_origin(origins),
    };

    layer = match (any_methods, cors.allow_credentials) {
        (true, true) => layer.allow_methods(AllowMethods::mirror_request()),
        (true, false) => layer.allow_methods(Any),
        (false, _) => layer.allow_methods(methods),
    };

    layer = match (any_headers, cors.allow_credentials) {
        (true, true) => layer.allow_headers(AllowHeaders::mirror_request()),
        (true, false) => layer.allow_headers(Any),
        (false, _) => layer.allow_headers(headers),
    };

    if cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }

    if let Some(secs) = cors.max_age_secs.filter(|secs| *secs > 0) {
        layer = layer.max_age(Duration::from_secs(secs));
    }

    if any_origin {
        tracing::warn!("CORS accepts requests from any origin");
    } else {
        tracing::info!(origins = ?cors.allowed_origins, "CORS restricted to configured origins");
    }

    Ok(layer)
}

fn parse_allowed_origins(values: &[String]) -> (bool, Vec<HeaderValue>) {
    let mut any = false;
    let mut origins = Vec::new();
    for raw in values {
        let value = raw.trim().trim_end_matches('/');
        if value.is_empty() {
            continue;
        }
        if value == "*" {
            any = true;
            continue;
        }
        match HeaderValue::from_str(value) {
            Ok(v) => origins.push(v),
            Err(_) => tracing::warn!("Ignoring invalid CORS origin: {}", value),
        }
    }
    (any, origins)
}

fn parse_allowed_methods(values: &[String]) -> (bool, Vec<Method>) {
    let mut any = false;
    let mut methods = Vec::new();
    for raw in values {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        if value == "*" {
            any = true;
            continue;
        }
        let normalized = value.to_ascii_uppercase();
        match Method::from_bytes(normalized.as_bytes()) {
            Ok(m) => methods.push(m),
            Err(_) => tracing::warn!("Ignoring invalid CORS method: {}", value),
        }
    }
    (any, methods)
}

fn parse_header_names(values: &[String]) -> (bool, Vec<header::HeaderName>) {
    let mut any = false;
    let mut headers = Vec::new();
    for raw in values {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        if value == "*" {
            any = true;
            continue;
        }
        let normalized = value.to_ascii_lowercase();
        match header::HeaderName::from_bytes(normalized.as_bytes()) {
            Ok(h) => headers.push(h),
            Err(_) => tracing::warn!("Ignoring invalid CORS header: {}", value),
        }
    }
    (any, headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_cors_layer_rejects_empty_origins() {
        let cors = CorsConfig::default().with_origins(["", "  "]);
        assert!(build_cors_layer(&cors).is_err());
    }

    #[test]
    fn test_build_cors_layer_accepts_wildcards_with_credentials() {
        assert!(build_cors_layer(&CorsConfig::default()).is_ok());
        assert!(build_cors_layer(&CorsConfig::permissive()).is_ok());

        let no_credentials = CorsConfig {
            allow_credentials: false,
            ..CorsConfig::permissive()
        };
        assert!(build_cors_layer(&no_credentials).is_ok());
    }

    #[test]
    fn test_parse_allowed_origins_trims_trailing_slash() {
        let input = vec![
            "http://localhost:3000/".to_string(),
            "*".to_string(),
            "bad\norigin".to_string(),
        ];
        let (any, origins) = parse_allowed_origins(&input);
        assert!(any);
        assert_eq!(origins, vec![HeaderValue::from_static("http://localhost:3000")]);
    }

    #[test]
    fn test_parse_allowed_methods_normalizes_case() {
        let input = vec!["get".to_string(), " POST ".to_string()];
        let (any, methods) = parse_allowed_methods(&input);
        assert!(!any);
        assert_eq!(methods, vec![Method::GET, Method::POST]);
    }

    #[test]
    fn test_parse_header_names() {
        let input = vec!["Content-Type".to_string(), "*".to_string()];
        let (any, headers) = parse_header_names(&input);
        assert!(any);
        assert_eq!(headers, vec![header::CONTENT_TYPE]);
    }
}
