//! Browser CORS behavior of the assembled router

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use bgremove_gateway::config::{CorsConfig, ServerConfig, DEFAULT_CORS_ORIGIN};
use common::{encoded_image, mock_app, remove_bg_request, send};
use image::ImageFormat;

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method("OPTIONS")
        .uri("/remove-bg")
        .header("origin", origin)
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_preflight_from_default_origin() {
    let app = mock_app(&ServerConfig::default());

    let response = send(app, preflight(DEFAULT_CORS_ORIGIN)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some(DEFAULT_CORS_ORIGIN)
    );
    assert_eq!(response.header("access-control-allow-credentials"), Some("true"));

    let methods = response
        .header("access-control-allow-methods")
        .unwrap()
        .to_ascii_uppercase();
    assert!(methods.contains("POST"));

    let headers = response
        .header("access-control-allow-headers")
        .unwrap()
        .to_ascii_lowercase();
    assert!(headers.contains("content-type"));
}

#[tokio::test]
async fn test_preflight_from_unknown_origin_is_not_allowed() {
    let app = mock_app(&ServerConfig::default());

    let response = send(app, preflight("https://evil.example.com")).await;
    assert!(response.header("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn test_configured_origins_replace_default() {
    let config = ServerConfig {
        cors: CorsConfig::default().with_origins(["https://app.example.com/"]),
        ..ServerConfig::default()
    };
    let app = mock_app(&config);

    let response = send(app.clone(), preflight("https://app.example.com")).await;
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some("https://app.example.com")
    );

    let response = send(app, preflight(DEFAULT_CORS_ORIGIN)).await;
    assert!(response.header("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn test_permissive_policy_accepts_any_origin() {
    let config = ServerConfig {
        cors: CorsConfig::permissive(),
        ..ServerConfig::default()
    };
    let app = mock_app(&config);

    for origin in ["https://a.example.com", "http://localhost:5173"] {
        let response = send(app.clone(), preflight(origin)).await;
        assert_eq!(response.header("access-control-allow-origin"), Some(origin));
        assert_eq!(response.header("access-control-allow-credentials"), Some("true"));
    }
}

#[tokio::test]
async fn test_simple_requests_carry_cors_headers() {
    let app = mock_app(&ServerConfig::default());

    let request = Request::builder()
        .uri("/health")
        .header("origin", DEFAULT_CORS_ORIGIN)
        .body(Body::empty())
        .unwrap();
    let response = send(app.clone(), request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some(DEFAULT_CORS_ORIGIN)
    );

    let mut request = remove_bg_request(&encoded_image(12, 12, ImageFormat::Png));
    request
        .headers_mut()
        .insert("origin", DEFAULT_CORS_ORIGIN.parse().unwrap());
    let response = send(app, request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some(DEFAULT_CORS_ORIGIN)
    );
}

#[tokio::test]
async fn test_error_responses_carry_cors_headers() {
    let app = mock_app(&ServerConfig::default());

    let mut request = remove_bg_request(&[]);
    request
        .headers_mut()
        .insert("origin", DEFAULT_CORS_ORIGIN.parse().unwrap());
    let response = send(app, request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some(DEFAULT_CORS_ORIGIN)
    );
}
