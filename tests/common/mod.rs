//! Shared helpers for the HTTP integration tests
//!
//! Routers are built around the mock backend, so no model files or network
//! access are needed.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use bgremove_gateway::{
    backends::MockBackend,
    config::ServerConfig,
    processor::{BackendType, BackgroundRemovalProcessor, MockBackendFactory, ProcessorConfig},
    server::{router, AppState},
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use tower::ServiceExt;

pub const BOUNDARY: &str = "gateway-test-boundary";

/// Processor driven by a copy of `template`
pub fn mock_processor(template: MockBackend) -> BackgroundRemovalProcessor {
    let config = ProcessorConfig::builder()
        .backend_type(BackendType::Mock)
        .build()
        .unwrap();
    BackgroundRemovalProcessor::with_factory(config, Box::new(MockBackendFactory::new(template)))
        .unwrap()
}

/// Router over a mock processor with a 64x64 model input
pub fn mock_app(config: &ServerConfig) -> Router {
    mock_app_with(MockBackend::with_target_size(64, 64), config)
}

pub fn mock_app_with(template: MockBackend, config: &ServerConfig) -> Router {
    router(AppState::from_processor(mock_processor(template)), config).unwrap()
}

/// Gradient image encoded in `format`
pub fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    });
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, format)
        .unwrap();
    buffer.into_inner()
}

/// A `multipart/form-data` body with one part per `(name, file_name, data)`
pub fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
            },
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n").as_bytes(),
                );
            },
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// `POST uri` with a multipart body
pub fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// `POST /remove-bg` with `data` in the `file` field
pub fn remove_bg_request(data: &[u8]) -> Request<Body> {
    upload_request(
        "/remove-bg",
        multipart_body(&[("file", Some("upload.png"), data)]),
    )
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

pub async fn send(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}
