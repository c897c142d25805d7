#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Background Removal Gateway
//!
//! An HTTP service that removes image backgrounds. Clients upload an image
//! as multipart form data and receive a PNG with the background made
//! transparent.
//!
//! ## Endpoints
//!
//! - `GET /health` returns `{"ok": true}`
//! - `POST /remove-bg` takes the multipart field `file` and returns `image/png`;
//!   `?only_mask=true` returns the grayscale mask instead
//!
//! ## Pipeline
//!
//! Uploads are decoded with the `image` crate, letterboxed into the model
//! input, segmented by an `ISNet`-style ONNX model and the resulting mask is
//! applied as the alpha channel. Inference runs on ONNX Runtime (`onnx`
//! feature, CPU/CUDA/`CoreML`) or Tract (`tract` feature, pure Rust).
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use bgremove_gateway::{
//!     server, AppState, BackgroundRemovalProcessor, ProcessorConfig, ServerConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut processor = BackgroundRemovalProcessor::new(ProcessorConfig::default())?;
//! processor.initialize()?;
//!
//! let config = ServerConfig::default();
//! server::serve(AppState::from_processor(processor), &config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): the `bgremove-gateway` binary and subscriber setup
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log lines

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod server;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use backends::*;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{CorsConfig, ExecutionProvider, RemovalConfig, ServerConfig};
pub use download::{parse_huggingface_url, validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelManager, ModelSource, ModelSpec};
pub use processor::{
    BackendFactory, BackendType, BackgroundRemovalProcessor, DefaultBackendFactory,
    MockBackendFactory, ProcessorConfig, ProcessorConfigBuilder,
};
pub use server::{router, ApiError, AppState, BackgroundRemover};
pub use types::{ProcessingTimings, RemovalResult, SegmentationMask};
pub use utils::{ImagePreprocessor, PreprocessingOptions};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
