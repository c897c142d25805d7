//! Inference backends
//!
//! - ONNX Runtime backend (feature `onnx`): CPU, CUDA and `CoreML`
//! - Tract backend (feature `tract`): pure Rust, CPU only
//! - Mock backend: deterministic output without model files

pub mod mock;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub use self::mock::MockBackend;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
