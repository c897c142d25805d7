//! Inference backend abstraction

use crate::{config::RemovalConfig, error::Result};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
///
/// Backends are moved onto blocking worker threads by the HTTP layer, so
/// implementations must be `Send`.
pub trait InferenceBackend: Send {
    /// Initialize the backend with the given configuration
    ///
    /// Returns the model load time, or `None` when the backend was already
    /// initialized.
    ///
    /// # Errors
    /// - Model loading or validation errors
    /// - Invalid configuration parameters
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>>;

    /// Run inference on an NCHW input tensor and return the NCHW mask tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Unexpected output tensor dimensions
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get the expected input shape for this backend
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// Get the expected output shape for this backend
    fn output_shape(&self) -> (usize, usize, usize, usize);

    /// Get preprocessing configuration for this backend
    ///
    /// # Errors
    /// - Invalid or missing preprocessing configuration
    fn get_preprocessing_config(&self) -> Result<crate::models::PreprocessingConfig>;

    /// Get model information for this backend
    ///
    /// # Errors
    /// - Model metadata unavailable or invalid
    fn get_model_info(&self) -> Result<crate::models::ModelInfo>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_boxed_backend_is_send() {
        assert_send::<Box<dyn InferenceBackend>>();
    }

    #[test]
    fn test_backend_trait_object_shapes() {
        let backend: Box<dyn InferenceBackend> = Box::new(MockBackend::new());

        assert!(!backend.is_initialized());
        let (batch, channels, height, width) = backend.input_shape();
        assert_eq!((batch, channels), (1, 3));
        assert!(height > 0 && width > 0);
        assert_eq!(backend.output_shape().1, 1);
    }
}
