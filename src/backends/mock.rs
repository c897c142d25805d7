//! Deterministic backend that needs no model files
//!
//! Produces a soft disc centered in the model input. Used by the integration
//! tests and by `--execution-provider mock` smoke runs of the server.

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{mpsc::Receiver, Arc, Mutex};

/// Mock inference backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    model_info: ModelInfo,
    preprocessing_config: PreprocessingConfig,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
    should_panic_inference: bool,
    inference_gate: Option<Arc<Mutex<Receiver<()>>>>,
}

impl MockBackend {
    /// Create a mock backend with a 320x320 input
    #[must_use]
    pub fn new() -> Self {
        Self::with_target_size(320, 320)
    }

    /// Create a mock backend with a custom `height` x `width` input
    #[must_use]
    pub fn with_target_size(height: u32, width: u32) -> Self {
        let (h, w) = (height as usize, width as usize);
        Self {
            initialized: false,
            model_info: ModelInfo {
                name: "mock-disc".to_string(),
                precision: "fp32".to_string(),
                size_bytes: 0,
                input_shape: (1, 3, h, w),
                output_shape: (1, 1, h, w),
            },
            preprocessing_config: PreprocessingConfig {
                target_size: [height, width],
                normalization_mean: [0.485, 0.456, 0.406],
                normalization_std: [0.229, 0.224, 0.225],
            },
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
            should_panic_inference: false,
            inference_gate: None,
        }
    }

    /// Create a mock backend that fails during initialization
    #[must_use]
    pub fn failing_init() -> Self {
        Self {
            should_fail_init: true,
            ..Self::new()
        }
    }

    /// Create a mock backend that fails during inference
    #[must_use]
    pub fn failing_inference() -> Self {
        Self {
            should_fail_inference: true,
            ..Self::new()
        }
    }

    /// Create a mock backend whose inference panics
    #[must_use]
    pub fn panicking_inference() -> Self {
        Self {
            should_panic_inference: true,
            ..Self::new()
        }
    }

    /// Hold every inference until a message (or hang-up) arrives on `gate`
    #[must_use]
    pub fn with_inference_gate(mut self, gate: Receiver<()>) -> Self {
        self.inference_gate = Some(Arc::new(Mutex::new(gate)));
        self
    }

    /// Names of the trait methods called so far, shared between clones
    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    /// Disc of radius min(h, w) / 3, fading linearly from 1 at the center to 0
    fn disc_mask(&self, batch_size: usize) -> Array4<f32> {
        let (_, _, height, width) = self.model_info.output_shape;
        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius = (width.min(height) as f32 / 3.0).max(1.0);

        Array4::from_shape_fn((batch_size, 1, height, width), |(_, _, y, x)| {
            let dx = x as f32 + 0.5 - center_x;
            let dy = y as f32 + 0.5 - center_y;
            let distance = (dx * dx + dy * dy).sqrt();
            ((radius - distance) / radius).clamp(0.0, 1.0)
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(BgRemovalError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(0)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(BgRemovalError::inference("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(BgRemovalError::inference("Mock backend inference failed"));
        }
        if self.should_panic_inference {
            panic!("Mock backend inference panicked");
        }
        if let Some(gate) = &self.inference_gate {
            if let Ok(gate) = gate.lock() {
                let _ = gate.recv();
            }
        }

        let (batch, channels, height, width) = input.dim();
        let (_, expected_channels, expected_height, expected_width) = self.model_info.input_shape;
        if (channels, height, width) != (expected_channels, expected_height, expected_width) {
            return Err(BgRemovalError::inference(format!(
                "Mock backend expected input (N, {expected_channels}, {expected_height}, {expected_width}), got {:?}",
                input.dim()
            )));
        }

        Ok(self.disc_mask(batch))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.input_shape
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.output_shape
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing_config.clone())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(self.model_info.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
