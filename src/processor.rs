//! Background removal processor
//!
//! `BackgroundRemovalProcessor` owns one inference backend for the lifetime
//! of the process and turns encoded image bytes into a transparent PNG.
//! Backends are created through a `BackendFactory`, so the HTTP layer and the
//! tests can swap the model-backed engines for the mock.

use crate::{
    backends::MockBackend,
    config::{ExecutionProvider, RemovalConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelSpec, PreprocessingConfig},
    types::{ProcessingTimings, RemovalResult, SegmentationMask},
    utils::{ImagePreprocessor, Letterbox},
};
use image::DynamicImage;
use instant::Instant;
use ndarray::Array4;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing::{debug, info, instrument, span, Level};

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
    /// Deterministic mock backend, no model files needed
    Mock,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            Self::Onnx
        } else if cfg!(feature = "tract") {
            Self::Tract
        } else {
            Self::Mock
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend for `config`
    ///
    /// # Errors
    ///
    /// Returns `BgRemovalError` for:
    /// - Backend types not compiled into this build
    /// - Model resolution errors
    fn create_backend(&self, config: &ProcessorConfig) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends compiled into this build
#[derive(Debug, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, config: &ProcessorConfig) -> Result<Box<dyn InferenceBackend>> {
        match config.backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => {
                let model_manager = crate::models::ModelManager::from_spec(
                    &config.model_spec,
                    Some(config.execution_provider),
                )?;
                Ok(Box::new(crate::backends::OnnxBackend::new(model_manager)))
            },
            #[cfg(feature = "tract")]
            BackendType::Tract => {
                let model_manager = crate::models::ModelManager::from_spec(
                    &config.model_spec,
                    Some(ExecutionProvider::Cpu),
                )?;
                Ok(Box::new(crate::backends::TractBackend::new(model_manager)))
            },
            BackendType::Mock => Ok(Box::new(MockBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(BgRemovalError::invalid_config(format!(
                "Backend '{other}' is not compiled into this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends.push(BackendType::Mock);
        backends
    }
}

/// Factory that always hands out a copy of one mock backend
///
/// Clones share the mock's call history, so tests can observe what the
/// processor did with the backend.
#[derive(Debug, Clone, Default)]
pub struct MockBackendFactory {
    template: MockBackend,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new(template: MockBackend) -> Self {
        Self { template }
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(&self, _config: &ProcessorConfig) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(self.template.clone()))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Mock]
    }
}

/// Configuration for the background removal processor
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    /// Model specification (cached ID or external directory)
    pub model_spec: ModelSpec,
    /// Backend type to use for inference
    pub backend_type: BackendType,
    /// Execution provider for the backend
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads (0 = auto)
    pub inter_threads: usize,
}

impl ProcessorConfig {
    /// Create a new processor configuration builder
    #[must_use]
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::new()
    }

    /// Configuration handed to the backend when it loads its model
    #[must_use]
    pub fn to_removal_config(&self) -> RemovalConfig {
        RemovalConfig {
            execution_provider: self.execution_provider,
            intra_threads: self.intra_threads,
            inter_threads: self.inter_threads,
            model_spec: self.model_spec.clone(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

/// Builder for `ProcessorConfig`
#[derive(Debug, Default)]
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Build the processor configuration
    ///
    /// # Errors
    ///
    /// Returns `BgRemovalError` for:
    /// - Thread counts out of range
    /// - Execution providers the backend cannot use
    pub fn build(self) -> Result<ProcessorConfig> {
        self.config.to_removal_config().validate()?;

        if self.config.backend_type == BackendType::Tract
            && !matches!(
                self.config.execution_provider,
                ExecutionProvider::Auto | ExecutionProvider::Cpu
            )
        {
            return Err(BgRemovalError::invalid_config(format!(
                "Tract backend only supports the CPU, got '{}'",
                self.config.execution_provider
            )));
        }

        Ok(self.config)
    }
}

/// Background removal processor owning a single inference backend
///
/// All methods take `&self`; the backend sits behind a mutex that is held only
/// while the model runs, so decoding, letterboxing, mask mapping and encoding
/// of concurrent requests overlap.
pub struct BackgroundRemovalProcessor {
    config: ProcessorConfig,
    backend_factory: Box<dyn BackendFactory>,
    backend: Mutex<Option<Box<dyn InferenceBackend>>>,
    preprocessing_config: OnceLock<PreprocessingConfig>,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Create a new processor with the default backend factory
    ///
    /// # Errors
    /// - Invalid processor configuration
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// Create a new processor with a custom backend factory
    ///
    /// # Errors
    /// - Invalid processor configuration
    pub fn with_factory(
        config: ProcessorConfig,
        backend_factory: Box<dyn BackendFactory>,
    ) -> Result<Self> {
        config.to_removal_config().validate()?;

        Ok(Self {
            config,
            backend_factory,
            backend: Mutex::new(None),
            preprocessing_config: OnceLock::new(),
        })
    }

    /// Create the backend and load the model; no-op once initialized
    ///
    /// # Errors
    ///
    /// Returns `BgRemovalError` for:
    /// - Model resolution or loading failures
    /// - Backend initialization errors
    /// - A backend lock poisoned by a panicking inference
    pub fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let mut slot = self.lock_backend()?;
        if slot.is_some() {
            return Ok(());
        }

        info!(
            "Initializing background removal processor: backend {}, model {}",
            self.config.backend_type,
            self.config.model_spec.source.display_name()
        );
        debug!("Execution provider: {}", self.config.execution_provider);

        let mut backend = self.backend_factory.create_backend(&self.config)?;
        if let Some(model_load_time) = backend.initialize(&self.config.to_removal_config())? {
            debug!("Model loaded in {}ms", model_load_time.as_millis());
        }

        let preprocessing_config = backend.get_preprocessing_config()?;
        *slot = Some(backend);
        // Only the holder of the backend lock ever sets this
        let _ = self.preprocessing_config.set(preprocessing_config);

        info!("Background removal processor initialized successfully");
        Ok(())
    }

    /// Decode `image_bytes` and remove the background
    ///
    /// # Errors
    ///
    /// Returns `BgRemovalError` for:
    /// - Bytes that are not a decodable image (`BgRemovalError::Image`)
    /// - Inference execution errors
    pub fn process_bytes(&self, image_bytes: &[u8]) -> Result<RemovalResult> {
        let decode_start = Instant::now();
        let image = image::load_from_memory(image_bytes)?;
        let decode_ms = decode_start.elapsed().as_millis() as u64;

        let mut result = self.process_image(&image)?;
        result.timings.decode_ms = decode_ms;
        result.timings.total_ms += decode_ms;
        Ok(result)
    }

    /// Remove the background from a decoded image
    ///
    /// # Errors
    ///
    /// Returns `BgRemovalError` for:
    /// - Image preprocessing failures
    /// - Inference execution errors
    /// - Unexpected output tensor shapes
    #[instrument(
        skip(self, image),
        fields(
            backend = %self.config.backend_type,
            model = %self.config.model_spec.source.display_name(),
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn process_image(&self, image: &DynamicImage) -> Result<RemovalResult> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        let mask = self.segment_image(image, &mut timings)?;

        let result_image = {
            let _span = span!(
                Level::DEBUG,
                "background_removal",
                width = %image.width(),
                height = %image.height()
            )
            .entered();
            let postprocess_start = Instant::now();
            let cutout = mask.apply_to_image(image)?;
            timings.postprocessing_ms += postprocess_start.elapsed().as_millis() as u64;
            cutout
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        Ok(RemovalResult::new(
            result_image,
            mask,
            (image.width(), image.height()),
            timings,
        ))
    }

    /// Remove the background and encode the cutout as RGBA PNG
    ///
    /// # Errors
    /// - Any `process_bytes` error
    /// - PNG encoding failure
    pub fn remove_background(&self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        let mut result = self.process_bytes(image_bytes)?;

        let encode_start = Instant::now();
        let png = result.to_png_bytes()?;
        result.timings.encode_ms = encode_start.elapsed().as_millis() as u64;
        result.timings.total_ms += result.timings.encode_ms;

        let (width, height) = result.dimensions();
        info!(
            "Removed background from {width}x{height} image: {} bytes in, {} bytes out",
            image_bytes.len(),
            png.len()
        );
        log_timings(&result.timings);
        Ok(png)
    }

    /// Decode `image_bytes` and compute the foreground mask only
    ///
    /// # Errors
    /// - Bytes that are not a decodable image (`BgRemovalError::Image`)
    /// - Inference execution errors
    pub fn segment_bytes(&self, image_bytes: &[u8]) -> Result<SegmentationMask> {
        let mut timings = ProcessingTimings::default();

        let decode_start = Instant::now();
        let image = image::load_from_memory(image_bytes)?;
        timings.decode_ms = decode_start.elapsed().as_millis() as u64;

        let mask = self.segment_image(&image, &mut timings)?;
        let stats = mask.statistics();
        info!(
            "Segmented {}x{} image: {} bytes in, {:.1}% foreground",
            mask.dimensions.0,
            mask.dimensions.1,
            image_bytes.len(),
            stats.foreground_ratio * 100.0
        );
        log_timings(&timings);
        Ok(mask)
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Check if the processor is initialized
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.preprocessing_config.get().is_some()
    }

    /// Get available backends from the factory
    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendType> {
        self.backend_factory.available_backends()
    }

    fn lock_backend(&self) -> Result<MutexGuard<'_, Option<Box<dyn InferenceBackend>>>> {
        self.backend
            .lock()
            .map_err(|_| BgRemovalError::internal("Inference backend lock poisoned"))
    }

    /// Preprocess, run inference and map the output back to a mask
    fn segment_image(
        &self,
        image: &DynamicImage,
        timings: &mut ProcessingTimings,
    ) -> Result<SegmentationMask> {
        self.initialize()?;
        let preprocessing_config = self
            .preprocessing_config
            .get()
            .ok_or_else(|| BgRemovalError::internal("Backend not initialized"))?;

        let (letterbox, input_tensor) = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                original_width = %image.width(),
                original_height = %image.height()
            )
            .entered();
            let preprocess_start = Instant::now();
            let preprocessed =
                ImagePreprocessor::preprocess_for_inference(image, preprocessing_config)?;
            timings.preprocessing_ms = preprocess_start.elapsed().as_millis() as u64;
            preprocessed
        };

        let output_tensor = {
            let _span =
                span!(Level::INFO, "inference", backend = %self.config.backend_type).entered();
            let mut slot = self.lock_backend()?;
            let backend = slot
                .as_mut()
                .ok_or_else(|| BgRemovalError::internal("Backend not initialized"))?;

            let inference_start = Instant::now();
            let output = backend.infer(&input_tensor)?;
            timings.inference_ms = inference_start.elapsed().as_millis() as u64;
            output
        };

        let postprocess_start = Instant::now();
        let mask = tensor_to_mask(&output_tensor, &letterbox)?;
        timings.postprocessing_ms = postprocess_start.elapsed().as_millis() as u64;
        Ok(mask)
    }
}

fn log_timings(timings: &ProcessingTimings) {
    info!(
        "Timings: decode {}ms, preprocess {}ms, inference {}ms, postprocess {}ms, encode {}ms, total {}ms",
        timings.decode_ms,
        timings.preprocessing_ms,
        timings.inference_ms,
        timings.postprocessing_ms,
        timings.encode_ms,
        timings.total_ms
    );
}

/// Map a `(1, 1, H, W)` model output back onto the original image
///
/// Each original pixel samples the tensor at its letterboxed position. When
/// the output resolution differs from the model input, positions are scaled
/// proportionally.
fn tensor_to_mask(tensor: &Array4<f32>, letterbox: &Letterbox) -> Result<SegmentationMask> {
    let (batch, channels, mask_height, mask_width) = tensor.dim();
    if batch != 1 || channels != 1 || mask_height == 0 || mask_width == 0 {
        return Err(BgRemovalError::processing(format!(
            "Invalid output tensor shape {:?}, expected (1, 1, H, W)",
            tensor.dim()
        )));
    }

    let (canvas_width, canvas_height) = letterbox.canvas;
    let x_ratio = mask_width as f32 / canvas_width as f32;
    let y_ratio = mask_height as f32 / canvas_height as f32;

    let (orig_width, orig_height) = letterbox.original;
    let mut mask_data = Vec::with_capacity(orig_width as usize * orig_height as usize);

    for y in 0..orig_height {
        for x in 0..orig_width {
            let value = letterbox
                .to_canvas(x, y)
                .and_then(|(canvas_x, canvas_y)| {
                    let tensor_x =
                        (((canvas_x as f32 + 0.5) * x_ratio) as usize).min(mask_width - 1);
                    let tensor_y =
                        (((canvas_y as f32 + 0.5) * y_ratio) as usize).min(mask_height - 1);
                    tensor.get([0, 0, tensor_y, tensor_x]).copied()
                })
                .unwrap_or(0.0);
            mask_data.push((value.clamp(0.0, 1.0) * 255.0) as u8);
        }
    }

    Ok(SegmentationMask::new(mask_data, letterbox.original))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelSource;
    use image::{GenericImageView, Rgb, RgbImage};
    use std::sync::Arc;
    use std::time::Duration;

    fn mock_processor(template: MockBackend) -> BackgroundRemovalProcessor {
        let config = ProcessorConfig::builder()
            .backend_type(BackendType::Mock)
            .build()
            .unwrap();
        BackgroundRemovalProcessor::with_factory(
            config,
            Box::new(MockBackendFactory::new(template)),
        )
        .unwrap()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 90])));
        let mut buffer = std::io::Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_processor_config_builder_chain() {
        let model_spec = ModelSpec {
            source: ModelSource::Downloaded("test-model".to_string()),
            variant: Some("fp16".to_string()),
        };

        let config = ProcessorConfigBuilder::new()
            .model_spec(model_spec.clone())
            .backend_type(BackendType::Onnx)
            .execution_provider(ExecutionProvider::Cpu)
            .intra_threads(4)
            .inter_threads(2)
            .build()
            .unwrap();

        let removal_config = config.to_removal_config();
        assert_eq!(removal_config.model_spec, model_spec);
        assert_eq!(removal_config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(removal_config.intra_threads, 4);
        assert_eq!(removal_config.inter_threads, 2);
    }

    #[test]
    fn test_processor_config_validation() {
        assert!(ProcessorConfig::builder().intra_threads(5000).build().is_err());
        assert!(ProcessorConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cuda)
            .build()
            .is_err());
        assert!(ProcessorConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cpu)
            .build()
            .is_ok());
    }

    #[test]
    fn test_default_factory_lists_mock() {
        let factory = DefaultBackendFactory;
        let backends = factory.available_backends();
        assert!(backends.contains(&BackendType::Mock));
        assert_eq!(backends.contains(&BackendType::Onnx), cfg!(feature = "onnx"));

        let config = ProcessorConfig::builder()
            .backend_type(BackendType::Mock)
            .build()
            .unwrap();
        let backend = factory.create_backend(&config).unwrap();
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let template = MockBackend::new();
        let processor = mock_processor(template.clone());
        assert!(!processor.is_initialized());

        processor.initialize().unwrap();
        processor.initialize().unwrap();
        assert!(processor.is_initialized());
        assert_eq!(template.call_history(), vec!["initialize"]);
    }

    #[test]
    fn test_initialize_failure_leaves_processor_uninitialized() {
        let processor = mock_processor(MockBackend::failing_init());
        assert!(matches!(processor.initialize(), Err(BgRemovalError::Model(_))));
        assert!(!processor.is_initialized());
    }

    #[test]
    fn test_process_bytes_keeps_dimensions_and_sets_alpha() {
        let processor = mock_processor(MockBackend::with_target_size(64, 64));
        let result = processor.process_bytes(&png_bytes(120, 60)).unwrap();

        assert_eq!(result.dimensions(), (120, 60));
        assert_eq!(result.original_dimensions, (120, 60));
        assert_eq!(result.mask.dimensions, (120, 60));

        // Disc center is near-opaque foreground, corners are transparent
        assert!(result.image.get_pixel(60, 30).0[3] > 200);
        assert_eq!(result.image.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(result.image.get_pixel(60, 30).0[..3], [200, 40, 90]);
    }

    #[test]
    fn test_process_bytes_rejects_non_images() {
        let processor = mock_processor(MockBackend::new());
        let err = processor.process_bytes(b"definitely not an image").unwrap_err();
        assert!(err.is_input_error());

        let err = processor.process_bytes(&[]).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_remove_background_is_deterministic() {
        let processor = mock_processor(MockBackend::with_target_size(32, 32));
        let input = png_bytes(40, 30);

        let first = processor.remove_background(&input).unwrap();
        let second = processor.remove_background(&input).unwrap();
        assert_eq!(first, second);

        let decoded = image::load_from_memory(&first).unwrap();
        assert_eq!(decoded.dimensions(), (40, 30));
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn test_segment_bytes_returns_mask() {
        let processor = mock_processor(MockBackend::with_target_size(48, 48));
        let mask = processor.segment_bytes(&png_bytes(48, 48)).unwrap();

        assert_eq!(mask.dimensions, (48, 48));
        let stats = mask.statistics();
        assert!(stats.foreground_pixels > 0);
        assert!(stats.background_pixels > 0);
    }

    #[test]
    fn test_inference_failure_is_not_input_error() {
        let processor = mock_processor(MockBackend::failing_inference());
        let err = processor.remove_background(&png_bytes(8, 8)).unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_tensor_to_mask_maps_letterbox() {
        // 4x2 image on a 4x4 canvas: rows 1 and 2 hold the image
        let letterbox = Letterbox::new((4, 2), [4, 4]).unwrap();
        let mut tensor = Array4::<f32>::zeros((1, 1, 4, 4));
        for x in 0..4 {
            tensor[[0, 0, 1, x]] = 1.0;
            tensor[[0, 0, 2, x]] = 0.5;
        }
        tensor[[0, 0, 0, 0]] = 1.0;

        let mask = tensor_to_mask(&tensor, &letterbox).unwrap();
        assert_eq!(mask.dimensions, (4, 2));
        assert_eq!(mask.data, vec![255, 255, 255, 255, 127, 127, 127, 127]);
    }

    #[test]
    fn test_tensor_to_mask_keeps_edges_of_downscaled_images() {
        for (original, target) in [((200, 100), [64, 64]), ((100, 300), [48, 64])] {
            let letterbox = Letterbox::new(original, target).unwrap();
            let (height, width) = (target[0] as usize, target[1] as usize);

            // Foreground everywhere the image lands, background on the padding
            let mut tensor = Array4::<f32>::zeros((1, 1, height, width));
            let (off_x, off_y) = letterbox.offset;
            let (scaled_w, scaled_h) = letterbox.scaled;
            for y in off_y..off_y + scaled_h {
                for x in off_x..off_x + scaled_w {
                    tensor[[0, 0, y as usize, x as usize]] = 1.0;
                }
            }

            let mask = tensor_to_mask(&tensor, &letterbox).unwrap();
            assert_eq!(mask.dimensions, original);
            assert!(
                mask.data.iter().all(|&v| v == 255),
                "{original:?} on {target:?} sampled padding"
            );
        }
    }

    #[test]
    fn test_decoding_overlaps_running_inference() {
        let (release, gate) = std::sync::mpsc::channel();
        let template = MockBackend::with_target_size(32, 32).with_inference_gate(gate);
        let processor = Arc::new(mock_processor(template.clone()));
        processor.initialize().unwrap();

        let worker = {
            let processor = Arc::clone(&processor);
            std::thread::spawn(move || processor.remove_background(&png_bytes(40, 30)))
        };
        while !template.call_history().iter().any(|call| call == "infer") {
            std::thread::sleep(Duration::from_millis(1));
        }

        // The worker is parked inside inference holding the backend lock
        let err = processor.process_bytes(b"not an image").unwrap_err();
        assert!(err.is_input_error());
        assert!(processor.is_initialized());

        release.send(()).unwrap();
        let png = worker.join().unwrap().unwrap();
        assert_eq!(image::load_from_memory(&png).unwrap().dimensions(), (40, 30));
    }

    #[test]
    fn test_panicking_inference_poisons_backend() {
        let processor = Arc::new(mock_processor(MockBackend::panicking_inference()));

        let worker = {
            let processor = Arc::clone(&processor);
            std::thread::spawn(move || processor.remove_background(&png_bytes(8, 8)))
        };
        assert!(worker.join().is_err());

        let err = processor.remove_background(&png_bytes(8, 8)).unwrap_err();
        assert!(matches!(err, BgRemovalError::Internal(_)));
        // Decoding never touches the lock
        assert!(processor.process_bytes(b"garbage").unwrap_err().is_input_error());
    }

    #[test]
    fn test_tensor_to_mask_scales_smaller_output() {
        let letterbox = Letterbox::new((8, 8), [8, 8]).unwrap();
        let tensor = Array4::<f32>::from_elem((1, 1, 4, 4), 2.0);
        let mask = tensor_to_mask(&tensor, &letterbox).unwrap();
        assert!(mask.data.iter().all(|&v| v == 255));

        let bad = Array4::<f32>::zeros((1, 2, 4, 4));
        assert!(tensor_to_mask(&bad, &letterbox).is_err());
    }
}
