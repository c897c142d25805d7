//! Model sources and `HuggingFace` model directory handling
//!
//! Models are stored in the `HuggingFace` layout:
//!
//! ```text
//! <model>/config.json
//! <model>/preprocessor_config.json
//! <model>/onnx/model.onnx        (fp32)
//! <model>/onnx/model_fp16.onnx   (fp16)
//! <model>/onnx/model_<name>.onnx (other variants)
//! ```

use crate::cache::ModelCache;
use crate::config::ExecutionProvider;
use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Model source specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// External model from filesystem path
    External(PathBuf),
    /// Downloaded model from cache by model ID
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => format!("cached:{model_id}"),
        }
    }
}

/// Complete model specification including source and optional variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(ModelCache::get_default_model_id()),
            variant: None,
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW
    pub output_shape: (usize, usize, usize, usize),
}

/// Resize and normalization parameters a model expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Target input size as `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean in the 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation in the 0-1 range
    pub normalization_std: [f32; 3],
}

/// Model provider trait for loading models
pub trait ModelProvider: std::fmt::Debug + Send + Sync {
    /// Load model data as bytes
    ///
    /// # Errors
    /// - Model file not found or inaccessible
    fn load_model_data(&self) -> Result<Vec<u8>>;

    /// Get model information
    ///
    /// # Errors
    /// - Missing or invalid size information in the preprocessor config
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Invalid normalization or target size values
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Get the model file path
    ///
    /// # Errors
    /// - Model path not available for this provider type
    fn get_model_path(&self) -> Result<PathBuf>;
}

/// List the ONNX variants present in a model's `onnx/` directory
pub(crate) fn scan_onnx_variants(onnx_dir: &Path) -> Vec<String> {
    let mut variants = Vec::new();
    let Ok(entries) = fs::read_dir(onnx_dir) else {
        return variants;
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !Path::new(file_name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        {
            continue;
        }
        match file_name {
            "model.onnx" => variants.push("fp32".to_string()),
            "model_fp16.onnx" => variants.push("fp16".to_string()),
            other => {
                if let Some(variant) = other
                    .strip_prefix("model_")
                    .and_then(|s| s.strip_suffix(".onnx"))
                {
                    variants.push(variant.to_string());
                }
            },
        }
    }

    variants.sort();
    variants
}

/// Pick a variant from the available ones
///
/// An explicit request must exist. Otherwise `CoreML` prefers fp32, CPU and
/// CUDA prefer fp16, and `Auto` prefers fp32 on macOS and fp16 elsewhere.
/// The final fallback order is fp16, fp32, then the first variant found.
pub(crate) fn resolve_variant(
    available: &[String],
    requested: Option<&str>,
    execution_provider: Option<ExecutionProvider>,
) -> Result<String> {
    let has = |name: &str| available.iter().any(|v| v == name);

    if available.is_empty() {
        return Err(BgRemovalError::model("No ONNX model variants available"));
    }

    if let Some(variant) = requested {
        if has(variant) {
            return Ok(variant.to_string());
        }
        return Err(BgRemovalError::model(format!(
            "Requested variant '{variant}' not available. Available: {available:?}"
        )));
    }

    let preferred = match execution_provider {
        Some(ExecutionProvider::CoreMl) => Some("fp32"),
        Some(ExecutionProvider::Cpu | ExecutionProvider::Cuda) => Some("fp16"),
        Some(ExecutionProvider::Auto) if cfg!(target_os = "macos") => Some("fp32"),
        Some(ExecutionProvider::Auto) => Some("fp16"),
        None => None,
    };
    if let Some(preferred) = preferred {
        if has(preferred) {
            return Ok(preferred.to_string());
        }
    }

    for fallback in ["fp16", "fp32"] {
        if has(fallback) {
            return Ok(fallback.to_string());
        }
    }

    available
        .first()
        .cloned()
        .ok_or_else(|| BgRemovalError::model("No ONNX model variants available"))
}

/// A parsed `HuggingFace` model directory with a resolved variant
#[derive(Debug)]
struct ModelDirectory {
    root: PathBuf,
    model_config: serde_json::Value,
    preprocessor_config: serde_json::Value,
    variant: String,
}

impl ModelDirectory {
    fn open(
        root: PathBuf,
        requested_variant: Option<&str>,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<Self> {
        let model_config = Self::read_json(&root.join("config.json"))?;
        let preprocessor_config = Self::read_json(&root.join("preprocessor_config.json"))?;

        let onnx_dir = root.join("onnx");
        if !onnx_dir.is_dir() {
            return Err(BgRemovalError::model_error_with_context(
                "open",
                &root,
                "onnx directory not found",
                &["re-download the model", "check the HuggingFace model layout"],
            ));
        }

        let available = scan_onnx_variants(&onnx_dir);
        if available.is_empty() {
            return Err(BgRemovalError::model(format!(
                "No ONNX model files found in: {}",
                onnx_dir.display()
            )));
        }

        let variant = resolve_variant(&available, requested_variant, execution_provider)?;
        log::debug!(
            "Resolved model variant '{}' in {} (available: {:?})",
            variant,
            root.display(),
            available
        );

        Ok(Self {
            root,
            model_config,
            preprocessor_config,
            variant,
        })
    }

    fn read_json(path: &Path) -> Result<serde_json::Value> {
        let content = fs::read_to_string(path)
            .map_err(|e| BgRemovalError::file_io_error("read model config", path, &e))?;
        serde_json::from_str(&content).map_err(|e| {
            BgRemovalError::model(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    fn model_file_path(&self) -> PathBuf {
        let onnx_dir = self.root.join("onnx");
        match self.variant.as_str() {
            "fp16" => onnx_dir.join("model_fp16.onnx"),
            "fp32" => onnx_dir.join("model.onnx"),
            variant => onnx_dir.join(format!("model_{variant}.onnx")),
        }
    }

    fn load_model_data(&self) -> Result<Vec<u8>> {
        let path = self.model_file_path();
        if !path.exists() {
            return Err(BgRemovalError::model(format!(
                "Model file not found: {}. Expected variant: {}",
                path.display(),
                self.variant
            )));
        }
        fs::read(&path).map_err(|e| BgRemovalError::file_io_error("read model file", &path, &e))
    }

    fn target_size(&self) -> Result<[u32; 2]> {
        let size = self
            .preprocessor_config
            .get("size")
            .ok_or_else(|| BgRemovalError::model("Missing size in preprocessor config"))?;

        let dimension = |key: &str| -> Result<u32> {
            let value = size
                .get(key)
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| {
                    BgRemovalError::model(format!("Missing or invalid {key} in size config"))
                })?;
            if value == 0 {
                return Err(BgRemovalError::model(format!(
                    "Size {key} must be greater than zero"
                )));
            }
            u32::try_from(value)
                .map_err(|_| BgRemovalError::model(format!("Size {key} too large for u32")))
        };

        Ok([dimension("height")?, dimension("width")?])
    }

    /// Parse a three-channel statistic stored on the 0-255 scale
    fn channel_stats(&self, key: &str) -> Result<[f32; 3]> {
        let values = self
            .preprocessor_config
            .get(key)
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                BgRemovalError::model(format!("Missing or invalid {key} in preprocessor config"))
            })?;

        let mut stats = [0.0_f32; 3];
        for (index, slot) in stats.iter_mut().enumerate() {
            let value = values
                .get(index)
                .and_then(serde_json::Value::as_f64)
                .ok_or_else(|| {
                    BgRemovalError::model(format!("{key} must have at least 3 numeric values"))
                })?;
            *slot = (value / 255.0) as f32;
        }
        Ok(stats)
    }

    fn preprocessing_config(&self) -> Result<PreprocessingConfig> {
        let normalization_std = self.channel_stats("image_std")?;
        if normalization_std.iter().any(|std| *std <= 0.0) {
            return Err(BgRemovalError::model(
                "image_std values must be greater than zero",
            ));
        }

        Ok(PreprocessingConfig {
            target_size: self.target_size()?,
            normalization_mean: self.channel_stats("image_mean")?,
            normalization_std,
        })
    }

    fn model_info(&self) -> Result<ModelInfo> {
        let path = self.model_file_path();
        let size_bytes = fs::metadata(&path)
            .map_err(|e| BgRemovalError::file_io_error("inspect model file", &path, &e))?
            .len() as usize;

        let model_type = self
            .model_config
            .get("model_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");

        let [height, width] = self.target_size()?;
        let (height, width) = (height as usize, width as usize);

        Ok(ModelInfo {
            name: format!("{}-{}", model_type, self.variant),
            precision: self.variant.clone(),
            size_bytes,
            input_shape: (1, 3, height, width),
            output_shape: (1, 1, height, width),
        })
    }
}

/// External model provider for loading models from filesystem paths
#[derive(Debug)]
pub struct ExternalModelProvider {
    directory: ModelDirectory,
}

impl ExternalModelProvider {
    /// Create provider for external model from folder path
    ///
    /// # Errors
    /// - Model path does not exist or is not a directory
    /// - Missing or invalid `config.json` / `preprocessor_config.json`
    /// - Requested variant not found in model
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        variant: Option<&str>,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();

        if !model_path.exists() {
            return Err(BgRemovalError::invalid_config(format!(
                "Model path does not exist: {}",
                model_path.display()
            )));
        }

        if !model_path.is_dir() {
            return Err(BgRemovalError::invalid_config(format!(
                "Model path must be a directory: {}",
                model_path.display()
            )));
        }

        Ok(Self {
            directory: ModelDirectory::open(model_path, variant, execution_provider)?,
        })
    }

    /// Get the selected variant
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.directory.variant
    }
}

impl ModelProvider for ExternalModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        self.directory.load_model_data()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.directory.model_info()
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.directory.preprocessing_config()
    }

    fn get_model_path(&self) -> Result<PathBuf> {
        Ok(self.directory.model_file_path())
    }
}

/// Downloaded model provider for cached models
///
/// Loads models that [`crate::download::ModelDownloader`] placed in the cache.
#[derive(Debug)]
pub struct DownloadedModelProvider {
    model_id: String,
    directory: ModelDirectory,
}

impl DownloadedModelProvider {
    /// Create a new provider for a cached model
    ///
    /// # Arguments
    /// * `model_id` - Model identifier in cache (e.g., "imgly--isnet-general-onnx")
    /// * `variant` - Optional variant preference (fp16, fp32)
    /// * `execution_provider` - Optional execution provider for variant selection
    /// * `cache` - Cache the model is looked up in
    ///
    /// # Errors
    /// - Model not found in cache
    /// - Invalid or missing configuration files
    /// - Requested variant not available
    pub fn new(
        model_id: &str,
        variant: Option<&str>,
        execution_provider: Option<ExecutionProvider>,
        cache: &ModelCache,
    ) -> Result<Self> {
        if !cache.is_model_cached(model_id) {
            let available: Vec<String> = cache
                .scan_cached_models()?
                .into_iter()
                .map(|m| m.model_id)
                .collect();
            return Err(BgRemovalError::model(format!(
                "Model '{model_id}' not found in cache. Available models: {available:?}"
            )));
        }

        let directory = ModelDirectory::open(
            cache.get_model_path(model_id),
            variant,
            execution_provider,
        )?;

        Ok(Self {
            model_id: model_id.to_string(),
            directory,
        })
    }

    /// Get the model ID
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Get the selected variant
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.directory.variant
    }
}

impl ModelProvider for DownloadedModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        self.directory.load_model_data()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.directory.model_info()
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.directory.preprocessing_config()
    }

    fn get_model_path(&self) -> Result<PathBuf> {
        Ok(self.directory.model_file_path())
    }
}

/// Model manager for handling different model sources
#[derive(Debug)]
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
}

impl ModelManager {
    /// Create a model manager from a specification, using the default cache
    ///
    /// # Errors
    /// - Cache directory cannot be determined or created
    /// - Model directory missing, malformed, or lacking the requested variant
    pub fn from_spec(
        spec: &ModelSpec,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<Self> {
        match &spec.source {
            ModelSource::External(_) => Self::from_spec_with_cache(spec, execution_provider, None),
            ModelSource::Downloaded(_) => {
                let cache = ModelCache::new()?;
                Self::from_spec_with_cache(spec, execution_provider, Some(&cache))
            },
        }
    }

    /// Create a model manager looking up downloaded models in `cache`
    ///
    /// # Errors
    /// - Downloaded model requested without a cache
    /// - Model directory missing, malformed, or lacking the requested variant
    pub fn from_spec_with_cache(
        spec: &ModelSpec,
        execution_provider: Option<ExecutionProvider>,
        cache: Option<&ModelCache>,
    ) -> Result<Self> {
        let variant = spec.variant.as_deref();
        let provider: Box<dyn ModelProvider> = match &spec.source {
            ModelSource::External(path) => Box::new(ExternalModelProvider::new(
                path,
                variant,
                execution_provider,
            )?),
            ModelSource::Downloaded(model_id) => {
                let cache = cache.ok_or_else(|| {
                    BgRemovalError::invalid_config(format!(
                        "No model cache available to resolve '{model_id}'"
                    ))
                })?;
                Box::new(DownloadedModelProvider::new(
                    model_id,
                    variant,
                    execution_provider,
                    cache,
                )?)
            },
        };

        Ok(Self { provider })
    }

    /// Load model data
    ///
    /// # Errors
    /// - Model file not found or unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        self.provider.load_model_data()
    }

    /// Get model information
    ///
    /// # Errors
    /// - Missing size information or unreadable model file
    pub fn get_info(&self) -> Result<ModelInfo> {
        self.provider.get_model_info()
    }

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Invalid normalization or target size values
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.provider.get_preprocessing_config()
    }

    /// Get the model file path
    ///
    /// # Errors
    /// - Model path not available for this provider type
    pub fn get_model_path(&self) -> Result<PathBuf> {
        self.provider.get_model_path()
    }
}
