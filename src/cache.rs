//! On-disk cache for downloaded models
//!
//! Models live under `$BGREMOVE_GATEWAY_CACHE_DIR/models/` when the variable is
//! set, otherwise under the platform cache directory:
//! - Linux: `~/.cache/bgremove-gateway/models/`
//! - macOS: `~/Library/Caches/bgremove-gateway/models/`
//! - Windows: `%LOCALAPPDATA%/bgremove-gateway/models/`

use crate::error::{BgRemovalError, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "BGREMOVE_GATEWAY_CACHE_DIR";

const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";
const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Available ONNX model variants (fp16, fp32, ...)
    pub variants: Vec<String>,
    /// Size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache rooted at the default location, creating it if needed
    ///
    /// # Errors
    /// - Failed to determine the user cache directory
    /// - Failed to create the cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::resolve_cache_dir(std::env::var_os(CACHE_DIR_ENV))?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Create a cache rooted at `<cache_dir>/models`
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| BgRemovalError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    fn resolve_cache_dir(env_override: Option<OsString>) -> Result<PathBuf> {
        if let Some(root) = env_override.filter(|value| !value.is_empty()) {
            return Ok(PathBuf::from(root).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("bgremove-gateway")
            .join("models"))
    }

    /// Generate a model ID from a URL
    ///
    /// `HuggingFace` URLs map to `owner--name`; anything else maps to a
    /// short hash-based identifier. Trailing slashes are ignored.
    ///
    /// # Examples
    /// ```
    /// use bgremove_gateway::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let url = url.trim_end_matches('/');
        if let Some(path) = url.strip_prefix(HUGGINGFACE_PREFIX) {
            return path.replace('/', "--");
        }

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash_string = format!("url-{:x}", hasher.finalize());
        hash_string.get(..16).unwrap_or(&hash_string).to_string()
    }

    /// Whether `model_id` exists in the cache with the required layout
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        let model_path = self.cache_dir.join(model_id);
        model_path.exists() && Self::validate_model_directory(&model_path)
    }

    /// Path to a cached model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// List every valid model in the cache, sorted by ID
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BgRemovalError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;

            let path = entry.path();
            if path.is_dir() {
                if let Some(model_info) = Self::analyze_model_directory(&path) {
                    models.push(model_info);
                }
            }
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// A model directory needs both config files and an `onnx/` folder
    fn validate_model_directory(model_path: &Path) -> bool {
        model_path.join("config.json").exists()
            && model_path.join("preprocessor_config.json").exists()
            && model_path.join("onnx").is_dir()
    }

    fn analyze_model_directory(model_path: &Path) -> Option<CachedModelInfo> {
        let model_id = model_path.file_name()?.to_str()?.to_string();

        if !Self::validate_model_directory(model_path) {
            log::debug!("Skipping invalid model directory: {}", model_path.display());
            return None;
        }

        Some(CachedModelInfo {
            model_id,
            path: model_path.to_path_buf(),
            variants: crate::models::scan_onnx_variants(&model_path.join("onnx")),
            size_bytes: Self::directory_size(model_path).unwrap_or(0),
        })
    }

    fn directory_size(dir: &Path) -> std::io::Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += Self::directory_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    /// Model ID of the default `ISNet` general model
    #[must_use]
    pub fn get_default_model_id() -> String {
        Self::url_to_model_id(DEFAULT_MODEL_URL)
    }

    /// URL of the default `ISNet` general model
    #[must_use]
    pub fn get_default_model_url() -> &'static str {
        DEFAULT_MODEL_URL
    }

    /// Current cache directory path
    #[must_use]
    pub fn get_current_cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format a byte count for log output
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
