//! Model downloads from `HuggingFace` repositories
//!
//! Files are streamed into a staging directory next to the cache and moved
//! into place once every required file has arrived, so a cached model is
//! either complete or absent.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Files that need to be downloaded for a `HuggingFace` model
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX model files to attempt downloading; at least one must succeed
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Model downloader writing into a [`ModelCache`]
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader for the default cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to initialize model cache
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Download a model repository into the cache and return its model ID
    ///
    /// Already cached models are returned without touching the network.
    ///
    /// # Errors
    /// - Invalid or unsupported URL
    /// - Network errors or missing files on the remote
    /// - File system errors while staging or installing the model
    pub async fn download_model(&self, url: &str) -> Result<String> {
        validate_model_url(url)?;
        let base_url = url.trim_end_matches('/');
        let model_id = ModelCache::url_to_model_id(base_url);

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {}", model_id);
            return Ok(model_id);
        }

        log::info!("Downloading model {} from {}", model_id, base_url);

        let staging_dir = self.create_staging_dir(&model_id)?;
        let final_dir = self.cache.get_model_path(&model_id);

        if let Err(e) = self.download_model_files(base_url, &staging_dir).await {
            discard_staging_dir(&staging_dir);
            return Err(e);
        }

        install_staged_model(&staging_dir, &final_dir)?;

        log::info!("Model {} installed in {}", model_id, final_dir.display());
        Ok(model_id)
    }

    /// Staging lives inside the cache directory so the final rename stays on one filesystem
    fn create_staging_dir(&self, model_id: &str) -> Result<PathBuf> {
        let staging_dir = self
            .cache
            .get_current_cache_dir()
            .join(format!(".download-{}-{}", model_id, std::process::id()));

        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir).map_err(|e| {
                BgRemovalError::file_io_error("remove stale staging directory", &staging_dir, &e)
            })?;
        }

        fs::create_dir_all(&staging_dir).map_err(|e| {
            BgRemovalError::file_io_error("create staging directory", &staging_dir, &e)
        })?;

        Ok(staging_dir)
    }

    async fn download_model_files(&self, base_url: &str, download_dir: &Path) -> Result<()> {
        let raw_base = format!("{base_url}/resolve/main/");

        for file_name in REQUIRED_FILES {
            let file_url = format!("{raw_base}{file_name}");
            self.download_file(&file_url, &download_dir.join(file_name))
                .await?;
        }

        let mut downloaded_variants = 0;
        for (file_path, variant) in ONNX_FILES {
            let file_url = format!("{raw_base}{file_path}");
            match self
                .download_file(&file_url, &download_dir.join(file_path))
                .await
            {
                Ok(()) => {
                    downloaded_variants += 1;
                    log::info!("Downloaded {} model variant", variant);
                },
                Err(e) => log::warn!("Failed to download {} variant: {}", variant, e),
            }
        }

        if downloaded_variants == 0 {
            return Err(BgRemovalError::network_error(
                "Failed to download any ONNX model variants",
                format!("no model files under {raw_base}onnx/"),
            ));
        }

        Ok(())
    }

    async fn download_file(&self, url: &str, local_path: &Path) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BgRemovalError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BgRemovalError::network_error(
                format!("Failed to download {url}"),
                format!("HTTP {status}"),
            ));
        }

        let total_size = response.content_length();

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut next_report = 25u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;

            if let Some(total) = total_size.filter(|total| *total > 0) {
                let percent = downloaded * 100 / total;
                if percent >= next_report && percent < 100 {
                    log::info!(
                        "{}: {}% of {}",
                        local_path.file_name().unwrap_or_default().to_string_lossy(),
                        percent,
                        crate::cache::format_size(total)
                    );
                    next_report = (percent / 25 + 1) * 25;
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;

        log::debug!(
            "Downloaded {} to {}",
            crate::cache::format_size(downloaded),
            local_path.display()
        );
        Ok(())
    }

    /// Get the model cache for other operations
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Verify a file against an optional SHA-256 hex digest
///
/// Returns `true` when no digest is given.
///
/// # Errors
/// - File cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = fs::read(file_path)
        .map_err(|e| BgRemovalError::file_io_error("read file for verification", file_path, &e))?;

    let mut hasher = Sha256::new();
    hasher.update(&contents);
    let actual = format!("{:x}", hasher.finalize());

    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual
        );
        Ok(false)
    }
}

/// Validate that a URL points at a `HuggingFace` model repository
///
/// # Errors
/// - Empty URL, non-`HuggingFace` host, or missing `owner/name` path
pub fn validate_model_url(url: &str) -> Result<()> {
    parse_huggingface_url(url).map(|_| ())
}

/// Split a `HuggingFace` repository URL into `(owner, repository)`
///
/// # Errors
/// - Empty URL, non-`HuggingFace` host, or missing `owner/name` path
pub fn parse_huggingface_url(url: &str) -> Result<(String, String)> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("Model URL cannot be empty"));
    }

    let repo_path = url.strip_prefix(HUGGINGFACE_PREFIX).ok_or_else(|| {
        BgRemovalError::invalid_config(format!(
            "Unsupported URL format: {url}. Only HuggingFace repositories are supported (https://huggingface.co/...)"
        ))
    })?;

    let mut parts = repo_path.split('/').filter(|part| !part.is_empty());
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) => Ok((owner.to_string(), repo.to_string())),
        _ => Err(BgRemovalError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {url}. Expected format: https://huggingface.co/owner/repo-name"
        ))),
    }
}

/// Replace `final_dir` with the completed staging directory
///
/// The staging directory is removed when the install fails.
fn install_staged_model(staging_dir: &Path, final_dir: &Path) -> Result<()> {
    let install = || -> Result<()> {
        if final_dir.exists() {
            fs::remove_dir_all(final_dir).map_err(|e| {
                BgRemovalError::file_io_error("remove incomplete model directory", final_dir, &e)
            })?;
        }

        fs::rename(staging_dir, final_dir).map_err(|e| {
            BgRemovalError::file_io_error("move downloaded model into cache", final_dir, &e)
        })
    };

    install().map_err(|e| {
        discard_staging_dir(staging_dir);
        e
    })
}

fn discard_staging_dir(staging_dir: &Path) {
    if let Err(cleanup_err) = fs::remove_dir_all(staging_dir) {
        log::warn!(
            "Failed to clean up staging directory {}: {}",
            staging_dir.display(),
            cleanup_err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx").is_ok());
        assert!(validate_model_url("https://huggingface.co/ZhengPeng7/BiRefNet/").is_ok());

        assert!(validate_model_url("").is_err());
        assert!(validate_model_url("https://github.com/user/repo").is_err());
        assert!(validate_model_url("https://huggingface.co/").is_err());
        assert!(validate_model_url("https://huggingface.co/single-part").is_err());
    }

    #[test]
    fn test_parse_huggingface_url() {
        let (owner, repo) =
            parse_huggingface_url("https://huggingface.co/imgly/isnet-general-onnx").unwrap();
        assert_eq!(owner, "imgly");
        assert_eq!(repo, "isnet-general-onnx");

        let error = parse_huggingface_url("http://huggingface.co/imgly/isnet").unwrap_err();
        assert!(error.to_string().contains("Unsupported URL format"));
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("model.onnx");
        fs::write(&file_path, b"hello").unwrap();

        let sha_of_hello = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert!(verify_file_integrity(&file_path, Some(sha_of_hello)).unwrap());
        assert!(verify_file_integrity(&file_path, Some(&sha_of_hello.to_uppercase())).unwrap());
        assert!(!verify_file_integrity(&file_path, Some("deadbeef")).unwrap());
        assert!(verify_file_integrity(&file_path, None).unwrap());

        let missing = temp_dir.path().join("missing.onnx");
        assert!(verify_file_integrity(&missing, Some(sha_of_hello)).is_err());
    }

    #[test]
    fn test_staging_dir_inside_cache() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let downloader = ModelDownloader::with_cache(cache).unwrap();

        let staging = downloader.create_staging_dir("imgly--isnet").unwrap();
        assert!(staging.is_dir());
        assert!(staging.starts_with(downloader.cache().get_current_cache_dir()));

        // A staging directory is never mistaken for a cached model
        assert!(downloader.cache().scan_cached_models().unwrap().is_empty());
    }

    #[test]
    fn test_install_replaces_existing_model() {
        let temp_dir = TempDir::new().unwrap();
        let staging = temp_dir.path().join(".download-model");
        let final_dir = temp_dir.path().join("model");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("config.json"), b"new").unwrap();
        fs::create_dir_all(&final_dir).unwrap();
        fs::write(final_dir.join("stale.onnx"), b"old").unwrap();

        install_staged_model(&staging, &final_dir).unwrap();
        assert!(!staging.exists());
        assert_eq!(fs::read(final_dir.join("config.json")).unwrap(), b"new");
        assert!(!final_dir.join("stale.onnx").exists());
    }

    #[test]
    fn test_failed_install_removes_staging_dir() {
        let temp_dir = TempDir::new().unwrap();
        let staging = temp_dir.path().join(".download-model");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("config.json"), b"{}").unwrap();

        let unreachable = temp_dir.path().join("no-such-parent").join("model");
        assert!(install_staged_model(&staging, &unreachable).is_err());
        assert!(!staging.exists());
        assert!(!unreachable.exists());
    }

    #[tokio::test]
    async fn test_download_rejects_unsupported_url() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let downloader = ModelDownloader::with_cache(cache).unwrap();

        let result = downloader.download_model("https://example.com/model").await;
        assert!(matches!(result, Err(BgRemovalError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_download_skips_cached_model() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        crate::models::tests::write_model_dir(
            &cache.get_model_path("imgly--isnet-general-onnx"),
            &["fp16"],
        );
        let downloader = ModelDownloader::with_cache(cache).unwrap();

        let model_id = downloader
            .download_model("https://huggingface.co/imgly/isnet-general-onnx")
            .await
            .unwrap();
        assert_eq!(model_id, "imgly--isnet-general-onnx");
    }
}
