//! Gateway command line: parse arguments, prepare the model, serve HTTP

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache},
    download::ModelDownloader,
    models::{ModelSource, ModelSpec},
    processor::{BackendType, BackgroundRemovalProcessor},
    server::{self, AppState},
    tracing_config::init_cli_tracing,
};
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::time::Instant;

/// HTTP gateway that removes image backgrounds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-gateway")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Address to bind
    #[arg(long, default_value = crate::config::DEFAULT_HOST)]
    pub host: String,

    /// Port to bind
    #[arg(long, default_value_t = crate::config::DEFAULT_PORT)]
    pub port: u16,

    /// Model ID, HuggingFace URL or model directory (`ID:variant` selects a variant)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model variant (fp16, fp32); auto-selected when omitted
    #[arg(long)]
    pub variant: Option<String>,

    /// Backend and provider: onnx:auto, onnx:cpu, onnx:cuda, onnx:coreml, tract:cpu, mock
    #[arg(short, long, default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Inference threads (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Allowed CORS origin (repeatable)
    #[arg(long = "cors-origin", value_name = "ORIGIN")]
    pub cors_origins: Vec<String>,

    /// Accept requests from any origin (demo deployments only)
    #[arg(long, conflicts_with = "cors_origins")]
    pub allow_any_origin: bool,

    /// Maximum upload size in MiB
    #[arg(long, default_value_t = 100)]
    pub max_upload_mb: usize,

    /// Fail instead of downloading a missing model
    #[arg(long)]
    pub no_download: bool,

    /// Print cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Print backends and execution providers and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Verbose logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit JSON log lines
    #[arg(long)]
    pub log_json: bool,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.log_json).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    if cli.list_models {
        return list_cached_models();
    }

    let processor_config =
        CliConfigBuilder::processor_config(&cli).context("Invalid processor configuration")?;
    let server_config =
        CliConfigBuilder::server_config(&cli).context("Invalid server configuration")?;

    info!(
        "Backend: {}, provider: {}, model: {}",
        processor_config.backend_type,
        processor_config.execution_provider,
        processor_config.model_spec.source.display_name()
    );

    if processor_config.backend_type != BackendType::Mock {
        ensure_model_available(
            &processor_config.model_spec,
            CliConfigBuilder::download_url(&cli).as_deref(),
            cli.no_download,
        )
        .await
        .context("Failed to ensure model is available")?;
    }

    let processor = BackgroundRemovalProcessor::new(processor_config)
        .context("Failed to create background removal processor")?;

    // Load the model before accepting traffic
    let start_time = Instant::now();
    let processor = tokio::task::spawn_blocking(move || processor.initialize().map(|()| processor))
        .await
        .context("Model loading task failed")?
        .context("Failed to initialize background removal processor")?;
    info!(
        "Model ready in {:.2}s",
        start_time.elapsed().as_secs_f64()
    );

    server::serve(AppState::from_processor(processor), &server_config)
        .await
        .context("Server error")
}

/// Make sure a downloaded model is in the cache, fetching it when a URL is known
async fn ensure_model_available(
    model_spec: &ModelSpec,
    download_url: Option<&str>,
    no_download: bool,
) -> Result<()> {
    let ModelSource::Downloaded(model_id) = &model_spec.source else {
        return Ok(());
    };

    let cache = ModelCache::new().context("Failed to create model cache")?;
    if cache.is_model_cached(model_id) {
        return Ok(());
    }

    let Some(url) = download_url else {
        anyhow::bail!(
            "Model '{}' not found in cache at {}. Pass its HuggingFace URL with --model to download it.",
            model_id,
            cache.get_current_cache_dir().display()
        );
    };

    if no_download {
        anyhow::bail!("Model '{model_id}' is not cached and --no-download is set");
    }

    info!("Model '{model_id}' not cached, downloading {url}");
    let downloader =
        ModelDownloader::with_cache(cache).context("Failed to create model downloader")?;
    let downloaded_id = downloader
        .download_model(url)
        .await
        .with_context(|| format!("Failed to download model from {url}"))?;

    if downloaded_id != *model_id {
        anyhow::bail!(
            "Downloaded model ID '{}' doesn't match expected '{}'",
            downloaded_id,
            model_id
        );
    }

    info!("Model '{model_id}' downloaded");
    Ok(())
}

fn show_provider_diagnostics() {
    println!("Backends and execution providers");
    println!();

    #[cfg(feature = "onnx")]
    {
        println!("ONNX Runtime (onnx:*)");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "available" } else { "unavailable" };
            println!("  {:<8} {:<12} {}", name.to_lowercase(), status, description);
        }
    }

    #[cfg(feature = "tract")]
    {
        println!("Tract (tract:cpu)");
        println!("  {:<8} {:<12} Pure Rust inference", "cpu", "available");
    }

    println!("Mock (mock)");
    println!("  {:<8} {:<12} Synthetic mask, no model needed", "-", "available");
}

fn list_cached_models() -> Result<()> {
    let cache = ModelCache::new().context("Failed to create model cache")?;
    let models = cache
        .scan_cached_models()
        .context("Failed to scan model cache")?;

    println!("Model cache: {}", cache.get_current_cache_dir().display());
    if models.is_empty() {
        println!("No cached models. The default model is downloaded on first start:");
        println!("  {}", ModelCache::get_default_model_url());
        return Ok(());
    }

    for model in &models {
        println!(
            "  {} [{}] {}",
            model.model_id,
            model.variants.join(", "),
            format_size(model.size_bytes)
        );
    }
    Ok(())
}
