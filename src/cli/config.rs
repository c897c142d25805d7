//! Conversion of CLI arguments into processor and server configuration

use crate::cli::main_impl::Cli;
use crate::{
    cache::ModelCache,
    config::{CorsConfig, ExecutionProvider, RemovalConfig, ServerConfig},
    error::BgRemovalError,
    models::{ModelSource, ModelSpec},
    processor::{BackendType, ProcessorConfig, ProcessorConfigBuilder},
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const MIB: usize = 1024 * 1024;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the processor configuration from CLI arguments
    pub(crate) fn processor_config(cli: &Cli) -> Result<ProcessorConfig> {
        let (backend_type, execution_provider) =
            Self::parse_provider_string(&cli.execution_provider)
                .context("Invalid execution provider format")?;

        let model_spec = cli
            .model
            .as_deref()
            .map_or_else(ModelSpec::default, Self::parse_model_arg);
        let model_spec = ModelSpec {
            variant: cli.variant.clone().or(model_spec.variant),
            ..model_spec
        };

        // Inter-op threads follow the `num_threads` split
        let threads = RemovalConfig::builder()
            .num_threads(cli.threads)
            .build()
            .context("Invalid thread count")?;

        let config = ProcessorConfigBuilder::new()
            .model_spec(model_spec)
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            .intra_threads(threads.intra_threads)
            .inter_threads(threads.inter_threads)
            .build()
            .context("Invalid configuration")?;

        Ok(config)
    }

    /// Build the listener, limit and CORS configuration from CLI arguments
    pub(crate) fn server_config(cli: &Cli) -> Result<ServerConfig> {
        let max_upload_bytes = cli
            .max_upload_mb
            .checked_mul(MIB)
            .ok_or_else(|| anyhow::anyhow!("--max-upload-mb {} is too large", cli.max_upload_mb))?;

        let cors = if cli.allow_any_origin {
            CorsConfig::permissive()
        } else if cli.cors_origins.is_empty() {
            CorsConfig::default()
        } else {
            CorsConfig::default().with_origins(cli.cors_origins.iter().cloned())
        };

        let config = ServerConfig {
            host: cli.host.clone(),
            port: cli.port,
            max_upload_bytes,
            cors,
        };
        config.validate()?;
        Ok(config)
    }

    /// URL to download the selected model from when it is not cached
    ///
    /// Known for HuggingFace URLs passed with `--model` and for the default model.
    pub(crate) fn download_url(cli: &Cli) -> Option<String> {
        match cli.model.as_deref() {
            Some(model_arg) if model_arg.starts_with("http") => Some(model_arg.to_string()),
            Some(model_arg) => {
                let model_id = model_arg.split_once(':').map_or(model_arg, |(id, _)| id);
                (model_id == ModelCache::get_default_model_id())
                    .then(|| ModelCache::get_default_model_url().to_string())
            },
            None => Some(ModelCache::get_default_model_url().to_string()),
        }
    }

    /// Parse `backend:provider` (or a bare backend name) into a backend and provider
    pub(crate) fn parse_provider_string(
        provider_str: &str,
    ) -> crate::Result<(BackendType, ExecutionProvider)> {
        let provider_str = provider_str.trim().to_ascii_lowercase();
        let (backend, provider) = provider_str
            .split_once(':')
            .map_or((provider_str.as_str(), None), |(b, p)| (b, Some(p)));

        match (backend, provider) {
            ("onnx", None | Some("auto")) => Ok((BackendType::Onnx, ExecutionProvider::Auto)),
            ("onnx", Some("cpu")) => Ok((BackendType::Onnx, ExecutionProvider::Cpu)),
            ("onnx", Some("cuda")) => Ok((BackendType::Onnx, ExecutionProvider::Cuda)),
            ("onnx", Some("coreml")) => Ok((BackendType::Onnx, ExecutionProvider::CoreMl)),
            ("onnx", Some(other)) => Err(BgRemovalError::invalid_config(format!(
                "Unknown ONNX provider: {other}. Supported: auto, cpu, cuda, coreml"
            ))),
            ("tract", None | Some("cpu")) => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
            ("tract", Some(other)) => Err(BgRemovalError::invalid_config(format!(
                "Unknown Tract provider: {other}. Tract only supports 'cpu'"
            ))),
            ("mock", _) => Ok((BackendType::Mock, ExecutionProvider::Cpu)),
            (other, _) => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend: {other}. Supported backends: onnx, tract, mock"
            ))),
        }
    }

    /// Interpret `--model` as a directory, a URL or a cached model ID
    ///
    /// `ID:variant` and `PATH:variant` select a variant; URLs are never split.
    pub(crate) fn parse_model_arg(model_arg: &str) -> ModelSpec {
        if model_arg.starts_with("http") {
            return ModelSpec {
                source: ModelSource::Downloaded(ModelCache::url_to_model_id(model_arg)),
                variant: None,
            };
        }

        if !Path::new(model_arg).exists() {
            if let Some((model_part, variant_part)) = model_arg.rsplit_once(':') {
                return ModelSpec {
                    source: Self::local_source(model_part),
                    variant: Some(variant_part.to_string()),
                };
            }
        }

        ModelSpec {
            source: Self::local_source(model_arg),
            variant: None,
        }
    }

    fn local_source(model_arg: &str) -> ModelSource {
        if Path::new(model_arg).exists() {
            ModelSource::External(PathBuf::from(model_arg))
        } else {
            ModelSource::Downloaded(model_arg.to_string())
        }
    }
}
