//! Configuration types for the removal engine and the HTTP gateway

use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};

/// Default listen host; matches the development server of the web client
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port; the web client posts to `http://localhost:8000/remove-bg`
pub const DEFAULT_PORT: u16 = 8000;

/// Default upper bound for a single upload (100 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Origin of the web studio allowed by the production CORS policy
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Upper bound accepted for explicit thread counts
const MAX_THREADS: usize = 1024;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Configuration handed to inference backends when they load a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Model specification including source and variant
    pub model_spec: ModelSpec,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            model_spec: ModelSpec::default(),
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_gateway::{ExecutionProvider, RemovalConfig};
    ///
    /// let config = RemovalConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .num_threads(8)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.inter_threads, 4);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Thread counts above the supported maximum
    pub fn validate(&self) -> crate::Result<()> {
        if self.intra_threads > MAX_THREADS {
            return Err(crate::error::BgRemovalError::config_value_error(
                "intra-op threads",
                self.intra_threads,
                "0-1024",
                Some(0),
            ));
        }

        if self.inter_threads > MAX_THREADS {
            return Err(crate::error::BgRemovalError::config_value_error(
                "inter-op threads",
                self.inter_threads,
                "0-1024",
                Some(0),
            ));
        }

        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    /// Set execution provider
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    /// Set number of intra-op threads
    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Set number of inter-op threads
    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both intra and inter threads
    ///
    /// Intra-op threads are set to `threads`, inter-op threads to `threads/2`
    /// (minimum 1). Zero keeps both on auto-detection.
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Set the model specification
    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Thread counts above the supported maximum
    pub fn build(self) -> crate::Result<RemovalConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}

/// Cross-origin policy applied to every route
///
/// `"*"` in any list means "any". Because credentials are allowed by default,
/// the router honors `"*"` by echoing the request's origin, method or headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins (exact match) or `"*"`
    pub allowed_origins: Vec<String>,
    /// Allowed methods or `"*"`
    pub allowed_methods: Vec<String>,
    /// Allowed request headers or `"*"`
    pub allowed_headers: Vec<String>,
    /// Whether browsers may send cookies and authorization headers
    pub allow_credentials: bool,
    /// How long browsers may cache a preflight response
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![DEFAULT_CORS_ORIGIN.to_string()],
            allowed_methods: vec!["*".to_string()],
            allowed_headers: vec!["*".to_string()],
            allow_credentials: true,
            max_age_secs: None,
        }
    }
}

impl CorsConfig {
    /// Policy that accepts any origin; intended for demos only
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            ..Self::default()
        }
    }

    /// Replace the allowed origins
    #[must_use]
    pub fn with_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the policy accepts any origin
    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin.trim() == "*")
    }
}

/// Listener, limits and CORS policy for the HTTP gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host or IP address to bind
    pub host: String,
    /// TCP port to bind (0 picks an ephemeral port)
    pub port: u16,
    /// Maximum accepted request body size in bytes
    pub max_upload_bytes: usize,
    /// Cross-origin policy
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Address string accepted by `TcpListener::bind`
    #[must_use]
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            // Bare IPv6 literal
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Validate listener and limit settings
    ///
    /// # Errors
    /// - Empty host
    /// - Zero upload limit
    /// - No allowed CORS origins
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.trim().is_empty() {
            return Err(crate::error::BgRemovalError::invalid_config(
                "Server host cannot be empty",
            ));
        }

        if self.max_upload_bytes == 0 {
            return Err(crate::error::BgRemovalError::config_value_error(
                "max upload bytes",
                self.max_upload_bytes,
                "1 or more",
                Some(DEFAULT_MAX_UPLOAD_BYTES),
            ));
        }

        if self
            .cors
            .allowed_origins
            .iter()
            .all(|origin| origin.trim().is_empty())
        {
            return Err(crate::error::BgRemovalError::invalid_config(
                "CORS policy needs at least one allowed origin",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelSource, ModelSpec};

    #[test]
    fn test_default_config() {
        let config = RemovalConfig::default();
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.intra_threads, 0);
        assert_eq!(config.inter_threads, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let spec = ModelSpec {
            source: ModelSource::Downloaded("imgly--isnet-general-onnx".to_string()),
            variant: Some("fp16".to_string()),
        };
        let config = RemovalConfig::builder()
            .execution_provider(ExecutionProvider::Cpu)
            .intra_threads(4)
            .inter_threads(2)
            .model_spec(spec.clone())
            .build()
            .unwrap();

        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.inter_threads, 2);
        assert_eq!(config.model_spec, spec);
    }

    #[test]
    fn test_num_threads_split() {
        let config = RemovalConfig::builder().num_threads(8).build().unwrap();
        assert_eq!(config.intra_threads, 8);
        assert_eq!(config.inter_threads, 4);

        let config = RemovalConfig::builder().num_threads(1).build().unwrap();
        assert_eq!(config.intra_threads, 1);
        assert_eq!(config.inter_threads, 1);

        let config = RemovalConfig::builder().num_threads(0).build().unwrap();
        assert_eq!(config.intra_threads, 0);
        assert_eq!(config.inter_threads, 0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = RemovalConfig::default();
        assert!(config.validate().is_ok());

        config.intra_threads = 5000;
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("intra-op threads"));
        assert!(error.to_string().contains("5000"));

        assert!(RemovalConfig::builder().inter_threads(4096).build().is_err());
    }

    #[test]
    fn test_execution_provider_enum() {
        assert_eq!(ExecutionProvider::default(), ExecutionProvider::Auto);
        assert_eq!(format!("{}", ExecutionProvider::Auto), "auto");
        assert_eq!(format!("{}", ExecutionProvider::Cpu), "cpu");
        assert_eq!(format!("{}", ExecutionProvider::Cuda), "cuda");
        assert_eq!(format!("{}", ExecutionProvider::CoreMl), "coreml");
    }

    #[test]
    fn test_execution_provider_serde() {
        let json = serde_json::to_string(&ExecutionProvider::CoreMl).unwrap();
        let back: ExecutionProvider = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ExecutionProvider::CoreMl);
    }

    #[test]
    fn test_default_cors_is_narrow() {
        let cors = CorsConfig::default();
        assert_eq!(cors.allowed_origins, vec!["http://localhost:3000".to_string()]);
        assert!(cors.allow_credentials);
        assert!(!cors.allows_any_origin());
        assert_eq!(cors.allowed_methods, vec!["*".to_string()]);
        assert_eq!(cors.allowed_headers, vec!["*".to_string()]);
    }

    #[test]
    fn test_permissive_cors() {
        let cors = CorsConfig::permissive();
        assert!(cors.allows_any_origin());
        assert!(cors.allow_credentials);

        let cors = CorsConfig::default().with_origins(["https://a.example", "https://b.example"]);
        assert_eq!(cors.allowed_origins.len(), 2);
        assert!(!cors.allows_any_origin());
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_bind_address_ipv6() {
        let config = ServerConfig {
            host: "::1".to_string(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(config.bind_address(), "[::1]:9000");
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "  ".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            max_upload_bytes: 0,
            ..ServerConfig::default()
        };
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("max upload bytes"));

        let config = ServerConfig {
            cors: CorsConfig::default().with_origins(Vec::<String>::new()),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
