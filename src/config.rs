use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::http::parser::ParserLimits;

/// Server-core options.
///
/// Loaded from defaults, then an optional YAML file named by `KEEL_CONFIG`,
/// then the `LISTEN` environment variable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Include fault details in 500 bodies.
    pub debug: bool,
    /// `Server` header value; omitted when unset.
    pub server_token: Option<String>,
    pub default_content_type: String,
    pub default_charset: String,
    /// Seconds an idle keep-alive connection is held open.
    pub keep_alive_timeout: u64,
    /// Requests served per connection before closing it; 0 for no cap.
    pub max_requests_per_connection: usize,
    /// Parsed requests that may queue behind the one being answered.
    pub max_pipelined_requests: usize,
    pub max_header_size: usize,
    pub max_body_size: usize,
    pub body_emit_size: usize,
    /// Streamed output is coalesced up to this many bytes per socket write.
    pub output_buffer_size: usize,
    pub enable_http2: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            debug: false,
            server_token: Some("keel".to_string()),
            default_content_type: "text/html".to_string(),
            default_charset: "utf-8".to_string(),
            keep_alive_timeout: 10,
            max_requests_per_connection: 1000,
            max_pipelined_requests: 16,
            max_header_size: 32 * 1024,
            max_body_size: 128 * 1024,
            body_emit_size: 32 * 1024,
            output_buffer_size: 8 * 1024,
            enable_http2: true,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("KEEL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(content)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.listen_addr.is_empty(), "listen_addr must not be empty");
        anyhow::ensure!(self.max_header_size >= 64, "max_header_size must be at least 64 bytes");
        anyhow::ensure!(self.max_body_size > 0, "max_body_size must be positive");
        anyhow::ensure!(self.body_emit_size > 0, "body_emit_size must be positive");
        anyhow::ensure!(self.output_buffer_size > 0, "output_buffer_size must be positive");
        anyhow::ensure!(self.keep_alive_timeout > 0, "keep_alive_timeout must be positive");
        anyhow::ensure!(self.max_pipelined_requests > 0, "max_pipelined_requests must be positive");
        anyhow::ensure!(!self.default_charset.is_empty(), "default_charset must not be empty");
        Ok(())
    }

    pub fn parser_limits(&self) -> ParserLimits {
        ParserLimits {
            max_header_size: self.max_header_size,
            body_emit_size: self.body_emit_size,
        }
    }
}
