//! Process configuration: CLI flags merged with environment variables into
//! one value threaded through construction. Configuration errors exit the
//! process with status 2 before any transport starts.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use services::services::search::{ScoreNormalization, SearchConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_AUTH_TOKEN must be set when the HTTP transport is enabled")]
    MissingAuthToken,
    #[error("invalid {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum TransportMode {
    Stdio,
    Http,
    Both,
}

impl TransportMode {
    pub fn http_enabled(&self) -> bool {
        matches!(self, TransportMode::Http | TransportMode::Both)
    }

    pub fn stdio_enabled(&self) -> bool {
        matches!(self, TransportMode::Stdio | TransportMode::Both)
    }
}

#[derive(Debug, Parser)]
#[command(name = "context-server", version, about = "Semantic code search over MCP")]
pub struct Cli {
    /// Which transport(s) to serve.
    #[arg(long, value_enum, default_value_t = TransportMode::Stdio)]
    pub transport: TransportMode,

    /// HTTP port (only meaningful with --transport http|both).
    #[arg(long, env = "MCP_PORT", default_value_t = 3100)]
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: TransportMode,
    pub port: u16,
    pub auth_token: Option<String>,
    pub rate_limit_per_minute: u32,
    pub allowed_origin: Option<String>,
    pub embedding_base_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub vector_store_url: String,
    pub vector_store_token: Option<String>,
    pub hybrid_search: bool,
    pub sync_interval: Duration,
    pub search: SearchConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}

impl ServerConfig {
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let auth_token = env_var("MCP_AUTH_TOKEN");
        if cli.transport.http_enabled() && auth_token.is_none() {
            return Err(ConfigError::MissingAuthToken);
        }

        let normalization = match env_var("MCP_SEARCH_NORMALIZATION").as_deref() {
            None | Some("raw") => ScoreNormalization::Raw,
            Some("min-max") | Some("minmax") => ScoreNormalization::MinMax,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "MCP_SEARCH_NORMALIZATION",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            transport: cli.transport,
            port: cli.port,
            auth_token,
            rate_limit_per_minute: env_parsed("MCP_RATE_LIMIT", 60)?,
            allowed_origin: env_var("MCP_ALLOWED_ORIGIN"),
            embedding_base_url: env_var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/".to_string()),
            embedding_api_key: env_var("EMBEDDING_API_KEY"),
            embedding_model: env_var("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_dimension: env_parsed("EMBEDDING_DIMENSION", 1536)?,
            vector_store_url: env_var("VECTOR_STORE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:19530/".to_string()),
            vector_store_token: env_var("VECTOR_STORE_TOKEN"),
            hybrid_search: env_parsed("VECTOR_STORE_HYBRID", true)?,
            sync_interval: Duration::from_secs(env_parsed("MCP_SYNC_INTERVAL_SECS", 300u64)?),
            search: SearchConfig {
                normalization,
                ..SearchConfig::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(transport: TransportMode) -> Cli {
        Cli {
            transport,
            port: 3100,
        }
    }

    #[test]
    fn stdio_does_not_require_auth_token() {
        // Serialized through the env-mutating tests below by virtue of not
        // reading MCP_AUTH_TOKEN at all when stdio-only.
        let config = ServerConfig::resolve(&cli(TransportMode::Stdio));
        assert!(config.is_ok());
    }

    #[test]
    fn transport_mode_flags() {
        assert!(TransportMode::Both.http_enabled());
        assert!(TransportMode::Both.stdio_enabled());
        assert!(!TransportMode::Stdio.http_enabled());
        assert!(!TransportMode::Http.stdio_enabled());
    }
}
