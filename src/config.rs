use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::error::AnalysisError;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.mistral.ai/v1/";
pub const DEFAULT_LLM_MODEL: &str = "mistral-small-latest";
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub grpc_port: u16,
    pub database_url: Option<String>,
    pub chunk_delay: Duration,
    pub max_result_rows: usize,
    /// Cap on the decompressed size of one uploaded archive.
    pub max_archive_bytes: u64,
}

impl EngineConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, AnalysisError> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) => debug!("No .env file loaded: {}", e),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AnalysisError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("LLM_API_KEY")
            .or_else(|| lookup("API_KEY"))
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AnalysisError::ConfigError {
                message: "LLM_API_KEY (or API_KEY) environment variable is required".to_string(),
            })?;

        let raw_base_url =
            lookup("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string());
        // Url::join drops the last path segment unless it ends with a slash.
        let normalized = if raw_base_url.ends_with('/') {
            raw_base_url
        } else {
            format!("{}/", raw_base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| AnalysisError::ConfigError {
            message: format!("Invalid LLM_BASE_URL '{}': {}", normalized, e),
        })?;

        let llm = LlmConfig {
            api_key,
            base_url,
            model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            temperature: parse_or(&lookup, "LLM_TEMPERATURE", 0.0)?,
            timeout: Duration::from_secs(parse_or(&lookup, "LLM_TIMEOUT_SECS", 60)?),
        };

        Ok(Self {
            llm,
            grpc_port: parse_or(&lookup, "GRPC_PORT", 50051)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            chunk_delay: Duration::from_millis(parse_or(&lookup, "CHUNK_DELAY_MS", 0)?),
            max_result_rows: parse_or(&lookup, "MAX_RESULT_ROWS", 200)?,
            max_archive_bytes: parse_or(&lookup, "MAX_ARCHIVE_BYTES", DEFAULT_MAX_ARCHIVE_BYTES)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AnalysisError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| AnalysisError::ConfigError {
                message: format!("Invalid {} '{}': {}", key, raw, e),
            }),
        None => Ok(default),
    }
}
