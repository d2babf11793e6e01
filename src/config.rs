//! Runtime configuration, read from the environment at startup.

use std::fmt;

use crate::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::error::{AppError, Result};

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";
pub const CHAT_MODEL_VAR: &str = "DOC_QA_CHAT_MODEL";
pub const EMBEDDING_MODEL_VAR: &str = "DOC_QA_EMBEDDING_MODEL";
pub const TEMPERATURE_VAR: &str = "DOC_QA_TEMPERATURE";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

#[derive(Clone)]
pub struct Config {
    /// Bearer credential shared by the chat and embedding endpoints
    pub api_key: String,
    /// OpenAI-compatible API root, without a trailing slash
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    /// Sampling temperature; the provider default applies when unset
    pub temperature: Option<f32>,
    /// Retries for transient chat-completion failures
    pub max_retries: u32,
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub chunk_overlap: usize,
    /// Number of chunks handed to the model as context
    pub top_k: usize,
    /// Texts sent per embedding request
    pub embedding_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            temperature: None,
            max_retries: 2,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: 3,
            embedding_batch_size: 64,
        }
    }
}

impl Config {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup. A missing or blank API key is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = non_empty(API_KEY_VAR)
            .ok_or_else(|| AppError::Config(format!("{} is not set", API_KEY_VAR)))?;

        let mut config = Self {
            api_key,
            ..Self::default()
        };

        if let Some(base_url) = non_empty(BASE_URL_VAR) {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty(CHAT_MODEL_VAR) {
            config.chat_model = model;
        }
        if let Some(model) = non_empty(EMBEDDING_MODEL_VAR) {
            config.embedding_model = model;
        }
        if let Some(raw) = non_empty(TEMPERATURE_VAR) {
            let temperature = raw.trim().parse::<f32>().map_err(|_| {
                AppError::Config(format!("{} must be a number, got '{}'", TEMPERATURE_VAR, raw))
            })?;
            config.temperature = Some(temperature);
        }

        Ok(config)
    }

    /// API key with everything but the first and last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let key = &self.api_key;
        if key.len() > 8 && key.is_ascii() {
            format!("{}...{}", &key[..4], &key[key.len() - 4..])
        } else {
            "****".to_string()
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.masked_api_key())
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("top_k", &self.top_k)
            .field("embedding_batch_size", &self.embedding_batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = Config::from_lookup(lookup(&[(API_KEY_VAR, "   ")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[(API_KEY_VAR, "sk-test")])).unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(config.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.chunk_overlap, 100);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.max_retries, 2);
        assert!(config.temperature.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            (API_KEY_VAR, "sk-test"),
            (BASE_URL_VAR, "https://llm.example.edu/"),
            (CHAT_MODEL_VAR, "openai.gpt-4o"),
            (EMBEDDING_MODEL_VAR, "openai.text-embedding-3-large"),
            (TEMPERATURE_VAR, "0.2"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://llm.example.edu");
        assert_eq!(config.chat_model, "openai.gpt-4o");
        assert_eq!(config.embedding_model, "openai.text-embedding-3-large");
        assert_eq!(config.temperature, Some(0.2));
    }

    #[test]
    fn test_bad_temperature() {
        let err = Config::from_lookup(lookup(&[(API_KEY_VAR, "sk-test"), (TEMPERATURE_VAR, "warm")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_debug_masks_key() {
        let config = Config {
            api_key: "sk-abcdefghijklmnop".into(),
            ..Config::default()
        };
        let printed = format!("{:?}", config);
        assert!(printed.contains("sk-a...mnop"));
        assert!(!printed.contains("abcdefghijklmnop"));
    }
}
