use std::net::SocketAddr;

use url::Url;

// ── Defaults ─────────────────────────────────────────────────────────────────

pub const DEFAULT_API_BASE: &str = "https://dashscope.aliyuncs.com";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

const GENERATION_PATH: &str = "api/v1/services/aigc/multimodal-generation/generation";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ALIYUN_API_KEY is not configured")]
    MissingApiKey,
    #[error("invalid DASHSCOPE_BASE_URL '{0}'")]
    InvalidBaseUrl(String),
    #[error("invalid LISTEN_ADDR '{0}'")]
    InvalidListenAddr(String),
    #[error("invalid MAX_BODY_BYTES '{0}'")]
    InvalidBodyLimit(String),
}

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    api_key: Option<String>,
    pub api_base: Url,
    pub listen_addr: SocketAddr,
    pub max_body_bytes: usize,
}

impl Config {
    /// Reads the process environment. A missing API key is not fatal here; it is
    /// reported on each request instead.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable source.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base = lookup("DASHSCOPE_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE.into());
        let listen_addr = lookup("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into());

        let max_body_bytes = match lookup("MAX_BODY_BYTES") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidBodyLimit(raw))?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        Ok(Self {
            api_key: non_blank(lookup("ALIYUN_API_KEY")),
            api_base: parse_base_url(&api_base)?,
            listen_addr: listen_addr
                .parse()
                .map_err(|_| ConfigError::InvalidListenAddr(listen_addr))?,
            max_body_bytes,
        })
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    pub fn generation_url(&self) -> Url {
        let mut base = self.api_base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        // GENERATION_PATH is a relative constant, so join cannot fail.
        base.join(GENERATION_PATH).unwrap_or(base)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidBaseUrl(raw.into()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(ConfigError::InvalidBaseUrl(raw.into())),
    }
}
