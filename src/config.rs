use clap::Args;
use thiserror::Error;

use crate::constants;

/// Completion API settings shared by every command.
#[derive(Args, Debug, Clone)]
pub struct ApiArgs {
    #[arg(long, env = constants::API_KEY_ENV, hide_env_values = true, help = "Completion API key.")]
    pub api_key: Option<String>,
    #[arg(long, default_value_t = constants::BRANDME_MODEL.clone(), help = "Model identifier.")]
    pub model: String,
    #[arg(long, default_value_t = constants::OPENAI_BASE_URL.clone(), help = "Completion API base URL.")]
    pub base_url: String,
    #[arg(long, default_value_t = constants::DEFAULT_CONNECT_TIMEOUT_SECS, help = "Connect timeout for API calls, in seconds.")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{} is not set. Export it or add it to a .env file.", constants::API_KEY_ENV)]
    MissingApiKey,
}

/// Loaded once at start, read-only afterwards.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl TryFrom<ApiArgs> for Config {
    type Error = ConfigError;

    fn try_from(args: ApiArgs) -> Result<Self, Self::Error> {
        let api_key = args
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(Self {
            api_key,
            model: args.model,
            base_url: args.base_url,
            connect_timeout_secs: args.connect_timeout_secs,
        })
    }
}
