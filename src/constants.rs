// Defaults, overridable from the environment, plus fixed sampling settings.

use std::env;

use crate::gateway::Sampling;

lazy_static::lazy_static! {
    pub static ref OPENAI_BASE_URL: String = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    pub static ref BRANDME_MODEL: String = env::var("BRANDME_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
}

/// Name of the one required configuration value.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Nickname generation runs a little hotter than chat turns.
pub const NICKNAME_SAMPLING: Sampling = Sampling {
    temperature: 0.8,
    max_tokens: 1000,
};

pub const CHAT_SAMPLING: Sampling = Sampling {
    temperature: 0.7,
    max_tokens: 1000,
};

pub const DEFAULT_PORT: u16 = 9900;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
