// ABOUTME: Environment-driven configuration for the sandbox lifecycle layer
// ABOUTME: Fails fast on missing or placeholder credentials before any remote call

use crate::retry::RetryPolicy;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("{0} appears to be a placeholder value; set a real credential")]
    Placeholder(&'static str),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the sandbox lease manager and executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub api_key: String,
    pub api_url: Option<String>,
    pub template: String,
    /// Remote-side idle timeout requested at creation.
    pub keepalive: Duration,
    /// A sandbox older than this is recycled before the next dispatch.
    pub max_age: Duration,
    /// A sandbox that has dispatched this many commands is recycled.
    pub max_commands: u32,
    pub retry: RetryPolicy,
}

impl SandboxConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            api_url: None,
            template: "base".to_string(),
            keepalive: Duration::from_secs(900),
            max_age: Duration::from_secs(3600),
            max_commands: 100,
            retry: RetryPolicy::default(),
        }
    }

    /// Load configuration from the environment, failing fast on missing or
    /// placeholder credentials so no remote call is ever attempted with a
    /// known-bad key.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("E2B_API_KEY").map_err(|_| ConfigError::Missing("E2B_API_KEY"))?;
        if is_placeholder(&api_key) {
            return Err(ConfigError::Placeholder("E2B_API_KEY"));
        }

        let mut config = Self::new(api_key);
        config.api_url = env::var("E2B_API_URL").ok();
        if let Ok(template) = env::var("E2B_TEMPLATE") {
            config.template = template;
        }
        Ok(config)
    }
}

/// Heuristic for values copied straight out of a sample .env file.
pub fn is_placeholder(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let lower = value.to_lowercase();
    if lower.contains("your-") || lower.contains("your_") || lower.contains("changeme") {
        return true;
    }
    let x_count = lower.chars().filter(|c| *c == 'x').count();
    x_count * 2 > value.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder(""));
        assert!(is_placeholder("your-api-key-here"));
        assert!(is_placeholder("CHANGEME"));
        assert!(is_placeholder("xxxxxxxxxxxxxxxx"));
        assert!(is_placeholder("e2b_xxxxxxxxxxxx"));
        assert!(!is_placeholder("e2b_51f3c02b9d8e4a7f"));
    }

    #[test]
    fn defaults_match_lifecycle_policy() {
        let config = SandboxConfig::new("key".to_string());
        assert_eq!(config.max_age, Duration::from_secs(3600));
        assert_eq!(config.max_commands, 100);
        assert_eq!(config.template, "base");
    }
}
