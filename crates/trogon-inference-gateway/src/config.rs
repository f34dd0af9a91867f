use std::time::Duration;

use tracing::warn;

use crate::auth::ApiKeySet;
use crate::env::ReadEnv;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_BACKEND_URL: &str = "http://localhost:8501";
const DEFAULT_MODEL_NAME: &str = "my_model";
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BACKEND_MAX_RETRIES: u32 = 0;
const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const MIN_BACKEND_TIMEOUT_SECS: u64 = 1;
const MIN_MAX_BODY_BYTES: usize = 1024;

const ENV_PORT: &str = "GATEWAY_PORT";
const ENV_BACKEND_URL: &str = "GATEWAY_BACKEND_URL";
const ENV_MODEL_NAME: &str = "GATEWAY_MODEL_NAME";
const ENV_API_KEYS: &str = "GATEWAY_API_KEYS";
const ENV_BACKEND_TIMEOUT_SECS: &str = "GATEWAY_BACKEND_TIMEOUT_SECS";
const ENV_BACKEND_MAX_RETRIES: &str = "GATEWAY_BACKEND_MAX_RETRIES";
const ENV_MAX_BODY_BYTES: &str = "GATEWAY_MAX_BODY_BYTES";

/// Configuration for the inference gateway.
///
/// Resolved from environment variables:
/// - `GATEWAY_PORT`: HTTP listening port (default: 8000)
/// - `GATEWAY_BACKEND_URL`: model-serving base URL (default: `http://localhost:8501`)
/// - `GATEWAY_MODEL_NAME`: model name used in backend paths (default: `my_model`)
/// - `GATEWAY_API_KEYS`: comma-separated accepted API keys (default: none, every request is rejected)
/// - `GATEWAY_BACKEND_TIMEOUT_SECS`: per-call backend timeout (default: 10, minimum 1)
/// - `GATEWAY_BACKEND_MAX_RETRIES`: retries on transport failure or 5xx (default: 0)
/// - `GATEWAY_MAX_BODY_BYTES`: inbound body limit (default: 2 MiB, minimum 1024)
pub struct GatewayConfig {
    pub port: u16,
    pub backend_url: String,
    pub model_name: String,
    pub api_keys: ApiKeySet,
    pub backend_timeout: Duration,
    pub backend_max_retries: u32,
    pub max_body_bytes: usize,
}

impl GatewayConfig {
    pub fn from_env<E: ReadEnv>(env: &E) -> Self {
        let api_keys = env
            .var(ENV_API_KEYS)
            .map(|raw| ApiKeySet::parse(&raw))
            .unwrap_or_default();
        if api_keys.is_empty() {
            warn!("{ENV_API_KEYS} is empty, every request will be rejected");
        }

        Self {
            port: parse_or(env, ENV_PORT, DEFAULT_PORT),
            backend_url: env
                .var(ENV_BACKEND_URL)
                .unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string()),
            model_name: env
                .var(ENV_MODEL_NAME)
                .unwrap_or_else(|_| DEFAULT_MODEL_NAME.to_string()),
            api_keys,
            backend_timeout: Duration::from_secs(parse_at_least(
                env,
                ENV_BACKEND_TIMEOUT_SECS,
                DEFAULT_BACKEND_TIMEOUT_SECS,
                MIN_BACKEND_TIMEOUT_SECS,
            )),
            backend_max_retries: parse_or(
                env,
                ENV_BACKEND_MAX_RETRIES,
                DEFAULT_BACKEND_MAX_RETRIES,
            ),
            max_body_bytes: parse_at_least(
                env,
                ENV_MAX_BODY_BYTES,
                DEFAULT_MAX_BODY_BYTES,
                MIN_MAX_BODY_BYTES,
            ),
        }
    }
}

fn parse_or<E, T>(env: &E, key: &str, default: T) -> T
where
    E: ReadEnv,
    T: std::str::FromStr,
{
    match env.var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{key}={raw:?} is not a valid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn parse_at_least<E, T>(env: &E, key: &str, default: T, min: T) -> T
where
    E: ReadEnv,
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let value = parse_or(env, key, default);
    if value < min {
        warn!("{key}={value} is below minimum ({min}), using default");
        return default;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::InMemoryEnv;

    #[test]
    fn defaults_when_no_env_vars() {
        let env = InMemoryEnv::new();
        let config = GatewayConfig::from_env(&env);

        assert_eq!(config.port, 8000);
        assert_eq!(config.backend_url, "http://localhost:8501");
        assert_eq!(config.model_name, "my_model");
        assert!(config.api_keys.is_empty());
        assert_eq!(config.backend_timeout, Duration::from_secs(10));
        assert_eq!(config.backend_max_retries, 0);
        assert_eq!(config.max_body_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn reads_all_env_vars() {
        let env = InMemoryEnv::new();
        env.set("GATEWAY_PORT", "9000");
        env.set("GATEWAY_BACKEND_URL", "http://tfs:8501/");
        env.set("GATEWAY_MODEL_NAME", "churn");
        env.set("GATEWAY_API_KEYS", "k1, k2,,");
        env.set("GATEWAY_BACKEND_TIMEOUT_SECS", "3");
        env.set("GATEWAY_BACKEND_MAX_RETRIES", "2");
        env.set("GATEWAY_MAX_BODY_BYTES", "4096");

        let config = GatewayConfig::from_env(&env);

        assert_eq!(config.port, 9000);
        assert_eq!(config.backend_url, "http://tfs:8501/");
        assert_eq!(config.model_name, "churn");
        assert_eq!(config.api_keys, ApiKeySet::from_keys(["k1", "k2"]));
        assert_eq!(config.backend_timeout, Duration::from_secs(3));
        assert_eq!(config.backend_max_retries, 2);
        assert_eq!(config.max_body_bytes, 4096);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let env = InMemoryEnv::new();
        env.set("GATEWAY_PORT", "not-a-number");
        env.set("GATEWAY_BACKEND_TIMEOUT_SECS", "ten");
        env.set("GATEWAY_BACKEND_MAX_RETRIES", "-1");
        env.set("GATEWAY_MAX_BODY_BYTES", "2MB");

        let config = GatewayConfig::from_env(&env);

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(
            config.backend_timeout,
            Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS)
        );
        assert_eq!(config.backend_max_retries, DEFAULT_BACKEND_MAX_RETRIES);
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn values_under_minimum_fall_back_to_defaults() {
        let env = InMemoryEnv::new();
        env.set("GATEWAY_BACKEND_TIMEOUT_SECS", "0");
        env.set("GATEWAY_MAX_BODY_BYTES", "10");

        let config = GatewayConfig::from_env(&env);

        assert_eq!(
            config.backend_timeout,
            Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS)
        );
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn blank_key_list_yields_empty_set() {
        let env = InMemoryEnv::new();
        env.set("GATEWAY_API_KEYS", " , ,");

        let config = GatewayConfig::from_env(&env);

        assert!(config.api_keys.is_empty());
    }
}
