//! Configuration management for the actuation gateway

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::effects::Theme;
use crate::{Error, Result};

/// Default listen port
pub const DEFAULT_PORT: u16 = 8000;

/// Default light provider name used for target resolution
pub const DEFAULT_PROVIDER: &str = "tuya";

/// Default pulse toggle period in milliseconds
pub const DEFAULT_PULSE_PERIOD_MS: u64 = 450;

/// Default idle timeout for protocol sessions in seconds
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub api_server: ApiServerConfig,

    /// Provider name looked up in store target entries (e.g. "tuya")
    pub light_provider: String,

    /// Directory containing `<store_id>.json` files
    pub store_config_dir: PathBuf,

    /// Tuya cloud credentials, if configured
    pub tuya: Option<TuyaConfig>,

    /// Effect animation settings
    pub effects: EffectsConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Bearer token gating `/mcp` (from `MCP_BEARER_TOKEN`); auth disabled when unset
    pub bearer_token: Option<SecretString>,

    /// Sessions idle longer than this are ended; `None` disables the reaper
    pub session_idle_timeout: Option<Duration>,
}

/// Tuya cloud API credentials
#[derive(Debug, Clone)]
pub struct TuyaConfig {
    /// Regional endpoint, e.g. `https://openapi.tuyaus.com`
    pub base_url: String,

    /// Client id (access key)
    pub access_key: String,

    /// Client secret
    pub secret_key: SecretString,
}

/// Effect animation settings
#[derive(Debug, Clone)]
pub struct EffectsConfig {
    /// Toggle period for pulse animations
    pub pulse_period: Duration,

    /// Theme used when a request names an unknown theme
    pub default_theme: Theme,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            pulse_period: Duration::from_millis(DEFAULT_PULSE_PERIOD_MS),
            default_theme: Theme::Default,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable cannot be parsed
    pub fn from_env() -> Result<Self> {
        let port = env_parse("PORT")?.unwrap_or(DEFAULT_PORT);

        let bearer_token = non_empty_env("MCP_BEARER_TOKEN").map(SecretString::from);

        let idle_secs = env_parse::<u64>("SESSION_IDLE_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_SESSION_IDLE_SECS);
        let session_idle_timeout = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));

        let light_provider =
            non_empty_env("LIGHT_PROVIDER").unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

        let store_config_dir = non_empty_env("STORE_CONFIG_DIR")
            .map_or_else(|| PathBuf::from("config").join("stores"), PathBuf::from);

        let tuya = match (
            non_empty_env("TUYA_BASE_URL"),
            non_empty_env("TUYA_ACCESS_KEY"),
            non_empty_env("TUYA_SECRET_KEY"),
        ) {
            (Some(base_url), Some(access_key), Some(secret_key)) => Some(TuyaConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                access_key,
                secret_key: SecretString::from(secret_key),
            }),
            (None, None, None) => None,
            _ => {
                return Err(Error::Config(
                    "TUYA_BASE_URL, TUYA_ACCESS_KEY and TUYA_SECRET_KEY must be set together"
                        .to_string(),
                ));
            }
        };

        let period_ms = env_parse::<u64>("PULSE_PERIOD_MS")?.unwrap_or(DEFAULT_PULSE_PERIOD_MS);
        if period_ms == 0 {
            return Err(Error::Config("PULSE_PERIOD_MS must be positive".to_string()));
        }

        let default_theme = non_empty_env("DEFAULT_THEME")
            .and_then(|name| Theme::parse(&name))
            .unwrap_or(Theme::Default);

        Ok(Self {
            api_server: ApiServerConfig {
                port,
                bearer_token,
                session_idle_timeout,
            },
            light_provider,
            store_config_dir,
            tuya,
            effects: EffectsConfig {
                pulse_period: Duration::from_millis(period_ms),
                default_theme,
            },
        })
    }

    /// Tuya credentials, or a configuration error naming the missing variables
    ///
    /// # Errors
    ///
    /// Returns error if the Tuya variables are not set
    pub fn require_tuya(&self) -> Result<&TuyaConfig> {
        self.tuya.as_ref().ok_or_else(|| {
            Error::Config(
                "Tuya credentials missing: set TUYA_BASE_URL, TUYA_ACCESS_KEY, TUYA_SECRET_KEY"
                    .to_string(),
            )
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    non_empty_env(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effects_defaults() {
        let effects = EffectsConfig::default();
        assert_eq!(effects.pulse_period, Duration::from_millis(450));
        assert_eq!(effects.default_theme, Theme::Default);
    }

    #[test]
    fn unset_variable_parses_to_none() {
        let parsed = env_parse::<u16>("ACTUATION_TEST_UNSET_VARIABLE").unwrap();
        assert!(parsed.is_none());
    }
}
