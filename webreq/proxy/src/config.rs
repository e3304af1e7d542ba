//! Configuration of a proxying factory.
//!
//! Loaded from JSON (every field is optional) and then overridden from the environment, see
//! [`ProxyConfig::with_env_overrides`].

use std::{env, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};

/// Default capacity of the channels connecting a factory task with its bindings.
pub const CHANNEL_SIZE: usize = 512;

/// How artificial redirects are made acceptable for cross-origin requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorsMode {
    /// The redirect response carries `Access-Control-Allow-Origin` and
    /// `Access-Control-Allow-Credentials` headers matching the request's `Origin`.
    Legacy,
    /// CORS is enforced by the network stack. A cross-origin redirect taints the initiator
    /// instead.
    #[default]
    OutOfBlink,
}

impl FromStr for CorsMode {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "legacy" => Ok(Self::Legacy),
            "out_of_blink" => Ok(Self::OutOfBlink),
            other => Err(ProxyError::InvalidEnvOverride {
                name: ProxyConfig::CORS_MODE_ENV,
                value: other.to_owned(),
            }),
        }
    }
}

/// Decides whether a request is routed through the trusted header client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraHeadersPolicy {
    /// Ask [`WebRequestApi::has_extra_headers_listener`](crate::web_request::WebRequestApi).
    #[default]
    Listener,
    Always,
    Never,
}

impl FromStr for ExtraHeadersPolicy {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "listener" => Ok(Self::Listener),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(ProxyError::InvalidEnvOverride {
                name: ProxyConfig::EXTRA_HEADERS_ENV,
                value: other.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub cors_mode: CorsMode,
    pub extra_headers: ExtraHeadersPolicy,
    /// Capacity of the factory task's binding channel.
    pub channel_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cors_mode: Default::default(),
            extra_headers: Default::default(),
            channel_size: CHANNEL_SIZE,
        }
    }
}

impl ProxyConfig {
    pub const CORS_MODE_ENV: &'static str = "WEBREQ_CORS_MODE";
    pub const EXTRA_HEADERS_ENV: &'static str = "WEBREQ_EXTRA_HEADERS";
    pub const CHANNEL_SIZE_ENV: &'static str = "WEBREQ_CHANNEL_SIZE";

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.channel_size == 0 {
            return Err(ProxyError::InvalidConfig(
                "`channel_size` must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| ProxyError::ConfigRead {
            path: path.to_owned(),
            source,
        })?;

        Self::from_json(&json)
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| env::var(name).ok())
    }

    /// Applies overrides found with `lookup`, which maps a variable name to its value.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(Self::CORS_MODE_ENV) {
            self.cors_mode = value.trim().parse()?;
        }

        if let Some(value) = lookup(Self::EXTRA_HEADERS_ENV) {
            self.extra_headers = value.trim().parse()?;
        }

        if let Some(value) = lookup(Self::CHANNEL_SIZE_ENV) {
            self.channel_size = value
                .trim()
                .parse()
                .ok()
                .filter(|size| *size > 0)
                .ok_or(ProxyError::InvalidEnvOverride {
                    name: Self::CHANNEL_SIZE_ENV,
                    value,
                })?;
        }

        tracing::debug!(config = ?self, "resolved proxy config");

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_from_empty_json() {
        let config = ProxyConfig::from_json("{}").unwrap();
        assert_eq!(config, ProxyConfig::default());
        assert_eq!(config.cors_mode, CorsMode::OutOfBlink);
        assert_eq!(config.extra_headers, ExtraHeadersPolicy::Listener);
        assert_eq!(config.channel_size, CHANNEL_SIZE);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            ProxyConfig::from_json(r#"{"cors": "legacy"}"#),
            Err(ProxyError::ConfigParse(..))
        ));
    }

    #[test]
    fn env_overrides_json() {
        let config = ProxyConfig::from_json(r#"{"cors_mode": "legacy", "channel_size": 8}"#)
            .unwrap()
            .with_overrides(|name| {
                HashMap::from([
                    (ProxyConfig::EXTRA_HEADERS_ENV, "always"),
                    (ProxyConfig::CHANNEL_SIZE_ENV, " 64 "),
                ])
                .get(name)
                .map(ToString::to_string)
            })
            .unwrap();

        assert_eq!(config.cors_mode, CorsMode::Legacy);
        assert_eq!(config.extra_headers, ExtraHeadersPolicy::Always);
        assert_eq!(config.channel_size, 64);
    }

    #[rstest]
    #[case::zero_channel(r#"{"channel_size": 0}"#)]
    #[case::zero_channel_with_mode(r#"{"cors_mode": "legacy", "channel_size": 0}"#)]
    fn rejects_unusable_json(#[case] json: &str) {
        assert!(matches!(
            ProxyConfig::from_json(json),
            Err(ProxyError::InvalidConfig(..))
        ));
    }

    #[rstest]
    #[case::cors(ProxyConfig::CORS_MODE_ENV, "strict")]
    #[case::extra_headers(ProxyConfig::EXTRA_HEADERS_ENV, "sometimes")]
    #[case::zero_channel(ProxyConfig::CHANNEL_SIZE_ENV, "0")]
    #[case::nan_channel(ProxyConfig::CHANNEL_SIZE_ENV, "lots")]
    fn invalid_overrides(#[case] variable: &'static str, #[case] value: &'static str) {
        let result = ProxyConfig::default()
            .with_overrides(|name| (name == variable).then(|| value.to_owned()));

        assert!(matches!(
            result,
            Err(ProxyError::InvalidEnvOverride { name, .. }) if name == variable
        ));
    }
}
