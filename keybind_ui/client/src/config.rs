use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:9002";
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}: {source}")]
    Url {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid {var}: expected milliseconds, got {value:?}")]
    Millis { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub ws_url: Url,
    pub capture_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: Url::parse(DEFAULT_WS_URL).expect("default ws url parses"),
            capture_timeout: Duration::from_millis(DEFAULT_CAPTURE_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    /// Reads `KEYBIND_WS_URL`, `KEYBIND_CAPTURE_TIMEOUT_MS` and
    /// `KEYBIND_REQUEST_TIMEOUT_MS`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(raw) = lookup("KEYBIND_WS_URL") {
            cfg.ws_url = Url::parse(raw.trim()).map_err(|source| ConfigError::Url {
                var: "KEYBIND_WS_URL",
                source,
            })?;
        }
        if let Some(ms) = millis(&lookup, "KEYBIND_CAPTURE_TIMEOUT_MS")? {
            cfg.capture_timeout = ms;
        }
        if let Some(ms) = millis(&lookup, "KEYBIND_REQUEST_TIMEOUT_MS")? {
            cfg.request_timeout = ms;
        }
        Ok(cfg)
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| ConfigError::Millis { var, value: raw })
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
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, ClientConfig::default());
        assert_eq!(cfg.ws_url.as_str(), "ws://127.0.0.1:9002/");
        assert_eq!(cfg.capture_timeout, Duration::from_secs(3));
    }

    #[test]
    fn env_overrides() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("KEYBIND_WS_URL", "ws://10.0.0.2:7000"),
            ("KEYBIND_CAPTURE_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(cfg.ws_url.port(), Some(7000));
        assert_eq!(cfg.capture_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.request_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = ClientConfig::from_lookup(lookup(&[("KEYBIND_REQUEST_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("KEYBIND_REQUEST_TIMEOUT_MS"));
        assert!(ClientConfig::from_lookup(lookup(&[("KEYBIND_WS_URL", "not a url")])).is_err());
    }
}
