//! Settings of a tap session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_READ_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("read_timeout_ms must be positive")]
    ZeroTimeout,

    #[error("language must be 1 to 63 octets, got {0}")]
    InvalidLanguage(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the friend API, e.g. `https://api.tapp.club/`. No network calls without it.
    pub api_base_url: Option<Url>,

    /// How long a read waits for a tag before giving up.
    pub read_timeout_ms: u64,

    /// Language code written into the emulated Text record.
    pub language: String,

    /// When set, each tap is also recorded against this event.
    pub event_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            language: DEFAULT_LANGUAGE.to_string(),
            event_id: None,
        }
    }
}

impl Config {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.read_timeout_ms == 0 {
            return Err(Error::ZeroTimeout);
        }

        match self.language.len() {
            1..=63 => Ok(()),
            len => Err(Error::InvalidLanguage(len)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_missing_fields_with_defaults() {
        let config: Config = serde_json::from_str(r#"{"event_id":"event-9"}"#).unwrap();

        assert_eq!(Duration::from_secs(15), config.read_timeout());
        assert_eq!("en", config.language);
        assert_eq!(Some("event-9".to_string()), config.event_id);
        assert_eq!(None, config.api_base_url);
    }

    #[test]
    fn rejects_unusable_values() {
        let config = Config {
            read_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(Err(Error::ZeroTimeout), config.validate());

        let config = Config {
            language: String::new(),
            ..Default::default()
        };
        assert_eq!(Err(Error::InvalidLanguage(0)), config.validate());
    }
}
