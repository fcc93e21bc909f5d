use std::time::Duration;

use reqwest::Url;

pub const DEFAULT_FEED_NAME: &str = "DataplaneSIPRegistr";
pub const DEFAULT_SOURCE_URL: &str = "https://dataplane.org/sipregistration.txt";
pub const DEFAULT_DESCRIPTION: &str = "Entries below consist of fields with identifying characteristics of a source IP address that has been seen initiating a SIP REGISTER operation to a remote host.";
pub const DEFAULT_FREQUENCY: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_DATABASE_URL: &str = "sqlite://dataplane-sip.db?mode=rwc";

pub const HEADER_LINES: usize = 64;
pub const FOOTER_LINES: usize = 5;

const ENV_FILE: &str = ".env.local";
const DATABASE_URL_VAR: &str = "DATAPLANE_SIP_DATABASE_URL";
const SOURCE_URL_VAR: &str = "DATAPLANE_SIP_SOURCE_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not a valid url: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedLayout {
    pub header_lines: usize,
    pub footer_lines: usize,
}

impl Default for FeedLayout {
    fn default() -> Self {
        Self {
            header_lines: HEADER_LINES,
            footer_lines: FOOTER_LINES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub source_url: String,
    pub description: String,
    pub frequency: Duration,
    pub layout: FeedLayout,
    pub max_retries: usize,
    pub request_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_FEED_NAME.to_string(),
            source_url: DEFAULT_SOURCE_URL.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            frequency: DEFAULT_FREQUENCY,
            layout: FeedLayout::default(),
            max_retries: 2,
            request_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub feed: FeedConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::from_filename(ENV_FILE);
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url =
            non_empty(DATABASE_URL_VAR).unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let mut feed = FeedConfig::default();
        if let Some(source_url) = non_empty(SOURCE_URL_VAR) {
            Url::parse(source_url.trim()).map_err(|error| ConfigError::InvalidUrl {
                var: SOURCE_URL_VAR,
                reason: error.to_string(),
            })?;
            feed.source_url = source_url.trim().to_string();
        }

        Ok(Self { database_url, feed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| values.get(key).cloned()
    }

    #[test]
    fn defaults_describe_the_dataplane_feed() {
        let config = AppConfig::from_lookup(|_| None).expect("defaults must load");

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.feed.name, "DataplaneSIPRegistr");
        assert_eq!(config.feed.source_url, "https://dataplane.org/sipregistration.txt");
        assert_eq!(config.feed.frequency, Duration::from_secs(7200));
        assert_eq!(config.feed.layout, FeedLayout { header_lines: 64, footer_lines: 5 });
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup_from(&[
            (DATABASE_URL_VAR, "sqlite::memory:"),
            (SOURCE_URL_VAR, " http://127.0.0.1:8080/sipregistration.txt "),
        ]))
        .expect("overrides must load");

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.feed.source_url, "http://127.0.0.1:8080/sipregistration.txt");
    }

    #[test]
    fn blank_override_falls_back_to_default() {
        let config = AppConfig::from_lookup(lookup_from(&[(DATABASE_URL_VAR, "  ")]))
            .expect("blank override must be ignored");
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
    }

    #[test]
    fn invalid_source_url_is_rejected() {
        let result = AppConfig::from_lookup(lookup_from(&[(SOURCE_URL_VAR, "not a url")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidUrl { var, .. }) if var == SOURCE_URL_VAR
        ));
    }
}
