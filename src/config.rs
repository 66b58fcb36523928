use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub typesense_url: String,
    pub typesense_api_key: String,
    pub typesense_timeout_secs: u64,
    pub session_ttl_secs: u64,
    pub search_debounce_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            typesense_url: std::env::var("TYPESENSE_URL")
                .unwrap_or_else(|_| "http://localhost:8108".to_string())
                .trim_end_matches('/')
                .to_string(),
            typesense_api_key: std::env::var("TYPESENSE_API_KEY")
                .map_err(|_| anyhow::anyhow!("TYPESENSE_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("TYPESENSE_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            typesense_timeout_secs: parse_positive("TYPESENSE_TIMEOUT_SECS", 2)?,
            session_ttl_secs: parse_positive("SESSION_TTL_SECS", 1800)?,
            search_debounce_ms: parse_positive("SEARCH_DEBOUNCE_MS", 300)?,
        };

        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Typesense URL: {}", config.typesense_url);
        tracing::debug!("Typesense timeout: {}s", config.typesense_timeout_secs);
        tracing::debug!("Session TTL: {}s", config.session_ttl_secs);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Config pointing at an index, with defaults for everything else.
    pub fn for_index(typesense_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            port: 3000,
            typesense_url: typesense_url.into(),
            typesense_api_key: api_key.into(),
            typesense_timeout_secs: 2,
            session_ttl_secs: 1800,
            search_debounce_ms: 300,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let parsed = url::Url::parse(&self.typesense_url)
            .map_err(|e| anyhow::anyhow!("TYPESENSE_URL is not a valid URL: {}", e))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("TYPESENSE_URL must start with http:// or https://");
        }
        if self.typesense_api_key.trim().is_empty() {
            anyhow::bail!("TYPESENSE_API_KEY cannot be empty");
        }
        Ok(())
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.typesense_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

fn parse_positive(var: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value: u64 = raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{} must be a positive integer", var))?;
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", var);
            }
            Ok(value)
        }
        _ => Ok(default),
    }
}
