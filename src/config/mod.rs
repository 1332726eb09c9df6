//! Configuration management and credential resolution.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Resolved endpoint and access token for the backing store.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Pipeline endpoint URL.
    pub url: String,
    /// Bearer token, if the endpoint requires one.
    pub token: Option<String>,
}

/// A pluggable external credential loader, consulted after the
/// environment and before well-known file locations.
pub trait CredentialSource: Send + Sync {
    /// Human-readable name, used in the exhaustion error.
    fn name(&self) -> &str;

    /// Attempts to resolve credentials; `None` falls through to the next
    /// source.
    fn resolve(&self) -> Option<Credentials>;
}

/// Main configuration for engram.
#[derive(Debug, Clone)]
pub struct EngramConfig {
    /// Resolved store credentials.
    pub credentials: Credentials,
    /// Maximum retries for transient remote failures.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    pub retry_base_delay_ms: u64,
    /// HTTP round-trip timeout in milliseconds.
    pub http_timeout_ms: u64,
    /// Per-write timeout used by `flush` in milliseconds.
    pub flush_timeout_ms: u64,
    /// Ranked searches returning fewer results than this trigger
    /// tag-based query expansion; zero disables expansion.
    pub expansion_threshold: usize,
}

impl EngramConfig {
    /// Loads configuration: `.env`, config file, environment overrides,
    /// then credential resolution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] when no source yields an endpoint.
    pub fn load() -> Result<Self> {
        Self::load_with_source(None)
    }

    /// Loads configuration with a pluggable credential source in the
    /// resolution chain.
    pub fn load_with_source(source: Option<&dyn CredentialSource>) -> Result<Self> {
        // Best-effort .env so local development picks up ENGRAM_* vars.
        let _ = dotenvy::dotenv();

        let file = ConfigFile::load_default();
        let credentials = resolve_credentials(source, file.as_ref())?;

        let mut config = Self {
            credentials,
            max_retries: 3,
            retry_base_delay_ms: 200,
            http_timeout_ms: 30_000,
            flush_timeout_ms: 5_000,
            expansion_threshold: 3,
        };
        if let Some(file) = file {
            if let Some(v) = file.max_retries {
                config.max_retries = v;
            }
            if let Some(v) = file.retry_base_delay_ms {
                config.retry_base_delay_ms = v;
            }
            if let Some(v) = file.http_timeout_ms {
                config.http_timeout_ms = v;
            }
            if let Some(v) = file.flush_timeout_ms {
                config.flush_timeout_ms = v;
            }
            if let Some(v) = file.expansion_threshold {
                config.expansion_threshold = v;
            }
        }
        Ok(config.with_env_overrides())
    }

    /// Creates a configuration from explicit credentials with default
    /// tuning.
    #[must_use]
    pub const fn from_credentials(credentials: Credentials) -> Self {
        Self {
            credentials,
            max_retries: 3,
            retry_base_delay_ms: 200,
            http_timeout_ms: 30_000,
            flush_timeout_ms: 5_000,
            expansion_threshold: 3,
        }
    }

    /// Applies environment variable overrides for the tuning knobs.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("ENGRAM_MAX_RETRIES") {
            if let Ok(parsed) = v.parse::<u32>() {
                self.max_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGRAM_RETRY_BASE_DELAY_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.retry_base_delay_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGRAM_HTTP_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.http_timeout_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGRAM_FLUSH_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.flush_timeout_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGRAM_EXPANSION_THRESHOLD") {
            if let Ok(parsed) = v.parse::<usize>() {
                self.expansion_threshold = parsed;
            }
        }
        self
    }

    /// Sets the expansion threshold.
    #[must_use]
    pub const fn with_expansion_threshold(mut self, threshold: usize) -> Self {
        self.expansion_threshold = threshold;
        self
    }

    /// Sets the per-write flush timeout.
    #[must_use]
    pub const fn with_flush_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.flush_timeout_ms = timeout_ms;
        self
    }
}

/// Resolves credentials through the prioritized source chain:
/// environment, pluggable loader, well-known config file, legacy
/// single-file fallback.
///
/// # Errors
///
/// Returns [`Error::Credentials`] listing every source checked when the
/// chain is exhausted.
pub fn resolve_credentials(
    source: Option<&dyn CredentialSource>,
    file: Option<&ConfigFile>,
) -> Result<Credentials> {
    let mut checked: Vec<String> = Vec::new();

    // 1. Explicit environment values.
    checked.push("environment (ENGRAM_DB_URL, ENGRAM_DB_TOKEN)".to_string());
    if let Ok(url) = std::env::var("ENGRAM_DB_URL") {
        if !url.trim().is_empty() {
            return Ok(Credentials {
                url,
                token: std::env::var("ENGRAM_DB_TOKEN").ok().filter(|t| !t.is_empty()),
            });
        }
    }

    // 2. Pluggable external loader.
    if let Some(source) = source {
        checked.push(format!("external source '{}'", source.name()));
        if let Some(credentials) = source.resolve() {
            return Ok(credentials);
        }
    }

    // 3. Well-known config file locations.
    checked.push("config file (~/.config/engram/config.toml)".to_string());
    if let Some(file) = file {
        if let Some(url) = file.url.clone().filter(|u| !u.trim().is_empty()) {
            return Ok(Credentials {
                url,
                token: file.token.clone(),
            });
        }
    }

    // 4. Legacy single-file fallback: first line URL, second line token.
    checked.push("legacy credentials file (~/.engram)".to_string());
    if let Some(credentials) = read_legacy_file() {
        return Ok(credentials);
    }

    Err(Error::Credentials(format!(
        "no store endpoint found; checked: {}",
        checked.join(", ")
    )))
}

fn read_legacy_file() -> Option<Credentials> {
    let base_dirs = directories::BaseDirs::new()?;
    let path = base_dirs.home_dir().join(".engram");
    let contents = std::fs::read_to_string(path).ok()?;
    let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());
    let url = lines.next()?.to_string();
    let token = lines.next().map(ToString::to_string);
    Some(Credentials { url, token })
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Store endpoint URL.
    pub url: Option<String>,
    /// Store access token.
    pub token: Option<String>,
    /// Maximum retries for transient failures.
    pub max_retries: Option<u32>,
    /// Base backoff delay in milliseconds.
    pub retry_base_delay_ms: Option<u64>,
    /// HTTP round-trip timeout in milliseconds.
    pub http_timeout_ms: Option<u64>,
    /// Per-write flush timeout in milliseconds.
    pub flush_timeout_ms: Option<u64>,
    /// Query-expansion result threshold.
    pub expansion_threshold: Option<usize>,
}

impl ConfigFile {
    /// Loads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the file cannot be read or
    /// parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidInput(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| Error::InvalidInput(format!("cannot parse {}: {e}", path.display())))
    }

    /// Loads from the default locations; `None` if no file exists.
    ///
    /// Checks the platform config dir first, then the XDG-style
    /// `~/.config/engram/` path for Unix compatibility.
    #[must_use]
    pub fn load_default() -> Option<Self> {
        let base_dirs = directories::BaseDirs::new()?;
        for path in [
            base_dirs.config_dir().join("engram").join("config.toml"),
            config_file_in(base_dirs.home_dir()),
        ] {
            if path.exists() {
                if let Ok(file) = Self::load_from(&path) {
                    return Some(file);
                }
            }
        }
        None
    }
}

fn config_file_in(home: &Path) -> PathBuf {
    home.join(".config").join("engram").join("config.toml")
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    struct FixedSource(Option<Credentials>);

    impl CredentialSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        fn resolve(&self) -> Option<Credentials> {
            self.0.clone()
        }
    }

    #[test]
    fn test_pluggable_source_resolves() {
        let source = FixedSource(Some(Credentials {
            url: "https://store.example/v2/pipeline".to_string(),
            token: Some("tok".to_string()),
        }));
        // Environment takes priority but is unset in tests for these keys.
        if std::env::var("ENGRAM_DB_URL").is_ok() {
            return;
        }
        let resolved = resolve_credentials(Some(&source), None);
        assert!(resolved.is_ok());
        assert_eq!(
            resolved.ok().map(|c| c.url),
            Some("https://store.example/v2/pipeline".to_string())
        );
    }

    #[test]
    fn test_exhausted_chain_names_sources() {
        if std::env::var("ENGRAM_DB_URL").is_ok() {
            return;
        }
        let source = FixedSource(None);
        let err = resolve_credentials(Some(&source), None);
        match err {
            Err(Error::Credentials(msg)) => {
                assert!(msg.contains("ENGRAM_DB_URL"));
                assert!(msg.contains("fixed"));
                assert!(msg.contains("config.toml"));
                assert!(msg.contains(".engram"));
            },
            other => panic!("expected Credentials error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_file_parse() {
        let parsed: ConfigFile = toml::from_str(
            r#"
url = "https://store.example/v2/pipeline"
token = "tok"
max_retries = 5
expansion_threshold = 0
"#,
        )
        .unwrap_or_default();
        assert_eq!(parsed.max_retries, Some(5));
        assert_eq!(parsed.expansion_threshold, Some(0));
        let resolved = resolve_credentials(None, Some(&parsed));
        if std::env::var("ENGRAM_DB_URL").is_err() {
            assert!(resolved.is_ok());
        }
    }
}
