//! Relay Configuration
//!
//! Settings are layered, later layers winning:
//!
//! ```text
//! built-in defaults ─► config.toml ─► environment ─► CLI flags (daemon)
//! ```
//!
//! The TOML file lives at `<config dir>/sentence-relay/config.toml` unless a
//! path is given explicitly. Every key is optional:
//!
//! ```toml
//! [provider]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-3.5-turbo"
//! temperature = 0.7
//!
//! [session]
//! system_prompt = "You are a concise assistant."
//! viewer_channel_capacity = 64
//! ```
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY`: bearer token for the provider
//! - `RELAY_PROVIDER_URL`: provider base URL
//! - `RELAY_MODEL`: model name
//! - `RELAY_SYSTEM_PROMPT`: system prompt for new sessions
//! - `RELAY_VIEWER_CAPACITY`: per-viewer channel capacity

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default provider base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// System prompt given to every new session
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a general AI assistant. You are speaking with a human. Your goal is to be as helpful as possible similar to Siri, Alexa, or Google Assistant.";

/// Default limit on silence between response chunks
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 120;

/// Default provider connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default capacity of the provider chunk channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Default capacity of each viewer's frame channel
pub const DEFAULT_VIEWER_CHANNEL_CAPACITY: usize = 64;

/// Directory name under the platform config dir
const CONFIG_DIR_NAME: &str = "sentence-relay";

/// Configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Completion provider settings
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// Bearer token (usually from `OPENAI_API_KEY`)
    pub api_key: Option<String>,
    /// Model name sent with every request
    pub model: String,
    /// Sampling temperature; provider default when unset
    pub temperature: Option<f32>,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Longest silence allowed between response chunks, in seconds
    ///
    /// Bounds each read, not the whole stream, so long completions are fine.
    pub read_timeout_secs: u64,
    /// Capacity of the chunk channel between the HTTP task and the session
    pub channel_capacity: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

/// Per-session settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// System prompt that opens every new session's history
    pub system_prompt: String,
    /// Capacity of each viewer's frame channel
    pub viewer_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            viewer_channel_capacity: DEFAULT_VIEWER_CHANNEL_CAPACITY,
        }
    }
}

/// Complete relay configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Provider settings
    pub provider: ProviderConfig,
    /// Session settings
    pub session: SessionConfig,
}

impl RelayConfig {
    /// Apply overrides on top of this configuration
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref base_url) = overrides.base_url {
            self.provider.base_url.clone_from(base_url);
        }
        if let Some(ref api_key) = overrides.api_key {
            self.provider.api_key = Some(api_key.clone());
        }
        if let Some(ref model) = overrides.model {
            self.provider.model.clone_from(model);
        }
        if let Some(ref prompt) = overrides.system_prompt {
            self.session.system_prompt.clone_from(prompt);
        }
        if let Some(capacity) = overrides.viewer_channel_capacity {
            self.session.viewer_channel_capacity = capacity;
        }
    }

    /// Check that every value is usable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let provider = &self.provider;
        if !(provider.base_url.starts_with("http://") || provider.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "provider.base_url must be an http(s) URL, got {:?}",
                provider.base_url
            )));
        }
        if provider.model.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.model is empty".into()));
        }
        if let Some(temperature) = provider.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::Invalid(format!(
                    "provider.temperature must be within 0.0..=2.0, got {temperature}"
                )));
            }
        }
        if provider.connect_timeout_secs == 0 || provider.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "provider timeouts must be positive".into(),
            ));
        }
        if provider.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "provider.channel_capacity must be positive".into(),
            ));
        }
        if self.session.viewer_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session.viewer_channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Where the file layer came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// No file was read
    Defaults,
    /// Values were read from this file
    File(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defaults => f.write_str("built-in defaults"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Values that replace file settings (from the environment or CLI)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Provider base URL
    pub base_url: Option<String>,
    /// Provider API key
    pub api_key: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// System prompt for new sessions
    pub system_prompt: Option<String>,
    /// Per-viewer channel capacity
    pub viewer_channel_capacity: Option<usize>,
}

impl ConfigOverrides {
    /// Read overrides from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary variable lookup
    ///
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let viewer_channel_capacity = get("RELAY_VIEWER_CAPACITY").and_then(|v| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| {
                    tracing::warn!(value = %v, error = %e, "Ignoring invalid RELAY_VIEWER_CAPACITY");
                })
                .ok()
        });

        Self {
            base_url: get("RELAY_PROVIDER_URL"),
            api_key: get("OPENAI_API_KEY"),
            model: get("RELAY_MODEL"),
            system_prompt: get("RELAY_SYSTEM_PROMPT"),
            viewer_channel_capacity,
        }
    }
}

/// Default config file location
///
/// `None` when the platform has no config directory.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns `ConfigError::Io` if the file cannot be read (including when it
/// does not exist) and `ConfigError::Parse` if it is not valid.
pub fn load_config_from_path(path: &Path) -> Result<RelayConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the file and environment layers
///
/// With an explicit path the file must exist. Without one the default path
/// is used if a file is there, and built-in defaults otherwise.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the merged
/// configuration is invalid.
pub fn load_config(explicit: Option<&Path>) -> Result<(RelayConfig, ConfigSource), ConfigError> {
    load_config_with(explicit, default_config_path(), &ConfigOverrides::from_env())
}

fn load_config_with(
    explicit: Option<&Path>,
    default_path: Option<PathBuf>,
    overrides: &ConfigOverrides,
) -> Result<(RelayConfig, ConfigSource), ConfigError> {
    let (mut config, source) = match (explicit, default_path) {
        (Some(path), _) => (
            load_config_from_path(path)?,
            ConfigSource::File(path.to_path_buf()),
        ),
        (None, Some(path)) if path.is_file() => {
            let config = load_config_from_path(&path)?;
            (config, ConfigSource::File(path))
        }
        _ => (RelayConfig::default(), ConfigSource::Defaults),
    };

    config.apply(overrides);
    config.validate()?;

    tracing::debug!(source = %source, model = %config.provider.model, "Configuration loaded");
    Ok((config, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.provider.model, "gpt-3.5-turbo");
        assert_eq!(config.provider.connect_timeout_secs, 10);
        assert_eq!(config.provider.read_timeout_secs, 120);
        assert_eq!(config.session.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config("[provider]\nmodel = \"gpt-4o-mini\"\ntemperature = 0.3\n");

        let config = load_config_from_path(file.path()).unwrap();

        assert_eq!(config.provider.model, "gpt-4o-mini");
        assert_eq!(config.provider.temperature, Some(0.3));
        assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let file = write_config("[provider]\nmodle = \"typo\"\n");
        let result = load_config_from_path(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        let result = load_config_with(Some(&missing), None, &ConfigOverrides::default());

        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);

        let (config, source) =
            load_config_with(None, Some(default_path), &ConfigOverrides::default()).unwrap();

        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_default_file_is_read_when_present() {
        let file = write_config("[session]\nviewer_channel_capacity = 8\n");

        let (config, source) = load_config_with(
            None,
            Some(file.path().to_path_buf()),
            &ConfigOverrides::default(),
        )
        .unwrap();

        assert_eq!(source, ConfigSource::File(file.path().to_path_buf()));
        assert_eq!(config.session.viewer_channel_capacity, 8);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config("[provider]\nmodel = \"from-file\"\n");
        let env: HashMap<&str, &str> = HashMap::from([
            ("RELAY_MODEL", "from-env"),
            ("OPENAI_API_KEY", "sk-test"),
            ("RELAY_VIEWER_CAPACITY", "16"),
            ("RELAY_SYSTEM_PROMPT", ""),
        ]);
        let overrides = ConfigOverrides::from_lookup(|key| env.get(key).map(|v| (*v).to_string()));

        let (config, _) = load_config_with(Some(file.path()), None, &overrides).unwrap();

        assert_eq!(config.provider.model, "from-env");
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.session.viewer_channel_capacity, 16);
        // Empty values are ignored
        assert_eq!(config.session.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_invalid_capacity_override_is_ignored() {
        let overrides = ConfigOverrides::from_lookup(|key| {
            (key == "RELAY_VIEWER_CAPACITY").then(|| "lots".to_string())
        });
        assert_eq!(overrides.viewer_channel_capacity, None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = RelayConfig::default();
        config.provider.base_url = "ftp://example.com".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RelayConfig::default();
        config.provider.temperature = Some(3.5);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RelayConfig::default();
        config.session.viewer_channel_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RelayConfig::default();
        config.provider.model = "  ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let mut config = RelayConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_default_config_path_location() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("sentence-relay/config.toml"));
        }
    }
}
