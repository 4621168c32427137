//! Configuration types for download runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base URL of the media API.
pub const DEFAULT_API_BASE: &str = "https://api.gopro.com";

/// How the transfer host resolves a name collision at the destination path.
///
/// The policy is a single explicit choice; it is never left to a host
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Replace an existing file at the destination path.
    Overwrite,
    /// Keep the existing file and write to `name (N).ext` instead.
    Uniquify,
}

/// Configuration for a download run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Base URL of the media API.
    pub api_base: String,
    /// Bearer token applied to API requests, if the embedder has one.
    pub auth_token: Option<String>,
    /// Root directory that download folders are created under.
    pub download_root: PathBuf,
    /// Listing page size.
    pub page_size: u32,
    /// Byte tolerance when comparing an on-record size against item
    /// metadata (metadata and measured sizes skew by a few bytes).
    pub size_tolerance: u64,
    /// Collision handling for the primary file of each transfer.
    pub conflict_policy: ConflictPolicy,
    /// Transfer progress poll interval, in milliseconds.
    pub poll_interval_ms: u64,
    /// Delay before the next item after a dedup skip, in milliseconds.
    pub skip_delay_ms: u64,
    /// Delay between items after a transfer or failure, in milliseconds.
    pub item_delay_ms: u64,
    /// Path of the persisted state document. `None` uses
    /// `state_dir()/state.json`.
    pub state_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            auth_token: None,
            download_root: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            page_size: 100,
            size_tolerance: 1024,
            conflict_policy: ConflictPolicy::Overwrite,
            poll_interval_ms: 500,
            skip_delay_ms: 500,
            item_delay_ms: 2000,
            state_file: None,
        }
    }
}

impl RunConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Returns the directory where persisted state lives.
    ///
    /// Uses `STATE_DIRECTORY` (set by systemd when `StateDirectory=` is
    /// configured), falling back to `$XDG_DATA_HOME/hero-dl` for
    /// interactive use.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(state_dir) = std::env::var("STATE_DIRECTORY") {
            PathBuf::from(state_dir)
        } else {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("hero-dl")
        }
    }

    /// Returns the effective path of the persisted state document.
    #[must_use]
    pub fn state_file_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("state.json"))
    }

    /// Returns the transfer progress poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the delay applied after a dedup skip.
    #[must_use]
    pub const fn skip_delay(&self) -> Duration {
        Duration::from_millis(self.skip_delay_ms)
    }

    /// Returns the delay applied between items.
    #[must_use]
    pub const fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Sets the bearer token applied to API requests.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the root directory that download folders are created under.
    #[must_use]
    pub fn with_download_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.download_root = root.into();
        self
    }

    /// Sets the collision policy for transfer destinations.
    #[must_use]
    pub const fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the path of the persisted state document.
    #[must_use]
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RunConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.size_tolerance, 1024);
        assert_eq!(config.conflict_policy, ConflictPolicy::Overwrite);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.skip_delay(), Duration::from_millis(500));
        assert_eq!(config.item_delay(), Duration::from_millis(2000));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = RunConfig::new()
            .with_api_base("https://api.example.test")
            .with_auth_token("tok")
            .with_download_root("/tmp/media")
            .with_conflict_policy(ConflictPolicy::Uniquify)
            .with_state_file("/tmp/state.json");

        assert_eq!(config.api_base, "https://api.example.test");
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
        assert_eq!(config.download_root, PathBuf::from("/tmp/media"));
        assert_eq!(config.conflict_policy, ConflictPolicy::Uniquify);
        assert_eq!(config.state_file_path(), PathBuf::from("/tmp/state.json"));
    }

    #[test]
    fn config_serializes_to_toml() {
        let config = RunConfig::default().with_conflict_policy(ConflictPolicy::Uniquify);
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: RunConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.page_size, config.page_size);
        assert_eq!(deserialized.conflict_policy, ConflictPolicy::Uniquify);
        assert_eq!(deserialized.item_delay_ms, config.item_delay_ms);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hero-dl.toml");
        std::fs::write(&path, "page_size = 25\nconflict_policy = \"uniquify\"\n").unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.conflict_policy, ConflictPolicy::Uniquify);
        // Unspecified fields keep their defaults
        assert_eq!(config.size_tolerance, 1024);
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "page_size = \"not a number\"").unwrap();

        assert!(RunConfig::load(&path).is_err());
    }

    #[test]
    fn state_file_defaults_under_state_dir() {
        let config = RunConfig::default();
        let path = config.state_file_path();
        assert!(path.to_string_lossy().ends_with("state.json"));
    }
}
