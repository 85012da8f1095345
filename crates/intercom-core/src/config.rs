use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;
use crate::playback::PlaybackMode;

pub const API_KEY_ENV: &str = "INTERCOM_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root of the downloaded music tree.  Scanned recursively.
    #[serde(default = "default_music_dir")]
    pub music_dir: PathBuf,
    /// Persisted playlist index (order and metadata overrides).
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Re-scan when the music directory changes on disk.
    #[serde(default = "default_watch")]
    pub watch: bool,
    #[serde(default = "default_rescan_debounce_ms")]
    pub rescan_debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_volume")]
    pub default_volume: u8,
    #[serde(default)]
    pub default_mode: PlaybackMode,
    /// "Previous" restarts the current track once playback is past this.
    #[serde(default = "default_restart_threshold_ms")]
    pub restart_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_station_id")]
    pub station_id: String,
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    #[serde(default = "default_station_volume")]
    pub default_volume: u8,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Refresh everything this many seconds before the current song ends.
    #[serde(default = "default_lookahead_secs")]
    pub lookahead_secs: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MpvConfig {
    /// Explicit mpv binary.  Falls back to the executable's directory, then PATH.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            music_dir: default_music_dir(),
            index_file: default_index_file(),
            extensions: default_extensions(),
            watch: default_watch(),
            rescan_debounce_ms: default_rescan_debounce_ms(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_player_volume(),
            default_mode: PlaybackMode::default(),
            restart_threshold_ms: default_restart_threshold_ms(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            station_id: default_station_id(),
            stream_url: default_stream_url(),
            default_volume: default_station_volume(),
            poll_interval_secs: default_poll_interval_secs(),
            history_limit: default_history_limit(),
            lookahead_secs: default_lookahead_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_music_dir() -> PathBuf {
    platform::data_dir().join("songs")
}

fn default_index_file() -> PathBuf {
    platform::data_dir().join("metadata").join("playlist.json")
}

fn default_extensions() -> Vec<String> {
    ["mp3", "flac", "wav", "ogg", "m4a"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_watch() -> bool {
    true
}

fn default_rescan_debounce_ms() -> u64 {
    1500
}

fn default_player_volume() -> u8 {
    crate::playback::DEFAULT_VOLUME
}

fn default_restart_threshold_ms() -> u64 {
    crate::playback::DEFAULT_RESTART_THRESHOLD_MS
}

fn default_base_url() -> String {
    "https://radio.eknm.in".to_string()
}

fn default_station_id() -> String {
    "eknm_intercom".to_string()
}

fn default_stream_url() -> String {
    "https://radio.eknm.in/listen/eknm_intercom/radio.mp3".to_string()
}

fn default_station_volume() -> u8 {
    75
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_history_limit() -> usize {
    5
}

fn default_lookahead_secs() -> u32 {
    10
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    "EKNMusic/1.0".to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Loads `path`, writing the defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

// ── credentials ───────────────────────────────────────────────────────────────

/// Station API key.  Kept out of `config.toml`; read from the environment
/// or from a private `credentials.toml` next to it.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            return Ok(Self::from_key(key));
        }
        Self::load_from(&Self::credentials_path())
    }

    /// Missing file means no key.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let creds: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self::from_key(creds.api_key.unwrap_or_default()))
    }

    /// Writes the file readable by the owner only.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)?;
            // mode() only applies on creation
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
            file.write_all(content.as_bytes())?;
        }
        #[cfg(not(unix))]
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn credentials_path() -> PathBuf {
        platform::config_dir().join("credentials.toml")
    }

    fn from_key(key: String) -> Self {
        let key = key.trim().to_string();
        Self {
            api_key: (!key.is_empty()).then_some(key),
        }
    }
}
