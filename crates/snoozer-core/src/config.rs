use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Storage key of the pending snooze array in the durable store.
pub const KEY_SNOOZED_TABS: &str = "snoozedTabs";
/// Storage key of the undo stack in the session store.
pub const KEY_UNDO_STACK: &str = "undoStack";
/// Storage key of the wakeup threshold in the session store.
pub const KEY_WAKEUP_THRESHOLD: &str = "wakeupThreshold";

pub const MAX_UNDO_DEPTH: usize = 10;
/// How far past "now" a wakeup pass claims responsibility for.
pub const WAKEUP_WINDOW_SECS: i64 = 60;
/// "Repeat last snooze" is ignored when the last snooze is older than this.
pub const REPEAT_SNOOZE_WINDOW_SECS: i64 = 10 * 60;

pub const DEFAULT_MAX_ITEM_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_DEBOUNCE_MS: u64 = 1_000;
pub const DEFAULT_RESUME_DELAY_SECS: u64 = 60;

/// Top-level config (snoozer.toml + SNOOZER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnoozerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub wakeup: WakeupConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Durable SQLite file holding the pending snoozes.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Session-scoped SQLite file (threshold, undo stack). Lives in the
    /// runtime dir so it is wiped when the login session ends.
    #[serde(default = "default_session_path")]
    pub session_path: String,
    /// Per-item quota; writes of larger values are rejected.
    #[serde(default = "default_max_item_bytes")]
    pub max_item_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            session_path: default_session_path(),
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeupConfig {
    /// Cooldown after a handled alarm during which further alarms are dropped.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Delay before the first wakeup after the system becomes active again.
    #[serde(default = "default_resume_delay_secs")]
    pub resume_delay_secs: u64,
    /// How often the daemon re-arms its alarm from storage, picking up
    /// snoozes written by other processes.
    #[serde(default = "default_resync_secs")]
    pub resync_secs: u64,
    /// A wall-clock jump larger than this between two ticks is treated as a
    /// system suspend.
    #[serde(default = "default_suspend_gap_secs")]
    pub suspend_gap_secs: u64,
}

impl Default for WakeupConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            resume_delay_secs: DEFAULT_RESUME_DELAY_SECS,
            resync_secs: default_resync_secs(),
            suspend_gap_secs: default_suspend_gap_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// How woken tabs are opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_browser_command")]
    pub command: String,
    /// Extra arguments placed before the URL.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            command: default_browser_command(),
            args: Vec::new(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_max_item_bytes() -> usize {
    DEFAULT_MAX_ITEM_BYTES
}
fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}
fn default_resume_delay_secs() -> u64 {
    DEFAULT_RESUME_DELAY_SECS
}
fn default_resync_secs() -> u64 {
    60
}
fn default_suspend_gap_secs() -> u64 {
    30
}
fn default_browser_command() -> String {
    "xdg-open".to_string()
}
fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}
fn default_db_path() -> String {
    format!("{}/.snoozer/snoozer.db", home_dir())
}
fn default_session_path() -> String {
    let runtime = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| std::env::temp_dir().to_string_lossy().into_owned());
    format!("{}/snoozer/session.db", runtime.trim_end_matches('/'))
}

impl SnoozerConfig {
    /// Load config from a TOML file with SNOOZER_* env var overrides.
    ///
    /// Uses the explicit path when given, otherwise ~/.snoozer/snoozer.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::SnoozerError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SNOOZER_").split("__"))
    }
}

fn default_config_path() -> String {
    format!("{}/.snoozer/snoozer.toml", home_dir())
}
