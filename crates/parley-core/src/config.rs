use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the Parley service.
///
/// Loaded from `~/.parley/config.toml` by default. Each section corresponds
/// to one crate or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and the API token.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// How the debounce window reacts to arrivals while a key is waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceMode {
    /// Window measured from the first fragment of a burst; never extended.
    #[default]
    Fixed,
    /// Window re-armed on every arrival, capped at `max_wait_ms` from the
    /// first fragment.
    Sliding,
}

/// Per-conversation batching queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Debounce window in milliseconds.
    pub window_ms: u64,
    pub mode: DebounceMode,
    /// Upper bound on a sliding window, measured from the first fragment.
    pub max_wait_ms: u64,
    /// Separator placed between adjacent text fragments.
    pub text_separator: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            mode: DebounceMode::Fixed,
            max_wait_ms: 15_000,
            text_separator: ", ".to_string(),
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for protected routes. Generated and persisted in the
    /// data directory when empty.
    pub api_token: String,
    /// Global request body limit in bytes (inbound images travel as base64).
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            api_token: String::new(),
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Recipients of failure reports and escalation alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Phones that receive infrastructure and run failure reports.
    pub support_recipients: Vec<String>,
    /// Phones (or JIDs) of human agents. They are alerted when a user gets
    /// no reply, and their own messages are treated as admin commands.
    pub attention_agents: Vec<String>,
}

/// Assistant-facing behaviour of the batch processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Reply sent when a run stops waiting on an action it cannot complete.
    pub requires_action_reply: String,
    /// Initial system instructions for the assistant.
    pub instructions: String,
    /// Rewrite the `Fecha actual [...]` line of the instructions every local
    /// midnight.
    pub date_refresh: bool,
    /// Offset of the assistant's local time from UTC, in minutes. Defaults
    /// to Caracas (UTC-4).
    pub utc_offset_minutes: i32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            requires_action_reply:
                "I need to perform an additional action that is not available yet.".to_string(),
            instructions: String::new(),
            date_refresh: true,
            utc_offset_minutes: -240,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ParleyConfig::default();
        assert_eq!(config.general.data_dir, "~/.parley/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.queue.window_ms, 5_000);
        assert_eq!(config.queue.mode, DebounceMode::Fixed);
        assert_eq!(config.queue.max_wait_ms, 15_000);
        assert_eq!(config.queue.text_separator, ", ");
        assert_eq!(config.api.port, 3000);
        assert!(config.api.api_token.is_empty());
        assert!(config.alerts.support_recipients.is_empty());
        assert!(config.alerts.attention_agents.is_empty());
        assert!(!config.assistant.requires_action_reply.is_empty());
        assert!(config.assistant.date_refresh);
        assert_eq!(config.assistant.utc_offset_minutes, -240);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/var/lib/parley"
log_level = "debug"

[queue]
window_ms = 2500
mode = "sliding"
max_wait_ms = 9000
text_separator = " / "

[api]
host = "0.0.0.0"
port = 8080
api_token = "secret"

[alerts]
support_recipients = ["573000000000"]
attention_agents = ["584240000000", "584120000000@c.us"]

[assistant]
instructions = "Fecha actual []"
date_refresh = false
utc_offset_minutes = -300
"#;
        let file = create_temp_config(content);
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/var/lib/parley");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.queue.window_ms, 2500);
        assert_eq!(config.queue.mode, DebounceMode::Sliding);
        assert_eq!(config.queue.max_wait_ms, 9000);
        assert_eq!(config.queue.text_separator, " / ");
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.api.api_token, "secret");
        assert_eq!(config.alerts.support_recipients, vec!["573000000000"]);
        assert_eq!(config.alerts.attention_agents.len(), 2);
        assert_eq!(config.assistant.instructions, "Fecha actual []");
        assert!(!config.assistant.date_refresh);
        assert_eq!(config.assistant.utc_offset_minutes, -300);
        assert!(!config.assistant.requires_action_reply.is_empty());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let file = create_temp_config("[queue]\nwindow_ms = 1000\n");
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.queue.window_ms, 1000);
        // Remaining fields use defaults
        assert_eq!(config.queue.mode, DebounceMode::Fixed);
        assert_eq!(config.queue.text_separator, ", ");
        assert_eq!(config.api.port, 3000);
    }

    #[test]
    fn test_load_invalid_mode_is_error() {
        let file = create_temp_config("[queue]\nmode = \"random\"\n");
        assert!(ParleyConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ParleyConfig::load_or_default(Path::new("/nonexistent/parley.toml"));
        assert_eq!(config.general.data_dir, "~/.parley/data");
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(ParleyConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = ParleyConfig::default();
        config.queue.window_ms = 750;
        config.alerts.attention_agents = vec!["584240000000".to_string()];
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = ParleyConfig::load(&path).unwrap();
        assert_eq!(reloaded.queue.window_ms, 750);
        assert_eq!(reloaded.alerts.attention_agents, vec!["584240000000"]);
    }

    #[test]
    fn test_config_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.queue.window_ms, 5_000);
        assert_eq!(config.api.max_body_bytes, 16 * 1024 * 1024);
    }
}
