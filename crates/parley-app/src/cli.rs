//! Command line arguments.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::Parser;

/// Parley - debounced per-conversation message batching for chat assistants.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database and the API token.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Debounce window in milliseconds.
    #[arg(short = 'w', long = "window-ms")]
    pub window_ms: Option<u64>,
}

impl CliArgs {
    /// --config > PARLEY_CONFIG > ~/.parley/config.toml
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(path) = &self.config {
            return path.clone();
        }
        if let Ok(path) = std::env::var("PARLEY_CONFIG") {
            return PathBuf::from(path);
        }
        default_config_path()
    }

    /// --port > PARLEY_PORT > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(port) = self.port {
            return port;
        }
        std::env::var("PARLEY_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(config_port)
    }

    pub fn resolve_data_dir(&self, config_dir: &str) -> String {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| config_dir.to_string())
    }

    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    pub fn resolve_window_ms(&self, config_window_ms: u64) -> u64 {
        self.window_ms.unwrap_or(config_window_ms)
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".parley").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = CliArgs::parse_from([
            "parley",
            "--config",
            "/tmp/parley.toml",
            "--port",
            "8080",
            "--data-dir",
            "/var/lib/parley",
            "--log-level",
            "debug",
            "--window-ms",
            "2500",
        ]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/parley.toml"));
        assert_eq!(args.resolve_port(3000), 8080);
        assert_eq!(args.resolve_data_dir("~/.parley/data"), "/var/lib/parley");
        assert_eq!(args.resolve_log_level("info"), "debug");
        assert_eq!(args.resolve_window_ms(5_000), 2_500);
    }

    #[test]
    fn test_config_values_without_flags() {
        let args = CliArgs::parse_from(["parley"]);
        assert_eq!(args.resolve_data_dir("/data"), "/data");
        assert_eq!(args.resolve_log_level("warn"), "warn");
        assert_eq!(args.resolve_window_ms(5_000), 5_000);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = home_dir() {
            assert_eq!(expand_home("~/.parley/data"), home.join(".parley/data"));
        }
    }
}
