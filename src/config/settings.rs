use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// An external declaration source the registry imports from on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationSource {
    /// Short label recorded on imported launch specs (e.g. `cursor`).
    pub label: String,
    /// Path of the JSON file.
    pub path: PathBuf,
}

impl DeclarationSource {
    /// Create a declaration source.
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }

    /// The declaration files of the MCP clients known on this platform.
    ///
    /// Cursor keeps `~/.cursor/mcp.json`; Claude Desktop keeps
    /// `claude_desktop_config.json` under the platform config directory.
    pub fn platform_defaults() -> Vec<Self> {
        let mut sources = Vec::new();
        if let Some(home) = dirs::home_dir() {
            sources.push(Self::new("cursor", home.join(".cursor").join("mcp.json")));
        }
        if let Some(config) = dirs::config_dir() {
            sources.push(Self::new(
                "claude",
                config.join("Claude").join("claude_desktop_config.json"),
            ));
        }
        sources
    }
}

/// Program used when a definition has no launch spec of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultLauncher {
    /// Runner program, invoked as `<program> --directory <dir> run <script>`.
    pub program: String,
    /// When set, launch as `<interpreter> <script path>` instead.
    pub interpreter: Option<String>,
}

impl Default for DefaultLauncher {
    fn default() -> Self {
        Self {
            program: "uv".to_string(),
            interpreter: None,
        }
    }
}

/// Settings for a [`Supervisor`](crate::Supervisor).
///
/// Every field has a default, so an empty JSON object is a valid config.
///
/// # Examples
///
/// ```
/// use mcp_supervisor::config::SupervisorConfig;
///
/// let config = SupervisorConfig::parse_json(r#"{ "per_server_log_cap": 3 }"#).unwrap();
/// assert_eq!(config.per_server_log_cap, 3);
/// assert_eq!(config.global_log_cap, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Directory holding `servers.json`.
    pub config_dir: PathBuf,
    /// Directory holding per-launch log files.
    pub log_dir: PathBuf,
    /// External declaration sources imported on startup.
    pub declaration_sources: Vec<DeclarationSource>,
    /// Log files retained per server.
    pub per_server_log_cap: usize,
    /// Log files retained across all servers.
    pub global_log_cap: usize,
    /// Captured output lines kept in memory per server.
    pub log_buffer_capacity: usize,
    /// Prefix captured lines with `[YYYY-mm-dd HH:MM:SS]`.
    pub timestamp_log_lines: bool,
    /// How long a graceful terminate may take before a forced kill.
    pub stop_timeout_ms: u64,
    /// How long to wait for processes to vanish after a forced kill.
    pub kill_grace_ms: u64,
    /// Liveness polling period while stopping.
    pub stop_poll_interval_ms: u64,
    /// Polls a restart makes waiting for the stop to land.
    pub restart_poll_attempts: u32,
    /// Period between those polls.
    pub restart_poll_interval_ms: u64,
    /// Period of the background reconciliation monitor.
    pub reconcile_interval_ms: u64,
    /// Case-insensitive process-name fragments that identify worker processes.
    /// Empty accepts every process with a command line.
    pub worker_process_names: Vec<String>,
    /// Also stop other processes running the same script when stopping.
    pub sweep_matching_on_stop: bool,
    /// Fallback launch command.
    pub default_launcher: DefaultLauncher,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mcp-supervisor");
        Self {
            config_dir: base.join("config"),
            log_dir: base.join("logs"),
            declaration_sources: DeclarationSource::platform_defaults(),
            per_server_log_cap: 10,
            global_log_cap: 100,
            log_buffer_capacity: 1000,
            timestamp_log_lines: true,
            stop_timeout_ms: 5000,
            kill_grace_ms: 1000,
            stop_poll_interval_ms: 100,
            restart_poll_attempts: 10,
            restart_poll_interval_ms: 500,
            reconcile_interval_ms: 5000,
            worker_process_names: vec!["python".to_string(), "uv".to_string()],
            sweep_matching_on_stop: true,
            default_launcher: DefaultLauncher::default(),
        }
    }
}

impl SupervisorConfig {
    /// Config rooted at `base`: `base/config`, `base/logs`, and no declaration sources.
    pub fn rooted_at(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            config_dir: base.join("config"),
            log_dir: base.join("logs"),
            declaration_sources: Vec::new(),
            ..Self::default()
        }
    }

    /// Loads settings from a `.json`, `.yaml` or `.yml` file.
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::parse_yaml(&content),
            _ => Self::parse_json(&content),
        }
    }

    /// Parses settings from a JSON string.
    pub fn parse_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Parses settings from a YAML string.
    pub fn parse_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
    }

    /// Path of the registry persistence file.
    pub fn registry_file(&self) -> PathBuf {
        self.config_dir.join("servers.json")
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    pub fn restart_poll_interval(&self) -> Duration {
        Duration::from_millis(self.restart_poll_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_overrides() {
        let config = SupervisorConfig::parse_yaml(
            "stop_timeout_ms: 250\nworker_process_names: []\ndefault_launcher:\n  interpreter: python3\n",
        )
        .unwrap();

        assert_eq!(config.stop_timeout(), Duration::from_millis(250));
        assert!(config.worker_process_names.is_empty());
        assert_eq!(config.default_launcher.program, "uv");
        assert_eq!(config.default_launcher.interpreter.as_deref(), Some("python3"));
    }

    #[test]
    fn test_rooted_at_has_no_sources() {
        let config = SupervisorConfig::rooted_at("/tmp/sup");
        assert!(config.declaration_sources.is_empty());
        assert_eq!(config.registry_file(), PathBuf::from("/tmp/sup/config/servers.json"));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/sup/logs"));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = SupervisorConfig::parse_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
