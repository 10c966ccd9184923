use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Flag that introduces the project directory in `uv`-style launch arguments.
const DIRECTORY_FLAG: &str = "--directory";

/// A single server entry in an external declaration source.
///
/// Declaration sources are the JSON files other MCP clients (Cursor, Claude
/// Desktop) use to describe how to launch a server. This crate only reads them.
///
/// # Examples
///
/// ```
/// use mcp_supervisor::config::ServerConfig;
/// use std::collections::HashMap;
///
/// let server_config = ServerConfig {
///     command: "uv".to_string(),
///     args: vec![
///         "--directory".to_string(),
///         "/srv/demo".to_string(),
///         "run".to_string(),
///         "demo.py".to_string(),
///     ],
///     env: HashMap::new(),
/// };
///
/// assert_eq!(server_config.directory_arg(), Some("/srv/demo".into()));
/// assert_eq!(server_config.script_path(), Some("/srv/demo/demo.py".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Command to execute when starting the server.
    pub command: String,

    /// Command-line arguments to pass to the server.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set when launching the server.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    /// Returns the value following `--directory`, if present.
    pub fn directory_arg(&self) -> Option<PathBuf> {
        self.directory_index().map(|i| PathBuf::from(&self.args[i + 1]))
    }

    /// Returns the script this entry launches.
    ///
    /// The script is the last argument carrying a file extension that is not
    /// an option and not the value of `--directory`. A relative script is
    /// joined onto the `--directory` value when one is present.
    pub fn script_path(&self) -> Option<PathBuf> {
        let directory_value = self.directory_index().map(|i| i + 1);

        let script = self
            .args
            .iter()
            .enumerate()
            .rev()
            .filter(|(i, _)| Some(*i) != directory_value)
            .map(|(_, arg)| arg)
            .find(|arg| !arg.starts_with('-') && Path::new(arg.as_str()).extension().is_some())?;

        let script = PathBuf::from(script);
        match self.directory_arg() {
            Some(dir) if script.is_relative() => Some(dir.join(script)),
            _ => Some(script),
        }
    }

    fn directory_index(&self) -> Option<usize> {
        self.args
            .iter()
            .position(|arg| arg == DIRECTORY_FLAG)
            .filter(|i| i + 1 < self.args.len())
    }
}

/// Contents of an external declaration source.
///
/// # JSON Schema
///
/// ```json
/// {
///   "mcpServers": {
///     "demo": {
///       "command": "uv",
///       "args": ["--directory", "/srv/demo", "run", "demo.py"]
///     }
///   }
/// }
/// ```
///
/// Keys other than `mcpServers` are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Map of server names to their launch entries.
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
}

impl Config {
    /// Loads a declaration source from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a declaration source from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(args: &[&str]) -> ServerConfig {
        ServerConfig {
            command: "uv".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
        }
    }

    #[test]
    fn test_parse_claude_config() {
        let config_str = r#"{
            "mcpServers": {
                "demo": {
                    "command": "uv",
                    "args": ["--directory", "/srv/demo", "run", "demo.py"]
                }
            },
            "globalShortcut": "Ctrl+Space"
        }"#;

        let config = Config::parse_from_str(config_str).unwrap();

        assert_eq!(config.mcp_servers.len(), 1);
        let demo = &config.mcp_servers["demo"];
        assert_eq!(demo.command, "uv");
        assert!(demo.env.is_empty());
    }

    #[test]
    fn test_missing_servers_key_is_empty() {
        let config = Config::parse_from_str("{}").unwrap();
        assert!(config.mcp_servers.is_empty());
    }

    #[test]
    fn test_script_joined_onto_directory() {
        let config = entry(&["--directory", "/srv/demo", "run", "demo.py"]);
        assert_eq!(config.script_path(), Some(PathBuf::from("/srv/demo/demo.py")));
    }

    #[test]
    fn test_absolute_script_kept() {
        let config = entry(&["--directory", "/srv/demo", "run", "/opt/other/main.py"]);
        assert_eq!(config.script_path(), Some(PathBuf::from("/opt/other/main.py")));
    }

    #[test]
    fn test_dotted_directory_is_not_the_script() {
        let config = entry(&["run", "server.py", "--directory", "/srv/app.v2"]);
        assert_eq!(config.directory_arg(), Some(PathBuf::from("/srv/app.v2")));
        assert_eq!(config.script_path(), Some(PathBuf::from("/srv/app.v2/server.py")));
    }

    #[test]
    fn test_no_script_token() {
        let config = entry(&["-y", "@modelcontextprotocol/server-fetch"]);
        assert_eq!(config.script_path(), None);
        assert_eq!(config.directory_arg(), None);
    }

    #[test]
    fn test_dangling_directory_flag_ignored() {
        let config = entry(&["run", "demo.py", "--directory"]);
        assert_eq!(config.directory_arg(), None);
        assert_eq!(config.script_path(), Some(PathBuf::from("demo.py")));
    }
}
