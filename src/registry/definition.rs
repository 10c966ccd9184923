use crate::config::ServerConfig;
use crate::server::ServerStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A launch command captured verbatim from an external declaration source.
///
/// When present on a definition it is used as-is, so a server declared for
/// another MCP client starts exactly the way that client would start it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Command, arguments and environment.
    #[serde(flatten)]
    pub entry: ServerConfig,
    /// Label of the source the launch spec came from, if imported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl LaunchSpec {
    /// Create a spec with no environment and no source label.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            entry: ServerConfig {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
            source: None,
        }
    }

    /// Wrap a declared entry, remembering where it came from.
    pub fn declared(entry: ServerConfig, source: impl Into<String>) -> Self {
        Self {
            entry,
            source: Some(source.into()),
        }
    }

    pub fn command(&self) -> &str {
        &self.entry.command
    }

    pub fn args(&self) -> &[String] {
        &self.entry.args
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.entry.env
    }

    /// The `--directory` argument, which doubles as the working directory.
    pub fn directory(&self) -> Option<PathBuf> {
        self.entry.directory_arg()
    }

    /// Render as a single shell-like line for logs.
    pub fn display_line(&self) -> String {
        std::iter::once(self.entry.command.as_str())
            .chain(self.entry.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A registered worker: what should exist, independent of whether it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    /// Unique name, the registry's primary key.
    pub name: String,
    /// Absolute path of the entry-point script.
    pub script_path: PathBuf,
    /// Directory the worker runs in.
    pub working_directory: PathBuf,
    /// Port the worker listens on, if any.
    #[serde(default)]
    pub port: Option<u16>,
    /// Last known status.
    #[serde(default)]
    pub status: ServerStatus,
    /// Launch command captured from a declaration source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_launch_spec: Option<LaunchSpec>,
}

impl ServerDefinition {
    /// Create a stopped definition running in the script's directory.
    pub fn new(name: impl Into<String>, script_path: impl Into<PathBuf>) -> Self {
        let script_path = script_path.into();
        let working_directory = script_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            name: name.into(),
            script_path,
            working_directory,
            port: None,
            status: ServerStatus::Stopped,
            original_launch_spec: None,
        }
    }

    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_launch_spec(mut self, spec: LaunchSpec) -> Self {
        self.original_launch_spec = Some(spec);
        self
    }

    /// File name of the script, the token matched against process command lines.
    pub fn script_file_name(&self) -> Option<String> {
        self.script_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// A partial update applied by [`Registry::update`](crate::registry::Registry::update).
///
/// `None` leaves a field untouched. `port: Some(None)` clears the port.
#[derive(Debug, Clone, Default)]
pub struct DefinitionPatch {
    pub name: Option<String>,
    pub script_path: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub port: Option<Option<u16>>,
}

impl DefinitionPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, def: &mut ServerDefinition) {
        if let Some(name) = self.name {
            def.name = name;
        }
        if let Some(script_path) = self.script_path {
            def.script_path = script_path;
        }
        if let Some(dir) = self.working_directory {
            def.working_directory = dir;
        }
        if let Some(port) = self.port {
            def.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults_working_directory_to_script_dir() {
        let def = ServerDefinition::new("demo", "/srv/demo/demo.py");
        assert_eq!(def.working_directory, PathBuf::from("/srv/demo"));
        assert_eq!(def.status, ServerStatus::Stopped);
        assert_eq!(def.script_file_name().as_deref(), Some("demo.py"));
    }

    #[test]
    fn test_bare_script_runs_in_current_dir() {
        let def = ServerDefinition::new("demo", "demo.py");
        assert_eq!(def.working_directory, PathBuf::from("."));
    }

    #[test]
    fn test_launch_spec_serializes_flat() {
        let spec = LaunchSpec::new("uv", vec!["run".into(), "demo.py".into()]);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json, serde_json::json!({"command": "uv", "args": ["run", "demo.py"]}));
    }

    #[test]
    fn test_patch_clears_port() {
        let mut def = ServerDefinition::new("demo", "/srv/demo/demo.py").with_port(8000);
        DefinitionPatch {
            port: Some(None),
            ..DefinitionPatch::default()
        }
        .apply(&mut def);
        assert_eq!(def.port, None);
        assert_eq!(def.name, "demo");
    }
}
