use mcp_supervisor::config::{Config, DeclarationSource, ServerConfig, SupervisorConfig, validate_config};
use mcp_supervisor::error::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;

#[test]
fn test_parse_declaration_source() -> Result<()> {
    let config_str = r#"{
        "mcpServers": {
            "weather": {
                "command": "uv",
                "args": ["--directory", "/srv/weather", "run", "weather.py"]
            },
            "github": {
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-github"],
                "env": {
                    "GITHUB_TOKEN": "your_token_here"
                }
            }
        }
    }"#;

    let config = Config::parse_from_str(config_str)?;

    assert_eq!(config.mcp_servers.len(), 2);

    let weather = &config.mcp_servers["weather"];
    assert_eq!(weather.command, "uv");
    assert_eq!(weather.directory_arg(), Some(PathBuf::from("/srv/weather")));
    assert_eq!(weather.script_path(), Some(PathBuf::from("/srv/weather/weather.py")));
    assert!(weather.env.is_empty());

    let github = &config.mcp_servers["github"];
    assert_eq!(github.script_path(), None);
    assert_eq!(
        github.env.get("GITHUB_TOKEN"),
        Some(&"your_token_here".to_string())
    );

    Ok(())
}

#[test]
fn test_absolute_script_ignores_directory() {
    let entry = ServerConfig {
        command: "python".to_string(),
        args: vec![
            "--directory".to_string(),
            "/srv/a".to_string(),
            "/opt/b/server.py".to_string(),
        ],
        env: HashMap::new(),
    };

    assert_eq!(entry.script_path(), Some(PathBuf::from("/opt/b/server.py")));
}

#[test]
fn test_missing_servers_key_is_empty() -> Result<()> {
    let config = Config::parse_from_str(r#"{ "theme": "dark" }"#)?;
    assert!(config.mcp_servers.is_empty());
    Ok(())
}

#[test]
fn test_malformed_declaration_is_parse_error() {
    let result = Config::parse_from_str("{ not json");
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_supervisor_config_defaults() -> Result<()> {
    let config = SupervisorConfig::parse_json("{}")?;

    assert_eq!(config.per_server_log_cap, 10);
    assert_eq!(config.global_log_cap, 100);
    assert_eq!(config.log_buffer_capacity, 1000);
    assert_eq!(config.stop_timeout_ms, 5000);
    assert_eq!(config.default_launcher.program, "uv");
    assert!(config.sweep_matching_on_stop);
    validate_config(&config)?;

    Ok(())
}

#[test]
fn test_supervisor_config_from_yaml_file() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("supervisor.yaml");
    std::fs::write(
        &path,
        r#"
config_dir: /tmp/sup/config
log_dir: /tmp/sup/logs
per_server_log_cap: 3
worker_process_names: []
declaration_sources:
  - label: cursor
    path: /home/me/.cursor/mcp.json
"#,
    )
    .unwrap();

    let config = SupervisorConfig::from_file(&path)?;

    assert_eq!(config.per_server_log_cap, 3);
    assert_eq!(config.registry_file(), PathBuf::from("/tmp/sup/config/servers.json"));
    assert!(config.worker_process_names.is_empty());
    assert_eq!(
        config.declaration_sources,
        vec![DeclarationSource::new("cursor", "/home/me/.cursor/mcp.json")]
    );

    Ok(())
}

#[test]
fn test_invalid_supervisor_config() {
    let mut config = SupervisorConfig::rooted_at("/tmp/sup");
    config.stop_poll_interval_ms = 0;
    assert!(matches!(validate_config(&config), Err(Error::ConfigInvalid(_))));
}
