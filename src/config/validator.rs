use crate::config::{ServerConfig, SupervisorConfig};
use crate::error::{Error, Result};
use crate::registry::ServerDefinition;

/// Validates a declared launch entry
pub fn validate_server_config(name: &str, config: &ServerConfig) -> Result<()> {
    if config.command.trim().is_empty() {
        return Err(Error::ConfigInvalid(format!("Server '{}' has empty command", name)));
    }

    Ok(())
}

/// Validates a server definition before it enters the registry
pub fn validate_definition(def: &ServerDefinition) -> Result<()> {
    if def.name.trim().is_empty() {
        return Err(Error::ConfigInvalid("Server name must not be empty".to_string()));
    }

    if def.script_path.as_os_str().is_empty() {
        return Err(Error::ConfigInvalid(format!(
            "Server '{}' has empty script path",
            def.name
        )));
    }

    if let Some(spec) = &def.original_launch_spec {
        if spec.command().trim().is_empty() {
            return Err(Error::ConfigInvalid(format!(
                "Server '{}' has empty launch command",
                def.name
            )));
        }
    }

    Ok(())
}

/// Full supervisor settings validation
pub fn validate_config(config: &SupervisorConfig) -> Result<()> {
    if config.per_server_log_cap == 0 || config.global_log_cap == 0 {
        return Err(Error::ConfigInvalid("Log caps must be at least 1".to_string()));
    }

    if config.log_buffer_capacity == 0 {
        return Err(Error::ConfigInvalid(
            "Log buffer capacity must be at least 1".to_string(),
        ));
    }

    if config.stop_poll_interval_ms == 0 || config.restart_poll_interval_ms == 0 {
        return Err(Error::ConfigInvalid("Poll intervals must be non-zero".to_string()));
    }

    if config.reconcile_interval_ms == 0 {
        return Err(Error::ConfigInvalid(
            "Reconcile interval must be non-zero".to_string(),
        ));
    }

    if config.default_launcher.program.trim().is_empty()
        && config.default_launcher.interpreter.is_none()
    {
        return Err(Error::ConfigInvalid(
            "Default launcher needs a program or an interpreter".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LaunchSpec;

    #[test]
    fn test_empty_name_rejected() {
        let def = ServerDefinition::new("  ", "/srv/demo/demo.py");
        assert!(matches!(validate_definition(&def), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn test_empty_launch_command_rejected() {
        let mut def = ServerDefinition::new("demo", "/srv/demo/demo.py");
        def.original_launch_spec = Some(LaunchSpec::new("", Vec::new()));
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_zero_caps_rejected() {
        let mut config = SupervisorConfig::rooted_at("/tmp/sup");
        assert!(validate_config(&config).is_ok());
        config.global_log_cap = 0;
        assert!(validate_config(&config).is_err());
    }
}
