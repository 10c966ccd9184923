//! Configuration module for MCP Supervisor.
//!
//! Two kinds of configuration live here: the supervisor's own settings
//! ([`SupervisorConfig`]: directories, retention caps, timeouts) and the
//! external declaration sources other MCP clients write ([`Config`], a map
//! of server name to `{command, args, env}`), which the registry imports from.
//!
//! # Examples
//!
//! Loading supervisor settings from a file:
//!
//! ```no_run
//! use mcp_supervisor::config::SupervisorConfig;
//!
//! let config = SupervisorConfig::from_file("supervisor.yaml").unwrap();
//! println!("Logs go to {}", config.log_dir.display());
//! ```
//!
//! Reading a declaration source:
//!
//! ```no_run
//! use mcp_supervisor::config::Config;
//!
//! let declared = Config::from_file("/home/me/.cursor/mcp.json").unwrap();
//! for (name, entry) in &declared.mcp_servers {
//!     println!("{} -> {} {:?}", name, entry.command, entry.args);
//! }
//! ```
mod parser;
mod settings;
pub mod validator;

pub use parser::{Config, ServerConfig};
pub use settings::{DeclarationSource, DefaultLauncher, SupervisorConfig};
pub use validator::{validate_config, validate_definition};
