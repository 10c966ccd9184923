//! Durable list of server definitions.
//!
//! The registry is the ground truth of what should exist. Every mutation
//! rewrites the registry file before returning, and on startup it merges in
//! servers declared by other MCP clients without overwriting local entries.
//!
//! # Examples
//!
//! ```no_run
//! use mcp_supervisor::registry::{Registry, ServerDefinition};
//!
//! let registry = Registry::open("/var/lib/mcp-supervisor/servers.json").unwrap();
//! registry.add(ServerDefinition::new("demo", "/srv/demo/demo.py")).unwrap();
//! assert!(registry.get("demo").is_some());
//! ```
mod definition;
mod store;

pub use definition::{DefinitionPatch, LaunchSpec, ServerDefinition};
pub use store::RegistryStore;

use crate::config::{Config, DeclarationSource, validator};
use crate::error::{Error, Result};
use crate::server::{ServerStatus, StatusChange};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Thread-safe, persisted collection of [`ServerDefinition`]s keyed by name.
pub struct Registry {
    store: RegistryStore,
    entries: Mutex<Vec<ServerDefinition>>,
}

impl Registry {
    /// Open the registry file at `path`, loading any persisted definitions.
    #[tracing::instrument(skip(path), fields(registry = ?path.as_ref()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = RegistryStore::new(path.as_ref());
        let entries = store.load()?;
        tracing::info!(num_servers = entries.len(), "Loaded registry");
        Ok(Self {
            store,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the persistence file.
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    fn entries(&self) -> Result<MutexGuard<'_, Vec<ServerDefinition>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Other("Failed to lock registry".to_string()))
    }

    /// Apply `mutate` to a copy of the list, persist it, then commit it.
    fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<ServerDefinition>) -> Result<T>,
    ) -> Result<T> {
        let mut entries = self.entries()?;
        let mut next = entries.clone();
        let out = mutate(&mut next)?;
        self.store.save(&next)?;
        *entries = next;
        Ok(out)
    }

    /// Register a new definition.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if the name is taken, `ConfigInvalid` if the definition
    /// is malformed, `Persistence` if the file could not be written.
    #[tracing::instrument(skip(self, def), fields(server = %def.name))]
    pub fn add(&self, def: ServerDefinition) -> Result<()> {
        validator::validate_definition(&def)?;
        self.commit(|entries| {
            if entries.iter().any(|e| e.name == def.name) {
                return Err(Error::DuplicateName(def.name.clone()));
            }
            entries.push(def);
            Ok(())
        })?;
        tracing::info!("Registered server");
        Ok(())
    }

    /// Delete a definition, returning it.
    ///
    /// A definition that is starting, running or stopping cannot be removed.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, name: &str) -> Result<ServerDefinition> {
        let removed = self.commit(|entries| {
            let index = entries
                .iter()
                .position(|e| e.name == name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            if entries[index].status.is_active() {
                return Err(Error::AlreadyRunning(name.to_string()));
            }
            Ok(entries.remove(index))
        })?;
        tracing::info!("Removed server");
        Ok(removed)
    }

    /// Apply a patch, returning the updated definition.
    ///
    /// Renaming is refused while the definition is active.
    #[tracing::instrument(skip(self, patch))]
    pub fn update(&self, name: &str, patch: DefinitionPatch) -> Result<ServerDefinition> {
        self.commit(|entries| {
            if let Some(new_name) = &patch.name {
                if new_name != name && entries.iter().any(|e| &e.name == new_name) {
                    return Err(Error::DuplicateName(new_name.clone()));
                }
            }

            let def = entries
                .iter_mut()
                .find(|e| e.name == name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;

            if def.status.is_active() && patch.name.as_deref().is_some_and(|n| n != name) {
                return Err(Error::AlreadyRunning(name.to_string()));
            }

            let mut updated = def.clone();
            patch.apply(&mut updated);
            validator::validate_definition(&updated)?;
            *def = updated.clone();
            Ok(updated)
        })
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Option<ServerDefinition> {
        self.entries()
            .ok()
            .and_then(|entries| entries.iter().find(|e| e.name == name).cloned())
    }

    /// All definitions, in registration order.
    pub fn list(&self) -> Vec<ServerDefinition> {
        self.entries().map(|e| e.clone()).unwrap_or_default()
    }

    /// Current status of a definition.
    pub fn status(&self, name: &str) -> Result<ServerStatus> {
        self.get(name)
            .map(|def| def.status)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Atomically decide and apply a status transition.
    ///
    /// `decide` sees the current status and returns the next one or an error
    /// rejecting the transition. The check and the write happen under one
    /// lock, so two callers can never both pass the same precondition.
    /// Returns the change when the status actually moved.
    pub fn transition(
        &self,
        name: &str,
        decide: impl FnOnce(ServerStatus) -> Result<ServerStatus>,
    ) -> Result<Option<StatusChange>> {
        let mut entries = self.entries()?;
        let def = entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let previous = def.status;
        let next = decide(previous)?;
        if next == previous {
            return Ok(None);
        }
        def.status = next;

        // Status is runtime state: a failed write is logged, not undone.
        if let Err(e) = self.store.save(&entries) {
            tracing::warn!(server = %name, error = %e, "Failed to persist status change");
        }

        Ok(Some(StatusChange::new(name, previous, next)))
    }

    /// Unconditionally set a status. Returns the change if it moved.
    pub fn set_status(&self, name: &str, status: ServerStatus) -> Result<Option<StatusChange>> {
        self.transition(name, |_| Ok(status))
    }

    /// Merge servers declared in external sources.
    ///
    /// Names already registered are left untouched. Entries without a
    /// recognisable script token are skipped. Unreadable sources are logged
    /// and skipped. Returns the names that were added.
    #[tracing::instrument(skip(self, sources), fields(num_sources = sources.len()))]
    pub fn import_declarations(&self, sources: &[DeclarationSource]) -> Result<Vec<String>> {
        let mut imported = Vec::new();

        self.commit(|entries| {
            for source in sources {
                if !source.path.exists() {
                    tracing::debug!(source = %source.label, path = %source.path.display(), "Declaration source not present");
                    continue;
                }

                let declared = match Config::from_file(&source.path) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!(source = %source.label, error = %e, "Skipping unreadable declaration source");
                        continue;
                    }
                };

                for (name, entry) in declared.mcp_servers {
                    if entries.iter().any(|e| e.name == name) {
                        continue;
                    }
                    if let Err(e) = validator::validate_server_config(&name, &entry) {
                        tracing::warn!(source = %source.label, error = %e, "Skipping declared server");
                        continue;
                    }
                    let Some(script_path) = entry.script_path() else {
                        tracing::debug!(source = %source.label, server = %name, "No script token in declared args");
                        continue;
                    };

                    let mut def = ServerDefinition::new(name.clone(), script_path);
                    if let Some(dir) = entry.directory_arg() {
                        def.working_directory = dir;
                    }
                    def.original_launch_spec = Some(LaunchSpec::declared(entry, &source.label));

                    tracing::info!(source = %source.label, server = %name, "Imported declared server");
                    entries.push(def);
                    imported.push(name);
                }
            }
            Ok(())
        })?;

        Ok(imported)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("path", &self.store.path())
            .finish_non_exhaustive()
    }
}
