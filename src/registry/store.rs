use crate::error::{Error, Result};
use crate::registry::ServerDefinition;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// JSON-array file holding the full list of definitions.
///
/// Every save rewrites the whole list into a sibling temporary file and
/// renames it over the original, so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted list. A missing file is an empty registry.
    pub fn load(&self) -> Result<Vec<ServerDefinition>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            Error::Serialization(format!("Malformed registry {}: {}", self.path.display(), e))
        })
    }

    /// Persist the full list with write-then-replace.
    pub fn save(&self, definitions: &[ServerDefinition]) -> Result<()> {
        let json = serde_json::to_string_pretty(definitions)
            .map_err(|e| Error::Serialization(format!("Failed to encode registry: {}", e)))?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                Error::Persistence(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::Persistence(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("servers.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_creates_parent_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("servers.json");
        let store = RegistryStore::new(&path);

        let defs = vec![ServerDefinition::new("demo", "/srv/demo/demo.py").with_port(8000)];
        store.save(&defs).unwrap();

        assert_eq!(store.load().unwrap(), defs);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_malformed_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        fs::write(&path, "{ not an array").unwrap();

        let err = RegistryStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
