use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DEFAULT_PROFILE_PATH: &str = "data/profil.json";
pub const DEFAULT_MODEL_NAME: &str = "ibm-granite";
pub const DEFAULT_MODEL_ID: &str = "ibm-granite/granite-3.3-8b-instruct";
pub const DEFAULT_INPUT_KEY: &str = "prompt";
pub const DEFAULT_USERNAME: &str = "anonymous";

fn default_input_key() -> String {
    DEFAULT_INPUT_KEY.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_input_key")]
    pub input_key: String,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>, input_key: impl Into<String>) -> Self {
        ModelConfig {
            id: id.into(),
            input_key: input_key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub save_path: String,
    pub active_model: String,
    #[serde(default)]
    pub models: IndexMap<String, ModelConfig>,
}

impl Default for Profile {
    fn default() -> Self {
        let save_path = std::env::current_dir()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| ".".to_string());

        let mut models = IndexMap::new();
        models.insert(
            DEFAULT_MODEL_NAME.to_string(),
            ModelConfig::new(DEFAULT_MODEL_ID, DEFAULT_INPUT_KEY),
        );

        Profile {
            username: DEFAULT_USERNAME.to_string(),
            save_path,
            active_model: DEFAULT_MODEL_NAME.to_string(),
            models,
        }
    }
}

impl Profile {
    pub fn active_model_config(&self) -> Result<&ModelConfig> {
        self.models.get(&self.active_model).ok_or_else(|| {
            Error::Config(format!(
                "Configuration for active model '{}' not found.",
                self.active_model
            ))
        })
    }
}

/// Reads and writes the profile file plus the artifacts saved from AI replies.
/// Every write goes through a temp file in the destination directory that is
/// renamed over the target, so a crash never leaves a half-written file.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let extended = shellexpand::tilde(&path.into().to_string_lossy()).to_string();
        ProfileStore {
            path: PathBuf::from(extended),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing and malformed files both read as `None`, which starts the
    /// first-run flow.
    pub fn read(&self) -> Option<Profile> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "profile not found");
            return None;
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read profile");
                return None;
            }
        };

        match serde_json::from_str::<Profile>(&content) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring malformed profile");
                None
            }
        }
    }

    pub fn write(&self, profile: &Profile) -> Result<()> {
        let content = serde_json::to_string_pretty(profile)
            .map_err(|e| Error::persistence(&self.path, e.into()))?;
        write_atomic(&self.path, &content)?;
        tracing::info!(path = %self.path.display(), "profile saved");
        Ok(())
    }

    /// Deleting a profile that does not exist counts as success.
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "profile deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::persistence(&self.path, e)),
        }
    }

    pub fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        write_atomic(path, content)?;
        tracing::info!(path = %path.display(), bytes = content.len(), "file written");
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| Error::persistence(path, e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| Error::persistence(path, e))?;
    tmp.write_all(content.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| Error::persistence(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TEST_USER: &str = "alice";
    const TEST_MODEL: &str = "llama";
    const TEST_MODEL_ID: &str = "meta/meta-llama-3-8b-instruct";

    fn test_profile(save_path: &str) -> Profile {
        let mut profile = Profile {
            username: TEST_USER.to_string(),
            save_path: save_path.to_string(),
            ..Profile::default()
        };
        profile
            .models
            .insert(TEST_MODEL.to_string(), ModelConfig::new(TEST_MODEL_ID, "prompt"));
        profile
    }

    #[test]
    fn test_read_missing_profile() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profil.json"));
        assert!(store.read().is_none());
    }

    #[test]
    fn test_read_malformed_profile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profil.json");
        std::fs::write(&path, "{ \"username\": ").unwrap();
        assert!(ProfileStore::new(&path).read().is_none());
    }

    #[test]
    fn test_write_and_read_profile() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("data/profil.json"));
        let profile = test_profile("/tmp/out");

        store.write(&profile).unwrap();
        let loaded = store.read().unwrap();

        assert_eq!(loaded, profile);
        let names: Vec<&String> = loaded.models.keys().collect();
        assert_eq!(names, vec![DEFAULT_MODEL_NAME, TEST_MODEL]);
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profil.json"));
        store.write(&test_profile("/tmp")).unwrap();
        store.write(&test_profile("/var")).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.read().unwrap().save_path, "/var");
    }

    #[test]
    fn test_input_key_defaults_to_prompt() {
        let json = r#"{
            "username": "bob",
            "save_path": "/tmp",
            "active_model": "m",
            "models": { "m": { "id": "owner/model" } }
        }"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.models["m"].input_key, DEFAULT_INPUT_KEY);
    }

    #[test]
    fn test_delete_profile() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profil.json"));
        store.write(&test_profile("/tmp")).unwrap();

        store.delete().unwrap();
        assert!(!store.path().exists());
        // already gone
        store.delete().unwrap();
    }

    #[test]
    fn test_active_model_config() {
        let mut profile = test_profile("/tmp");
        assert_eq!(profile.active_model_config().unwrap().id, DEFAULT_MODEL_ID);

        profile.active_model = "ghost".to_string();
        let err = profile.active_model_config().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
