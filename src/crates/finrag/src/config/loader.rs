//! Configuration loader with dual-location support
//!
//! Loads configuration from:
//! 1. Default values
//! 2. User-level config: ~/.finrag/finrag.toml
//! 3. Project-level config: ./.finrag/finrag.toml
//!
//! Files are merged table by table before deserializing, so a project file
//! that sets one key of a section keeps the user file's other keys.

use crate::config::schema::{finrag_home, FinragConfig};
use crate::error::{FinragError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const CONFIG_DIR: &str = ".finrag";
const CONFIG_FILE: &str = "finrag.toml";

/// Loads and merges the user and project configuration files
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
}

impl ConfigLoader {
    /// Loader for the standard locations
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self {
            user_config_path: finrag_home().ok().map(|home| home.join(CONFIG_FILE)),
            project_config_path: cwd.join(CONFIG_DIR).join(CONFIG_FILE),
        })
    }

    /// Loader reading explicit paths
    pub fn with_paths(user: Option<PathBuf>, project: PathBuf) -> Self {
        Self {
            user_config_path: user,
            project_config_path: project,
        }
    }

    /// Load configuration from both locations with project taking precedence
    pub async fn load(&self) -> Result<FinragConfig> {
        let mut merged = toml::Table::new();

        if let Some(user) = &self.user_config_path {
            if let Some(table) = read_table(user).await? {
                debug!(path = %user.display(), "Loaded user-level config");
                merge_tables(&mut merged, table);
            }
        }

        if let Some(table) = read_table(&self.project_config_path).await? {
            debug!(path = %self.project_config_path.display(), "Loaded project-level config");
            merge_tables(&mut merged, table);
        }

        let mut config: FinragConfig = toml::Value::Table(merged).try_into()?;
        config.resolve_env_vars();

        info!("Configuration loaded");
        Ok(config)
    }

    /// Load one file on top of the defaults
    pub async fn load_from_path(path: &Path) -> Result<FinragConfig> {
        let table = read_table(path).await?.ok_or_else(|| {
            FinragError::Config(format!("Config file not found: {}", path.display()))
        })?;
        let mut config: FinragConfig = toml::Value::Table(table).try_into()?;
        config.resolve_env_vars();
        Ok(config)
    }

    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }
}

/// Parse a TOML file, `None` when it does not exist
async fn read_table(path: &Path) -> Result<Option<toml::Table>> {
    if !fs::try_exists(path).await? {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| FinragError::Config(format!("Failed to read {}: {e}", path.display())))?;
    let table: toml::Table = content
        .parse()
        .map_err(|e| FinragError::Config(format!("Failed to parse {}: {e}", path.display())))?;
    Ok(Some(table))
}

/// Recursively merge `overlay` into `base`; overlay scalars and arrays win
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_files_give_defaults() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_paths(
            Some(dir.path().join("nope.toml")),
            dir.path().join("also-nope.toml"),
        );
        let config = loader.load().await.unwrap();
        assert_eq!(config, FinragConfig::default());
    }

    #[tokio::test]
    async fn test_project_overrides_user_per_key() {
        let dir = TempDir::new().unwrap();
        let user = write(
            &dir,
            "user.toml",
            "[retriever]\nhost = \"vectors.internal\"\nport = 9100\n[llm]\nmodel = \"user-model\"\n",
        )
        .await;
        let project = write(&dir, "project.toml", "[retriever]\nport = 9200\n").await;

        let config = ConfigLoader::with_paths(Some(user), project).load().await.unwrap();
        assert_eq!(config.retriever.host, "vectors.internal");
        assert_eq!(config.retriever.port, 9200);
        assert_eq!(config.llm.model, "user-model");
    }

    #[tokio::test]
    async fn test_invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let project = write(&dir, "bad.toml", "[limits\nmax = ").await;
        let err = ConfigLoader::with_paths(None, project).load().await.unwrap_err();
        assert!(matches!(err, FinragError::Config(_)));
    }

    #[tokio::test]
    async fn test_load_from_path_resolves_env() {
        std::env::set_var("FINRAG_LOADER_TEST_KEY", "sk-loader");
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "finrag.toml", "[llm]\napi_key = \"${FINRAG_LOADER_TEST_KEY}\"\n").await;
        let config = ConfigLoader::load_from_path(&path).await.unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-loader"));
    }

    #[test]
    fn test_merge_tables_is_recursive() {
        let mut base: toml::Table = "[a]\nx = 1\ny = 2\n".parse().unwrap();
        let overlay: toml::Table = "[a]\ny = 3\n[b]\nz = 4\n".parse().unwrap();
        merge_tables(&mut base, overlay);
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_integer(), Some(4));
    }
}
