use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::paths;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendConfig {
    Memory,
    Sqlite3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub workspace_dir: PathBuf,
    pub store_backend: StoreBackendConfig,
    pub schools_path: String,
    pub messages_path: String,
    pub notification_capacity: usize,
    // Per-class overrides on top of the built-in fee schedule.
    #[serde(default)]
    pub fees: BTreeMap<String, u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let base_dir = dirs::home_dir()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let workspace_dir = base_dir.join(".kursiyer");

        Self {
            workspace_dir,
            store_backend: StoreBackendConfig::Sqlite3,
            schools_path: "schools".to_string(),
            messages_path: "messages".to_string(),
            notification_capacity: 64,
            fees: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let workspace_dir = Self::default().workspace_dir;
        let config_path = paths::config_file(&workspace_dir);

        let mut builder = Config::builder()
            .set_default("workspace_dir", workspace_dir.to_string_lossy().as_ref())?
            .set_default("store_backend", "sqlite3")?
            .set_default("schools_path", "schools")?
            .set_default("messages_path", "messages")?
            .set_default("notification_capacity", 64)?;

        if config_path.exists() {
            builder = builder.add_source(File::from(config_path));
        }

        // KURSIYER_FEES__B=1200 overrides a single rate.
        builder = builder.add_source(
            Environment::with_prefix("KURSIYER")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }

    pub fn store_db_path(&self) -> PathBuf {
        paths::store_db(&self.workspace_dir)
    }
}
