use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";
const STORE_DB_NAME_SQLITE: &str = "kursiyer.sqlite3";

pub fn config_file(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(CONFIG_FILE_NAME)
}

pub fn store_db(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(STORE_DB_NAME_SQLITE)
}
