use std::path::PathBuf;
use std::time::Duration;

use iroh::SecretKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

static DATA_DIR_NAME: &str = "quill";
static QUILL_DB_NAME: &str = "quill_db.sqlite";
static CONFIG_FILE_NAME: &str = "config.json";

// data_dir_path
// |- quill
//    |- quill_db.sqlite
//    |- config.json

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no data directory available on this platform")]
    NoDataDir,
    #[error("config io error")]
    Io(#[from] std::io::Error),
    #[error("malformed config file")]
    Json(#[from] serde_json::Error),
}

fn default_secret_key() -> SecretKey {
    SecretKey::generate(&mut rand::rng())
}

fn default_page_size() -> u64 {
    10
}

fn default_fragment_ttl_secs() -> u64 {
    20
}

#[derive(Serialize, Deserialize, Debug)]
pub struct QuillConfig {
    /// Secret key for the local node.
    #[serde(default = "default_secret_key")]
    pub(crate) secret_key: SecretKey,

    pub(crate) database_path: PathBuf,

    /// Posts per feed page.
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Lifetime of cached feed fragments, in seconds.
    #[serde(default = "default_fragment_ttl_secs")]
    pub fragment_ttl_secs: u64,

    /// Usernames that are granted staff rights when they sign up.
    #[serde(default)]
    pub staff_usernames: Vec<String>,
}

impl QuillConfig {
    /// Creates a new QuillConfig with a generated secret key and the specified data directory
    fn new(data_dir: PathBuf) -> Self {
        QuillConfig {
            secret_key: default_secret_key(),
            database_path: data_dir.join(QUILL_DB_NAME),
            page_size: default_page_size(),
            fragment_ttl_secs: default_fragment_ttl_secs(),
            staff_usernames: Vec::new(),
        }
    }

    pub fn fragment_ttl(&self) -> Duration {
        Duration::from_secs(self.fragment_ttl_secs)
    }
}

/// Gets the existing config or initializes a new one if it doesn't exist
pub async fn get_or_init() -> Result<QuillConfig, ConfigError> {
    let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
    get_or_init_in(data_dir.join(DATA_DIR_NAME)).await
}

/// Same as [`get_or_init`] but rooted at an explicit directory.
pub async fn get_or_init_in(quill_dir: PathBuf) -> Result<QuillConfig, ConfigError> {
    let config_path = quill_dir.join(CONFIG_FILE_NAME);

    fs::create_dir_all(&quill_dir).await?;

    if config_path.exists() {
        let mut file = fs::File::open(&config_path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        let config: QuillConfig = serde_json::from_str(&contents)?;
        tracing::debug!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else {
        let config = QuillConfig::new(quill_dir.clone());

        let json = serde_json::to_string_pretty(&config)?;
        let mut file = fs::File::create(&config_path).await?;
        file.write_all(json.as_bytes()).await?;

        tracing::info!(path = %config_path.display(), "wrote fresh config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("quill-config-{}", uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    async fn creates_then_reloads_config() {
        let dir = scratch_dir();

        let created = get_or_init_in(dir.clone()).await.unwrap();
        assert_eq!(created.page_size, 10);
        assert_eq!(created.fragment_ttl(), Duration::from_secs(20));
        assert_eq!(created.database_path, dir.join(QUILL_DB_NAME));

        let reloaded = get_or_init_in(dir.clone()).await.unwrap();
        assert_eq!(reloaded.secret_key.public(), created.secret_key.public());

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_keys_fall_back_to_defaults() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(
            dir.join(CONFIG_FILE_NAME),
            r#"{ "database_path": "/tmp/quill.sqlite", "page_size": 25 }"#,
        )
        .await
        .unwrap();

        let config = get_or_init_in(dir.clone()).await.unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.fragment_ttl_secs, 20);
        assert!(config.staff_usernames.is_empty());

        fs::remove_dir_all(&dir).await.unwrap();
    }
}
