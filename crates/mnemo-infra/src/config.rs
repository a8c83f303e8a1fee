//! Configuration loader for mnemo.
//!
//! Reads `config.toml` from the data directory (`~/.mnemo/` by default) and
//! deserializes it into [`MemoryConfig`]. Falls back to defaults when the file
//! is missing or malformed. Secrets may come from the environment instead of
//! the file.

use std::path::{Path, PathBuf};

use mnemo_types::config::MemoryConfig;

pub const DATA_DIR_ENV: &str = "MNEMO_DATA_DIR";
pub const EMBEDDING_API_KEY_ENV: &str = "MNEMO_EMBEDDING_API_KEY";
pub const LLM_API_KEY_ENV: &str = "MNEMO_LLM_API_KEY";

/// Data directory from `MNEMO_DATA_DIR`, falling back to `~/.mnemo`.
pub fn data_dir() -> PathBuf {
    match std::env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mnemo"),
    }
}

/// Load configuration from `{data_dir}/config.toml`, then apply environment
/// overrides.
pub async fn load_config(data_dir: &Path) -> MemoryConfig {
    let config = read_config_file(data_dir).await;
    apply_env_overrides(config, |name| std::env::var(name).ok())
}

async fn read_config_file(data_dir: &Path) -> MemoryConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return MemoryConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return MemoryConfig::default();
        }
    };

    match toml::from_str::<MemoryConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            MemoryConfig::default()
        }
    }
}

/// Replace API keys with non-empty values from `lookup`.
pub fn apply_env_overrides(
    mut config: MemoryConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> MemoryConfig {
    if let Some(key) = lookup(EMBEDDING_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
        config.embedding.api_key = key;
    }
    if let Some(key) = lookup(LLM_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
        config.extraction.api_key = key;
    }
    config
}

/// Vector index directory; relative paths resolve against `data_dir`.
pub fn vector_index_path(data_dir: &Path, config: &MemoryConfig) -> PathBuf {
    let path = Path::new(&config.vector_index.path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}
