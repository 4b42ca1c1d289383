use serde::Deserialize;
use std::{fs, path::PathBuf, sync::OnceLock};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigLoadingError {
    #[error("Failed to read the config ({0}): {1}")]
    FailedToReadConfig(String, String),

    #[error("Failed to parse the config: {0}")]
    FailedToParseConfig(String),
}

impl From<toml::de::Error> for ConfigLoadingError {
    fn from(err: toml::de::Error) -> Self {
        Self::FailedToParseConfig(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sources: SourcesConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// Sources the scanner should crawl by default when the CLI is invoked
/// without an explicit `--source`; `library_sources` in the store remains
/// the authoritative list once `MigrateSources` has run once (spec §6.1).
#[derive(Debug, Deserialize)]
pub struct SourcesConfig {
    pub paths: Vec<PathBuf>,
}

/// Where the reconciler looks for completed transfer-daemon downloads and
/// where the import pipeline lands re-tagged files (spec §4.5, §6.3).
#[derive(Debug, Deserialize)]
pub struct TransferConfig {
    pub completed_root: PathBuf,
    pub library_root: PathBuf,
    #[serde(default = "default_folder_template")]
    pub folder_template: String,
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
}

fn default_folder_template() -> String {
    "{albumartist}/{year} \u{2022} {album}".to_string()
}

fn default_filename_template() -> String {
    "{artist} \u{2022} {album} \u{2022} {tracknumber} \u{b7} {title}".to_string()
}

impl Config {
    pub fn load() -> Result<Self, ConfigLoadingError> {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigLoadingError> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .map_err(|err| ConfigLoadingError::FailedToReadConfig(path.display().to_string(), err.to_string()))?;
        let config: Config = toml::from_str(&config_str)?;

        Ok(config)
    }
}

pub fn get_config() -> Result<&'static Config, ConfigLoadingError> {
    static CONFIG: OnceLock<Result<Config, ConfigLoadingError>> = OnceLock::new();

    let result = CONFIG.get_or_init(Config::load);

    match result {
        Ok(config) => Ok(config),
        Err(err) => Err(err.clone()),
    }
}
