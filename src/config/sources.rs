use super::models::Config;
use config::{ConfigError, Environment, File, Map};
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_ENV_VAR: &str = "FETCHCORE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/fetchcore.toml";
const ENV_PREFIX: &str = "FETCHCORE";
const ENV_SEPARATOR: &str = "__";
const DOTENV_PATH: &str = ".env";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Variables from the `.env` file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    load_from_path(default_path())
}

/// Same layering as [`load`] with an explicit config file
pub fn load_from_path(config_path: PathBuf) -> Result<Config, ConfigError> {
    load_layers(config_path, Path::new(DOTENV_PATH))
}

/// Config file location: `FETCHCORE_CONFIG` or the default path
pub fn default_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from a specific path and the system environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    build(config_path, None)
}

/// Load configuration from a config file, a dotenv file and the system
/// environment. A missing dotenv file is skipped.
pub fn load_layers(config_path: PathBuf, dotenv_path: &Path) -> Result<Config, ConfigError> {
    let dotenv = read_dotenv(dotenv_path)?;
    build(config_path, dotenv)
}

fn read_dotenv(path: &Path) -> Result<Option<Map<String, String>>, ConfigError> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => return Ok(None),
        Err(e) => return Err(ConfigError::Foreign(Box::new(e))),
    };

    let mut vars = Map::new();
    for entry in entries {
        let (key, value) = entry.map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        vars.insert(key, value);
    }
    tracing::debug!(path = %path.display(), vars = vars.len(), "Loaded dotenv file");
    Ok(Some(vars))
}

fn environment() -> Environment {
    // FETCHCORE__CACHE__BACKEND -> cache.backend
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

fn build(config_path: PathBuf, dotenv: Option<Map<String, String>>) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Loading configuration");
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            path = %config_path.display(),
            "Configuration file not found, using defaults and environment overrides"
        );
    }

    if let Some(vars) = dotenv {
        builder = builder.add_source(environment().source(Some(vars)));
    }
    builder = builder.add_source(environment());

    builder.build()?.try_deserialize()
}
