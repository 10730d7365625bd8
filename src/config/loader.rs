//! Configuration Loader
//!
//! Layers, lowest precedence first:
//!
//! 1. Built-in defaults (`ResilienceConfig::default()`)
//! 2. A TOML file: the explicit path when given, otherwise `resilient-cache.toml`
//!    in the working directory if it exists
//! 3. Environment variables, e.g. `RESILIENT_CACHE__REQUEST_TIMEOUT_MS=5000`
//!
//! The merged result is always validated before it is returned.

use super::error::{ConfigResult, ConfigurationError};
use super::ResilienceConfig;
use crate::constants::env;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Load configuration from an optional file plus the process environment
pub fn load_config(path: Option<&Path>) -> ConfigResult<ResilienceConfig> {
    build(path, None)
}

/// Load configuration from the default file location plus the process environment
pub fn load_config_from_env() -> ConfigResult<ResilienceConfig> {
    load_config(None)
}

/// Same as [`load_config`] but reads overrides from `vars` instead of the process
/// environment. Keys use the full variable name, e.g. `RESILIENT_CACHE__MAX_BATCH_SIZE`.
pub fn load_config_with_vars(
    path: Option<&Path>,
    vars: HashMap<String, String>,
) -> ConfigResult<ResilienceConfig> {
    build(path, Some(vars))
}

fn build(
    path: Option<&Path>,
    vars: Option<HashMap<String, String>>,
) -> ConfigResult<ResilienceConfig> {
    let mut builder = Config::builder();

    let file_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigurationError::LoadError(format!(
                    "configuration file not found: {}",
                    p.display()
                )));
            }
            Some(p.to_path_buf())
        }
        None => {
            let default_path = PathBuf::from(env::CONFIG_FILE);
            default_path.exists().then_some(default_path)
        }
    };

    if let Some(file_path) = &file_path {
        debug!(path = %file_path.display(), "Loading configuration file");
        builder = builder.add_source(File::from(file_path.as_path()).format(FileFormat::Toml));
    }

    builder = builder.add_source(
        Environment::with_prefix(env::CONFIG_PREFIX)
            .separator(env::CONFIG_SEPARATOR)
            .try_parsing(true)
            .source(vars),
    );

    let merged = builder.build()?;
    let config: ResilienceConfig = merged
        .try_deserialize()
        .map_err(|e| ConfigurationError::DeserializeError(e.to_string()))?;

    config.validate()?;

    info!(
        file = ?file_path,
        durable_cache = config.durable_cache_url.is_some(),
        request_timeout_ms = config.request_timeout_ms,
        circuit_failure_threshold = config.circuit_failure_threshold,
        "Configuration loaded successfully"
    );
    debug!(config = %config.sanitized(), "Effective configuration");

    Ok(config)
}
