use crate::config::EngineConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Environment variable prefix; nested keys use `__`, e.g.
/// `SKEW_ARB_ORDERBOOK__RESYNC_RETRY_DELAY_MS`.
pub const ENV_PREFIX: &str = "SKEW_ARB_";

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads engine configuration by merging defaults, TOML, environment variables, and JSON.
    ///
    /// The JSON file sits next to the TOML file with the same stem and only
    /// fills keys the other sources leave unset.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<EngineConfig> {
        Self::extract(Self::figment(path.as_ref()))
    }

    /// Loads engine configuration with a specific profile overlay (`Config.{profile}.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result fails validation.
    pub fn load_with_profile(path: impl AsRef<Path>, profile: &str) -> Result<EngineConfig> {
        let path = path.as_ref();
        let profile_path = path.with_file_name(format!("Config.{profile}.toml"));
        let figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path))
            .merge(Toml::file(profile_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file(path.with_extension("json")));
        Self::extract(figment)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file(path.with_extension("json")))
    }

    fn extract(figment: Figment) -> Result<EngineConfig> {
        let config: EngineConfig = figment
            .extract()
            .context("Failed to parse engine configuration")?;
        config.validate().context("Invalid engine configuration")?;
        Ok(config)
    }
}
