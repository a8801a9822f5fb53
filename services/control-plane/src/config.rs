use anyhow::Result;

use crate::db::DbConfig;
use crate::pipelines::PipelinesConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_name: String,
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    pub pipelines: PipelinesConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server_name =
            std::env::var("STRATUS_SERVER_NAME").unwrap_or_else(|_| "stratus".to_string());

        let log_level = std::env::var("STRATUS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("STRATUS_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let database = DbConfig::from_env();

        let pipelines = PipelinesConfig::from_env()?;

        Ok(Self {
            server_name,
            log_level,
            dev_mode,
            database,
            pipelines,
        })
    }
}
