use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, time::Duration};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub crm_database_url: String,
    pub max_pool_size: u32,
    pub pg_ssl_root_cert: Option<String>,
    pub pg_ssl_cert: Option<String>,
    pub pg_ssl_key: Option<String>,
    pub warehouse_url: String,
    pub warehouse_api_key: Option<String>,
    pub warehouse_timeout: Duration,
    /// Upper bound for each cross-store source before it is treated as empty.
    pub source_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    drilldown_crm_database_url: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    drilldown_max_pool_size: u32,
    #[serde(default)]
    pgsslrootcert: Option<String>,
    #[serde(default)]
    pgsslcert: Option<String>,
    #[serde(default)]
    pgsslkey: Option<String>,
    #[serde(default)]
    drilldown_warehouse_url: Option<String>,
    #[serde(default)]
    drilldown_warehouse_api_key: Option<String>,
    #[serde(default = "default_warehouse_timeout_secs")]
    drilldown_warehouse_timeout_secs: u64,
    #[serde(default = "default_source_timeout_ms")]
    drilldown_source_timeout_ms: u64,
}

const fn default_pool_size() -> u32 {
    10
}

const fn default_warehouse_timeout_secs() -> u64 {
    30
}

const fn default_source_timeout_ms() -> u64 {
    15_000
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse DRILLDOWN_* environment variables")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let crm_database_url = raw
            .drilldown_crm_database_url
            .or(raw.database_url)
            .or_else(|| env::var("DATABASE_URL").ok())
            .filter(|url| !url.trim().is_empty())
            .context("DRILLDOWN_CRM_DATABASE_URL or DATABASE_URL must be set")?;

        let warehouse_url = raw
            .drilldown_warehouse_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .context("DRILLDOWN_WAREHOUSE_URL must be set")?;

        let warehouse_api_key = raw
            .drilldown_warehouse_api_key
            .filter(|key| !key.trim().is_empty());

        Ok(Self {
            crm_database_url,
            max_pool_size: raw.drilldown_max_pool_size.max(1),
            pg_ssl_root_cert: raw.pgsslrootcert,
            pg_ssl_cert: raw.pgsslcert,
            pg_ssl_key: raw.pgsslkey,
            warehouse_url,
            warehouse_api_key,
            warehouse_timeout: Duration::from_secs(raw.drilldown_warehouse_timeout_secs.max(1)),
            source_timeout: Duration::from_millis(raw.drilldown_source_timeout_ms.max(1)),
        })
    }
}
