pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod periods;
pub mod query;
pub mod telemetry;
pub mod time;

use crate::{
    config::AppConfig,
    error::ServiceError,
    query::{translate_request, DrilldownEngine, ExecuteRequest, TranslateRequest},
};
use anyhow::Context;
use std::io::Read;
use tracing::info;

/// Reads one JSON request from stdin and writes the JSON answer to stdout.
///
/// Without `--execute` the request is only translated to SQL; with it the
/// statements run against the stores configured through `DRILLDOWN_*`.
pub async fn run() -> anyhow::Result<()> {
    let execute = std::env::args().skip(1).any(|arg| arg == "--execute");

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;

    let output = if execute {
        let config = AppConfig::from_env()?;
        let engine = DrilldownEngine::connect(&config).await?;
        execute_json(&engine, &input).await
    } else {
        translate_json(&input)
    };

    match output {
        Ok(body) => {
            println!("{body}");
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string(&err.to_body())?);
            Err(anyhow::anyhow!("request failed with status {}", err.status_code()))
        }
    }
}

pub fn translate_json(input: &str) -> Result<String, ServiceError> {
    let request: TranslateRequest = parse_request(input)?;
    let response = translate_request(request)?;
    encode(&response)
}

pub async fn execute_json(engine: &DrilldownEngine, input: &str) -> Result<String, ServiceError> {
    let request: ExecuteRequest = parse_request(input)?;
    let response = engine.execute(request).await?;
    info!("request executed");
    encode(&response)
}

fn parse_request<T: serde::de::DeserializeOwned>(input: &str) -> Result<T, ServiceError> {
    serde_json::from_str(input)
        .map_err(|err| ServiceError::InvalidRequest(format!("invalid request: {err}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, ServiceError> {
    serde_json::to_string_pretty(value)
        .map_err(|err| ServiceError::Internal(anyhow::Error::new(err)))
}
