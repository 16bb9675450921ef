//! Runs rendered statements against a backing store and returns JSON rows.

use crate::{
    config::AppConfig,
    db::CrmPool,
    dialect::Dialect,
    query::{BindParam, SqlQuery},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery as DieselSqlQuery};
use diesel::sql_query;
use diesel::sql_types::{Date, Int8, Jsonb, Nullable, Text, Timestamp};
use diesel::QueryableByName;
use diesel_async::RunQueryDsl;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch(&self, query: &SqlQuery) -> Result<Vec<Value>>;
}

fn ensure_dialect(query: &SqlQuery, expected: Dialect) -> Result<()> {
    if query.dialect != expected {
        anyhow::bail!(
            "statement rendered for {:?} sent to a {:?} store",
            query.dialect,
            expected
        );
    }
    Ok(())
}

impl BindParam {
    fn apply<'a>(
        &self,
        query: BoxedSqlQuery<'a, Pg, DieselSqlQuery>,
    ) -> BoxedSqlQuery<'a, Pg, DieselSqlQuery> {
        match self {
            BindParam::Text(value) => query.bind::<Text, _>(value.clone()),
            BindParam::Int(value) => query.bind::<Int8, _>(*value),
            BindParam::Date(value) => query.bind::<Date, _>(*value),
            BindParam::Timestamp(value) => query.bind::<Timestamp, _>(*value),
        }
    }
}

#[derive(QueryableByName)]
struct RowPayload {
    #[diesel(sql_type = Nullable<Jsonb>)]
    payload: Option<Value>,
}

/// CRM store. Rows come back as one `jsonb` payload per record.
#[derive(Clone)]
pub struct PgExecutor {
    pool: CrmPool,
}

impl PgExecutor {
    pub fn new(pool: CrmPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn fetch(&self, query: &SqlQuery) -> Result<Vec<Value>> {
        ensure_dialect(query, Dialect::Numbered)?;

        let wrapped = format!(
            "SELECT to_jsonb(q) AS payload FROM (\n{}\n) AS q",
            query.sql
        );
        let mut statement = sql_query(wrapped).into_boxed::<Pg>();
        for param in &query.params {
            statement = param.apply(statement);
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| anyhow::anyhow!("failed to acquire CRM connection: {err:?}"))?;
        let rows: Vec<RowPayload> = statement
            .load(&mut *conn)
            .await
            .context("CRM query failed")?;

        debug!(rows = rows.len(), "CRM query finished");
        Ok(rows.into_iter().filter_map(|row| row.payload).collect())
    }
}

/// Columnar warehouse behind its HTTP query gateway.
#[derive(Clone)]
pub struct WarehouseExecutor {
    client: Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct WarehouseRequest<'a> {
    query: &'a str,
    params: &'a [BindParam],
}

#[derive(Deserialize)]
struct WarehouseResponse {
    #[serde(default)]
    rows: Vec<Value>,
}

impl WarehouseExecutor {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.warehouse_timeout)
            .build()
            .context("failed to build warehouse HTTP client")?;

        Ok(Self {
            client,
            url: config.warehouse_url.clone(),
            api_key: config.warehouse_api_key.clone(),
        })
    }
}

#[async_trait]
impl QueryExecutor for WarehouseExecutor {
    async fn fetch(&self, query: &SqlQuery) -> Result<Vec<Value>> {
        ensure_dialect(query, Dialect::Positional)?;

        let mut request = self
            .client
            .post(format!("{}/query", self.url))
            .json(&WarehouseRequest {
                query: &query.sql,
                params: &query.params,
            });
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.context("warehouse request failed")?;
        if response.status() != StatusCode::OK {
            anyhow::bail!("warehouse returned status {}", response.status());
        }

        let body: WarehouseResponse = response
            .json()
            .await
            .context("failed to decode warehouse response")?;
        debug!(rows = body.rows.len(), "warehouse query finished");
        Ok(body.rows)
    }
}
