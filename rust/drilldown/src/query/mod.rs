mod aggregate;
mod campaigns;
mod clauses;
mod detail;
pub mod registry;

pub use aggregate::build_query;
pub use campaigns::{
    CampaignMetrics, CampaignMetricsRequest, CampaignStatus, CrossStoreAggregator,
};
pub use clauses::{DEFAULT_LIMIT, MAX_LIMIT};
pub use detail::{build_detail_query, network_sources, DetailMetric, DetailQuery, DetailQueryOptions};
pub use registry::{SortDirection, UNKNOWN_SENTINEL};

use crate::{
    config::AppConfig,
    db,
    dialect::Dialect,
    error::{Result, ServiceError},
    executor::{PgExecutor, QueryExecutor, WarehouseExecutor},
    periods::{generate_periods, Granularity, TimePeriod},
    time::{DateRange, DATETIME_FORMAT},
};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum BindParam {
    Text(String),
    Int(i64),
    Date(NaiveDate),
    Timestamp(#[serde(serialize_with = "serialize_timestamp")] NaiveDateTime),
}

fn serialize_timestamp<S>(value: &NaiveDateTime, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&value.format(DATETIME_FORMAT))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<BindParam>,
    pub dialect: Dialect,
}

impl SqlQuery {
    /// Renders `?` markers for `dialect` and checks the bind arity.
    pub fn new(dialect: Dialect, sql: &str, params: Vec<BindParam>) -> Result<Self> {
        let sql = dialect.render(sql);
        let expected = dialect.placeholder_count(&sql);
        if expected != params.len() {
            error!(expected, collected = params.len(), "bind arity mismatch");
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "sql expects {expected} binds but {} were collected",
                params.len()
            )));
        }
        Ok(Self {
            sql,
            params,
            dialect,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Report {
    Ads,
    Crm,
    Onpage,
}

impl Report {
    pub fn store(self) -> Store {
        match self {
            Report::Ads => Store::Warehouse,
            Report::Crm | Report::Onpage => Store::Crm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Store {
    Crm,
    Warehouse,
}

impl Store {
    pub fn dialect(self) -> Dialect {
        match self {
            Store::Crm => Dialect::Numbered,
            Store::Warehouse => Dialect::Positional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFilter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub date_range: DateRange,
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub depth: usize,
    #[serde(default)]
    pub parent_filters: BTreeMap<String, String>,
    #[serde(default)]
    pub filters: Vec<TableFilter>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_direction: Option<SortDirection>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranslateRequest {
    Aggregate {
        report: Report,
        #[serde(flatten)]
        options: QueryOptions,
    },
    Detail {
        metric: String,
        #[serde(flatten)]
        options: DetailQueryOptions,
    },
    Periods {
        #[serde(rename = "dateRange")]
        date_range: DateRange,
        granularity: Granularity,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TranslateResponse {
    Aggregate(SqlQuery),
    Detail(DetailQuery),
    Periods(Vec<TimePeriod>),
}

pub fn translate_request(request: TranslateRequest) -> Result<TranslateResponse> {
    match request {
        TranslateRequest::Aggregate { report, options } => {
            build_query(report, &options).map(TranslateResponse::Aggregate)
        }
        TranslateRequest::Detail { metric, options } => {
            build_detail_query(&metric, &options).map(TranslateResponse::Detail)
        }
        TranslateRequest::Periods {
            date_range,
            granularity,
        } => generate_periods(&date_range, granularity).map(TranslateResponse::Periods),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecuteRequest {
    Aggregate {
        report: Report,
        #[serde(flatten)]
        options: QueryOptions,
    },
    Detail {
        metric: String,
        #[serde(flatten)]
        options: DetailQueryOptions,
    },
    Campaigns(CampaignMetricsRequest),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExecuteResponse {
    Rows { rows: Vec<Value> },
    Detail(DetailPage),
    Campaigns { campaigns: Vec<CampaignMetrics> },
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailPage {
    pub rows: Vec<Value>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Clone)]
pub struct DrilldownEngine {
    crm: Arc<dyn QueryExecutor>,
    warehouse: Arc<dyn QueryExecutor>,
    source_timeout: Duration,
}

impl DrilldownEngine {
    pub fn new(
        crm: Arc<dyn QueryExecutor>,
        warehouse: Arc<dyn QueryExecutor>,
        source_timeout: Duration,
    ) -> Self {
        Self {
            crm,
            warehouse,
            source_timeout,
        }
    }

    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect_pool(config).await?;
        let warehouse = WarehouseExecutor::new(config)?;
        info!(warehouse = %config.warehouse_url, "drill-down engine ready");
        Ok(Self::new(
            Arc::new(PgExecutor::new(pool)),
            Arc::new(warehouse),
            config.source_timeout,
        ))
    }

    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse> {
        match request {
            ExecuteRequest::Aggregate { report, options } => self
                .aggregate(report, &options)
                .await
                .map(|rows| ExecuteResponse::Rows { rows }),
            ExecuteRequest::Detail { metric, options } => self
                .detail(&metric, &options)
                .await
                .map(ExecuteResponse::Detail),
            ExecuteRequest::Campaigns(request) => self
                .campaign_metrics(&request)
                .await
                .map(|campaigns| ExecuteResponse::Campaigns { campaigns }),
        }
    }

    fn executor(&self, store: Store) -> &dyn QueryExecutor {
        match store {
            Store::Crm => self.crm.as_ref(),
            Store::Warehouse => self.warehouse.as_ref(),
        }
    }

    pub async fn aggregate(&self, report: Report, options: &QueryOptions) -> Result<Vec<Value>> {
        let query = build_query(report, options)?;
        self.executor(report.store())
            .fetch(&query)
            .await
            .map_err(|err| {
                error!(error = ?err, report = ?report, sql = %query.sql, "drill-down query failed");
                ServiceError::Internal(err)
            })
    }

    pub async fn detail(&self, metric: &str, options: &DetailQueryOptions) -> Result<DetailPage> {
        let detail = build_detail_query(metric, options)?;
        let executor = self.executor(Store::Crm);

        let (rows, count_rows) =
            tokio::try_join!(executor.fetch(&detail.query), executor.fetch(&detail.count))
                .map_err(|err| {
                    error!(error = ?err, metric, "detail query failed");
                    ServiceError::Internal(err)
                })?;

        let total = count_rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(count_value)
            .unwrap_or(0);

        Ok(DetailPage {
            rows,
            total,
            page: detail.page,
            page_size: detail.page_size,
        })
    }

    pub async fn campaign_metrics(
        &self,
        request: &CampaignMetricsRequest,
    ) -> Result<Vec<CampaignMetrics>> {
        CrossStoreAggregator::new(
            self.warehouse.clone(),
            self.crm.clone(),
            self.source_timeout,
        )
        .campaign_metrics(request, Local::now().date_naive())
        .await
    }
}

fn count_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(raw) => raw.parse().ok(),
        _ => None,
    }
}
