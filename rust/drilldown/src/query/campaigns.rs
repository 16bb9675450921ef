//! Per-campaign performance merged from ad spend, CRM conversions and on-page engagement.
//!
//! The three sources are fetched concurrently. A source that errors, times
//! out or returns rows that do not decode is logged and treated as empty, so
//! the merged result degrades to whatever the healthy sources returned.

use super::{clauses, BindParam, SqlQuery, Store};
use crate::{
    error::{Result, ServiceError},
    executor::QueryExecutor,
    time::{parse_date, DateRange},
};
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, warn};

const ACTIVE_WITHIN_DAYS: i64 = 3;
const PAUSED_WITHIN_DAYS: i64 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignMetricsRequest {
    pub campaign_ids: Vec<String>,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Stopped,
}

impl CampaignStatus {
    pub fn from_last_active(last_active: Option<NaiveDate>, today: NaiveDate) -> Self {
        let Some(last_active) = last_active else {
            return CampaignStatus::Stopped;
        };
        let idle_days = (today - last_active).num_days();
        if idle_days <= ACTIVE_WITHIN_DAYS {
            CampaignStatus::Active
        } else if idle_days <= PAUSED_WITHIN_DAYS {
            CampaignStatus::Paused
        } else {
            CampaignStatus::Stopped
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpendPart {
    pub campaign_id: String,
    #[serde(default)]
    pub campaign_name: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub cost: f64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub clicks: i64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub impressions: i64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub conversions: i64,
    #[serde(default, deserialize_with = "lenient::date")]
    pub last_active_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CrmPart {
    #[serde(default)]
    pub tracking_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub is_approved: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub is_cancelled: bool,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngagementPart {
    pub campaign_id: String,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub sessions: i64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub page_views: i64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub form_starters: i64,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub avg_active_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignMetrics {
    pub campaign_id: String,
    pub campaign_name: Option<String>,
    pub network: Option<String>,
    pub status: CampaignStatus,
    pub last_active_date: Option<NaiveDate>,
    pub cost: f64,
    pub clicks: i64,
    pub impressions: i64,
    pub platform_conversions: i64,
    pub subscriptions: i64,
    pub approved: i64,
    pub cancelled: i64,
    pub revenue: f64,
    pub sessions: i64,
    pub page_views: i64,
    pub form_starters: i64,
    pub avg_active_time: f64,
    /// Cost per approved subscription; absent while nothing is approved.
    pub true_cpa: Option<f64>,
}

impl CampaignMetrics {
    fn empty(campaign_id: &str) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            campaign_name: None,
            network: None,
            status: CampaignStatus::Stopped,
            last_active_date: None,
            cost: 0.0,
            clicks: 0,
            impressions: 0,
            platform_conversions: 0,
            subscriptions: 0,
            approved: 0,
            cancelled: 0,
            revenue: 0.0,
            sessions: 0,
            page_views: 0,
            form_starters: 0,
            avg_active_time: 0.0,
            true_cpa: None,
        }
    }
}

pub fn spend_query(campaign_ids: &[String], range: &DateRange) -> Result<SqlQuery> {
    let ids = id_predicate("campaign_id", campaign_ids)?;
    let sql = format!(
        "SELECT campaign_id,\n       MAX(campaign_name) AS campaign_name,\n       MAX(network) AS network,\n       SUM(CASE WHEN in_range THEN cost ELSE 0 END) AS cost,\n       SUM(CASE WHEN in_range THEN clicks ELSE 0 END) AS clicks,\n       SUM(CASE WHEN in_range THEN impressions ELSE 0 END) AS impressions,\n       SUM(CASE WHEN in_range THEN conversions ELSE 0 END) AS conversions,\n       MAX(CASE WHEN cost > 0 THEN date END) AS last_active_date\nFROM (\n    SELECT campaign_id, campaign_name, network, cost, clicks, impressions, conversions, date,\n           date BETWEEN ? AND ? AS in_range\n    FROM ads_spend\n    WHERE {}\n) AS spend\nGROUP BY campaign_id",
        ids.sql
    );
    let params = clauses::assemble_params(
        [BindParam::Date(range.start), BindParam::Date(range.end)],
        &[ids],
        &[],
    );
    SqlQuery::new(Store::Warehouse.dialect(), &sql, params)
}

pub fn crm_query(range: &DateRange) -> Result<SqlQuery> {
    let sql = clauses::where_clause("date_create", &[], &[]);
    let sql = format!(
        "SELECT TRIM(tracking_id_campaign) AS tracking_id,\n       is_approved,\n       is_cancelled,\n       COALESCE(revenue, 0) AS revenue\nFROM crm_subscriptions{sql}"
    );
    let params = clauses::assemble_params(
        [
            BindParam::Timestamp(range.first_instant()),
            BindParam::Timestamp(range.last_instant()),
        ],
        &[],
        &[],
    );
    SqlQuery::new(Store::Crm.dialect(), &sql, params)
}

pub fn engagement_query(campaign_ids: &[String], range: &DateRange) -> Result<SqlQuery> {
    let ids = id_predicate("utm_campaign", campaign_ids)?;
    let sql = format!(
        "SELECT utm_campaign AS campaign_id,\n       COUNT(*) AS sessions,\n       COALESCE(SUM(page_views), 0) AS page_views,\n       COALESCE(SUM(form_starters), 0) AS form_starters,\n       COALESCE(AVG(active_time_s), 0) AS avg_active_time\nFROM page_sessions{}\nGROUP BY utm_campaign",
        clauses::where_clause("session_start", &[ids.clone()], &[])
    );
    let params = clauses::assemble_params(
        [
            BindParam::Timestamp(range.first_instant()),
            BindParam::Timestamp(range.last_instant()),
        ],
        &[ids],
        &[],
    );
    SqlQuery::new(Store::Crm.dialect(), &sql, params)
}

fn id_predicate(column: &str, campaign_ids: &[String]) -> Result<clauses::Predicate> {
    if campaign_ids.is_empty() {
        return Err(ServiceError::invalid("campaign ids must not be empty"));
    }
    let markers = vec!["?"; campaign_ids.len()].join(", ");
    Ok(clauses::Predicate {
        sql: format!("{column} IN ({markers})"),
        binds: campaign_ids
            .iter()
            .map(|id| BindParam::Text(id.clone()))
            .collect(),
    })
}

fn normalize_ids(raw: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raw.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

pub fn merge_sources(
    campaign_ids: &[String],
    spend: Vec<SpendPart>,
    crm: Vec<CrmPart>,
    engagement: Vec<EngagementPart>,
    today: NaiveDate,
) -> Vec<CampaignMetrics> {
    let requested: BTreeSet<&str> = campaign_ids.iter().map(String::as_str).collect();
    let mut merged: BTreeMap<String, CampaignMetrics> = BTreeMap::new();

    for part in spend {
        let id = part.campaign_id.trim();
        if !requested.contains(id) {
            continue;
        }
        let entry = merged
            .entry(id.to_string())
            .or_insert_with(|| CampaignMetrics::empty(id));
        entry.campaign_name = entry.campaign_name.take().or(part.campaign_name);
        entry.network = entry.network.take().or(part.network);
        entry.cost += part.cost;
        entry.clicks += part.clicks;
        entry.impressions += part.impressions;
        entry.platform_conversions += part.conversions;
        entry.last_active_date = entry.last_active_date.max(part.last_active_date);
    }

    for part in crm {
        let Some(id) = part.tracking_id.as_deref().map(str::trim) else {
            continue;
        };
        if !requested.contains(id) {
            continue;
        }
        let entry = merged
            .entry(id.to_string())
            .or_insert_with(|| CampaignMetrics::empty(id));
        entry.subscriptions += 1;
        if part.is_approved {
            entry.approved += 1;
        }
        if part.is_cancelled {
            entry.cancelled += 1;
        }
        entry.revenue += part.revenue;
    }

    for part in engagement {
        let id = part.campaign_id.trim();
        if !requested.contains(id) {
            continue;
        }
        let entry = merged
            .entry(id.to_string())
            .or_insert_with(|| CampaignMetrics::empty(id));
        entry.sessions += part.sessions;
        entry.page_views += part.page_views;
        entry.form_starters += part.form_starters;
        entry.avg_active_time = part.avg_active_time;
    }

    let mut rows: Vec<CampaignMetrics> = merged
        .into_values()
        .map(|mut row| {
            row.status = CampaignStatus::from_last_active(row.last_active_date, today);
            row.true_cpa = (row.approved > 0).then(|| row.cost / row.approved as f64);
            row
        })
        .collect();

    rows.sort_by(|a, b| {
        b.cost
            .partial_cmp(&a.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.campaign_id.cmp(&b.campaign_id))
    });
    rows
}

pub struct CrossStoreAggregator {
    warehouse: Arc<dyn QueryExecutor>,
    crm: Arc<dyn QueryExecutor>,
    timeout: Duration,
}

impl CrossStoreAggregator {
    pub fn new(
        warehouse: Arc<dyn QueryExecutor>,
        crm: Arc<dyn QueryExecutor>,
        timeout: Duration,
    ) -> Self {
        Self {
            warehouse,
            crm,
            timeout,
        }
    }

    pub async fn campaign_metrics(
        &self,
        request: &CampaignMetricsRequest,
        today: NaiveDate,
    ) -> Result<Vec<CampaignMetrics>> {
        request.date_range.validate()?;
        let ids = normalize_ids(&request.campaign_ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let spend_sql = spend_query(&ids, &request.date_range)?;
        let crm_sql = crm_query(&request.date_range)?;
        let engagement_sql = engagement_query(&ids, &request.date_range)?;

        let (spend, crm, engagement) = tokio::join!(
            self.fetch_source::<SpendPart>("ad_spend", self.warehouse.as_ref(), &spend_sql),
            self.fetch_source::<CrmPart>("crm", self.crm.as_ref(), &crm_sql),
            self.fetch_source::<EngagementPart>("engagement", self.crm.as_ref(), &engagement_sql),
        );

        debug!(
            campaigns = ids.len(),
            spend_rows = spend.len(),
            crm_rows = crm.len(),
            engagement_rows = engagement.len(),
            "merging campaign sources"
        );

        Ok(merge_sources(&ids, spend, crm, engagement, today))
    }

    async fn fetch_source<T: DeserializeOwned>(
        &self,
        source: &'static str,
        executor: &dyn QueryExecutor,
        query: &SqlQuery,
    ) -> Vec<T> {
        let rows = match tokio::time::timeout(self.timeout, executor.fetch(query)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(err)) => {
                warn!(source, error = ?err, "campaign source failed; continuing without it");
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    source,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "campaign source timed out; continuing without it"
                );
                return Vec::new();
            }
        };

        match rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()
        {
            Ok(parts) => parts,
            Err(err) => {
                warn!(source, error = %err, "campaign source returned undecodable rows");
                Vec::new()
            }
        }
    }
}

/// Stores disagree on numeric encodings (JSON numbers, quoted numbers, NULL).
mod lenient {
    use super::*;

    pub(super) fn f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0.0),
            Value::Number(number) => Ok(number.as_f64().unwrap_or_default()),
            Value::String(raw) => raw.trim().parse().map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!("expected number, got {other}"))),
        }
    }

    pub(super) fn i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0),
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value.round() as i64))
                .ok_or_else(|| serde::de::Error::custom("integer out of range")),
            Value::String(raw) => raw.trim().parse().map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!("expected integer, got {other}"))),
        }
    }

    pub(super) fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(false),
            Value::Bool(value) => Ok(value),
            Value::Number(number) => Ok(number.as_i64().unwrap_or_default() != 0),
            Value::String(raw) => Ok(matches!(raw.trim(), "t" | "true" | "1")),
            other => Err(serde::de::Error::custom(format!("expected boolean, got {other}"))),
        }
    }

    pub(super) fn date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if !raw.trim().is_empty() => parse_date(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn day(raw: &str) -> NaiveDate {
        parse_date(raw).unwrap()
    }

    fn range() -> DateRange {
        DateRange::parse("2026-01-01", "2026-01-31").unwrap()
    }

    #[test]
    fn status_thresholds() {
        let today = day("2026-02-01");
        let status = |last: &str| CampaignStatus::from_last_active(Some(day(last)), today);
        assert_eq!(status("2026-02-01"), CampaignStatus::Active);
        assert_eq!(status("2026-01-29"), CampaignStatus::Active);
        assert_eq!(status("2026-01-28"), CampaignStatus::Paused);
        assert_eq!(status("2026-01-02"), CampaignStatus::Paused);
        assert_eq!(status("2026-01-01"), CampaignStatus::Stopped);
        assert_eq!(
            CampaignStatus::from_last_active(None, today),
            CampaignStatus::Stopped
        );
    }

    #[test]
    fn spend_query_keeps_date_bounds_first() {
        let ids = vec!["c1".to_string(), "c2".to_string()];
        let query = spend_query(&ids, &range()).unwrap();
        assert_eq!(
            query.params,
            vec![
                BindParam::Date(day("2026-01-01")),
                BindParam::Date(day("2026-01-31")),
                BindParam::Text("c1".into()),
                BindParam::Text("c2".into()),
            ]
        );
        assert!(query.sql.contains("WHERE campaign_id IN (?, ?)"));
    }

    #[test]
    fn engagement_query_renders_numbered_markers() {
        let ids = vec!["c1".to_string()];
        let query = engagement_query(&ids, &range()).unwrap();
        assert!(query.sql.contains("WHERE session_start BETWEEN $1 AND $2\n  AND utm_campaign IN ($3)"));
        assert_eq!(query.params.len(), 3);
    }

    #[test]
    fn empty_id_list_cannot_build_queries() {
        assert!(spend_query(&[], &range()).is_err());
    }

    #[test]
    fn ids_are_trimmed_and_deduplicated() {
        let raw = vec![" c1 ".to_string(), "c2".into(), "c1".into(), "  ".into()];
        assert_eq!(normalize_ids(&raw), vec!["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    fn merge_computes_true_cpa_and_orders_by_cost() {
        let ids = vec!["c1".to_string(), "c2".to_string(), "c3".to_string()];
        let spend = vec![
            SpendPart {
                campaign_id: "c1".into(),
                campaign_name: Some("Brand".into()),
                network: Some("google".into()),
                cost: 100.0,
                clicks: 40,
                impressions: 1000,
                conversions: 5,
                last_active_date: Some(day("2026-01-31")),
            },
            SpendPart {
                campaign_id: "c2".into(),
                campaign_name: Some("Generic".into()),
                network: Some("google".into()),
                cost: 300.0,
                clicks: 90,
                impressions: 5000,
                conversions: 3,
                last_active_date: Some(day("2025-11-01")),
            },
        ];
        let crm = vec![
            CrmPart {
                tracking_id: Some(" c1".into()),
                is_approved: true,
                is_cancelled: false,
                revenue: 49.0,
            },
            CrmPart {
                tracking_id: Some("c1".into()),
                is_approved: true,
                is_cancelled: false,
                revenue: 49.0,
            },
            CrmPart {
                tracking_id: Some("other".into()),
                is_approved: true,
                is_cancelled: false,
                revenue: 10.0,
            },
        ];
        let engagement = vec![EngagementPart {
            campaign_id: "c3".into(),
            sessions: 12,
            page_views: 30,
            form_starters: 2,
            avg_active_time: 41.5,
        }];

        let rows = merge_sources(&ids, spend, crm, engagement, day("2026-02-01"));
        let order: Vec<_> = rows.iter().map(|r| r.campaign_id.as_str()).collect();
        assert_eq!(order, vec!["c2", "c1", "c3"]);

        let c1 = &rows[1];
        assert_eq!(c1.subscriptions, 2);
        assert_eq!(c1.approved, 2);
        assert_eq!(c1.true_cpa, Some(50.0));
        assert_eq!(c1.status, CampaignStatus::Active);

        let c2 = &rows[0];
        assert_eq!(c2.true_cpa, None);
        assert_eq!(c2.status, CampaignStatus::Stopped);

        let c3 = &rows[2];
        assert_eq!(c3.sessions, 12);
        assert_eq!(c3.cost, 0.0);
        assert_eq!(c3.status, CampaignStatus::Stopped);
    }

    #[test]
    fn parts_decode_quoted_numbers() {
        let part: SpendPart = serde_json::from_value(json!({
            "campaign_id": "c1",
            "cost": "12.50",
            "clicks": "7",
            "impressions": 100,
            "conversions": null,
            "last_active_date": "2026-01-30"
        }))
        .unwrap();
        assert_eq!(part.cost, 12.5);
        assert_eq!(part.clicks, 7);
        assert_eq!(part.conversions, 0);
        assert_eq!(part.last_active_date, Some(day("2026-01-30")));

        let crm: CrmPart = serde_json::from_value(json!({
            "tracking_id": "c1",
            "is_approved": 1,
            "is_cancelled": null,
            "revenue": "19.90"
        }))
        .unwrap();
        assert!(crm.is_approved);
        assert!(!crm.is_cancelled);
    }
}
