use super::{
    clauses::{self, JoinSet, Predicate},
    registry::{self, qualify, Join, CRM_ADSET_NAMES, CRM_AD_NAMES, CRM_CAMPAIGN_NAMES, CRM_PRODUCT},
    BindParam, Report, SqlQuery, TableFilter,
};
use crate::{
    dialect::Dialect,
    error::{Result, ServiceError},
    time::{parse_date, DateRange},
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;

const CANCEL_REASONS: Join = Join {
    alias: "cr",
    sql: "LEFT JOIN cancellation_reasons AS cr ON cr.id = {t}.cancel_reason_id",
};

const BASE_COLUMNS: &[&str] = &[
    "{t}.id",
    "TO_CHAR({t}.date_create, 'YYYY-MM-DD HH24:MI:SS') AS date_create",
    "{t}.customer_name",
    "{t}.email",
    "UPPER({t}.country) AS country",
    "{t}.source",
    "{t}.network",
    "{t}.tracking_id_campaign AS campaign_id",
    "camp.campaign_name",
    "{t}.tracking_id_adset AS adset_id",
    "aset.adset_name",
    "{t}.tracking_id_ad AS ad_id",
    "adv.ad_name",
    "prod.name AS product_name",
    "{t}.is_approved",
    "{t}.is_cancelled",
    "{t}.revenue",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailMetric {
    Subscriptions,
    Approved,
    Pending,
    Cancelled,
}

impl FromStr for DetailMetric {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "subscriptions" => Ok(DetailMetric::Subscriptions),
            "approved" => Ok(DetailMetric::Approved),
            "pending" => Ok(DetailMetric::Pending),
            "cancelled" => Ok(DetailMetric::Cancelled),
            other => Err(ServiceError::invalid(format!(
                "Unknown detail metric: {other}"
            ))),
        }
    }
}

struct DetailTemplate {
    condition: Option<&'static str>,
    columns: &'static [&'static str],
    joins: &'static [Join],
}

impl DetailMetric {
    fn template(self) -> DetailTemplate {
        match self {
            DetailMetric::Subscriptions => DetailTemplate {
                condition: None,
                columns: &[],
                joins: &[],
            },
            DetailMetric::Approved => DetailTemplate {
                condition: Some("{t}.is_approved"),
                columns: &[],
                joins: &[],
            },
            DetailMetric::Pending => DetailTemplate {
                condition: Some("NOT {t}.is_approved AND NOT {t}.is_cancelled"),
                columns: &[],
                joins: &[],
            },
            DetailMetric::Cancelled => DetailTemplate {
                condition: Some("{t}.is_cancelled"),
                columns: &[
                    "TO_CHAR({t}.date_cancel, 'YYYY-MM-DD HH24:MI:SS') AS date_cancel",
                    "cr.label AS cancel_reason",
                ],
                joins: &[CANCEL_REASONS],
            },
        }
    }
}

/// Source labels recorded in the CRM for each ad network.
pub fn network_sources(network: &str) -> Result<&'static [&'static str]> {
    match network.trim().to_lowercase().as_str() {
        "google" => Ok(&["google", "adwords"]),
        "facebook" => Ok(&["facebook", "fb", "meta"]),
        "tiktok" => Ok(&["tiktok"]),
        "bing" => Ok(&["bing", "microsoft"]),
        other => Err(ServiceError::invalid(format!("Unknown network: {other}"))),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailQueryOptions {
    pub date_range: DateRange,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub ad_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub filters: Vec<TableFilter>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

const fn default_page() -> i64 {
    1
}

const fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

fn deserialize_optional_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| parse_date(&raw).map_err(serde::de::Error::custom))
        .transpose()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailQuery {
    pub query: SqlQuery,
    pub count: SqlQuery,
    pub page: i64,
    pub page_size: i64,
}

impl Serialize for DetailQuery {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Flat<'a> {
            sql: &'a str,
            params: &'a [BindParam],
            count_sql: &'a str,
            count_params: &'a [BindParam],
            dialect: Dialect,
            page: i64,
            page_size: i64,
        }

        Flat {
            sql: &self.query.sql,
            params: &self.query.params,
            count_sql: &self.count.sql,
            count_params: &self.count.params,
            dialect: self.query.dialect,
            page: self.page,
            page_size: self.page_size,
        }
        .serialize(serializer)
    }
}

pub fn build_detail_query(metric: &str, options: &DetailQueryOptions) -> Result<DetailQuery> {
    let metric: DetailMetric = metric.parse()?;
    let template = metric.template();
    let schema = registry::schema(Report::Crm);
    let alias = Some(schema.alias);

    options.date_range.validate()?;
    let filters = clauses::resolve_table_filters(schema, &options.filters)?;

    let page = options.page.max(1);
    let page_size = options.page_size.clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(page_size);

    let mut joins = JoinSet::default();
    joins.extend(&[CRM_CAMPAIGN_NAMES, CRM_ADSET_NAMES, CRM_AD_NAMES, CRM_PRODUCT]);
    joins.extend(template.joins);
    for (dim, _) in &filters {
        joins.extend(dim.display_joins());
    }

    let mut scope = Vec::new();
    if let Some(condition) = template.condition {
        scope.push(Predicate {
            sql: qualify(condition, alias),
            binds: Vec::new(),
        });
    }
    scope.extend(identifier_predicates(options, alias)?);

    let filter_predicates: Vec<Predicate> = filters
        .iter()
        .map(|(dim, filter)| clauses::filter_predicate(dim, filter, alias))
        .collect();

    let from = format!("\nFROM {}{}", schema.from_clause(alias), joins.render(alias));
    let where_sql = clauses::where_clause(
        &qualify(schema.date_column, alias),
        &scope,
        &filter_predicates,
    );
    let params = clauses::assemble_params(
        clauses::date_bounds(schema, &options.date_range),
        &scope,
        &filter_predicates,
    );

    let columns: Vec<String> = BASE_COLUMNS
        .iter()
        .chain(template.columns)
        .map(|column| qualify(column, alias))
        .collect();

    let select_sql = format!(
        "SELECT {}{from}{where_sql}\nORDER BY {} DESC, {} DESC\nLIMIT ? OFFSET ?",
        columns.join(",\n       "),
        qualify(schema.date_column, alias),
        qualify("{t}.id", alias),
    );
    let mut select_params = params.clone();
    select_params.push(BindParam::Int(page_size));
    select_params.push(BindParam::Int(offset));

    let count_sql = format!("SELECT COUNT(*) AS total{from}{where_sql}");

    Ok(DetailQuery {
        query: SqlQuery::new(schema.dialect(), &select_sql, select_params)?,
        count: SqlQuery::new(schema.dialect(), &count_sql, params)?,
        page,
        page_size,
    })
}

fn identifier_predicates(options: &DetailQueryOptions, alias: Option<&str>) -> Result<Vec<Predicate>> {
    let mut predicates = Vec::new();

    if let Some(network) = non_empty(options.network.as_deref()) {
        let sources = network_sources(network)?;
        let markers = vec!["?"; sources.len()].join(", ");
        predicates.push(Predicate {
            sql: format!("LOWER({}) IN ({markers})", qualify("{t}.source", alias)),
            binds: sources
                .iter()
                .map(|source| BindParam::Text((*source).to_string()))
                .collect(),
        });
    }

    let identifiers = [
        ("{t}.tracking_id_campaign", options.campaign_id.as_deref()),
        ("{t}.tracking_id_adset", options.adset_id.as_deref()),
        ("{t}.tracking_id_ad", options.ad_id.as_deref()),
    ];
    for (column, value) in identifiers {
        if let Some(value) = non_empty(value) {
            predicates.push(Predicate {
                sql: format!("{} = ?", qualify(column, alias)),
                binds: vec![BindParam::Text(value.to_string())],
            });
        }
    }

    if let Some(day) = options.date {
        predicates.push(Predicate {
            sql: format!("DATE({}) = ?", qualify("{t}.date_create", alias)),
            binds: vec![BindParam::Date(day)],
        });
    }

    Ok(predicates)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
