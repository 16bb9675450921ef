//! Static dimension and metric tables for every drill-down report.
//!
//! Expressions are written against the `{t}.` base-table marker; [`qualify`]
//! renders it as `<alias>.` when the statement joins other tables and drops
//! it when the base table is queried on its own.

use super::{Report, Store};
use crate::{
    dialect::Dialect,
    error::{Result, ServiceError},
};
use serde::{Deserialize, Serialize};
use std::fmt;

const BASE_MARKER: &str = "{t}.";

pub const UNKNOWN_SENTINEL: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Join {
    pub alias: &'static str,
    pub sql: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionKind {
    Plain,
    Enriched,
    Classification,
}

#[derive(Debug, Clone, Copy)]
pub enum DimensionShape {
    Plain { expr: &'static str },
    /// Fact table holds a foreign id whose name comes from a joined table.
    Enriched {
        id_expr: &'static str,
        name_expr: &'static str,
        joins: &'static [Join],
    },
    /// Fact value is mapped through a classification table to a target entity.
    Classification {
        id_expr: &'static str,
        name_expr: &'static str,
        joins: &'static [Join],
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Dimension {
    pub id: &'static str,
    pub shape: DimensionShape,
    pub is_date: bool,
}

impl Dimension {
    const fn plain(id: &'static str, expr: &'static str) -> Self {
        Self {
            id,
            shape: DimensionShape::Plain { expr },
            is_date: false,
        }
    }

    const fn date(id: &'static str, expr: &'static str) -> Self {
        Self {
            id,
            shape: DimensionShape::Plain { expr },
            is_date: true,
        }
    }

    const fn enriched(
        id: &'static str,
        id_expr: &'static str,
        name_expr: &'static str,
        joins: &'static [Join],
    ) -> Self {
        Self {
            id,
            shape: DimensionShape::Enriched {
                id_expr,
                name_expr,
                joins,
            },
            is_date: false,
        }
    }

    const fn classification(
        id: &'static str,
        id_expr: &'static str,
        name_expr: &'static str,
        joins: &'static [Join],
    ) -> Self {
        Self {
            id,
            shape: DimensionShape::Classification {
                id_expr,
                name_expr,
                joins,
            },
            is_date: false,
        }
    }

    pub fn kind(&self) -> DimensionKind {
        match self.shape {
            DimensionShape::Plain { .. } => DimensionKind::Plain,
            DimensionShape::Enriched { .. } => DimensionKind::Enriched,
            DimensionShape::Classification { .. } => DimensionKind::Classification,
        }
    }

    /// Expression selected as `dimension_value`. Joined names are wrapped in
    /// `MAX` because the enrichment join may fan out.
    pub fn value_select(&self) -> String {
        match self.shape {
            DimensionShape::Plain { expr } => expr.to_string(),
            DimensionShape::Enriched { name_expr, .. }
            | DimensionShape::Classification { name_expr, .. } => format!("MAX({name_expr})"),
        }
    }

    /// Expression selected as `dimension_id`, the value the next depth filters on.
    pub fn id_select(&self) -> Option<&'static str> {
        match self.shape {
            DimensionShape::Plain { .. } => None,
            DimensionShape::Enriched { id_expr, .. }
            | DimensionShape::Classification { id_expr, .. } => Some(id_expr),
        }
    }

    pub fn group_expr(&self) -> &'static str {
        match self.shape {
            DimensionShape::Plain { expr } => expr,
            DimensionShape::Enriched { id_expr, .. }
            | DimensionShape::Classification { id_expr, .. } => id_expr,
        }
    }

    pub fn filter_expr(&self) -> &'static str {
        match self.shape {
            DimensionShape::Plain { expr } => expr,
            DimensionShape::Enriched { name_expr, .. }
            | DimensionShape::Classification { name_expr, .. } => name_expr,
        }
    }

    /// Expression an ancestor row's selected value is matched against.
    pub fn parent_filter_expr(&self) -> &'static str {
        self.group_expr()
    }

    pub fn display_joins(&self) -> &'static [Join] {
        match self.shape {
            DimensionShape::Plain { .. } => &[],
            DimensionShape::Enriched { joins, .. }
            | DimensionShape::Classification { joins, .. } => joins,
        }
    }

    pub fn parent_joins(&self) -> &'static [Join] {
        match self.shape {
            DimensionShape::Plain { .. } | DimensionShape::Enriched { .. } => &[],
            DimensionShape::Classification { joins, .. } => joins,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub id: &'static str,
    pub expr: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBounds {
    Calendar,
    Timestamp,
}

#[derive(Debug)]
pub struct ReportSchema {
    pub report: Report,
    pub table: &'static str,
    pub alias: &'static str,
    pub date_column: &'static str,
    pub date_bounds: DateBounds,
    pub metrics: &'static [Metric],
    pub default_metric: &'static str,
    pub dimensions: &'static [Dimension],
}

impl ReportSchema {
    pub fn dimension(&self, id: &str) -> Option<&'static Dimension> {
        self.dimensions.iter().find(|dim| dim.id == id)
    }

    pub fn metric(&self, id: &str) -> Option<&'static Metric> {
        self.metrics.iter().find(|metric| metric.id == id)
    }

    pub fn store(&self) -> Store {
        self.report.store()
    }

    pub fn dialect(&self) -> Dialect {
        self.store().dialect()
    }

    pub fn from_clause(&self, alias: Option<&str>) -> String {
        match alias {
            Some(alias) => format!("{} AS {alias}", self.table),
            None => self.table.to_string(),
        }
    }
}

pub fn schema(report: Report) -> &'static ReportSchema {
    match report {
        Report::Ads => &ADS,
        Report::Crm => &CRM,
        Report::Onpage => &ONPAGE,
    }
}

pub fn qualify(expr: &str, alias: Option<&str>) -> String {
    match alias {
        Some(alias) => expr.replace(BASE_MARKER, &format!("{alias}.")),
        None => expr.replace(BASE_MARKER, ""),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum SortDirection {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl SortDirection {
    /// Interpolated verbatim into ORDER BY, so only the exact tokens pass.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "ASC" => Ok(SortDirection::Asc),
            "DESC" => Ok(SortDirection::Desc),
            other => Err(ServiceError::invalid(format!(
                "Invalid sort direction: {other}"
            ))),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl TryFrom<String> for SortDirection {
    type Error = ServiceError;

    fn try_from(value: String) -> Result<Self> {
        SortDirection::parse(&value)
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

pub fn sort_target(
    schema: &ReportSchema,
    dimension: &Dimension,
    sort_by: Option<&str>,
) -> Result<&'static str> {
    match sort_by {
        None if dimension.is_date => Ok("dimension_value"),
        None => Ok(schema.default_metric),
        Some("dimension_value") => Ok("dimension_value"),
        Some(id) if id == dimension.id => Ok("dimension_value"),
        Some(id) => schema
            .metric(id)
            .map(|metric| metric.id)
            .ok_or_else(|| ServiceError::invalid(format!("Unknown sort field: {id}"))),
    }
}

const CAMPAIGN_CLASSIFICATION: Join = Join {
    alias: "cc",
    sql: "LEFT JOIN campaign_classifications AS cc ON cc.campaign_id = {t}.campaign_id",
};

const CAMPAIGN_PRODUCT: Join = Join {
    alias: "cprod",
    sql: "LEFT JOIN products AS cprod ON cprod.id = cc.product_id",
};

static ADS: ReportSchema = ReportSchema {
    report: Report::Ads,
    table: "ads_spend",
    alias: "a",
    date_column: "{t}.date",
    date_bounds: DateBounds::Calendar,
    metrics: &[
        Metric {
            id: "cost",
            expr: "SUM({t}.cost)",
        },
        Metric {
            id: "clicks",
            expr: "SUM({t}.clicks)",
        },
        Metric {
            id: "impressions",
            expr: "SUM({t}.impressions)",
        },
        Metric {
            id: "conversions",
            expr: "SUM({t}.conversions)",
        },
    ],
    default_metric: "cost",
    dimensions: &[
        Dimension::date("date", "{t}.date"),
        Dimension::plain("network", "{t}.network"),
        Dimension::plain("account", "{t}.account_name"),
        Dimension::plain("campaign", "{t}.campaign_name"),
        Dimension::plain("adset", "{t}.adset_name"),
        Dimension::plain("ad", "{t}.ad_name"),
        Dimension::plain("country", "UPPER({t}.country)"),
        Dimension::plain("device", "{t}.device"),
        Dimension::classification(
            "product",
            "CAST(cc.product_id AS TEXT)",
            "cprod.name",
            &[CAMPAIGN_CLASSIFICATION, CAMPAIGN_PRODUCT],
        ),
    ],
};

pub(crate) const CRM_CAMPAIGN_NAMES: Join = Join {
    alias: "camp",
    sql: "LEFT JOIN (SELECT campaign_id, network, date, MAX(campaign_name) AS campaign_name FROM ads_spend_daily GROUP BY campaign_id, network, date) AS camp ON camp.campaign_id = {t}.tracking_id_campaign AND camp.network = {t}.network AND camp.date = DATE({t}.date_create)",
};

pub(crate) const CRM_ADSET_NAMES: Join = Join {
    alias: "aset",
    sql: "LEFT JOIN (SELECT adset_id, network, date, MAX(adset_name) AS adset_name FROM ads_spend_daily GROUP BY adset_id, network, date) AS aset ON aset.adset_id = {t}.tracking_id_adset AND aset.network = {t}.network AND aset.date = DATE({t}.date_create)",
};

pub(crate) const CRM_AD_NAMES: Join = Join {
    alias: "adv",
    sql: "LEFT JOIN (SELECT ad_id, network, date, MAX(ad_name) AS ad_name FROM ads_spend_daily GROUP BY ad_id, network, date) AS adv ON adv.ad_id = {t}.tracking_id_ad AND adv.network = {t}.network AND adv.date = DATE({t}.date_create)",
};

pub(crate) const CRM_PRODUCT: Join = Join {
    alias: "prod",
    sql: "LEFT JOIN products AS prod ON prod.id = {t}.product_id",
};

const AFFILIATE_CLASSIFICATION: Join = Join {
    alias: "ac",
    sql: "LEFT JOIN affiliate_classifications AS ac ON ac.affiliate_id = {t}.affiliate_id",
};

const AFFILIATE_PRODUCT: Join = Join {
    alias: "aprod",
    sql: "LEFT JOIN products AS aprod ON aprod.id = ac.product_id",
};

static CRM: ReportSchema = ReportSchema {
    report: Report::Crm,
    table: "crm_subscriptions",
    alias: "s",
    date_column: "{t}.date_create",
    date_bounds: DateBounds::Timestamp,
    metrics: &[
        Metric {
            id: "subscriptions",
            expr: "COUNT(*)",
        },
        Metric {
            id: "approved",
            expr: "SUM(CASE WHEN {t}.is_approved THEN 1 ELSE 0 END)",
        },
        Metric {
            id: "pending",
            expr: "SUM(CASE WHEN NOT {t}.is_approved AND NOT {t}.is_cancelled THEN 1 ELSE 0 END)",
        },
        Metric {
            id: "cancelled",
            expr: "SUM(CASE WHEN {t}.is_cancelled THEN 1 ELSE 0 END)",
        },
        Metric {
            id: "customers",
            expr: "COUNT(DISTINCT {t}.customer_id)",
        },
        Metric {
            id: "revenue",
            expr: "COALESCE(SUM({t}.revenue), 0)",
        },
    ],
    default_metric: "subscriptions",
    dimensions: &[
        Dimension::date("date", "TO_CHAR({t}.date_create, 'YYYY-MM-DD')"),
        Dimension::plain("country", "UPPER({t}.country)"),
        Dimension::plain("source", "{t}.source"),
        Dimension::plain("network", "{t}.network"),
        Dimension::plain("affiliate", "{t}.affiliate_id"),
        Dimension::enriched(
            "campaign",
            "{t}.tracking_id_campaign",
            "camp.campaign_name",
            &[CRM_CAMPAIGN_NAMES],
        ),
        Dimension::enriched(
            "adset",
            "{t}.tracking_id_adset",
            "aset.adset_name",
            &[CRM_ADSET_NAMES],
        ),
        Dimension::enriched("ad", "{t}.tracking_id_ad", "adv.ad_name", &[CRM_AD_NAMES]),
        Dimension::enriched(
            "product",
            "CAST({t}.product_id AS TEXT)",
            "prod.name",
            &[CRM_PRODUCT],
        ),
        Dimension::classification(
            "affiliate_product",
            "CAST(ac.product_id AS TEXT)",
            "aprod.name",
            &[AFFILIATE_CLASSIFICATION, AFFILIATE_PRODUCT],
        ),
    ],
};

const SESSION_CAMPAIGN_NAMES: Join = Join {
    alias: "camp",
    sql: "LEFT JOIN (SELECT campaign_id, date, MAX(campaign_name) AS campaign_name FROM ads_spend_daily GROUP BY campaign_id, date) AS camp ON camp.campaign_id = {t}.utm_campaign AND camp.date = DATE({t}.session_start)",
};

const URL_CLASSIFICATION: Join = Join {
    alias: "uc",
    sql: "LEFT JOIN url_classifications AS uc ON uc.url_path = {t}.url_path",
};

const URL_PRODUCT: Join = Join {
    alias: "uprod",
    sql: "LEFT JOIN products AS uprod ON uprod.id = uc.product_id",
};

static ONPAGE: ReportSchema = ReportSchema {
    report: Report::Onpage,
    table: "page_sessions",
    alias: "ps",
    date_column: "{t}.session_start",
    date_bounds: DateBounds::Timestamp,
    metrics: &[
        Metric {
            id: "sessions",
            expr: "COUNT(*)",
        },
        Metric {
            id: "visitors",
            expr: "COUNT(DISTINCT {t}.visitor_id)",
        },
        Metric {
            id: "page_views",
            expr: "COALESCE(SUM({t}.page_views), 0)",
        },
        Metric {
            id: "form_views",
            expr: "COALESCE(SUM({t}.form_views), 0)",
        },
        Metric {
            id: "form_starters",
            expr: "COALESCE(SUM({t}.form_starters), 0)",
        },
        Metric {
            id: "avg_active_time",
            expr: "COALESCE(AVG({t}.active_time_s), 0)",
        },
    ],
    default_metric: "sessions",
    dimensions: &[
        Dimension::date("date", "TO_CHAR({t}.session_start, 'YYYY-MM-DD')"),
        Dimension::plain("url_path", "{t}.url_path"),
        Dimension::plain("device", "{t}.device_type"),
        Dimension::plain("country", "UPPER({t}.country)"),
        Dimension::plain("utm_source", "{t}.utm_source"),
        Dimension::enriched(
            "campaign",
            "{t}.utm_campaign",
            "camp.campaign_name",
            &[SESSION_CAMPAIGN_NAMES],
        ),
        Dimension::classification(
            "url_product",
            "CAST(uc.product_id AS TEXT)",
            "uprod.name",
            &[URL_CLASSIFICATION, URL_PRODUCT],
        ),
    ],
};
