use super::{
    clauses::{self, JoinSet, Predicate},
    registry::{self, qualify},
    QueryOptions, Report, SqlQuery,
};
use crate::error::{Result, ServiceError};
use tracing::debug;

pub fn build_query(report: Report, options: &QueryOptions) -> Result<SqlQuery> {
    let schema = registry::schema(report);

    let total = options.dimensions.len();
    if options.depth >= total {
        return Err(ServiceError::invalid(format!(
            "Depth {} exceeds dimensions length {total}",
            options.depth
        )));
    }

    let dimension_id = options.dimensions[options.depth].as_str();
    let dimension = schema
        .dimension(dimension_id)
        .ok_or_else(|| ServiceError::invalid(format!("Unknown dimension: {dimension_id}")))?;

    options.date_range.validate()?;

    let parents =
        clauses::resolve_parent_filters(schema, &options.dimensions, &options.parent_filters)?;
    let filters = clauses::resolve_table_filters(schema, &options.filters)?;
    let order = clauses::order_clause(
        schema,
        dimension,
        options.sort_by.as_deref(),
        options.sort_direction,
    )?;
    let limit = clauses::determine_limit(options.limit);

    let mut joins = JoinSet::default();
    joins.extend(dimension.display_joins());
    for (dim, _) in &parents {
        joins.extend(dim.parent_joins());
    }
    for (dim, _) in &filters {
        joins.extend(dim.display_joins());
    }
    let alias = (!joins.is_empty()).then_some(schema.alias);

    let parent_predicates: Vec<Predicate> = parents
        .iter()
        .map(|(dim, value)| clauses::parent_predicate(dim, value, alias))
        .collect();
    let filter_predicates: Vec<Predicate> = filters
        .iter()
        .map(|(dim, filter)| clauses::filter_predicate(dim, filter, alias))
        .collect();

    let mut columns = Vec::with_capacity(schema.metrics.len() + 2);
    if let Some(id_expr) = dimension.id_select() {
        columns.push(format!("{} AS dimension_id", qualify(id_expr, alias)));
    }
    columns.push(format!(
        "{} AS dimension_value",
        qualify(&dimension.value_select(), alias)
    ));
    for metric in schema.metrics {
        columns.push(format!("{} AS {}", qualify(metric.expr, alias), metric.id));
    }

    let mut sql = format!(
        "SELECT {}\nFROM {}",
        columns.join(",\n       "),
        schema.from_clause(alias)
    );
    sql.push_str(&joins.render(alias));
    sql.push_str(&clauses::where_clause(
        &qualify(schema.date_column, alias),
        &parent_predicates,
        &filter_predicates,
    ));
    sql.push_str(&format!(
        "\nGROUP BY {}\nORDER BY {order}\nLIMIT {limit}",
        qualify(dimension.group_expr(), alias)
    ));

    let params = clauses::assemble_params(
        clauses::date_bounds(schema, &options.date_range),
        &parent_predicates,
        &filter_predicates,
    );

    debug!(
        report = ?report,
        dimension = dimension.id,
        depth = options.depth,
        params = params.len(),
        "built drill-down query"
    );

    SqlQuery::new(schema.dialect(), &sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dialect::Dialect, query::BindParam, time::DateRange};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn options(dimensions: &[&str], depth: usize) -> QueryOptions {
        QueryOptions {
            date_range: DateRange::parse("2026-01-01", "2026-01-31").unwrap(),
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            depth,
            parent_filters: Default::default(),
            filters: Vec::new(),
            sort_by: None,
            sort_direction: None,
            limit: None,
        }
    }

    #[test]
    fn top_level_plain_dimension_stays_unaliased() {
        let query = build_query(Report::Ads, &options(&["network", "campaign"], 0)).unwrap();
        assert_eq!(
            query.sql,
            "SELECT network AS dimension_value,\n       SUM(cost) AS cost,\n       SUM(clicks) AS clicks,\n       SUM(impressions) AS impressions,\n       SUM(conversions) AS conversions\nFROM ads_spend\nWHERE date BETWEEN ? AND ?\nGROUP BY network\nORDER BY cost DESC\nLIMIT 1000"
        );
        assert_eq!(query.dialect, Dialect::Positional);
        assert_eq!(
            query.params,
            vec![
                BindParam::Date(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
                BindParam::Date(NaiveDate::from_ymd_opt(2026, 1, 31).unwrap()),
            ]
        );
    }

    #[test]
    fn enriched_dimension_selects_id_and_joined_name() {
        let query = build_query(Report::Crm, &options(&["campaign"], 0)).unwrap();
        assert!(query.sql.starts_with(
            "SELECT s.tracking_id_campaign AS dimension_id,\n       MAX(camp.campaign_name) AS dimension_value,"
        ));
        assert!(query.sql.contains("FROM crm_subscriptions AS s\nLEFT JOIN (SELECT campaign_id"));
        assert!(query.sql.contains("WHERE s.date_create BETWEEN $1 AND $2"));
        assert!(query.sql.contains("GROUP BY s.tracking_id_campaign"));
    }

    #[test]
    fn date_dimension_sorts_by_value() {
        let query = build_query(Report::Onpage, &options(&["date"], 0)).unwrap();
        assert!(query.sql.contains("ORDER BY dimension_value DESC"));
    }

    #[test]
    fn depth_past_the_path_is_rejected() {
        let err = build_query(Report::Ads, &options(&["network"], 1)).unwrap_err();
        assert_eq!(err.to_string(), "Depth 1 exceeds dimensions length 1");
    }

    #[test]
    fn unknown_dimension_is_rejected() {
        let err = build_query(Report::Ads, &options(&["planet"], 0)).unwrap_err();
        assert_eq!(err.to_string(), "Unknown dimension: planet");
    }
}
