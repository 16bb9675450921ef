use super::{
    registry::{
        qualify, sort_target, DateBounds, Dimension, Join, ReportSchema, SortDirection,
        UNKNOWN_SENTINEL,
    },
    BindParam, FilterOperator, TableFilter,
};
use crate::{
    error::{Result, ServiceError},
    time::DateRange,
};
use std::collections::BTreeMap;

pub const DEFAULT_LIMIT: i64 = 1000;
pub const MAX_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub binds: Vec<BindParam>,
}

impl Predicate {
    fn new(sql: String, binds: Vec<BindParam>) -> Self {
        Self { sql, binds }
    }
}

#[derive(Debug, Default)]
pub struct JoinSet {
    joins: Vec<Join>,
}

impl JoinSet {
    pub fn extend(&mut self, joins: &[Join]) {
        for join in joins {
            if !self.joins.iter().any(|seen| seen.alias == join.alias) {
                self.joins.push(*join);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn render(&self, alias: Option<&str>) -> String {
        self.joins
            .iter()
            .map(|join| format!("\n{}", qualify(join.sql, alias)))
            .collect()
    }
}

pub fn date_bounds(schema: &ReportSchema, range: &DateRange) -> [BindParam; 2] {
    match schema.date_bounds {
        DateBounds::Calendar => [BindParam::Date(range.start), BindParam::Date(range.end)],
        DateBounds::Timestamp => [
            BindParam::Timestamp(range.first_instant()),
            BindParam::Timestamp(range.last_instant()),
        ],
    }
}

/// Resolves parent filters in drill order: keys on the path first, in path
/// order, then any remaining keys sorted by id.
pub fn resolve_parent_filters<'a>(
    schema: &ReportSchema,
    path: &[String],
    parent_filters: &'a BTreeMap<String, String>,
) -> Result<Vec<(&'static Dimension, &'a str)>> {
    let mut ordered: Vec<(&String, &String)> = Vec::with_capacity(parent_filters.len());
    for id in path {
        if let Some((key, value)) = parent_filters.get_key_value(id) {
            if !ordered.iter().any(|(seen, _)| *seen == key) {
                ordered.push((key, value));
            }
        }
    }
    for (key, value) in parent_filters {
        if !path.contains(key) {
            ordered.push((key, value));
        }
    }

    ordered
        .into_iter()
        .map(|(key, value)| {
            let dim = schema.dimension(key).ok_or_else(|| {
                ServiceError::invalid(format!("Unknown dimension in parent filter: {key}"))
            })?;
            Ok((dim, value.as_str()))
        })
        .collect()
}

pub fn resolve_table_filters<'a>(
    schema: &ReportSchema,
    filters: &'a [TableFilter],
) -> Result<Vec<(&'static Dimension, &'a TableFilter)>> {
    filters
        .iter()
        .map(|filter| {
            let dim = schema.dimension(&filter.field).ok_or_else(|| {
                ServiceError::invalid(format!("Unknown dimension in filter: {}", filter.field))
            })?;
            Ok((dim, filter))
        })
        .collect()
}

pub fn parent_predicate(dim: &Dimension, value: &str, alias: Option<&str>) -> Predicate {
    let expr = qualify(dim.parent_filter_expr(), alias);
    if value == UNKNOWN_SENTINEL {
        Predicate::new(format!("{expr} IS NULL"), Vec::new())
    } else {
        Predicate::new(
            format!("{expr} = ?"),
            vec![BindParam::Text(value.to_string())],
        )
    }
}

pub fn filter_predicate(dim: &Dimension, filter: &TableFilter, alias: Option<&str>) -> Predicate {
    let expr = qualify(dim.filter_expr(), alias);
    let value = filter.value.as_str();

    match filter.operator {
        FilterOperator::Equals if value.is_empty() => {
            Predicate::new(format!("{expr} IS NULL"), Vec::new())
        }
        FilterOperator::Equals => Predicate::new(
            format!("LOWER({expr}) = LOWER(?)"),
            vec![BindParam::Text(value.to_string())],
        ),
        FilterOperator::NotEquals if value.is_empty() => {
            Predicate::new(format!("{expr} IS NOT NULL"), Vec::new())
        }
        FilterOperator::NotEquals => Predicate::new(
            format!("({expr} IS NULL OR LOWER({expr}) <> LOWER(?))"),
            vec![BindParam::Text(value.to_string())],
        ),
        FilterOperator::Contains => Predicate::new(
            format!("LOWER({expr}) LIKE LOWER(?)"),
            vec![BindParam::Text(format!("%{value}%"))],
        ),
        FilterOperator::NotContains => Predicate::new(
            format!("({expr} IS NULL OR LOWER({expr}) NOT LIKE LOWER(?))"),
            vec![BindParam::Text(format!("%{value}%"))],
        ),
    }
}

pub fn where_clause(date_expr: &str, parents: &[Predicate], filters: &[Predicate]) -> String {
    let mut clause = format!("\nWHERE {date_expr} BETWEEN ? AND ?");
    for predicate in parents.iter().chain(filters) {
        clause.push_str("\n  AND ");
        clause.push_str(&predicate.sql);
    }
    clause
}

pub fn assemble_params(
    bounds: [BindParam; 2],
    parents: &[Predicate],
    filters: &[Predicate],
) -> Vec<BindParam> {
    let mut params: Vec<BindParam> = bounds.into();
    for predicate in parents.iter().chain(filters) {
        params.extend(predicate.binds.iter().cloned());
    }
    params
}

pub fn order_clause(
    schema: &ReportSchema,
    dimension: &Dimension,
    sort_by: Option<&str>,
    direction: Option<SortDirection>,
) -> Result<String> {
    let target = sort_target(schema, dimension, sort_by)?;
    let direction = direction.unwrap_or(SortDirection::Desc);
    Ok(format!("{target} {direction}"))
}

pub fn determine_limit(candidate: Option<i64>) -> i64 {
    candidate.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}
