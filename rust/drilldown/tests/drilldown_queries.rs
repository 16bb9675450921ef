mod support;

use chrono::NaiveDate;
use drilldown::{
    dialect::Dialect,
    error::ServiceError,
    query::{build_query, BindParam, QueryOptions, Report, SortDirection},
};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{filter, january, options, parents};

fn timestamp(day: u32, h: u32, m: u32, s: u32) -> BindParam {
    BindParam::Timestamp(
        NaiveDate::from_ymd_opt(2026, 1, day)
            .and_then(|date| date.and_hms_opt(h, m, s))
            .expect("valid timestamp"),
    )
}

fn text(value: &str) -> BindParam {
    BindParam::Text(value.to_string())
}

#[test]
fn nested_crm_drilldown_matches_expected_statement() {
    let mut opts = options(&["network", "campaign", "adset"], 2);
    opts.parent_filters = parents(&[("network", "google"), ("campaign", "Unknown")]);
    opts.filters = vec![filter(json!({"field": "country", "operator": "equals", "value": "de"}))];

    let query = build_query(Report::Crm, &opts).expect("query should build");

    let expected = "SELECT s.tracking_id_adset AS dimension_id,
       MAX(aset.adset_name) AS dimension_value,
       COUNT(*) AS subscriptions,
       SUM(CASE WHEN s.is_approved THEN 1 ELSE 0 END) AS approved,
       SUM(CASE WHEN NOT s.is_approved AND NOT s.is_cancelled THEN 1 ELSE 0 END) AS pending,
       SUM(CASE WHEN s.is_cancelled THEN 1 ELSE 0 END) AS cancelled,
       COUNT(DISTINCT s.customer_id) AS customers,
       COALESCE(SUM(s.revenue), 0) AS revenue
FROM crm_subscriptions AS s
LEFT JOIN (SELECT adset_id, network, date, MAX(adset_name) AS adset_name FROM ads_spend_daily GROUP BY adset_id, network, date) AS aset ON aset.adset_id = s.tracking_id_adset AND aset.network = s.network AND aset.date = DATE(s.date_create)
WHERE s.date_create BETWEEN $1 AND $2
  AND s.network = $3
  AND s.tracking_id_campaign IS NULL
  AND LOWER(UPPER(s.country)) = LOWER($4)
GROUP BY s.tracking_id_adset
ORDER BY subscriptions DESC
LIMIT 1000";

    assert_eq!(query.sql, expected);
    assert_eq!(query.dialect, Dialect::Numbered);
    assert_eq!(
        query.params,
        vec![
            timestamp(1, 0, 0, 0),
            timestamp(31, 23, 59, 59),
            text("google"),
            text("de"),
        ]
    );
}

#[test]
fn bind_count_matches_placeholders_for_every_shape() {
    let cases: Vec<(Report, QueryOptions)> = vec![
        (Report::Ads, options(&["network"], 0)),
        (Report::Ads, {
            let mut opts = options(&["product", "campaign", "ad"], 2);
            opts.parent_filters = parents(&[("product", "7"), ("campaign", "Unknown")]);
            opts.filters = vec![
                filter(json!({"field": "country", "operator": "not_equals", "value": ""})),
                filter(json!({"field": "device", "operator": "contains", "value": "mob"})),
            ];
            opts
        }),
        (Report::Crm, {
            let mut opts = options(&["affiliate_product", "affiliate", "date"], 2);
            opts.parent_filters = parents(&[("affiliate_product", "3"), ("affiliate", "aff-9")]);
            opts
        }),
        (Report::Onpage, {
            let mut opts = options(&["url_product", "campaign", "device"], 2);
            opts.parent_filters = parents(&[("url_product", "Unknown"), ("campaign", "c-1")]);
            opts.filters = vec![filter(
                json!({"field": "utm_source", "operator": "not_contains", "value": "test"}),
            )];
            opts
        }),
    ];

    for (report, opts) in cases {
        let query = build_query(report, &opts).expect("query should build");
        assert_eq!(
            query.dialect.placeholder_count(&query.sql),
            query.params.len(),
            "placeholder mismatch for {report:?}: {}",
            query.sql
        );
    }
}

#[test]
fn unknown_parent_value_adds_no_bind() {
    let mut with_value = options(&["country", "source"], 1);
    with_value.parent_filters = parents(&[("country", "DE")]);
    let mut with_unknown = options(&["country", "source"], 1);
    with_unknown.parent_filters = parents(&[("country", "Unknown")]);

    let bound = build_query(Report::Crm, &with_value).unwrap();
    let unknown = build_query(Report::Crm, &with_unknown).unwrap();

    assert!(bound.sql.contains("UPPER(country) = $3"), "{}", bound.sql);
    assert!(unknown.sql.contains("UPPER(country) IS NULL"), "{}", unknown.sql);
    assert_eq!(bound.params.len(), 3);
    assert_eq!(unknown.params.len(), 2);
}

#[test]
fn classification_parent_filter_pulls_in_mapping_joins() {
    let mut opts = options(&["product", "campaign"], 1);
    opts.parent_filters = parents(&[("product", "5")]);

    let query = build_query(Report::Ads, &opts).unwrap();

    assert!(query.sql.contains("FROM ads_spend AS a\n"), "{}", query.sql);
    assert!(query
        .sql
        .contains("LEFT JOIN campaign_classifications AS cc ON cc.campaign_id = a.campaign_id"));
    assert!(query.sql.contains("AND CAST(cc.product_id AS TEXT) = ?"));
    assert!(query.sql.contains("GROUP BY a.campaign_name"));
    assert_eq!(query.dialect, Dialect::Positional);
    assert_eq!(
        query.params,
        vec![
            BindParam::Date(january().start),
            BindParam::Date(january().end),
            text("5"),
        ]
    );
}

#[test]
fn enriched_filter_compares_against_joined_name() {
    let mut opts = options(&["country"], 0);
    opts.filters = vec![filter(json!({"field": "campaign", "operator": "contains", "value": "Brand"}))];

    let query = build_query(Report::Crm, &opts).unwrap();

    assert!(query.sql.contains("AS camp ON camp.campaign_id = s.tracking_id_campaign"));
    assert!(query.sql.contains("AND LOWER(camp.campaign_name) LIKE LOWER($3)"));
    assert!(query.sql.contains("GROUP BY UPPER(s.country)"));
    assert_eq!(query.params[2], text("%Brand%"));
}

#[test]
fn parent_filters_bind_in_drill_order() {
    let mut opts = options(&["source", "network", "country"], 2);
    opts.parent_filters = parents(&[("network", "google"), ("source", "ads"), ("affiliate", "a1")]);

    let query = build_query(Report::Crm, &opts).unwrap();
    assert_eq!(
        &query.params[2..],
        &[text("ads"), text("google"), text("a1")]
    );
}

#[test]
fn identical_options_build_identical_statements() {
    let mut opts = options(&["network", "campaign"], 1);
    opts.parent_filters = parents(&[("network", "facebook")]);
    opts.filters = vec![filter(json!({"field": "country", "operator": "not_equals", "value": "us"}))];

    let first = build_query(Report::Crm, &opts).unwrap();
    let second = build_query(Report::Crm, &opts).unwrap();
    assert_eq!(first, second);
}

#[test]
fn explicit_sort_and_limit_are_applied() {
    let mut opts = options(&["network"], 0);
    opts.sort_by = Some("clicks".into());
    opts.sort_direction = Some(SortDirection::Asc);
    opts.limit = Some(99_999);

    let query = build_query(Report::Ads, &opts).unwrap();
    assert!(query.sql.ends_with("ORDER BY clicks ASC\nLIMIT 10000"), "{}", query.sql);
}

#[test]
fn invalid_requests_are_client_errors() {
    let cases: Vec<(Report, QueryOptions, &str)> = vec![
        (Report::Ads, options(&["network"], 3), "Depth 3 exceeds dimensions length 1"),
        (Report::Ads, options(&["galaxy"], 0), "Unknown dimension: galaxy"),
        (
            Report::Crm,
            {
                let mut opts = options(&["network", "country"], 1);
                opts.parent_filters = parents(&[("galaxy", "x")]);
                opts
            },
            "Unknown dimension in parent filter: galaxy",
        ),
        (
            Report::Onpage,
            {
                let mut opts = options(&["device"], 0);
                opts.sort_by = Some("cost".into());
                opts
            },
            "Unknown sort field: cost",
        ),
        (
            Report::Ads,
            {
                let mut opts = options(&["network"], 0);
                opts.filters = vec![filter(
                    json!({"field": "planet", "operator": "equals", "value": "mars"}),
                )];
                opts
            },
            "Unknown dimension in filter: planet",
        ),
        (Report::Crm, options(&[], 0), "Depth 0 exceeds dimensions length 0"),
    ];

    for (report, opts, message) in cases {
        let err = build_query(report, &opts).expect_err("request should be rejected");
        assert!(matches!(err, ServiceError::InvalidRequest(_)), "{err:?}");
        assert_eq!(err.to_string(), message);
    }
}

#[test]
fn lowercase_sort_direction_is_rejected_at_parse_time() {
    let err = serde_json::from_value::<QueryOptions>(json!({
        "dateRange": {"start": "2026-01-01", "end": "2026-01-31"},
        "dimensions": ["network"],
        "sortDirection": "desc"
    }))
    .expect_err("lowercase direction is not on the allow-list");
    assert!(
        err.to_string().contains("Invalid sort direction: desc"),
        "unexpected error: {err}"
    );
}
