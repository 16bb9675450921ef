#![allow(dead_code)]

use async_trait::async_trait;
use drilldown::{
    executor::QueryExecutor,
    query::{QueryOptions, SqlQuery, TableFilter},
    time::DateRange,
};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Mutex, time::Duration};

/// How a stub store answers statements containing a given fragment.
#[derive(Clone)]
pub enum Reply {
    Rows(Vec<Value>),
    Fail(&'static str),
    Hang,
}

/// In-memory store that answers by SQL fragment and records every statement.
#[derive(Default)]
pub struct StubStore {
    replies: Vec<(&'static str, Reply)>,
    seen: Mutex<Vec<SqlQuery>>,
}

impl StubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, fragment: &'static str, reply: Reply) -> Self {
        self.replies.push((fragment, reply));
        self
    }

    pub fn seen(&self) -> Vec<SqlQuery> {
        self.seen.lock().expect("stub lock poisoned").clone()
    }
}

#[async_trait]
impl QueryExecutor for StubStore {
    async fn fetch(&self, query: &SqlQuery) -> anyhow::Result<Vec<Value>> {
        self.seen
            .lock()
            .expect("stub lock poisoned")
            .push(query.clone());

        let reply = self
            .replies
            .iter()
            .find(|(fragment, _)| query.sql.contains(fragment))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail(message)) => Err(anyhow::anyhow!(message)),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}

pub fn january() -> DateRange {
    DateRange::parse("2026-01-01", "2026-01-31").expect("valid range")
}

pub fn options(dimensions: &[&str], depth: usize) -> QueryOptions {
    QueryOptions {
        date_range: january(),
        dimensions: dimensions.iter().map(|dim| dim.to_string()).collect(),
        depth,
        parent_filters: BTreeMap::new(),
        filters: Vec::new(),
        sort_by: None,
        sort_direction: None,
        limit: None,
    }
}

pub fn parents(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

pub fn filter(value: Value) -> TableFilter {
    serde_json::from_value(value).expect("valid table filter")
}
