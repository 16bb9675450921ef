//! Placeholder styles of the two backing stores.
//!
//! Builders always emit `?` markers; [`Dialect::render`] is the only place
//! that turns them into the target store's syntax.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `$1, $2, ...` (relational CRM store).
    Numbered,
    /// `?` markers bound in order (columnar warehouse).
    Positional,
}

impl Dialect {
    pub fn render(self, sql: &str) -> String {
        match self {
            Dialect::Numbered => rewrite_placeholders(sql),
            Dialect::Positional => sql.to_string(),
        }
    }

    /// Number of bind slots a rendered statement expects.
    pub fn placeholder_count(self, sql: &str) -> usize {
        match self {
            Dialect::Numbered => max_dollar_placeholder(sql),
            Dialect::Positional => sql.matches('?').count(),
        }
    }
}

fn rewrite_placeholders(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len() + 8);
    let mut index = 1;
    for ch in sql.chars() {
        if ch == '?' {
            result.push('$');
            result.push_str(&index.to_string());
            index += 1;
        } else {
            result.push(ch);
        }
    }
    result
}

pub(crate) fn max_dollar_placeholder(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }

        i += 1;
        if i >= bytes.len() || !bytes[i].is_ascii_digit() {
            continue;
        }

        let mut value = 0usize;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            value = value * 10 + (bytes[i] - b'0') as usize;
            i += 1;
        }

        max = max.max(value);
    }

    max
}
