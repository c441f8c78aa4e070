//! Per-connection audience resolution.
//!
//! Runs once when the websocket is opened. The result is deduplicated and
//! never empty: if the request carries no usable value the connection falls
//! back to the default audience.

use std::collections::BTreeSet;

use axum::http::HeaderMap;

use pgws_infra::AudienceSource;
use pgws_infra::config::DEFAULT_AUDIENCE;

pub fn resolve(source: &AudienceSource, headers: &HeaderMap, query: &[(String, String)]) -> Vec<String> {
    let raw: Vec<String> = match source {
        AudienceSource::Fixed(list) => list.clone(),
        AudienceSource::Query(param) => query
            .iter()
            .filter(|(key, _)| key == param)
            .flat_map(|(_, value)| split(value))
            .collect(),
        AudienceSource::Header(name) => headers
            .get_all(name.as_str())
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(split)
            .collect(),
    };

    let unique: BTreeSet<String> = raw.into_iter().collect();
    if unique.is_empty() {
        return vec![DEFAULT_AUDIENCE.to_string()];
    }
    unique.into_iter().collect()
}

fn split(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
