use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::error::ApiError;
use crate::config::Config;

/// Shared query-string shape for every list endpoint:
/// `{after?, before?, limit?, sort?, ...filter}`.
#[derive(Debug, Deserialize, Default)]
pub struct QueryParams {
    pub after: Option<String>,
    pub before: Option<String>,
    pub limit: Option<usize>,
    pub sort: Option<String>,
    #[serde(flatten)]
    pub filter: HashMap<String, String>,
}

/// Applies filter, sort, and id-cursor pagination to `items`, each
/// converted to its DTO shape beforehand so `id_of` can read a plain
/// string id. Equality for filters is done by stringifying both sides.
pub fn paginate<T: Serialize + Clone>(items: Vec<T>, id_of: impl Fn(&T) -> String, query: &QueryParams, config: &Config) -> Result<Vec<T>, ApiError> {
    if query.filter.len() > config.api_max_filter_fields {
        return Err(ApiError::InvalidQuery(format!(
            "too many filter fields: {} exceeds apiMaxFilterFields={}",
            query.filter.len(),
            config.api_max_filter_fields
        )));
    }

    let limit = query.limit.unwrap_or(config.api_default_page_limit).min(config.api_max_page_limit);

    let mut filtered: Vec<T> = items
        .into_iter()
        .filter(|item| {
            let value = serde_json::to_value(item).unwrap_or(Value::Null);
            query.filter.iter().all(|(k, v)| stringify_field(&value, k).as_deref() == Some(v.as_str()))
        })
        .collect();

    if let Some(sort) = &query.sort {
        apply_sort(&mut filtered, sort)?;
    }

    if let Some(after) = &query.after {
        let pos = filtered.iter().position(|item| &id_of(item) == after);
        let start = pos.map(|p| p + 1).unwrap_or(filtered.len());
        return Ok(filtered.into_iter().skip(start).take(limit).collect());
    }
    if let Some(before) = &query.before {
        let pos = filtered.iter().position(|item| &id_of(item) == before).unwrap_or(0);
        let start = pos.saturating_sub(limit);
        return Ok(filtered[start..pos].to_vec());
    }
    Ok(filtered.into_iter().take(limit).collect())
}

fn apply_sort<T: Serialize>(items: &mut [T], sort: &str) -> Result<(), ApiError> {
    let (field, direction) = sort
        .split_once(':')
        .ok_or_else(|| ApiError::InvalidQuery(format!("sort must be \"field:asc|desc\", got {sort:?}")))?;
    let descending = match direction {
        "asc" => false,
        "desc" => true,
        other => return Err(ApiError::InvalidQuery(format!("sort direction must be asc or desc, got {other:?}"))),
    };
    items.sort_by(|a, b| {
        let av = serde_json::to_value(a).ok().and_then(|v| stringify_field(&v, field)).unwrap_or_default();
        let bv = serde_json::to_value(b).ok().and_then(|v| stringify_field(&v, field)).unwrap_or_default();
        if descending { bv.cmp(&av) } else { av.cmp(&bv) }
    });
    Ok(())
}

fn stringify_field(value: &Value, field: &str) -> Option<String> {
    let v = value.get(field)?;
    Some(match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
