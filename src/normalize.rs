//! Coercion of provider rows into [`CanonicalJobListing`].
//!
//! Normalization never fails on a malformed field: anything that cannot be
//! read as its target type becomes `None`. The only rejection is a row with
//! no usable `id`, since it could not be upserted.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{CanonicalJobListing, RawRecord};

/// Strings a dataframe-backed provider emits for "not available".
const MISSING_SENTINELS: [&str; 3] = ["nan", "nat", "<na>"];

/// Stamps with the wall clock; the orchestrator passes its own clock to [`normalize_at`].
#[cfg(test)]
pub fn normalize(raw: &RawRecord) -> Option<CanonicalJobListing> {
    normalize_at(raw, Utc::now())
}

pub fn normalize_at(raw: &RawRecord, scraped_at: DateTime<Utc>) -> Option<CanonicalJobListing> {
    let id = raw
        .get("id")
        .and_then(coerce_text)
        .filter(|id| !id.trim().is_empty())?;

    let text = |key: &str| raw.get(key).and_then(coerce_text);
    let count = |key: &str| raw.get(key).and_then(coerce_count);
    let list = |key: &str| raw.get(key).and_then(coerce_list);

    let extra = raw
        .iter()
        .filter(|(key, _)| !CanonicalJobListing::is_known_column(key))
        .map(|(key, value)| (key.clone(), coerce_text(value)))
        .collect();

    Some(CanonicalJobListing {
        id,
        company_reviews_count: count("company_reviews_count"),
        vacancy_count: count("vacancy_count"),
        min_amount: count("min_amount"),
        max_amount: count("max_amount"),
        company_rating: raw.get("company_rating").and_then(coerce_float),
        skills: list("skills"),
        emails: list("emails"),
        site: text("site"),
        job_url: text("job_url"),
        job_url_direct: text("job_url_direct"),
        title: text("title"),
        company: text("company"),
        location: text("location"),
        date_posted: text("date_posted"),
        job_type: text("job_type"),
        salary_source: text("salary_source"),
        interval: text("interval"),
        currency: text("currency"),
        is_remote: text("is_remote"),
        job_level: text("job_level"),
        job_function: text("job_function"),
        listing_type: text("listing_type"),
        description: text("description"),
        company_industry: text("company_industry"),
        company_url: text("company_url"),
        company_logo: text("company_logo"),
        company_url_direct: text("company_url_direct"),
        company_addresses: text("company_addresses"),
        company_num_employees: text("company_num_employees"),
        company_revenue: text("company_revenue"),
        company_description: text("company_description"),
        experience_range: text("experience_range"),
        work_from_home_type: text("work_from_home_type"),
        scraped_at,
        extra,
    })
}

pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let trimmed = s.trim();
            MISSING_SENTINELS
                .iter()
                .any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel))
        }
        _ => false,
    }
}

/// Decimal text of a scalar, or `None` for anything that is not a number or string.
fn numeric_text(value: &Value) -> Option<String> {
    if is_missing(value) {
        return None;
    }
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Float parse first, then truncation, so `"12.0"` and `12.7` both land on 12.
pub fn coerce_count(value: &Value) -> Option<i64> {
    let parsed = coerce_float(value)?.trunc();
    // i64::MAX is not representable as f64; the cast would saturate
    if parsed < i64::MIN as f64 || parsed >= i64::MAX as f64 {
        return None;
    }
    Some(parsed as i64)
}

pub fn coerce_float(value: &Value) -> Option<f64> {
    numeric_text(value)?
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
}

pub fn coerce_list(value: &Value) -> Option<Vec<String>> {
    if is_missing(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect(),
        ),
        Value::Array(items) => Some(items.iter().filter_map(coerce_text).collect()),
        _ => None,
    }
}

pub fn coerce_text(value: &Value) -> Option<String> {
    if is_missing(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Nested structures keep their JSON form
        other => Some(other.to_string()),
    }
}
