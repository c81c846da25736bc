use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One untyped row as a source provider hands it over.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Column used by every store to decide insert-vs-replace.
pub const CONFLICT_KEY: &str = "id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalJobListing {
    pub id: String,

    // Count-like columns
    pub company_reviews_count: Option<i64>,
    pub vacancy_count: Option<i64>,
    pub min_amount: Option<i64>,
    pub max_amount: Option<i64>,

    pub company_rating: Option<f64>,

    // List-like columns
    pub skills: Option<Vec<String>>,
    pub emails: Option<Vec<String>>,

    pub site: Option<String>,
    pub job_url: Option<String>,
    pub job_url_direct: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub date_posted: Option<String>,
    pub job_type: Option<String>,
    pub salary_source: Option<String>,
    pub interval: Option<String>,
    pub currency: Option<String>,
    pub is_remote: Option<String>,
    pub job_level: Option<String>,
    pub job_function: Option<String>,
    pub listing_type: Option<String>,
    pub description: Option<String>,
    pub company_industry: Option<String>,
    pub company_url: Option<String>,
    pub company_logo: Option<String>,
    pub company_url_direct: Option<String>,
    pub company_addresses: Option<String>,
    pub company_num_employees: Option<String>,
    pub company_revenue: Option<String>,
    pub company_description: Option<String>,
    pub experience_range: Option<String>,
    pub work_from_home_type: Option<String>,

    /// Set when the record was normalized, never taken from the source.
    pub scraped_at: DateTime<Utc>,

    /// Columns a provider emitted that have no dedicated field.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Option<String>>,
}

impl CanonicalJobListing {
    /// Every named column, in storage order.
    pub const COLUMNS: [&'static str; 35] = [
        "id",
        "company_reviews_count",
        "vacancy_count",
        "min_amount",
        "max_amount",
        "company_rating",
        "skills",
        "emails",
        "site",
        "job_url",
        "job_url_direct",
        "title",
        "company",
        "location",
        "date_posted",
        "job_type",
        "salary_source",
        "interval",
        "currency",
        "is_remote",
        "job_level",
        "job_function",
        "listing_type",
        "description",
        "company_industry",
        "company_url",
        "company_logo",
        "company_url_direct",
        "company_addresses",
        "company_num_employees",
        "company_revenue",
        "company_description",
        "experience_range",
        "work_from_home_type",
        "scraped_at",
    ];

    /// Count-like columns: parsed as float, truncated to an integer.
    pub const COUNT_COLUMNS: [&'static str; 4] = [
        "company_reviews_count",
        "vacancy_count",
        "min_amount",
        "max_amount",
    ];

    /// List-like columns: comma-delimited strings become sequences.
    pub const LIST_COLUMNS: [&'static str; 2] = ["skills", "emails"];

    pub fn is_known_column(name: &str) -> bool {
        Self::COLUMNS.contains(&name)
    }
}

/// What a provider is asked for when fetching one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    pub site_names: Vec<String>,
    pub search_term: String,
    pub location: String,
    pub results_wanted: usize,
    pub hours_old: u32,
    pub country_indeed: String,
}
