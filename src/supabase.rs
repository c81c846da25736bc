use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{SetupError, StoreError};
use crate::models::CanonicalJobListing;
use crate::store::ListingStore;

const TABLE: &str = "job_listings";

/// `job_listings` table behind a Supabase (PostgREST) endpoint.
#[derive(Debug)]
pub struct SupabaseStore {
    base_url: String,
    client: Client,
}

impl SupabaseStore {
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, SetupError> {
        if url.trim().is_empty() || api_key.trim().is_empty() {
            return Err(SetupError::Config(
                "SUPABASE_URL and SUPABASE_ANON_KEY must both be set".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key.trim())
            .map_err(|e| SetupError::Config(format!("Invalid Supabase key: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|e| SetupError::Config(format!("Invalid Supabase key: {}", e)))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SetupError::Unreachable(StoreError::Http(e)))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, TABLE)
    }
}

fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Postgres refuses to touch one row twice in a single upsert, so a
/// repeated id keeps its first position and its last values.
fn last_per_id(listings: &[CanonicalJobListing]) -> Vec<&CanonicalJobListing> {
    let mut rows: Vec<&CanonicalJobListing> = Vec::with_capacity(listings.len());
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for listing in listings {
        match positions.get(listing.id.as_str()) {
            Some(&at) => rows[at] = listing,
            None => {
                positions.insert(listing.id.as_str(), rows.len());
                rows.push(listing);
            }
        }
    }
    rows
}

impl ListingStore for SupabaseStore {
    fn probe(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(self.table_url())
            .query(&[("select", "id"), ("limit", "1")])
            .send()?;
        check(response)?;
        Ok(())
    }

    fn upsert(&self, listings: &[CanonicalJobListing], conflict_key: &str) -> Result<usize, StoreError> {
        let response = self
            .client
            .post(self.table_url())
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&last_per_id(listings))
            .send()?;
        check(response)?;
        Ok(listings.len())
    }

    fn describe(&self) -> String {
        format!("supabase:{}", self.base_url)
    }
}
