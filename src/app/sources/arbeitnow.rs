//! Arbeitnow job board API
//!
//! The board has no server-side search, so listings are fetched page by page
//! and filtered locally against the query keywords and location.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::config::ClientConfig;
use super::http::HttpHandler;
use super::SourceAdapter;
use crate::app::fingerprint::SearchQuery;
use crate::app::models::{normalize, JobResult, JobType};
use crate::errors::{SourceError, SourceResult};

pub const NAME: &str = "arbeitnow";
const BOARD_URL: &str = "https://www.arbeitnow.com/api/job-board-api";
const REQUESTS_PER_MINUTE: u32 = 30;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Vec<ArbeitnowJob>,
}

#[derive(Debug, Deserialize)]
struct ArbeitnowJob {
    slug: String,
    #[serde(default)]
    company_name: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    remote: bool,
    #[serde(default)]
    url: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    job_types: Vec<String>,
    #[serde(default)]
    location: String,
    /// Unix seconds
    created_at: i64,
}

fn into_job(raw: ArbeitnowJob) -> JobResult {
    let posted = DateTime::<Utc>::from_timestamp(raw.created_at, 0).unwrap_or_else(Utc::now);
    let mut job = JobResult::new(raw.title, raw.company_name, NAME, raw.slug, posted);
    job.location = raw.location;
    job.description = raw.description;
    job.remote = raw.remote;
    job.job_type = raw
        .job_types
        .iter()
        .map(|t| JobType::parse_lenient(t))
        .find(|t| *t != JobType::Unknown)
        .unwrap_or_default();
    job.skills = raw.tags.into_iter().map(|t| t.to_lowercase()).collect();
    job.redirect_url = raw.url;
    job
}

/// Whether a listing matches every query keyword and the location
fn matches_query(job: &JobResult, query: &SearchQuery) -> bool {
    let haystack = normalize(&format!(
        "{} {} {}",
        job.title,
        job.description,
        job.skills.iter().cloned().collect::<Vec<_>>().join(" ")
    ));
    let keywords_match = query
        .keywords
        .iter()
        .map(|k| normalize(k))
        .filter(|k| !k.is_empty())
        .all(|k| haystack.contains(&k));

    let location = normalize(&query.location);
    let location_match = location.is_empty()
        || normalize(&job.location).contains(&location)
        || (job.remote && location == "remote");

    keywords_match && location_match
}

/// Arbeitnow adapter
#[derive(Debug)]
pub struct ArbeitnowSource {
    http: HttpHandler,
    rate_limit: u32,
}

impl ArbeitnowSource {
    pub fn new(config: &ClientConfig) -> SourceResult<Self> {
        Ok(Self {
            http: HttpHandler::new(NAME, config)?,
            rate_limit: REQUESTS_PER_MINUTE,
        })
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit = requests_per_minute;
        self
    }

    fn page_url(page: u32) -> SourceResult<Url> {
        let mut url = Url::parse(BOARD_URL).map_err(|e| SourceError::Misconfigured {
            source_name: NAME.to_string(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("page", &page.max(1).to_string());
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for ArbeitnowSource {
    fn name(&self) -> &str {
        NAME
    }

    fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    async fn search(
        &self,
        query: &SearchQuery,
        page: u32,
        limit: usize,
    ) -> SourceResult<Vec<JobResult>> {
        let url = Self::page_url(page)?;
        let envelope: Envelope = self.http.get_json(&url, &[]).await?;
        Ok(envelope
            .data
            .into_iter()
            .map(into_job)
            .filter(|job| matches_query(job, query))
            .take(limit)
            .collect())
    }

    async fn fetch_by_id(&self, external_id: &str) -> SourceResult<Option<JobResult>> {
        let envelope: Envelope = self.http.get_json(&Self::page_url(1)?, &[]).await?;
        Ok(envelope
            .data
            .into_iter()
            .find(|raw| raw.slug == external_id)
            .map(into_job))
    }
}
