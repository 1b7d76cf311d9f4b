//! Remotive public remote-jobs API

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::config::ClientConfig;
use super::http::HttpHandler;
use super::SourceAdapter;
use crate::app::fingerprint::SearchQuery;
use crate::app::models::{JobResult, JobType};
use crate::errors::{SourceError, SourceResult};

pub const NAME: &str = "remotive";
const SEARCH_URL: &str = "https://remotive.com/api/remote-jobs";
const REQUESTS_PER_MINUTE: u32 = 30;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    jobs: Vec<RemotiveJob>,
}

#[derive(Debug, Deserialize)]
struct RemotiveJob {
    id: u64,
    #[serde(default)]
    url: String,
    title: String,
    #[serde(default)]
    company_name: String,
    #[serde(default)]
    tags: Vec<String>,
    job_type: Option<String>,
    /// Naive timestamp, UTC by convention
    publication_date: String,
    #[serde(default)]
    candidate_required_location: String,
    #[serde(default)]
    description: String,
}

fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn into_job(raw: RemotiveJob) -> SourceResult<JobResult> {
    let posted = parse_published(&raw.publication_date).ok_or_else(|| SourceError::Decode {
        source_name: NAME.to_string(),
        reason: format!("bad publication_date {:?}", raw.publication_date),
    })?;

    let mut job = JobResult::new(raw.title, raw.company_name, NAME, raw.id.to_string(), posted);
    job.location = raw.candidate_required_location;
    job.description = raw.description;
    job.remote = true;
    job.job_type = raw
        .job_type
        .as_deref()
        .map(JobType::parse_lenient)
        .unwrap_or_default();
    job.skills = raw.tags.into_iter().map(|t| t.to_lowercase()).collect();
    job.redirect_url = raw.url;
    Ok(job)
}

/// Remotive adapter
#[derive(Debug)]
pub struct RemotiveSource {
    http: HttpHandler,
    rate_limit: u32,
}

impl RemotiveSource {
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

    fn search_url(query: &SearchQuery, limit: usize) -> SourceResult<Url> {
        let mut url = Url::parse(SEARCH_URL).map_err(|e| SourceError::Misconfigured {
            source_name: NAME.to_string(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("search", &query.keyword_string())
            .append_pair("limit", &limit.max(1).to_string());
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for RemotiveSource {
    fn name(&self) -> &str {
        NAME
    }

    fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    /// Remotive has no paging; later pages are empty
    async fn search(
        &self,
        query: &SearchQuery,
        page: u32,
        limit: usize,
    ) -> SourceResult<Vec<JobResult>> {
        if page > 1 {
            return Ok(Vec::new());
        }
        let url = Self::search_url(query, limit)?;
        let envelope: Envelope = self.http.get_json(&url, &[]).await?;

        let mut jobs = Vec::with_capacity(envelope.jobs.len());
        for raw in envelope.jobs.into_iter().take(limit) {
            match into_job(raw) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::debug!("Skipping Remotive listing: {}", e),
            }
        }
        Ok(jobs)
    }
}
