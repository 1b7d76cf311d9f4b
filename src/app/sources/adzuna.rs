//! Adzuna job search API
//!
//! Quota-constrained: the free tier allows very few calls, so searches are
//! normally routed through the batch queue.

use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::config::ClientConfig;
use super::http::HttpHandler;
use super::SourceAdapter;
use crate::app::fingerprint::SearchQuery;
use crate::app::models::{JobResult, JobType};
use crate::constants::env as env_constants;
use crate::errors::{SourceError, SourceResult};

pub const NAME: &str = "adzuna";
const BASE_URL: &str = "https://api.adzuna.com/v1/api/jobs/";
const DEFAULT_COUNTRY: &str = "in";
const REQUESTS_PER_MINUTE: u32 = 25;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<AdzunaJob>,
}

#[derive(Debug, Deserialize)]
struct AdzunaJob {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    created: DateTime<Utc>,
    #[serde(default)]
    redirect_url: String,
    company: Option<DisplayName>,
    location: Option<DisplayName>,
    salary_min: Option<f64>,
    salary_max: Option<f64>,
    contract_time: Option<String>,
    contract_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DisplayName {
    #[serde(default)]
    display_name: String,
}

fn into_job(raw: AdzunaJob) -> JobResult {
    let mut job = JobResult::new(
        raw.title,
        raw.company.map(|c| c.display_name).unwrap_or_default(),
        NAME,
        raw.id,
        raw.created,
    );
    job.location = raw.location.map(|l| l.display_name).unwrap_or_default();
    job.description = raw.description;
    job.remote = job.location.to_lowercase().contains("remote")
        || job.description.to_lowercase().contains("work from home");
    job.salary_min = raw.salary_min.map(|s| s.round() as i64);
    job.salary_max = raw.salary_max.map(|s| s.round() as i64);
    // contract_type "contract" wins over contract_time
    job.job_type = match raw.contract_type.as_deref().map(JobType::parse_lenient) {
        Some(JobType::Contract) => JobType::Contract,
        _ => raw
            .contract_time
            .as_deref()
            .map(JobType::parse_lenient)
            .unwrap_or_default(),
    };
    job.redirect_url = raw.redirect_url;
    job
}

/// Adzuna adapter
#[derive(Debug)]
pub struct AdzunaSource {
    http: HttpHandler,
    app_id: String,
    app_key: String,
    country: String,
    rate_limit: u32,
}

impl AdzunaSource {
    pub fn new(
        config: &ClientConfig,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
        country: Option<String>,
    ) -> SourceResult<Self> {
        Ok(Self {
            http: HttpHandler::new(NAME, config)?,
            app_id: app_id.into(),
            app_key: app_key.into(),
            country: country.unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            rate_limit: REQUESTS_PER_MINUTE,
        })
    }

    /// Build from `ADZUNA_APP_ID` / `ADZUNA_APP_KEY`
    pub fn from_env(config: &ClientConfig, country: Option<String>) -> SourceResult<Self> {
        let app_id = env::var(env_constants::ADZUNA_APP_ID)
            .map_err(|_| missing(env_constants::ADZUNA_APP_ID))?;
        let app_key = env::var(env_constants::ADZUNA_APP_KEY)
            .map_err(|_| missing(env_constants::ADZUNA_APP_KEY))?;
        Self::new(config, app_id, app_key, country)
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit = requests_per_minute;
        self
    }

    fn search_url(&self, query: &SearchQuery, page: u32, limit: usize) -> SourceResult<Url> {
        let mut url = Url::parse(BASE_URL)
            .and_then(|base| base.join(&format!("{}/search/{}", self.country, page.max(1))))
            .map_err(|e| SourceError::Misconfigured {
                source_name: NAME.to_string(),
                reason: format!("invalid search URL: {}", e),
            })?;

        url.query_pairs_mut()
            .append_pair("app_id", &self.app_id)
            .append_pair("app_key", &self.app_key)
            .append_pair("results_per_page", &limit.clamp(1, 50).to_string())
            .append_pair("what", &query.keyword_string())
            .append_pair("content-type", "application/json");
        if !query.location.trim().is_empty() {
            url.query_pairs_mut().append_pair("where", query.location.trim());
        }
        Ok(url)
    }
}

fn missing(var: &str) -> SourceError {
    SourceError::Misconfigured {
        source_name: NAME.to_string(),
        reason: format!("environment variable {} is not set", var),
    }
}

#[async_trait]
impl SourceAdapter for AdzunaSource {
    fn name(&self) -> &str {
        NAME
    }

    fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    fn is_quota_constrained(&self) -> bool {
        true
    }

    async fn search(
        &self,
        query: &SearchQuery,
        page: u32,
        limit: usize,
    ) -> SourceResult<Vec<JobResult>> {
        let url = self.search_url(query, page, limit)?;
        let response: SearchResponse = self.http.get_json(&url, &[]).await?;
        Ok(response.results.into_iter().map(into_job).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "count": 2,
        "results": [
            {
                "id": "4242",
                "title": "Senior Python Developer",
                "description": "Django and PostgreSQL",
                "created": "2024-05-20T08:30:00Z",
                "redirect_url": "https://www.adzuna.in/land/ad/4242",
                "company": {"display_name": "Acme Analytics"},
                "location": {"display_name": "Bangalore, Karnataka"},
                "salary_min": 1200000.0,
                "salary_max": 1800000.4,
                "contract_time": "full_time",
                "contract_type": "permanent"
            },
            {
                "id": "4243",
                "title": "Python Contractor",
                "created": "2024-05-19T08:30:00Z",
                "contract_type": "contract"
            }
        ]
    }"#;

    #[test]
    fn test_maps_payload() {
        let response: SearchResponse = serde_json::from_str(FIXTURE).unwrap();
        let jobs: Vec<JobResult> = response.results.into_iter().map(into_job).collect();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].company, "Acme Analytics");
        assert_eq!(jobs[0].location, "Bangalore, Karnataka");
        assert_eq!(jobs[0].salary_max, Some(1_800_000));
        assert_eq!(jobs[0].job_type, JobType::FullTime);
        assert_eq!(jobs[0].source, NAME);
        assert_eq!(jobs[1].job_type, JobType::Contract);
        assert_eq!(jobs[1].company, "");
    }

    #[test]
    fn test_search_url() {
        let source =
            AdzunaSource::new(&ClientConfig::default(), "id", "key", Some("gb".to_string())).unwrap();
        let query = SearchQuery::new(&["python", "developer"], "London");
        let url = source.search_url(&query, 2, 500).unwrap();

        assert!(url.as_str().starts_with("https://api.adzuna.com/v1/api/jobs/gb/search/2?"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("what".to_string(), "python developer".to_string())));
        assert!(pairs.contains(&("where".to_string(), "London".to_string())));
        assert!(pairs.contains(&("results_per_page".to_string(), "50".to_string())));
    }

    #[test]
    fn test_quota_constrained() {
        let source = AdzunaSource::new(&ClientConfig::default(), "id", "key", None).unwrap();
        assert!(source.is_quota_constrained());
        assert_eq!(source.rate_limit(), REQUESTS_PER_MINUTE);
    }
}
