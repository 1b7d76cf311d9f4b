//! JSearch (RapidAPI) job search
//!
//! Quota-constrained like Adzuna. Authenticates with `X-RapidAPI-Key`.

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

pub const NAME: &str = "jsearch";
const HOST: &str = "jsearch.p.rapidapi.com";
const REQUESTS_PER_MINUTE: u32 = 10;
/// JSearch returns ten listings per page
const PAGE_SIZE: usize = 10;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Vec<JSearchJob>,
}

#[derive(Debug, Deserialize)]
struct JSearchJob {
    job_id: String,
    job_title: String,
    #[serde(default)]
    employer_name: String,
    job_city: Option<String>,
    job_country: Option<String>,
    #[serde(default)]
    job_description: String,
    #[serde(default)]
    job_is_remote: bool,
    job_employment_type: Option<String>,
    job_posted_at_datetime_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    job_apply_link: String,
    job_min_salary: Option<f64>,
    job_max_salary: Option<f64>,
    job_required_skills: Option<Vec<String>>,
}

fn into_job(raw: JSearchJob) -> JobResult {
    let location = [raw.job_city.as_deref(), raw.job_country.as_deref()]
        .iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ");

    let mut job = JobResult::new(
        raw.job_title,
        raw.employer_name,
        NAME,
        raw.job_id,
        raw.job_posted_at_datetime_utc.unwrap_or_else(Utc::now),
    );
    job.location = location;
    job.description = raw.job_description;
    job.remote = raw.job_is_remote;
    job.job_type = raw
        .job_employment_type
        .as_deref()
        .map(JobType::parse_lenient)
        .unwrap_or_default();
    job.salary_min = raw.job_min_salary.map(|s| s.round() as i64);
    job.salary_max = raw.job_max_salary.map(|s| s.round() as i64);
    job.skills = raw
        .job_required_skills
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    job.redirect_url = raw.job_apply_link;
    job
}

/// JSearch adapter
#[derive(Debug)]
pub struct JSearchSource {
    http: HttpHandler,
    api_key: String,
    base_url: Url,
    rate_limit: u32,
}

impl JSearchSource {
    pub fn new(config: &ClientConfig, api_key: impl Into<String>) -> SourceResult<Self> {
        let base_url = Url::parse(&format!("https://{}/", HOST)).map_err(|e| {
            SourceError::Misconfigured {
                source_name: NAME.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            http: HttpHandler::new(NAME, config)?,
            api_key: api_key.into(),
            base_url,
            rate_limit: REQUESTS_PER_MINUTE,
        })
    }

    /// Build from `JSEARCH_API_KEY`
    pub fn from_env(config: &ClientConfig) -> SourceResult<Self> {
        let api_key =
            env::var(env_constants::JSEARCH_API_KEY).map_err(|_| SourceError::Misconfigured {
                source_name: NAME.to_string(),
                reason: format!(
                    "environment variable {} is not set",
                    env_constants::JSEARCH_API_KEY
                ),
            })?;
        Self::new(config, api_key)
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit = requests_per_minute;
        self
    }

    fn endpoint(&self, path: &str) -> SourceResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SourceError::Misconfigured {
                source_name: NAME.to_string(),
                reason: format!("invalid endpoint {}: {}", path, e),
            })
    }

    fn search_url(&self, query: &SearchQuery, page: u32, limit: usize) -> SourceResult<Url> {
        let mut url = self.endpoint("search")?;
        let text = if query.location.trim().is_empty() {
            query.keyword_string()
        } else {
            format!("{} in {}", query.keyword_string(), query.location.trim())
        };
        let pages = limit.div_ceil(PAGE_SIZE).clamp(1, 5);

        url.query_pairs_mut()
            .append_pair("query", &text)
            .append_pair("page", &page.max(1).to_string())
            .append_pair("num_pages", &pages.to_string());
        Ok(url)
    }

    fn headers(&self) -> [(&str, &str); 2] {
        [("X-RapidAPI-Key", self.api_key.as_str()), ("X-RapidAPI-Host", HOST)]
    }
}

#[async_trait]
impl SourceAdapter for JSearchSource {
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
        let envelope: Envelope = self.http.get_json(&url, &self.headers()).await?;
        Ok(envelope.data.into_iter().take(limit).map(into_job).collect())
    }

    async fn fetch_by_id(&self, external_id: &str) -> SourceResult<Option<JobResult>> {
        let mut url = self.endpoint("job-details")?;
        url.query_pairs_mut().append_pair("job_id", external_id);
        let envelope: Envelope = self.http.get_json(&url, &self.headers()).await?;
        Ok(envelope.data.into_iter().next().map(into_job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "status": "OK",
        "data": [
            {
                "job_id": "xYz==",
                "job_title": "React Developer",
                "employer_name": "Globex",
                "job_city": "Pune",
                "job_country": "IN",
                "job_description": "Build UIs",
                "job_is_remote": true,
                "job_employment_type": "FULLTIME",
                "job_posted_at_datetime_utc": "2024-05-21T10:00:00.000Z",
                "job_apply_link": "https://globex.example/apply",
                "job_min_salary": null,
                "job_max_salary": 95000,
                "job_required_skills": ["React", " TypeScript "]
            }
        ]
    }"#;

    #[test]
    fn test_maps_payload() {
        let envelope: Envelope = serde_json::from_str(FIXTURE).unwrap();
        let job = into_job(envelope.data.into_iter().next().unwrap());

        assert_eq!(job.title, "React Developer");
        assert_eq!(job.location, "Pune, IN");
        assert!(job.remote);
        assert_eq!(job.job_type, JobType::FullTime);
        assert_eq!(job.salary_min, None);
        assert_eq!(job.salary_max, Some(95_000));
        assert!(job.skills.contains("typescript"));
        assert_eq!(job.external_id, "xYz==");
    }

    #[test]
    fn test_search_url() {
        let source = JSearchSource::new(&ClientConfig::default(), "secret").unwrap();
        let query = SearchQuery::new(&["react"], "Pune");
        let url = source.search_url(&query, 1, 25).unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/search");
        assert!(pairs.contains(&("query".to_string(), "react in Pune".to_string())));
        assert!(pairs.contains(&("num_pages".to_string(), "3".to_string())));
        assert_eq!(source.headers()[1], ("X-RapidAPI-Host", HOST));
    }
}
