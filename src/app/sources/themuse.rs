//! The Muse public jobs API

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

pub const NAME: &str = "themuse";
const BASE_URL: &str = "https://www.themuse.com/api/public/";
const REQUESTS_PER_MINUTE: u32 = 60;

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<MuseJob>,
}

#[derive(Debug, Deserialize)]
struct MuseJob {
    id: u64,
    name: String,
    #[serde(default)]
    contents: String,
    publication_date: DateTime<Utc>,
    #[serde(default)]
    locations: Vec<Named>,
    #[serde(default)]
    levels: Vec<Named>,
    #[serde(default)]
    categories: Vec<Named>,
    company: Option<Named>,
    refs: Option<Refs>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Refs {
    #[serde(default)]
    landing_page: String,
}

fn into_job(raw: MuseJob) -> JobResult {
    let location = raw
        .locations
        .iter()
        .map(|l| l.name.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    let mut job = JobResult::new(
        raw.name,
        raw.company.map(|c| c.name).unwrap_or_default(),
        NAME,
        raw.id.to_string(),
        raw.publication_date,
    );
    job.remote = raw
        .locations
        .iter()
        .any(|l| l.name.to_lowercase().contains("remote"));
    job.location = location;
    job.description = raw.contents;
    job.job_type = if raw.levels.iter().any(|l| l.name.eq_ignore_ascii_case("internship")) {
        JobType::Internship
    } else {
        JobType::FullTime
    };
    job.skills = raw
        .categories
        .into_iter()
        .map(|c| c.name.to_lowercase())
        .collect();
    job.redirect_url = raw.refs.map(|r| r.landing_page).unwrap_or_default();
    job
}

/// The Muse filters by category and location only, so keywords are matched
/// against the title locally
fn title_matches(job: &JobResult, query: &SearchQuery) -> bool {
    let title = normalize(&job.title);
    let keywords: Vec<String> = query
        .keywords
        .iter()
        .map(|k| normalize(k))
        .filter(|k| !k.is_empty())
        .collect();
    keywords.is_empty() || keywords.iter().any(|k| title.contains(k.as_str()))
}

/// The Muse adapter
#[derive(Debug)]
pub struct TheMuseSource {
    http: HttpHandler,
    base_url: Url,
    rate_limit: u32,
}

impl TheMuseSource {
    pub fn new(config: &ClientConfig) -> SourceResult<Self> {
        let base_url = Url::parse(BASE_URL).map_err(|e| SourceError::Misconfigured {
            source_name: NAME.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            http: HttpHandler::new(NAME, config)?,
            base_url,
            rate_limit: REQUESTS_PER_MINUTE,
        })
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit = requests_per_minute;
        self
    }

    fn endpoint(&self, path: &str) -> SourceResult<Url> {
        self.base_url.join(path).map_err(|e| SourceError::Misconfigured {
            source_name: NAME.to_string(),
            reason: format!("invalid endpoint {}: {}", path, e),
        })
    }

    fn search_url(&self, query: &SearchQuery, page: u32) -> SourceResult<Url> {
        let mut url = self.endpoint("jobs")?;
        {
            let mut pairs = url.query_pairs_mut();
            // The Muse pages are zero-based
            pairs.append_pair("page", &page.saturating_sub(1).to_string());
            if !query.location.trim().is_empty() {
                pairs.append_pair("location", query.location.trim());
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for TheMuseSource {
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
        let url = self.search_url(query, page)?;
        let page: Page = self.http.get_json(&url, &[]).await?;
        Ok(page
            .results
            .into_iter()
            .map(into_job)
            .filter(|job| title_matches(job, query))
            .take(limit)
            .collect())
    }

    async fn fetch_by_id(&self, external_id: &str) -> SourceResult<Option<JobResult>> {
        let url = self.endpoint(&format!("jobs/{}", external_id))?;
        match self.http.get_json::<MuseJob>(&url, &[]).await {
            Ok(raw) => Ok(Some(into_job(raw))),
            Err(SourceError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "page": 0,
        "page_count": 10,
        "results": [{
            "id": 9001,
            "name": "Data Science Intern",
            "contents": "<p>Learn</p>",
            "publication_date": "2024-05-18T00:00:00Z",
            "locations": [{"name": "New York, NY"}, {"name": "Flexible / Remote"}],
            "levels": [{"name": "Internship", "short_name": "internship"}],
            "categories": [{"name": "Data Science"}],
            "company": {"id": 1, "name": "Initech"},
            "refs": {"landing_page": "https://www.themuse.com/jobs/initech/data-science-intern"}
        }]
    }"#;

    #[test]
    fn test_maps_payload() {
        let page: Page = serde_json::from_str(FIXTURE).unwrap();
        let job = into_job(page.results.into_iter().next().unwrap());

        assert_eq!(job.company, "Initech");
        assert_eq!(job.job_type, JobType::Internship);
        assert!(job.remote);
        assert_eq!(job.location, "New York, NY; Flexible / Remote");
        assert!(job.skills.contains("data science"));
    }

    #[test]
    fn test_title_matching() {
        let page: Page = serde_json::from_str(FIXTURE).unwrap();
        let job = into_job(page.results.into_iter().next().unwrap());

        assert!(title_matches(&job, &SearchQuery::new(&["data", "rust"], "")));
        assert!(!title_matches(&job, &SearchQuery::new(&["rust"], "")));
        assert!(title_matches(&job, &SearchQuery::new::<&str>(&[], "")));
    }

    #[test]
    fn test_search_url_is_zero_based() {
        let source = TheMuseSource::new(&ClientConfig::default()).unwrap();
        let url = source
            .search_url(&SearchQuery::new(&["data"], "New York"), 1)
            .unwrap();
        assert_eq!(url.path(), "/api/public/jobs");
        assert_eq!(url.query(), Some("page=0&location=New+York"));
    }
}
