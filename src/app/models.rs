//! Canonical job listing types
//!
//! Every source adapter translates its upstream payload into [`JobResult`],
//! which is also the unit stored in cache entries and merged by the
//! aggregator.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Employment type of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FullTime,
    PartTime,
    Contract,
    Internship,
    Temporary,
    #[default]
    Unknown,
}

impl JobType {
    /// Map a free-form upstream label onto a job type
    ///
    /// Upstreams disagree on spelling ("Full-time", "FULLTIME", "full_time"),
    /// so comparison ignores case and separators.
    pub fn parse_lenient(label: &str) -> Self {
        let compact: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match compact.as_str() {
            "fulltime" | "permanent" => JobType::FullTime,
            "parttime" => JobType::PartTime,
            "contract" | "contractor" | "freelance" => JobType::Contract,
            "internship" | "intern" => JobType::Internship,
            "temporary" | "temp" => JobType::Temporary,
            _ => JobType::Unknown,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobType::FullTime => "full_time",
            JobType::PartTime => "part_time",
            JobType::Contract => "contract",
            JobType::Internship => "internship",
            JobType::Temporary => "temporary",
            JobType::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// A single job listing in canonical form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    /// Skills are a set; `BTreeSet` keeps serialization deterministic
    pub skills: BTreeSet<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub posted_date: DateTime<Utc>,
    pub job_type: JobType,
    pub remote: bool,
    /// Name of the source adapter that produced this listing
    pub source: String,
    pub external_id: String,
    pub redirect_url: String,
}

impl JobResult {
    /// Create a listing with the required identity fields; the rest default
    pub fn new(
        title: impl Into<String>,
        company: impl Into<String>,
        source: impl Into<String>,
        external_id: impl Into<String>,
        posted_date: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            company: company.into(),
            location: String::new(),
            description: String::new(),
            skills: BTreeSet::new(),
            salary_min: None,
            salary_max: None,
            posted_date,
            job_type: JobType::Unknown,
            remote: false,
            source: source.into(),
            external_id: external_id.into(),
            redirect_url: String::new(),
        }
    }

    /// Key used to detect the same posting across sources
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", normalize(&self.title), normalize(&self.company))
    }

    /// Whether the listing satisfies a minimum salary
    ///
    /// Listings without salary information never satisfy a minimum.
    pub fn meets_salary(&self, minimum: i64) -> bool {
        self.salary_max
            .or(self.salary_min)
            .map(|salary| salary >= minimum)
            .unwrap_or(false)
    }
}

/// Lowercase and collapse internal whitespace
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop later listings whose dedup key was already seen
///
/// Returns the surviving listings in their original order together with the
/// number of listings dropped.
pub fn dedup_first_seen(jobs: Vec<JobResult>) -> (Vec<JobResult>, usize) {
    let mut seen = HashSet::with_capacity(jobs.len());
    let before = jobs.len();
    let unique: Vec<JobResult> = jobs
        .into_iter()
        .filter(|job| seen.insert(job.dedup_key()))
        .collect();
    let dropped = before - unique.len();
    (unique, dropped)
}

/// Sort listings newest first
///
/// The sort is stable so that listings with equal dates keep merge order.
pub fn sort_newest_first(jobs: &mut [JobResult]) {
    jobs.sort_by(|a, b| b.posted_date.cmp(&a.posted_date));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(title: &str, company: &str, day: u32) -> JobResult {
        JobResult::new(
            title,
            company,
            "test",
            format!("{}-{}", title, day),
            Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  Senior   React\tDeveloper "), "senior react developer");
        assert_eq!(normalize("ACME Corp"), "acme corp");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_dedup_key_ignores_case_and_spacing() {
        let a = job("React  Developer", "Acme", 1);
        let b = job("react developer", "ACME", 2);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key(), "react developer:acme");
    }

    #[test]
    fn test_dedup_first_seen_wins() {
        let mut first = job("Rust Engineer", "Ferris Inc", 3);
        first.source = "adzuna".to_string();
        let mut second = job("rust engineer", "ferris inc", 4);
        second.source = "remotive".to_string();
        let other = job("Go Engineer", "Gopher Ltd", 5);

        let (unique, dropped) = dedup_first_seen(vec![first, second, other]);
        assert_eq!(unique.len(), 2);
        assert_eq!(dropped, 1);
        assert_eq!(unique[0].source, "adzuna");
    }

    #[test]
    fn test_sort_newest_first() {
        let mut jobs = vec![job("a", "x", 1), job("b", "x", 9), job("c", "x", 4)];
        sort_newest_first(&mut jobs);
        let titles: Vec<_> = jobs.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_job_type_parsing() {
        assert_eq!(JobType::parse_lenient("Full-time"), JobType::FullTime);
        assert_eq!(JobType::parse_lenient("FULLTIME"), JobType::FullTime);
        assert_eq!(JobType::parse_lenient("part_time"), JobType::PartTime);
        assert_eq!(JobType::parse_lenient("Internship"), JobType::Internship);
        assert_eq!(JobType::parse_lenient("volunteer"), JobType::Unknown);
    }

    #[test]
    fn test_meets_salary() {
        let mut listing = job("Data Engineer", "Acme", 1);
        assert!(!listing.meets_salary(1));

        listing.salary_min = Some(900_000);
        assert!(listing.meets_salary(800_000));

        listing.salary_max = Some(1_400_000);
        assert!(listing.meets_salary(1_200_000));
        assert!(!listing.meets_salary(2_000_000));
    }

    #[test]
    fn test_serialization_is_stable() {
        let mut listing = job("Data Engineer", "Acme", 1);
        listing.skills.insert("sql".to_string());
        listing.skills.insert("python".to_string());
        listing.job_type = JobType::Contract;

        let json = serde_json::to_string(&listing).unwrap();
        assert!(json.contains("\"job_type\":\"contract\""));
        assert!(json.contains("[\"python\",\"sql\"]"));

        let back: JobResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, listing);
    }
}
