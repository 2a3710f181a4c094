//! Core domain model, error taxonomy and normalization rules for Lead Hub.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod error;
pub mod normalize;

pub use error::{AcquisitionError, ErrorKind};

/// Which of the two discovery modes a query runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    School,
    RoleLocation,
}

/// Structured profile search. A query with a school is an alumni search; without one it is
/// a role+location search.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub school: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub exclude_seniority: Vec<String>,
}

impl SearchQuery {
    pub fn by_school(school: impl Into<String>) -> Self {
        Self {
            school: Some(school.into()),
            ..Self::default()
        }
    }

    pub fn by_role<I, S>(keywords: I, location: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            location: Some(location.into()),
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn excluding<I, S>(mut self, seniority: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_seniority = seniority.into_iter().map(Into::into).collect();
        self
    }

    pub fn mode(&self) -> QueryMode {
        if self.school.is_some() {
            QueryMode::School
        } else {
            QueryMode::RoleLocation
        }
    }

    pub fn lead_source(&self) -> LeadSource {
        match &self.school {
            Some(school) => LeadSource::Alumni {
                school: school.clone(),
            },
            None => LeadSource::Role {
                location: self.location.clone(),
            },
        }
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(school) = &self.school {
            parts.push(format!("school={school}"));
        }
        if !self.keywords.is_empty() {
            parts.push(format!("keywords={}", self.keywords.join("|")));
        }
        if let Some(location) = &self.location {
            parts.push(format!("location={location}"));
        }
        if !self.exclude_seniority.is_empty() {
            parts.push(format!("exclude={}", self.exclude_seniority.join("|")));
        }
        f.write_str(&parts.join(" "))
    }
}

/// Tag recording which query produced a lead; persisted as its display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LeadSource {
    Alumni { school: String },
    Role { location: Option<String> },
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeadSource::Alumni { school } => write!(f, "Alumni Search: {school}"),
            LeadSource::Role {
                location: Some(location),
            } => write!(f, "Role Search: {location}"),
            LeadSource::Role { location: None } => f.write_str("Role Search"),
        }
    }
}

/// One profile candidate as decoded from a search result. Transient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLeadRecord {
    pub name: String,
    pub profile_url: String,
    pub role: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    /// Result title as returned by the search surface.
    pub title: String,
    pub snippet: String,
}

/// Company enrichment found by the company info scraper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub linkedin_url: String,
    pub size_bucket: Option<String>,
    pub product_focus: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobBoard {
    Greenhouse,
    Lever,
}

impl JobBoard {
    pub fn as_str(self) -> &'static str {
        match self {
            JobBoard::Greenhouse => "greenhouse",
            JobBoard::Lever => "lever",
        }
    }
}

impl fmt::Display for JobBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobBoard {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greenhouse" => Ok(JobBoard::Greenhouse),
            "lever" => Ok(JobBoard::Lever),
            _ => Err(UnknownValue {
                field: "job board",
                value: s.to_string(),
            }),
        }
    }
}

/// Open posting as returned by a job board, before it is tied to a stored company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPostingRecord {
    pub board: JobBoard,
    pub title: String,
    pub location: Option<String>,
    pub url: String,
    pub description_snippet: Option<String>,
}

/// User-owned lifecycle tag on a stored lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    ToReview,
    Interested,
    NotInterested,
    Converted,
    Archived,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 7] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::ToReview,
        LeadStatus::Interested,
        LeadStatus::NotInterested,
        LeadStatus::Converted,
        LeadStatus::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::ToReview => "to_review",
            LeadStatus::Interested => "interested",
            LeadStatus::NotInterested => "not_interested",
            LeadStatus::Converted => "converted",
            LeadStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| UnknownValue {
                field: "lead status",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {field}: {value:?}")]
pub struct UnknownValue {
    pub field: &'static str,
    pub value: String,
}
