use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

// --- Candidate profile ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CandidateProfile {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub linkedin: Option<String>,
    pub portfolio: Option<String>,
    pub skills: Vec<String>,
    pub experience: Vec<Experience>,
    pub education: Vec<Education>,
    pub summary: String,
    /// Inferred from the experience list; shapes queries and scoring only.
    #[serde(skip)]
    pub seniority: Seniority,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Experience {
    pub employer: String,
    pub title: String,
    pub start: PeriodPoint,
    pub end: PeriodPoint,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Education {
    pub institution: String,
    pub credential: String,
    pub completed: PeriodPoint,
}

/// A normalized resume date. `is_current` marks "Present"-style end dates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeriodPoint {
    pub month: Option<String>,
    pub year: Option<i32>,
    pub is_current: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Seniority {
    #[default]
    Unknown,
    Intern,
    Junior,
    Mid,
    Senior,
    Lead,
}

impl Seniority {
    pub fn label(&self) -> &'static str {
        match self {
            Seniority::Unknown => "Unknown",
            Seniority::Intern => "Intern",
            Seniority::Junior => "Junior",
            Seniority::Mid => "Mid-Level",
            Seniority::Senior => "Senior",
            Seniority::Lead => "Lead",
        }
    }

    pub fn is_early_career(&self) -> bool {
        matches!(self, Seniority::Intern | Seniority::Junior)
    }
}

// --- Leads ---

/// A discovered job posting, before it has been scored or persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawLead {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_deserializing)]
    pub query_source: String,
}

/// A raw lead that passed the relevance scorer.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredLead {
    pub lead: RawLead,
    pub score: u8,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub user_id: String,
    pub resume_id: String,
    pub url: String,
    pub title: String,
    pub company: String,
    pub snippet: Option<String>,
    pub query_source: Option<String>,
    pub match_score: i64,
    pub match_reason: Option<String>,
    pub status: LeadStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Applying,
    Applied,
    Failed,
    Cancelled,
    DryRun,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "NEW",
            LeadStatus::Applying => "APPLYING",
            LeadStatus::Applied => "APPLIED",
            LeadStatus::Failed => "FAILED",
            LeadStatus::Cancelled => "CANCELLED",
            LeadStatus::DryRun => "DRY_RUN",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeadStatus::Applied | LeadStatus::Failed | LeadStatus::Cancelled | LeadStatus::DryRun
        )
    }

    /// Same-status writes are allowed and treated as no-ops by the store.
    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (LeadStatus::New, LeadStatus::Applying) => true,
            (LeadStatus::Applying, n) => n.is_terminal(),
            (s, LeadStatus::Applying) => s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "NEW" => Ok(LeadStatus::New),
            "APPLYING" => Ok(LeadStatus::Applying),
            "APPLIED" => Ok(LeadStatus::Applied),
            "FAILED" => Ok(LeadStatus::Failed),
            "CANCELLED" | "CANCELED" => Ok(LeadStatus::Cancelled),
            "DRY_RUN" => Ok(LeadStatus::DryRun),
            other => Err(anyhow!(
                "Unknown lead status '{}'. Expected NEW, APPLYING, APPLIED, FAILED, CANCELLED or DRY_RUN",
                other
            )),
        }
    }
}

// --- Research status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResearchStatus {
    Idle,
    Searching,
    Completed,
    Failed,
    Cancelled,
    CancelRequested,
}

impl ResearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Idle => "IDLE",
            ResearchStatus::Searching => "SEARCHING",
            ResearchStatus::Completed => "COMPLETED",
            ResearchStatus::Failed => "FAILED",
            ResearchStatus::Cancelled => "CANCELLED",
            ResearchStatus::CancelRequested => "CANCEL_REQUESTED",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ResearchStatus::Searching | ResearchStatus::CancelRequested)
    }
}

impl fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(ResearchStatus::Idle),
            "SEARCHING" => Ok(ResearchStatus::Searching),
            "COMPLETED" => Ok(ResearchStatus::Completed),
            "FAILED" => Ok(ResearchStatus::Failed),
            "CANCELLED" => Ok(ResearchStatus::Cancelled),
            "CANCEL_REQUESTED" => Ok(ResearchStatus::CancelRequested),
            other => Err(anyhow!("Unknown research status '{}'", other)),
        }
    }
}
