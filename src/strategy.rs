use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::ai::{self, AIProvider};
use crate::models::CandidateProfile;

pub const DEFAULT_TITLE: &str = "Software Engineer";

/// Target titles plus the location to search in.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub titles: Vec<String>,
    pub location: String,
}

const SENIORITY_WORDS: &[&str] = &[
    "senior", "sr", "junior", "jr", "intern", "internship", "lead", "staff", "principal",
    "entry", "level", "entry-level", "mid", "mid-level", "associate", "graduate", "co-op",
    "coop", "trainee", "i", "ii", "iii", "iv",
];

fn noise_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[()"'\[\]]"#).expect("valid regex"))
}

/// Strips quoting, boolean operators and level words; returns `None` for
/// anything that does not leave a multi-word title.
pub fn clean_title(raw: &str) -> Option<String> {
    let stripped = noise_re().replace_all(raw, " ");
    let words: Vec<&str> = stripped
        .split_whitespace()
        .filter(|w| !matches!(*w, "OR" | "AND"))
        .filter(|w| {
            let lower = w.trim_matches(|c: char| c == ',' || c == '.').to_lowercase();
            !SENIORITY_WORDS.contains(&lower.as_str())
        })
        .collect();

    if words.len() < 2 {
        return None;
    }
    Some(words.join(" "))
}

pub fn clean_titles(raw: &[String], max: usize) -> Vec<String> {
    let mut titles: Vec<String> = Vec::new();
    for candidate in raw {
        if let Some(title) = clean_title(candidate) {
            if !titles.iter().any(|t| t.eq_ignore_ascii_case(&title)) {
                titles.push(title);
            }
        }
        if titles.len() >= max {
            break;
        }
    }
    titles
}

/// One search query per (title, domain chunk): `(site:a OR site:b) <title> <location>`.
/// Strict queries quote the title.
pub fn build_queries(
    titles: &[String],
    location: &str,
    domains: &[String],
    chunk_size: usize,
    strict: bool,
) -> Vec<String> {
    let location = location.trim();
    let filters: Vec<String> = if domains.is_empty() {
        vec![String::new()]
    } else {
        domains
            .chunks(chunk_size.max(1))
            .map(|chunk| {
                let sites: Vec<String> = chunk.iter().map(|d| format!("site:{}", d)).collect();
                format!("({}) ", sites.join(" OR "))
            })
            .collect()
    };

    let mut queries = Vec::new();
    for title in titles {
        let title = if strict {
            format!("\"{}\"", title)
        } else {
            title.clone()
        };
        for filter in &filters {
            let query = format!("{}{} {}", filter, title, location);
            queries.push(query.trim().to_string());
        }
    }
    queries
}

pub struct QueryStrategist<'a> {
    provider: &'a dyn AIProvider,
    max_titles: usize,
}

impl<'a> QueryStrategist<'a> {
    pub fn new(provider: &'a dyn AIProvider, max_titles: usize) -> Self {
        Self {
            provider,
            max_titles: max_titles.max(1),
        }
    }

    pub async fn plan(
        &self,
        profile: &CandidateProfile,
        title_override: Option<&str>,
        location_override: Option<&str>,
    ) -> SearchPlan {
        let location = location_override
            .map(str::to_string)
            .or_else(|| profile.location.clone())
            .unwrap_or_default()
            .trim()
            .to_string();

        let titles = match title_override.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => vec![title.to_string()],
            None => self.generate_titles(profile).await,
        };

        info!("Search plan: {:?} in '{}'", titles, location);
        SearchPlan { titles, location }
    }

    async fn generate_titles(&self, profile: &CandidateProfile) -> Vec<String> {
        let recent_roles: Vec<&str> = profile
            .experience
            .iter()
            .take(3)
            .map(|e| e.title.as_str())
            .collect();

        let prompt = format!(
            "Act as an expert recruiter for any industry. Analyze this candidate:\n\
            Summary: {}\n\
            Skills: {}\n\
            Recent roles: {}\n\
            Level: {}\n\n\
            Generate up to {} distinct core job titles this candidate should search for.\n\
            Rules:\n\
            - Do NOT include seniority words (Junior, Senior, Lead, Intern, Entry Level).\n\
            - Titles are 2-4 words, correctly spelled.\n\
            - Never output single-word titles.\n\n\
            Output ONLY a JSON list of strings.",
            ai::truncate_chars(&profile.summary, 500),
            profile.skills.iter().take(15).cloned().collect::<Vec<_>>().join(", "),
            recent_roles.join(", "),
            profile.seniority.label(),
            self.max_titles
        );

        let raw: Vec<String> = match ai::extract_json(self.provider, &prompt, 1024).await {
            Ok(titles) => titles,
            Err(e) => {
                warn!("Title generation failed: {}", e);
                Vec::new()
            }
        };

        let titles = clean_titles(&raw, self.max_titles);
        if titles.is_empty() {
            warn!("No usable titles generated, falling back to '{}'", DEFAULT_TITLE);
            return vec![DEFAULT_TITLE.to_string()];
        }
        titles
    }
}
