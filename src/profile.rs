use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::ai::{self, AIProvider};
use crate::models::{CandidateProfile, Education, Experience, PeriodPoint, Seniority};

/// Reads resume text from disk. PDFs go through text extraction; anything
/// else is read as UTF-8.
pub async fn load_resume_text(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read resume file: {}", path.display()))?;

    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    let text = if is_pdf {
        pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| anyhow!("Failed to extract text from {}: {}", path.display(), e))?
    } else {
        String::from_utf8(bytes).with_context(|| format!("Resume {} is not UTF-8 text", path.display()))?
    };

    if text.trim().is_empty() {
        return Err(anyhow!("Resume {} contains no text", path.display()));
    }
    Ok(text)
}

// The flat shape the model is asked to produce.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedResume {
    full_name: String,
    email: Option<String>,
    phone: Option<String>,
    linkedin: Option<String>,
    website: Option<String>,
    location: Option<String>,
    skills: Vec<String>,
    summary: String,
    work_experience: Vec<ExtractedJob>,
    education: Vec<ExtractedSchool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedJob {
    company: String,
    title: String,
    start_date: String,
    end_date: String,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedSchool {
    school: String,
    degree: String,
    graduation_year: String,
}

pub struct ProfileExtractor<'a> {
    provider: &'a dyn AIProvider,
}

impl<'a> ProfileExtractor<'a> {
    pub fn new(provider: &'a dyn AIProvider) -> Self {
        Self { provider }
    }

    pub async fn extract(&self, resume_text: &str) -> Result<CandidateProfile> {
        info!("Extracting candidate profile ({} chars of resume text)", resume_text.len());

        let prompt = format!(
            "Extract this resume into JSON. Return ONLY a JSON object with these keys:\n\
            full_name, email, phone, linkedin, website, location, skills (list of strings), summary,\n\
            work_experience (list of {{company, title, start_date, end_date, description}}),\n\
            education (list of {{school, degree, graduation_year}}).\n\n\
            Guidelines:\n\
            - If the resume has multiple columns, read them logically.\n\
            - Infer skills from skills sections and project descriptions.\n\
            - Dates look like \"Jan 2021\" or \"2021\"; use \"Present\" for a current role.\n\n\
            Resume:\n{}",
            ai::truncate_chars(resume_text, 30_000)
        );

        let response = self.provider.complete(&prompt, 4096).await?;
        profile_from_reply(&response)
    }
}

fn profile_from_reply(reply: &str) -> Result<CandidateProfile> {
    let extracted: ExtractedResume =
        ai::parse_json_reply(reply).context("Resume extraction returned no usable profile")?;
    let profile = map_profile(extracted);
    debug!(
        "Parsed profile for {}: {} skills, {} roles, seniority {}",
        profile.name,
        profile.skills.len(),
        profile.experience.len(),
        profile.seniority.label()
    );
    Ok(profile)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn map_profile(raw: ExtractedResume) -> CandidateProfile {
    let experience: Vec<Experience> = raw
        .work_experience
        .into_iter()
        .map(|job| Experience {
            employer: job.company.trim().to_string(),
            title: job.title.trim().to_string(),
            start: parse_period(&job.start_date),
            end: parse_period(&job.end_date),
            description: job.description.trim().to_string(),
        })
        .collect();

    let education = raw
        .education
        .into_iter()
        .map(|school| Education {
            institution: school.school.trim().to_string(),
            credential: school.degree.trim().to_string(),
            completed: parse_period(&school.graduation_year),
        })
        .collect();

    let mut skills: Vec<String> = Vec::new();
    for skill in raw.skills {
        let skill = skill.trim().to_string();
        if !skill.is_empty() && !skills.iter().any(|s| s.eq_ignore_ascii_case(&skill)) {
            skills.push(skill);
        }
    }

    let seniority = infer_seniority(&experience);

    CandidateProfile {
        name: raw.full_name.trim().to_string(),
        email: non_empty(raw.email),
        phone: non_empty(raw.phone),
        location: non_empty(raw.location),
        linkedin: non_empty(raw.linkedin),
        portfolio: non_empty(raw.website),
        skills,
        experience,
        education,
        summary: raw.summary.trim().to_string(),
        seniority,
    }
}

/// Normalizes "Jan 2021", "January 2021", "2021" and "Present" style dates.
pub fn parse_period(value: &str) -> PeriodPoint {
    let value = value.trim();
    if value.is_empty() {
        return PeriodPoint::default();
    }

    let lower = value.to_lowercase();
    if matches!(lower.as_str(), "present" | "current" | "now") {
        return PeriodPoint {
            is_current: true,
            ..Default::default()
        };
    }

    for format in ["%d %b %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("01 {}", value), format) {
            return PeriodPoint {
                month: Some(date.format("%B").to_string()),
                year: Some(date.year()),
                is_current: false,
            };
        }
    }

    if value.len() == 4 && value.chars().all(|c| c.is_ascii_digit()) {
        return PeriodPoint {
            month: None,
            year: value.parse().ok(),
            is_current: false,
        };
    }

    PeriodPoint::default()
}

/// Level implied by words in a job title, if any.
pub fn title_level(title: &str) -> Option<Seniority> {
    let lower = title.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let has = |words: &[&str]| tokens.iter().any(|t| words.contains(t));

    if has(&["intern", "internship", "trainee", "coop"]) || lower.contains("co-op") {
        Some(Seniority::Intern)
    } else if has(&["lead", "principal", "staff", "head", "director", "manager", "architect"]) {
        Some(Seniority::Lead)
    } else if has(&["senior", "sr"]) {
        Some(Seniority::Senior)
    } else if has(&["junior", "jr", "associate", "graduate"]) {
        Some(Seniority::Junior)
    } else {
        None
    }
}

/// Level is taken from the most recent role's title, then from how many
/// roles the resume lists.
pub fn infer_seniority(experience: &[Experience]) -> Seniority {
    if experience.is_empty() {
        return Seniority::Unknown;
    }
    if let Some(level) = experience.first().and_then(|e| title_level(&e.title)) {
        return level;
    }
    match experience.len() {
        1 => Seniority::Junior,
        2..=3 => Seniority::Mid,
        _ => Seniority::Senior,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    #[test]
    fn test_parse_period_formats() {
        let p = parse_period("Jan 2021");
        assert_eq!(p.month.as_deref(), Some("January"));
        assert_eq!(p.year, Some(2021));

        let p = parse_period("September 2019");
        assert_eq!(p.month.as_deref(), Some("September"));

        let p = parse_period("2018");
        assert_eq!(p.year, Some(2018));
        assert_eq!(p.month, None);

        assert!(parse_period("Present").is_current);
        assert_eq!(parse_period("sometime"), PeriodPoint::default());
    }

    #[test]
    fn test_infer_seniority() {
        let role = |title: &str| Experience {
            title: title.to_string(),
            ..Default::default()
        };
        assert_eq!(infer_seniority(&[]), Seniority::Unknown);
        assert_eq!(infer_seniority(&[role("Software Engineering Intern")]), Seniority::Intern);
        assert_eq!(infer_seniority(&[role("Sr. Backend Engineer")]), Seniority::Senior);
        assert_eq!(infer_seniority(&[role("Staff Engineer")]), Seniority::Lead);
        assert_eq!(infer_seniority(&[role("Developer")]), Seniority::Junior);
        assert_eq!(
            infer_seniority(&[role("Developer"), role("Developer"), role("Developer"), role("Dev")]),
            Seniority::Senior
        );
    }

    #[tokio::test]
    async fn test_extract_maps_flat_reply_into_profile() {
        let reply = r#"```json
        {
          "full_name": " Grace Hopper ",
          "email": "grace@example.com",
          "phone": "",
          "website": "https://grace.dev",
          "location": "Chicago, IL",
          "skills": ["Rust", "rust", "SQL", " "],
          "summary": "Systems engineer.",
          "work_experience": [
            {"company": "Acme", "title": "Software Engineering Intern", "start_date": "Jun 2023", "end_date": "Present", "description": "Built things"}
          ],
          "education": [
            {"school": "Illinois Institute of Technology", "degree": "BS CS", "graduation_year": "2025"}
          ]
        }
        ```"#;
        let provider = ScriptedProvider::replying(reply);

        let profile = ProfileExtractor::new(&provider).extract("resume text").await.unwrap();

        assert_eq!(profile.name, "Grace Hopper");
        assert_eq!(profile.phone, None);
        assert_eq!(profile.portfolio.as_deref(), Some("https://grace.dev"));
        assert_eq!(profile.skills, vec!["Rust", "SQL"]);
        assert!(profile.experience[0].end.is_current);
        assert_eq!(profile.experience[0].start.year, Some(2023));
        assert_eq!(profile.education[0].completed.year, Some(2025));
        assert_eq!(profile.seniority, Seniority::Intern);
    }

    #[tokio::test]
    async fn test_extract_fails_on_unparseable_reply() {
        let provider = ScriptedProvider::replying("I could not read that document.");
        assert!(ProfileExtractor::new(&provider).extract("resume").await.is_err());
    }

    #[tokio::test]
    async fn test_load_resume_text_reads_plain_files() {
        let dir = std::env::temp_dir().join(format!("leadhunt-resume-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("resume.txt");
        std::fs::write(&path, "Grace Hopper\nRust, SQL").unwrap();

        let text = load_resume_text(&path).await.unwrap();
        assert!(text.contains("Grace Hopper"));

        assert!(load_resume_text(&dir.join("missing.txt")).await.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
