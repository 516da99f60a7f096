use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::domains;

/// Process configuration loaded from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub model: String,
    pub user_id: String,
    pub webdriver_url: String,
    pub apply_command: Option<String>,
    pub rust_log: String,
    pub pipeline: PipelineSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let db_path = match std::env::var("LEADHUNT_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_db_path(),
        };

        let mut pipeline = PipelineSettings::default();
        if let Ok(list) = std::env::var("LEADHUNT_ATS_DOMAINS") {
            let parsed = split_list(&list);
            if !parsed.is_empty() {
                pipeline.search_domains = parsed;
            }
        }
        if let Ok(threshold) = std::env::var("LEADHUNT_SCORE_THRESHOLD") {
            pipeline.scoring.threshold = threshold
                .trim()
                .parse::<u8>()
                .context("LEADHUNT_SCORE_THRESHOLD must be a number between 0 and 100")?
                .min(100);
        }

        Ok(Config {
            db_path,
            model: env_or("LEADHUNT_MODEL", "claude-sonnet"),
            user_id: env_or("LEADHUNT_USER", "local"),
            webdriver_url: env_or("LEADHUNT_WEBDRIVER_URL", "http://localhost:9515"),
            apply_command: std::env::var("LEADHUNT_APPLY_CMD")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            rust_log: env_or("RUST_LOG", "info"),
            pipeline,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn default_db_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "leadhunt") {
        proj_dirs.data_dir().join("leadhunt.db")
    } else {
        PathBuf::from("leadhunt.db")
    }
}

/// Acceptance policy applied by the relevance scorer.
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    /// Leads must score strictly above this to be kept.
    pub threshold: u8,
    pub reject_seniority_mismatch: bool,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            threshold: 60,
            reject_seniority_mismatch: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scoring: ScoringPolicy,
    pub scorer_concurrency: usize,
    pub search_concurrency: usize,
    /// Random pause before each search request, in milliseconds.
    pub search_delay_ms: (u64, u64),
    pub results_per_query: usize,
    pub domain_chunk_size: usize,
    pub search_domains: Vec<String>,
    pub max_titles: usize,
    /// Discovery target is `limit * discovery_overfetch`.
    pub discovery_overfetch: usize,
    pub verify_concurrency: usize,
    pub verify_snippet_bytes: usize,
    pub http_timeout: Duration,
    pub verify_timeout: Duration,
    pub render_timeout: Duration,
    pub render_settle: Duration,
    pub max_redirect_depth: usize,
    pub cache_ttl: Duration,
    pub page_size: usize,
    pub cancel_poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scoring: ScoringPolicy::default(),
            scorer_concurrency: 5,
            search_concurrency: 1,
            search_delay_ms: (1000, 2000),
            results_per_query: 5,
            domain_chunk_size: 3,
            search_domains: domains::SEARCH_ATS_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            max_titles: 8,
            discovery_overfetch: 2,
            verify_concurrency: 4,
            verify_snippet_bytes: 15_000,
            http_timeout: Duration::from_secs(10),
            verify_timeout: Duration::from_secs(5),
            render_timeout: Duration::from_secs(30),
            render_settle: Duration::from_secs(10),
            max_redirect_depth: 3,
            cache_ttl: Duration::from_secs(60),
            page_size: 50,
            cancel_poll_interval: Duration::from_secs(2),
        }
    }
}

impl PipelineSettings {
    /// Settings with every delay removed, for driving the pipeline against fakes.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            search_delay_ms: (0, 0),
            render_settle: Duration::ZERO,
            cancel_poll_interval: Duration::from_millis(10),
            ..Self::default()
        }
    }
}

/// Requested lead counts are clamped to 1..=99.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, 99)
}
