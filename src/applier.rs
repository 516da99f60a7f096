// Hand-off to the external application driver and classification of what
// it reports back.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ai;
use crate::db::{LeadRef, LeadStore};
use crate::domains;
use crate::models::{CandidateProfile, Lead, LeadStatus};
use crate::resolver::UrlResolver;

pub struct ApplicationRequest<'a> {
    pub url: &'a str,
    pub profile: &'a CandidateProfile,
    pub resume_path: &'a Path,
    pub dry_run: bool,
}

/// Fills and submits an application form. Returns the driver's raw
/// outcome text; see [`classify_outcome`].
#[async_trait]
pub trait ApplicationDriver: Send + Sync {
    async fn apply(&self, request: &ApplicationRequest<'_>) -> Result<String>;
}

/// Runs an external command as `<cmd> <url> <profile.json> <resume> [--dry-run]`
/// and takes its stdout as the outcome.
pub struct CommandDriver {
    command: String,
    scratch_dir: PathBuf,
}

impl CommandDriver {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            scratch_dir: std::env::temp_dir(),
        }
    }
}

#[async_trait]
impl ApplicationDriver for CommandDriver {
    async fn apply(&self, request: &ApplicationRequest<'_>) -> Result<String> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("LEADHUNT_APPLY_CMD is empty"))?;

        let profile_path = self.scratch_dir.join(format!(
            "leadhunt-profile-{}-{}.json",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ));
        tokio::fs::write(&profile_path, serde_json::to_vec_pretty(request.profile)?)
            .await
            .with_context(|| format!("Failed to write {}", profile_path.display()))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(parts)
            .arg(request.url)
            .arg(&profile_path)
            .arg(request.resume_path);
        if request.dry_run {
            command.arg("--dry-run");
        }

        info!("Running application driver for {}", request.url);
        let output = command.output().await;
        if let Err(e) = tokio::fs::remove_file(&profile_path).await {
            warn!("Failed to remove {}: {}", profile_path.display(), e);
        }
        let output = output.with_context(|| format!("Failed to run '{}'", program))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() && stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Application driver exited with {}: {}",
                output.status,
                ai::truncate_chars(stderr.trim(), 500)
            ));
        }
        Ok(stdout)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DriverOutcome {
    status: String,
    account_created: bool,
}

/// Maps driver output to a terminal lead status. JSON
/// `{"status": .., "account_created": ..}` is read when present; bare text
/// is matched on keywords. Anything unrecognized is a failure.
pub fn classify_outcome(output: &str) -> LeadStatus {
    let parsed = ai::json_payload(output).and_then(|p| serde_json::from_str::<DriverOutcome>(p).ok());
    let (status, account_created) = match parsed {
        Some(outcome) => (outcome.status.to_uppercase(), outcome.account_created),
        None => (output.trim().to_uppercase(), false),
    };

    if status == "APPLIED" || account_created || status.contains("ACCOUNT_CREATED") {
        LeadStatus::Applied
    } else if status.contains("DRY_RUN") || status.contains("DRY RUN") {
        LeadStatus::DryRun
    } else if status.contains("CANCEL") {
        LeadStatus::Cancelled
    } else {
        LeadStatus::Failed
    }
}

pub struct Applier<'a> {
    store: &'a LeadStore,
    driver: &'a dyn ApplicationDriver,
    resolver: &'a UrlResolver<'a>,
}

impl<'a> Applier<'a> {
    pub fn new(store: &'a LeadStore, driver: &'a dyn ApplicationDriver, resolver: &'a UrlResolver<'a>) -> Self {
        Self {
            store,
            driver,
            resolver,
        }
    }

    /// Claims the lead (refusing one already APPLYING), hands a non-aggregator URL to the driver and
    /// records the classified outcome.
    pub async fn apply(
        &self,
        user: &str,
        resume: &str,
        lead: &LeadRef,
        profile: &CandidateProfile,
        resume_path: &Path,
        dry_run: bool,
    ) -> Result<Lead> {
        let lead = self.store.begin_apply(user, resume, lead)?;
        let id = LeadRef::Id(lead.id);

        let url = if domains::is_aggregator(&lead.url) {
            match self.resolver.resolve(&lead.url).await {
                Ok(url) => url,
                Err(e) => {
                    self.store.update_status(user, resume, &id, LeadStatus::Failed)?;
                    return Err(e.into());
                }
            }
        } else {
            lead.url.clone()
        };

        let request = ApplicationRequest {
            url: &url,
            profile,
            resume_path,
            dry_run,
        };
        let outcome = match self.driver.apply(&request).await {
            Ok(output) => classify_outcome(&output),
            Err(e) => {
                warn!("Application driver failed for {}: {:#}", url, e);
                LeadStatus::Failed
            }
        };
        let outcome = if dry_run && outcome == LeadStatus::Applied {
            LeadStatus::DryRun
        } else {
            outcome
        };

        self.store.update_status(user, resume, &id, outcome)
    }
}
