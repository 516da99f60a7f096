// Research run orchestration: resume -> profile -> queries -> discovery ->
// resolution and verification -> scoring -> persistence, with a terminal
// status written no matter how the run ends.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::ai::AIProvider;
use crate::browser::PageRenderer;
use crate::cancel::{self, CancelToken, ResearchRegistry};
use crate::config::{self, PipelineSettings};
use crate::db::LeadStore;
use crate::discovery::{LeadDiscovery, SeenUrls};
use crate::errors::PipelineError;
use crate::fetch::PageFetcher;
use crate::models::{RawLead, ResearchStatus};
use crate::notify::Notifier;
use crate::profile::{self, ProfileExtractor};
use crate::resolver::UrlResolver;
use crate::scorer::RelevanceScorer;
use crate::search::SearchSurface;
use crate::strategy::QueryStrategist;
use crate::verifier::LeadVerifier;

#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub user: String,
    pub resume_id: String,
    pub resume_path: PathBuf,
    pub limit: usize,
    pub title: Option<String>,
    pub location: Option<String>,
}

/// The external capabilities a run depends on.
#[derive(Clone)]
pub struct Capabilities {
    pub provider: Arc<dyn AIProvider>,
    pub search: Arc<dyn SearchSurface>,
    pub fetcher: Arc<dyn PageFetcher>,
    /// Fetcher with the shorter verification timeout.
    pub verify_fetcher: Arc<dyn PageFetcher>,
    pub renderer: Option<Arc<dyn PageRenderer>>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub status: ResearchStatus,
    pub message: String,
    pub leads_saved: usize,
}

pub struct ResearchHandle {
    pub token: CancelToken,
    join: JoinHandle<ResearchOutcome>,
}

impl ResearchHandle {
    /// Waits for the run to reach its terminal status.
    pub async fn wait(self) -> ResearchOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => ResearchOutcome {
                status: ResearchStatus::Failed,
                message: format!("Research supervisor stopped: {}", e),
                leads_saved: 0,
            },
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<LeadStore>,
    caps: Capabilities,
    settings: Arc<PipelineSettings>,
    registry: Arc<ResearchRegistry>,
}

impl Pipeline {
    pub fn new(store: Arc<LeadStore>, caps: Capabilities, settings: PipelineSettings) -> Self {
        Self {
            store,
            caps,
            settings: Arc::new(settings),
            registry: Arc::new(ResearchRegistry::new()),
        }
    }

    /// Marks the context SEARCHING before returning, then runs the stages
    /// in the background. Refuses to start over a live run unless forced.
    pub fn start(&self, mut request: ResearchRequest, force: bool) -> Result<ResearchHandle> {
        request.limit = config::clamp_limit(request.limit);
        self.store.begin_research(&request.user, &request.resume_id, force)?;
        self.caps.notifier.progress(&format!(
            "Research started for {} (up to {} leads)",
            request.resume_id, request.limit
        ));

        let token = self.registry.register(&request.user, &request.resume_id);
        let watcher = cancel::watch_store(
            self.store.clone(),
            request.user.clone(),
            request.resume_id.clone(),
            token.clone(),
            self.settings.cancel_poll_interval,
        );

        let this = self.clone();
        let run_token = token.clone();
        let join = tokio::spawn(async move {
            let stages = tokio::spawn(this.clone().run_stages(request.clone(), run_token.clone()));
            let result = match stages.await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::Internal(format!("research task aborted: {}", e))),
            };
            watcher.abort();
            let owned = this.registry.finish(&request.user, &request.resume_id, &run_token);
            this.finish(&request, result, owned)
        });

        Ok(ResearchHandle { token, join })
    }

    /// Signals a running research. Returns false if nothing was running.
    pub fn cancel(&self, user: &str, resume: &str) -> Result<bool> {
        let local = self.registry.cancel(user, resume);
        let stored = self.store.request_cancel(user, resume)?;
        Ok(local || stored)
    }

    /// Records the terminal status (unless a forced restart has taken over
    /// the context) and sends the one summary for this run.
    fn finish(&self, request: &ResearchRequest, result: Result<usize, PipelineError>, owned: bool) -> ResearchOutcome {
        let (status, message, leads_saved) = match result {
            Ok(saved) => (
                ResearchStatus::Completed,
                format!("Research complete for {}: {} new leads saved.", request.resume_id, saved),
                saved,
            ),
            Err(PipelineError::Cancelled) => (
                ResearchStatus::Cancelled,
                format!("Research cancelled for {}.", request.resume_id),
                0,
            ),
            Err(e) => {
                error!("Research failed for {}/{}: {}", request.user, request.resume_id, e);
                (
                    ResearchStatus::Failed,
                    format!("Research failed for {}: {}", request.resume_id, e),
                    0,
                )
            }
        };

        if !owned {
            debug!("Run for {}/{} was superseded, leaving status alone", request.user, request.resume_id);
        } else if let Err(e) = self
            .store
            .set_research_status(&request.user, &request.resume_id, status, Some(&message))
        {
            error!("Failed to record research status {}: {:#}", status, e);
        }
        self.caps.notifier.summary(&message);

        ResearchOutcome {
            status,
            message,
            leads_saved,
        }
    }

    async fn run_stages(self, request: ResearchRequest, token: CancelToken) -> Result<usize, PipelineError> {
        let checkpoint = |stage: &str| {
            if token.is_cancelled() {
                info!("Research cancelled after {}", stage);
                Err(PipelineError::Cancelled)
            } else {
                Ok(())
            }
        };
        let notifier = self.caps.notifier.as_ref();
        let provider = self.caps.provider.as_ref();
        let settings = self.settings.as_ref();

        notifier.progress("Reading resume");
        let text = profile::load_resume_text(&request.resume_path)
            .await
            .map_err(PipelineError::ResumeLoad)?;
        checkpoint("resume download")?;

        notifier.progress("Parsing resume");
        let candidate = ProfileExtractor::new(provider)
            .extract(&text)
            .await
            .map_err(PipelineError::ProfileParse)?;
        self.store
            .save_profile(&request.user, &request.resume_id, &candidate)
            .map_err(PipelineError::Store)?;
        checkpoint("resume parse")?;

        let plan = QueryStrategist::new(provider, settings.max_titles)
            .plan(&candidate, request.title.as_deref(), request.location.as_deref())
            .await;
        notifier.progress(&format!("Searching for: {}", plan.titles.join(", ")));

        let target = request.limit * settings.discovery_overfetch.max(1);
        let mut seen = SeenUrls::new();
        let raw = LeadDiscovery::new(self.caps.search.as_ref(), settings)
            .discover(&plan, target, &mut seen, &token)
            .await;
        checkpoint("discovery")?;

        notifier.progress(&format!("Checking {} leads", raw.len()));
        let vetted = self.resolve_and_verify(raw, &token).await;
        checkpoint("verification")?;

        notifier.progress(&format!("Scoring {} open postings", vetted.len()));
        let scored = RelevanceScorer::new(provider, &settings.scoring, settings.scorer_concurrency)
            .score(vetted, &candidate, request.limit)
            .await;
        checkpoint("scoring")?;

        self.store
            .insert_if_absent(&request.user, &request.resume_id, &scored)
            .map_err(PipelineError::Store)
    }

    /// Replaces each lead's URL with its resolved application URL and drops
    /// leads that cannot be resolved, are closed, or duplicate an earlier one.
    async fn resolve_and_verify(&self, raw: Vec<RawLead>, token: &CancelToken) -> Vec<RawLead> {
        let settings = self.settings.as_ref();
        let mut resolver = UrlResolver::new(self.caps.fetcher.as_ref(), settings.max_redirect_depth)
            .with_provider(self.caps.provider.as_ref());
        if let Some(renderer) = &self.caps.renderer {
            resolver = resolver.with_renderer(renderer.as_ref());
        }
        let verifier = LeadVerifier::new(
            self.caps.verify_fetcher.as_ref(),
            self.caps.provider.as_ref(),
            settings.verify_snippet_bytes,
        );
        let resolver = &resolver;
        let verifier = &verifier;

        let checked: Vec<Option<RawLead>> = stream::iter(raw)
            .map(|mut lead| async move {
                if token.is_cancelled() {
                    return None;
                }
                match resolver.resolve(&lead.url).await {
                    Ok(url) => lead.url = url,
                    Err(e) => {
                        debug!("Dropping lead: {}", e);
                        return None;
                    }
                }
                if !verifier.verify(&lead.url).await {
                    debug!("Dropping closed or invalid posting {}", lead.url);
                    return None;
                }
                Some(lead)
            })
            .buffered(settings.verify_concurrency.max(1))
            .collect()
            .await;

        let mut resolved = SeenUrls::new();
        checked
            .into_iter()
            .flatten()
            .filter(|lead| resolved.insert(&lead.url))
            .collect()
    }
}
