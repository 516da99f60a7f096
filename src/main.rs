mod ai;
mod applier;
mod browser;
mod cache;
mod cancel;
mod config;
mod db;
mod discovery;
mod domains;
mod errors;
mod fetch;
mod models;
mod notify;
mod pipeline;
mod profile;
mod resolver;
mod scorer;
mod search;
mod strategy;
#[cfg(test)]
mod testing;
mod verifier;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ai::AIProvider;
use applier::{Applier, CommandDriver};
use browser::{PageRenderer, WebDriverRenderer};
use config::Config;
use db::{LeadRef, LeadStore};
use errors::StoreError;
use fetch::{HttpFetcher, PageFetcher};
use models::{LeadStatus, ResearchStatus};
use notify::ConsoleNotifier;
use pipeline::{Capabilities, Pipeline, ResearchRequest};
use resolver::UrlResolver;
use search::BraveSearch;
use verifier::LeadVerifier;

#[derive(Parser)]
#[command(name = "leadhunt")]
#[command(about = "Job lead research - find, resolve, score and track postings for a resume")]
struct Cli {
    /// User the leads belong to (defaults to LEADHUNT_USER or "local")
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run the research pipeline for a resume
    Research {
        /// Path to the resume (.pdf or text)
        #[arg(short, long)]
        resume: PathBuf,

        /// Number of leads to keep (1-99)
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Search for this title instead of generated ones
        #[arg(short, long)]
        title: Option<String>,

        /// Search in this location instead of the resume's
        #[arg(long)]
        location: Option<String>,

        /// Start even if a run looks active for this resume
        #[arg(long)]
        force: bool,
    },

    /// Ask a running research to stop
    Cancel {
        /// Resume file name (or path)
        #[arg(short, long)]
        resume: String,
    },

    /// Show research status for a resume
    Status {
        /// Resume file name (or path)
        #[arg(short, long)]
        resume: String,
    },

    /// Inspect and update stored leads
    Leads {
        /// Resume file name (or path)
        #[arg(short, long)]
        resume: String,

        #[command(subcommand)]
        command: LeadCommands,
    },

    /// Apply to a stored lead through LEADHUNT_APPLY_CMD
    Apply {
        /// Lead ID, URL, or "Title at Company"
        target: String,

        /// Resume file to submit
        #[arg(short, long)]
        resume: PathBuf,

        /// Fill the form without submitting
        #[arg(long)]
        dry_run: bool,
    },

    /// Resolve a job URL to its direct application page
    Resolve {
        url: String,
    },

    /// Check whether a URL is an open job posting
    Verify {
        url: String,
    },
}

#[derive(Subcommand)]
enum LeadCommands {
    /// List leads, best match first
    List {
        /// Page number, starting at 0
        #[arg(short, long, default_value = "0")]
        page: usize,
    },

    /// Show lead details
    Show {
        /// Lead ID, URL, or "Title at Company"
        target: String,
    },

    /// Find a lead from a URL or "Title at Company"
    Find {
        reference: String,
    },

    /// Set a lead's status (NEW, APPLYING, APPLIED, FAILED, CANCELLED, DRY_RUN)
    Mark {
        /// Lead ID, URL, or "Title at Company"
        target: String,
        status: String,
    },

    /// Delete a lead
    Delete {
        id: i64,
    },

    /// Count leads by status
    Counts,
}

fn init_tracing(config: &Config) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resume context key: the file name of the resume.
fn resume_key(resume: &Path) -> Result<String> {
    resume
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("'{}' does not name a resume file", resume.display()))
}

fn open_store(config: &Config) -> Result<LeadStore> {
    let store = LeadStore::open(&config.db_path, config.pipeline.cache_ttl, config.pipeline.page_size)?;
    store.ensure_initialized()?;
    Ok(store)
}

async fn create_provider(config: &Config) -> Result<Arc<dyn AIProvider>> {
    let spec = ai::resolve_model(&config.model)?;
    let provider = ai::create_provider(&spec).await?;
    info!("Using model {} ({})", spec.short_name, provider.model_name());
    Ok(Arc::from(provider))
}

fn renderer(config: &Config) -> Arc<dyn PageRenderer> {
    Arc::new(WebDriverRenderer::new(
        config.webdriver_url.clone(),
        config.pipeline.render_timeout,
        config.pipeline.render_settle,
    ))
}

async fn capabilities(config: &Config) -> Result<Capabilities> {
    let settings = &config.pipeline;
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(settings.http_timeout)?);
    let renderer = renderer(config);
    Ok(Capabilities {
        provider: create_provider(config).await?,
        search: Arc::new(BraveSearch::new(fetcher.clone(), Some(renderer.clone()))),
        fetcher,
        verify_fetcher: Arc::new(HttpFetcher::new(settings.verify_timeout)?),
        renderer: Some(renderer),
        notifier: Arc::new(ConsoleNotifier),
    })
}

/// A lead ID, or whatever `find_by_reference` matches.
fn lead_ref(store: &LeadStore, user: &str, resume: &str, target: &str) -> Result<LeadRef> {
    if let Ok(id) = target.trim().parse::<i64>() {
        return Ok(LeadRef::Id(id));
    }
    match store.find_by_reference(user, resume, target)? {
        Some(lead) => Ok(LeadRef::Id(lead.id)),
        None => Err(StoreError::LeadNotFound(target.to_string()).into()),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", ai::truncate_chars(s, max.saturating_sub(3)))
    }
}

async fn run_research(
    config: &Config,
    user: &str,
    resume: PathBuf,
    limit: usize,
    title: Option<String>,
    location: Option<String>,
    force: bool,
) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let resume_id = resume_key(&resume)?;
    let pipeline = Pipeline::new(store, capabilities(config).await?, config.pipeline.clone());

    let handle = pipeline.start(
        ResearchRequest {
            user: user.to_string(),
            resume_id: resume_id.clone(),
            resume_path: resume,
            limit,
            title,
            location,
        },
        force,
    )?;

    let wait = handle.wait();
    tokio::pin!(wait);
    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling research for {}", resume_id);
            pipeline.cancel(user, &resume_id)?;
            (&mut wait).await
        }
    };

    if outcome.status == ResearchStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn run_leads(store: &LeadStore, user: &str, resume: &str, command: LeadCommands) -> Result<()> {
    match command {
        LeadCommands::List { page } => {
            let leads = store.list(user, resume, page)?;
            if leads.is_empty() {
                println!("No leads found.");
            } else {
                println!("{:<6} {:<10} {:>5}  {:<32} {:<20}", "ID", "STATUS", "SCORE", "TITLE", "COMPANY");
                println!("{}", "-".repeat(77));
                for lead in leads {
                    println!(
                        "{:<6} {:<10} {:>5}  {:<32} {:<20}",
                        lead.id,
                        lead.status.as_str(),
                        lead.match_score,
                        truncate(&lead.title, 30),
                        truncate(&lead.company, 18)
                    );
                }
            }
        }

        LeadCommands::Show { target } => {
            let lead = match lead_ref(store, user, resume, &target)? {
                LeadRef::Id(id) => store.get_by_id(id)?,
                LeadRef::Url(url) => store.get_by_url(user, resume, &url)?,
            }
            .ok_or_else(|| StoreError::LeadNotFound(target.clone()))?;

            println!("Lead #{}", lead.id);
            println!("Title: {}", lead.title);
            if !lead.company.is_empty() {
                println!("Company: {}", lead.company);
            }
            println!("Status: {}", lead.status);
            println!("Score: {}", lead.match_score);
            println!("URL: {}", lead.url);
            if let Some(query) = &lead.query_source {
                println!("Found by: {}", query);
            }
            println!("Created: {}", lead.created_at);
            println!("Updated: {}", lead.updated_at);
            if let Some(reason) = &lead.match_reason {
                println!("\n--- Why it matched ---");
                for line in textwrap::fill(reason, 70).lines() {
                    println!("{}", line);
                }
            }
            if let Some(snippet) = &lead.snippet {
                println!("\n--- Snippet ---");
                for line in textwrap::fill(snippet, 70).lines() {
                    println!("{}", line);
                }
            }
        }

        LeadCommands::Find { reference } => match store.find_by_reference(user, resume, &reference)? {
            Some(lead) => println!("#{} {} at {} ({})\n{}", lead.id, lead.title, lead.company, lead.status, lead.url),
            None => println!("No lead matches '{}'.", reference),
        },

        LeadCommands::Mark { target, status } => {
            let status: LeadStatus = status.parse()?;
            let lead_ref = lead_ref(store, user, resume, &target)?;
            let lead = store.update_status(user, resume, &lead_ref, status)?;
            println!("Lead #{} is now {}", lead.id, lead.status);
        }

        LeadCommands::Delete { id } => {
            if store.delete_lead(user, resume, id)? {
                println!("Deleted lead #{}", id);
            } else {
                println!("No lead #{} for {}", id, resume);
            }
        }

        LeadCommands::Counts => {
            let counts = store.lead_counts(user, resume)?;
            let total: i64 = counts.iter().map(|(_, n)| n).sum();
            for (status, n) in &counts {
                println!("{:<10} {:>5}", status.as_str(), n);
            }
            println!("{:<10} {:>5}", "TOTAL", total);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config);
    let user = cli.user.clone().unwrap_or_else(|| config.user_id.clone());

    match cli.command {
        Commands::Init => {
            let store = LeadStore::open(&config.db_path, config.pipeline.cache_ttl, config.pipeline.page_size)?;
            store.init()?;
            println!("Database initialized at {}", store.path().display());
        }

        Commands::Research {
            resume,
            limit,
            title,
            location,
            force,
        } => {
            run_research(&config, &user, resume, limit, title, location, force).await?;
        }

        Commands::Cancel { resume } => {
            let store = open_store(&config)?;
            let key = resume_key(Path::new(&resume))?;
            if store.request_cancel(&user, &key)? {
                println!("Cancellation requested for {}", key);
            } else {
                println!("No research is running for {}", key);
            }
        }

        Commands::Status { resume } => {
            let store = open_store(&config)?;
            let key = resume_key(Path::new(&resume))?;
            let state = store.research_state(&user, &key)?;
            println!("Research: {}", state.status);
            if let Some(message) = &state.message {
                println!("Last message: {}", message);
            }
            if let Some(at) = &state.updated_at {
                println!("Updated: {}", at);
            }
            let total: i64 = store.lead_counts(&user, &key)?.iter().map(|(_, n)| n).sum();
            println!("Leads: {}", total);
        }

        Commands::Leads { resume, command } => {
            let store = open_store(&config)?;
            let key = resume_key(Path::new(&resume))?;
            run_leads(&store, &user, &key, command)?;
        }

        Commands::Apply {
            target,
            resume,
            dry_run,
        } => {
            let store = open_store(&config)?;
            let key = resume_key(&resume)?;
            let profile = store
                .load_profile(&user, &key)?
                .ok_or_else(|| anyhow!("No parsed profile for {}. Run 'leadhunt research' first.", key))?;
            let command = config
                .apply_command
                .clone()
                .ok_or_else(|| anyhow!("Set LEADHUNT_APPLY_CMD to the application driver command"))?;
            let lead = lead_ref(&store, &user, &key, &target)?;

            let fetcher = HttpFetcher::new(config.pipeline.http_timeout)?;
            let renderer = renderer(&config);
            let provider = create_provider(&config).await.ok();
            let mut resolver = UrlResolver::new(&fetcher, config.pipeline.max_redirect_depth)
                .with_renderer(renderer.as_ref());
            if let Some(provider) = &provider {
                resolver = resolver.with_provider(provider.as_ref());
            }
            let driver = CommandDriver::new(command);

            let resume_path = resume
                .canonicalize()
                .with_context(|| format!("Resume not found: {}", resume.display()))?;
            let lead = Applier::new(&store, &driver, &resolver)
                .apply(&user, &key, &lead, &profile, &resume_path, dry_run)
                .await?;
            println!("Lead #{} ({} at {}): {}", lead.id, lead.title, lead.company, lead.status);
        }

        Commands::Resolve { url } => {
            let fetcher = HttpFetcher::new(config.pipeline.http_timeout)?;
            let renderer = renderer(&config);
            let provider = create_provider(&config).await.ok();
            let mut resolver = UrlResolver::new(&fetcher, config.pipeline.max_redirect_depth)
                .with_renderer(renderer.as_ref());
            if let Some(provider) = &provider {
                resolver = resolver.with_provider(provider.as_ref());
            }
            let resolved = resolver.resolve(&url).await?;
            println!("{}", resolved);
        }

        Commands::Verify { url } => {
            let fetcher = HttpFetcher::new(config.pipeline.verify_timeout)?;
            let provider = create_provider(&config).await?;
            let open = LeadVerifier::new(&fetcher, provider.as_ref(), config.pipeline.verify_snippet_bytes)
                .verify(&url)
                .await;
            if open {
                println!("OPEN: {}", url);
            } else {
                println!("CLOSED OR INVALID: {}", url);
            }
        }
    }

    Ok(())
}
