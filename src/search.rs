use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::browser::PageRenderer;
use crate::fetch::PageFetcher;

/// A web search backend. Returns raw result content: HTML, or text that
/// may embed JSON blocks.
#[async_trait]
pub trait SearchSurface: Send + Sync {
    async fn search(&self, query: &str) -> Result<String>;
}

const BRAVE_ENDPOINT: &str = "https://search.brave.com/search";

/// Brave web search over plain HTTP, falling back to a rendered page when
/// the HTTP response is blocked or empty.
pub struct BraveSearch {
    fetcher: Arc<dyn PageFetcher>,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl BraveSearch {
    pub fn new(fetcher: Arc<dyn PageFetcher>, renderer: Option<Arc<dyn PageRenderer>>) -> Self {
        Self { fetcher, renderer }
    }

    pub fn search_url(query: &str) -> Result<String> {
        let url = Url::parse_with_params(BRAVE_ENDPOINT, &[("q", query), ("source", "web")])
            .context("Failed to build search URL")?;
        Ok(url.to_string())
    }
}

fn looks_blocked(status: u16, body: &str) -> bool {
    if status == 429 || status >= 500 || status == 403 {
        return true;
    }
    let lower = body.to_lowercase();
    body.trim().is_empty() || lower.contains("captcha") || lower.contains("are you a robot")
}

#[async_trait]
impl SearchSurface for BraveSearch {
    async fn search(&self, query: &str) -> Result<String> {
        let url = Self::search_url(query)?;
        debug!("Searching: {}", query);

        let blocked = match self.fetcher.fetch(&url, None).await {
            Ok(page) if !looks_blocked(page.status, &page.body) => return Ok(page.body),
            Ok(page) => format!("status {}", page.status),
            Err(e) => e.to_string(),
        };

        match &self.renderer {
            Some(renderer) => {
                warn!("Plain search failed ({}), rendering instead", blocked);
                Ok(renderer.render(&url).await?.html)
            }
            None => Err(anyhow!("Search request failed: {}", blocked)),
        }
    }
}
