// In-memory stand-ins for the external capabilities, used by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::ai::AIProvider;
use crate::browser::{PageRenderer, RenderedPage};
use crate::fetch::{FetchedPage, PageFetcher};
use crate::notify::Notifier;
use crate::search::SearchSurface;

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// A provider whose replies are computed from the prompt.
pub struct ScriptedProvider {
    respond: Responder,
    pub calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_| Ok(reply.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(anyhow!("model unavailable")))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AIProvider for ScriptedProvider {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(prompt)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Serves canned pages by URL; unknown URLs fail like a dead host.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, FetchedPage>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, final_url: &str, body: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                status: 200,
                final_url: final_url.to_string(),
                body: body.to_string(),
            },
        );
        self
    }

    pub fn status(mut self, url: &str, status: u16, body: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                status,
                final_url: url.to_string(),
                body: body.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, max_bytes: Option<usize>) -> Result<FetchedPage> {
        let mut page = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("connection refused: {}", url))?;
        if let Some(max) = max_bytes {
            if page.body.len() > max {
                page.body.truncate(max);
            }
        }
        Ok(page)
    }
}

#[derive(Default)]
pub struct FakeRenderer {
    pages: HashMap<String, RenderedPage>,
    pub rendered: Mutex<Vec<String>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, final_url: &str, html: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            RenderedPage {
                final_url: final_url.to_string(),
                html: html.to_string(),
            },
        );
        self
    }

    pub fn render_count(&self) -> usize {
        self.rendered.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage> {
        if let Ok(mut rendered) = self.rendered.lock() {
            rendered.push(url.to_string());
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("browser crashed on {}", url))
    }
}

/// Answers queries by substring match on the query text.
#[derive(Default)]
pub struct FakeSearch {
    rules: Vec<(String, String)>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, query_fragment: &str, content: &str) -> Self {
        self.rules.push((query_fragment.to_string(), content.to_string()));
        self
    }

    pub fn seen(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchSurface for FakeSearch {
    async fn search(&self, query: &str) -> Result<String> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        Ok(self
            .rules
            .iter()
            .find(|(fragment, _)| query.contains(fragment.as_str()))
            .map(|(_, content)| content.clone())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct CollectingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl CollectingNotifier {
    pub fn all(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl Notifier for CollectingNotifier {
    fn progress(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(format!("progress: {}", message));
        }
    }

    fn summary(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}
