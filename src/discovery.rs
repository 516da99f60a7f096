use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::PipelineSettings;
use crate::domains;
use crate::models::RawLead;
use crate::search::SearchSurface;
use crate::strategy::{self, SearchPlan};

/// URLs already produced during one pipeline run, compared case-insensitively.
#[derive(Debug, Default)]
pub struct SeenUrls {
    urls: HashSet<String>,
}

impl SeenUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the URL had not been seen before.
    pub fn insert(&mut self, url: &str) -> bool {
        self.urls.insert(url.trim().to_lowercase())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(&url.trim().to_lowercase())
    }
}

fn bare_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>()\[\]{}]+"#).expect("valid regex"))
}

const SEARCH_BASE: &str = "https://search.brave.com/";

/// Best-effort company name from the path or subdomain ATS hosts use.
pub fn company_from_url(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return String::new();
    };
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let first_segment = parsed
        .path_segments()
        .and_then(|mut s| s.next())
        .unwrap_or_default()
        .to_string();

    if host.ends_with("greenhouse.io") || host.ends_with("lever.co") || host.ends_with("ashbyhq.com") || host.ends_with("jobvite.com") || host.ends_with("smartrecruiters.com") {
        return first_segment;
    }
    if host.ends_with("myworkdayjobs.com") || host.ends_with("bamboohr.com") || host.ends_with("icims.com") {
        return host.split('.').next().unwrap_or_default().to_string();
    }
    String::new()
}

fn clean_text(text: &str, max: usize) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    crate::ai::truncate_chars(&joined, max).to_string()
}

fn finish_lead(mut lead: RawLead, query: &str) -> Option<RawLead> {
    lead.url = lead.url.trim().to_string();
    if domains::is_noise(&lead.url) {
        return None;
    }
    if lead.company.trim().is_empty() {
        lead.company = company_from_url(&lead.url);
    }
    lead.title = clean_text(&lead.title, 200);
    lead.snippet = clean_text(&lead.snippet, 500);
    lead.query_source = query.to_string();
    Some(lead)
}

fn json_leads(raw: &str) -> Vec<RawLead> {
    let Some(payload) = crate::ai::json_payload(raw) else {
        return Vec::new();
    };
    serde_json::from_str::<Vec<RawLead>>(payload)
        .map(|leads| leads.into_iter().filter(|l| !l.url.trim().is_empty()).collect())
        .unwrap_or_default()
}

fn anchor_leads(raw: &str) -> Vec<RawLead> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(raw);
    let mut leads = Vec::new();

    for element in document.select(&selector) {
        let href = element.value().attr("href").unwrap_or("");
        let Some(url) = domains::absolutize(SEARCH_BASE, href) else {
            continue;
        };
        let text = element.text().collect::<Vec<_>>().join(" ");
        if text.trim().is_empty() || domains::is_noise(&url) {
            continue;
        }
        leads.push(RawLead {
            title: text,
            url,
            ..Default::default()
        });
    }
    leads
}

fn bare_url_leads(raw: &str) -> Vec<RawLead> {
    bare_url_re()
        .find_iter(raw)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
        .filter(|url| domains::looks_like_job_url(url))
        .map(|url| RawLead {
            url,
            ..Default::default()
        })
        .collect()
}

/// Pulls candidate leads out of raw search content. Structured content
/// (JSON blocks, then HTML anchors) wins; bare URLs are only scanned, and
/// only kept if they pass the ATS/job-path safety net, when that finds nothing.
pub fn extract_leads(raw: &str, query: &str) -> Vec<RawLead> {
    let mut found = json_leads(raw);
    if found.is_empty() {
        found = anchor_leads(raw);
    }
    if found.is_empty() {
        found = bare_url_leads(raw);
        if !found.is_empty() {
            debug!("Safety net rescued {} links for '{}'", found.len(), query);
        }
    }
    found.into_iter().filter_map(|lead| finish_lead(lead, query)).collect()
}

pub struct LeadDiscovery<'a> {
    search: &'a dyn SearchSurface,
    settings: &'a PipelineSettings,
}

impl<'a> LeadDiscovery<'a> {
    pub fn new(search: &'a dyn SearchSurface, settings: &'a PipelineSettings) -> Self {
        Self { search, settings }
    }

    /// Runs the strict phase, then the broad phase if the target is still
    /// unmet. Never fails: queries that error or yield nothing are skipped.
    pub async fn discover(
        &self,
        plan: &SearchPlan,
        target: usize,
        seen: &mut SeenUrls,
        cancel: &CancelToken,
    ) -> Vec<RawLead> {
        let mut leads: Vec<RawLead> = Vec::new();

        for strict in [true, false] {
            if leads.len() >= target || cancel.is_cancelled() {
                break;
            }
            let phase = if strict { "strict" } else { "broad" };
            let mut queries = strategy::build_queries(
                &plan.titles,
                &plan.location,
                &self.settings.search_domains,
                self.settings.domain_chunk_size,
                strict,
            );
            queries.shuffle(&mut rand::thread_rng());
            info!("Discovery {} phase: {} queries, {} of {} leads so far", phase, queries.len(), leads.len(), target);

            self.run_phase(queries, target, seen, cancel, &mut leads).await;
        }

        info!("Discovery finished with {} leads", leads.len());
        leads
    }

    async fn run_phase(
        &self,
        queries: Vec<String>,
        target: usize,
        seen: &mut SeenUrls,
        cancel: &CancelToken,
        leads: &mut Vec<RawLead>,
    ) {
        let (lo, hi) = self.settings.search_delay_ms;
        let mut results = stream::iter(queries)
            .map(|query| async move {
                let delay = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(lo.min(hi)..=hi.max(lo))
                };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if cancel.is_cancelled() {
                    return None;
                }
                let result = self.search.search(&query).await;
                Some((query, result))
            })
            .buffer_unordered(self.settings.search_concurrency.max(1));

        while let Some(outcome) = results.next().await {
            let Some((query, result)) = outcome else {
                continue;
            };
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Search failed for '{}': {}", query, e);
                    continue;
                }
            };

            let mut added = 0;
            for lead in extract_leads(&raw, &query) {
                if added >= self.settings.results_per_query || leads.len() >= target {
                    break;
                }
                if seen.insert(&lead.url) {
                    leads.push(lead);
                    added += 1;
                }
            }
            if added == 0 {
                debug!("No clean links for '{}', skipping", query);
            }
            if leads.len() >= target || cancel.is_cancelled() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSearch;

    fn plan(titles: &[&str]) -> SearchPlan {
        SearchPlan {
            titles: titles.iter().map(|t| t.to_string()).collect(),
            location: "Chicago".to_string(),
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            search_domains: vec!["jobs.lever.co".into(), "boards.greenhouse.io".into(), "jobs.ashbyhq.com".into()],
            ..PipelineSettings::immediate()
        }
    }

    #[test]
    fn test_extract_prefers_json_blocks() {
        let raw = r#"Here you go:
```json
[{"title": "Data Engineer", "company": "Acme", "url": "https://jobs.lever.co/acme/1", "snippet": "Build pipelines"},
 {"title": "Tracker", "company": "", "url": "https://www.google.com/url?q=x"}]
```
Also https://acme.com/careers/ignored"#;
        let leads = extract_leads(raw, "q");
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].company, "Acme");
        assert_eq!(leads[0].query_source, "q");
    }

    #[test]
    fn test_extract_reads_anchors_and_filters_noise() {
        let html = r#"<html><body>
            <a href="/search?q=next">Next</a>
            <a href="https://boards.greenhouse.io/globex/jobs/42">Platform   Engineer - Globex</a>
            <a href="https://www.googleadservices.com/pagead/aclk?x=1">Ad</a>
            <a href="https://jobs.lever.co/initech/7"></a>
        </body></html>"#;
        let leads = extract_leads(html, "q");
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].title, "Platform Engineer - Globex");
        assert_eq!(leads[0].company, "globex");
    }

    #[test]
    fn test_safety_net_scans_bare_urls() {
        let raw = "Results: https://acme.com/careers/backend-engineer, https://acme.com/blog/post and https://jobs.ashbyhq.com/acme/abc.";
        let urls: Vec<String> = extract_leads(raw, "q").into_iter().map(|l| l.url).collect();
        assert_eq!(
            urls,
            vec!["https://acme.com/careers/backend-engineer", "https://jobs.ashbyhq.com/acme/abc"]
        );
    }

    #[test]
    fn test_company_from_url() {
        assert_eq!(company_from_url("https://jobs.lever.co/acme/1"), "acme");
        assert_eq!(company_from_url("https://globex.wd5.myworkdayjobs.com/en-US/x"), "globex");
        assert_eq!(company_from_url("https://example.com/jobs/1"), "");
    }

    #[tokio::test]
    async fn test_broad_phase_runs_when_strict_finds_nothing() {
        let search = FakeSearch::new().on(
            ") Backend Engineer",
            r#"<a href="https://jobs.lever.co/acme/1">Backend Engineer</a>
               <a href="https://jobs.lever.co/acme/2">Backend Engineer II</a>"#,
        );
        let settings = settings();
        let discovery = LeadDiscovery::new(&search, &settings);
        let mut seen = SeenUrls::new();

        let leads = discovery
            .discover(&plan(&["Backend Engineer", "Data Engineer", "Platform Engineer"]), 10, &mut seen, &CancelToken::new())
            .await;

        let queries = search.seen();
        assert_eq!(queries.iter().filter(|q| q.contains('"')).count(), 3);
        assert_eq!(queries.iter().filter(|q| !q.contains('"')).count(), 3);
        assert_eq!(leads.len(), 2);
        assert!(leads.iter().all(|l| !l.query_source.contains('"')));
    }

    #[tokio::test]
    async fn test_stops_at_target_and_dedups_across_queries() {
        let page = r#"<a href="https://jobs.lever.co/acme/1">A Engineer</a>
                      <a href="https://JOBS.lever.co/acme/1">A Engineer again</a>
                      <a href="https://jobs.lever.co/acme/2">B Engineer</a>
                      <a href="https://jobs.lever.co/acme/3">C Engineer</a>"#;
        let search = FakeSearch::new().on("Engineer", page);
        let settings = settings();
        let discovery = LeadDiscovery::new(&search, &settings);
        let mut seen = SeenUrls::new();
        seen.insert("https://jobs.lever.co/acme/3");

        let leads = discovery
            .discover(&plan(&["Backend Engineer", "Data Engineer"]), 2, &mut seen, &CancelToken::new())
            .await;

        assert_eq!(leads.len(), 2);
        assert_eq!(search.seen().len(), 1);
        assert!(seen.contains("https://jobs.lever.co/acme/2"));
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_searches() {
        let search = FakeSearch::new().on("Engineer", r#"<a href="https://jobs.lever.co/acme/1">A</a>"#);
        let settings = settings();
        let cancel = CancelToken::new();
        cancel.cancel();

        let leads = LeadDiscovery::new(&search, &settings)
            .discover(&plan(&["Backend Engineer"]), 5, &mut SeenUrls::new(), &cancel)
            .await;
        assert!(leads.is_empty());
        assert!(search.seen().is_empty());
    }
}
