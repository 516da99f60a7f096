use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::ai::{self, AIProvider};
use crate::browser::PageRenderer;
use crate::domains;
use crate::errors::ResolveError;
use crate::fetch::PageFetcher;

const APPLY_PHRASES: &[&str] = &[
    "apply",
    "company site",
    "employer site",
    "start application",
    "go to job",
];

fn bypass_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r#"href=["'](/?authenticate[^"']+)["']"#,
            r#"window\.location(?:\.href)?\s*=\s*["']([^"']+)["']"#,
            r#"(?i)http-equiv=["']refresh["'][^>]*content=["']\d+;\s*url=([^"']+)["']"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^"'\s<>\\]+"#).expect("valid regex"))
}

fn unescape(url: &str) -> String {
    url.replace("&amp;", "&")
}

/// Picks the application link from a posting page. ATS links win, then
/// apply-labelled links off-aggregator, then apply-labelled aggregator links.
pub fn find_apply_link(html: &str, base: &str) -> Option<String> {
    let selector = Selector::parse("a[href]").ok()?;
    let document = Html::parse_document(html);

    let mut best: Option<(u8, String)> = None;
    for element in document.select(&selector) {
        let Some(url) = element.value().attr("href").and_then(|h| domains::absolutize(base, h)) else {
            continue;
        };
        if domains::is_noise(&url) {
            continue;
        }
        let text = element.text().collect::<String>().to_lowercase();
        let labelled = APPLY_PHRASES.iter().any(|p| text.contains(p)) || url.to_lowercase().contains("/apply");

        let rank = if domains::is_ats(&url) {
            3
        } else if !labelled {
            continue;
        } else if domains::is_aggregator(&url) {
            1
        } else {
            2
        };
        if best.as_ref().map_or(true, |(r, _)| rank > *r) {
            best = Some((rank, url));
        }
    }
    best.map(|(_, url)| url)
}

/// A client-side or authentication hop out of a block page, if any.
pub fn find_bypass_link(html: &str, base: &str) -> Option<String> {
    bypass_res().iter().find_map(|re| {
        re.captures(html)
            .and_then(|c| c.get(1))
            .and_then(|m| domains::absolutize(base, &unescape(m.as_str())))
    })
}

/// First ATS URL appearing anywhere in the markup.
pub fn scan_for_ats(html: &str) -> Option<String> {
    url_re()
        .find_iter(html)
        .map(|m| unescape(m.as_str()))
        .find(|url| domains::is_ats(url))
}

/// Follows a job URL off aggregator sites to the page that hosts the
/// application form.
pub struct UrlResolver<'a> {
    fetcher: &'a dyn PageFetcher,
    renderer: Option<&'a dyn PageRenderer>,
    provider: Option<&'a dyn AIProvider>,
    max_depth: usize,
}

impl<'a> UrlResolver<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, max_depth: usize) -> Self {
        Self {
            fetcher,
            renderer: None,
            provider: None,
            max_depth,
        }
    }

    pub fn with_renderer(mut self, renderer: &'a dyn PageRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_provider(mut self, provider: &'a dyn AIProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Returns a non-aggregator URL, or `StuckOnAggregator` once every
    /// stage has landed on an aggregator. Network failures along the way
    /// keep the best URL found so far.
    pub async fn resolve(&self, url: &str) -> Result<String, ResolveError> {
        let original = url.trim().to_string();

        let mut best = self.apply_link(&original).await;
        if !domains::is_aggregator(&best) {
            return Ok(best);
        }

        debug!("{} is an aggregator, chasing redirects", best);
        best = self.chase_redirects(&best).await;
        if !domains::is_aggregator(&best) {
            info!("Resolved {} -> {}", original, best);
            return Ok(best);
        }

        if let Some(found) = self.render_out(&best).await {
            best = found;
        }
        if domains::is_aggregator(&best) {
            warn!("Stuck on aggregator for {}: {}", original, best);
            return Err(ResolveError::StuckOnAggregator { original, last: best });
        }

        info!("Resolved {} -> {}", original, best);
        Ok(best)
    }

    async fn apply_link(&self, url: &str) -> String {
        let page = match self.fetcher.fetch(url, None).await {
            Ok(page) => page,
            Err(e) => {
                debug!("Fetch failed for {}: {}", url, e);
                return url.to_string();
            }
        };
        if domains::is_ats(&page.final_url) {
            return page.final_url;
        }
        match find_apply_link(&page.body, &page.final_url) {
            // A direct posting is never traded for an aggregator link
            Some(link) if domains::is_aggregator(&link) && !domains::is_aggregator(&page.final_url) => {
                debug!("Keeping {} over aggregator apply link {}", page.final_url, link);
                page.final_url
            }
            Some(link) => link,
            None => page.final_url,
        }
    }

    async fn chase_redirects(&self, start: &str) -> String {
        let mut best = start.to_string();
        let mut current = start.to_string();

        for depth in 0..=self.max_depth {
            let page = match self.fetcher.fetch(&current, None).await {
                Ok(page) => page,
                Err(e) => {
                    debug!("Redirect chase stopped at {}: {}", current, e);
                    return best;
                }
            };
            best = page.final_url.clone();
            if !domains::is_aggregator(&best) {
                return best;
            }
            if depth == self.max_depth {
                break;
            }
            match find_bypass_link(&page.body, &page.final_url) {
                Some(next) if next != current => {
                    debug!("Block page on {}, trying {}", page.final_url, next);
                    current = next;
                }
                _ => break,
            }
        }
        best
    }

    async fn render_out(&self, url: &str) -> Option<String> {
        let renderer = self.renderer?;
        let page = match renderer.render(url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Browser resolution failed for {}: {}", url, e);
                return None;
            }
        };
        if !domains::is_aggregator(&page.final_url) {
            return Some(page.final_url);
        }
        if let Some(hidden) = scan_for_ats(&page.html) {
            debug!("Found ATS link in rendered markup: {}", hidden);
            return Some(hidden);
        }
        let found = self.ask_model(&page.html).await;
        Some(found.unwrap_or(page.final_url))
    }

    async fn ask_model(&self, html: &str) -> Option<String> {
        let provider = self.provider?;
        let prompt = format!(
            "This job aggregator page failed to redirect. Find the direct link to the employer's \
            application page in the HTML below. Look for hidden URLs, window.location assignments, \
            meta refresh tags or 'Click here' links.\n\
            Prefer these domains: {}\n\n\
            Return ONLY the URL, or NOT_FOUND.\n\nHTML:\n{}",
            domains::KNOWN_ATS.join(", "),
            ai::truncate_chars(html, 50_000)
        );
        let reply = match provider.complete(&prompt, 512).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Link extraction model failed: {}", e);
                return None;
            }
        };
        url_re()
            .find(&reply)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ')']).to_string())
            .filter(|url| !domains::is_aggregator(url) && !domains::is_noise(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetcher, FakeRenderer, ScriptedProvider};

    #[test]
    fn test_find_apply_link_prefers_ats() {
        let html = r#"
            <a href="/jobs/similar">Similar jobs</a>
            <a href="https://www.indeed.com/apply/1">Apply now</a>
            <a href="https://acme.com/careers/apply/1">Apply on company site</a>
            <a href="https://jobs.lever.co/acme/1">View posting</a>"#;
        assert_eq!(
            find_apply_link(html, "https://www.adzuna.com/details/1").as_deref(),
            Some("https://jobs.lever.co/acme/1")
        );

        let html = r#"<a href="https://www.indeed.com/x">Apply</a><a href="/apply/42">Apply here</a>"#;
        assert_eq!(
            find_apply_link(html, "https://acme.com/jobs/42").as_deref(),
            Some("https://acme.com/apply/42")
        );
    }

    #[test]
    fn test_bypass_link_patterns() {
        let html = r#"<p>Security Check</p><a href="/authenticate?next=%2Fland%2F1&amp;x=1">continue</a>"#;
        assert_eq!(
            find_bypass_link(html, "https://www.adzuna.com/land/ad/1").as_deref(),
            Some("https://www.adzuna.com/authenticate?next=%2Fland%2F1&x=1")
        );
        let html = r#"<script>window.location.href = "https://jobs.lever.co/acme/2";</script>"#;
        assert_eq!(
            find_bypass_link(html, "https://www.adzuna.com/").as_deref(),
            Some("https://jobs.lever.co/acme/2")
        );
        assert_eq!(find_bypass_link("<p>nothing</p>", "https://a.com/"), None);
    }

    #[tokio::test]
    async fn test_two_aggregator_hops_resolve_to_ats() {
        let fetcher = FakeFetcher::new()
            .page(
                "https://www.adzuna.com/details/1",
                "https://www.adzuna.com/details/1",
                r#"<a href="https://www.adzuna.com/land/ad/1">Apply for this job</a>"#,
            )
            .page(
                "https://www.adzuna.com/land/ad/1",
                "https://www.indeed.com/viewjob?jk=9",
                r#"<h1>Security Check</h1><script>window.location = 'https://boards.greenhouse.io/acme/jobs/7';</script>"#,
            )
            .page(
                "https://boards.greenhouse.io/acme/jobs/7",
                "https://boards.greenhouse.io/acme/jobs/7",
                "<h1>Backend Engineer</h1>",
            );

        let resolved = UrlResolver::new(&fetcher, 3)
            .resolve("https://www.adzuna.com/details/1")
            .await
            .unwrap();
        assert_eq!(resolved, "https://boards.greenhouse.io/acme/jobs/7");
    }

    #[tokio::test]
    async fn test_direct_posting_is_kept_over_aggregator_apply_link() {
        let url = "https://acme.com/careers/42";
        let fetcher = FakeFetcher::new().page(url, url, r#"<a href="https://www.indeed.com/apply/42">Apply</a>"#);

        let resolved = UrlResolver::new(&fetcher, 3).resolve(url).await.unwrap();
        assert_eq!(resolved, url);
    }

    #[tokio::test]
    async fn test_rendered_markup_is_scanned_for_ats_links() {
        let fetcher = FakeFetcher::new().page(
            "https://www.adzuna.com/details/2",
            "https://www.adzuna.com/details/2",
            "<p>Please enable JavaScript</p>",
        );
        let renderer = FakeRenderer::new().page(
            "https://www.adzuna.com/details/2",
            "https://www.adzuna.com/details/2",
            r#"<div data-target="https://jobs.ashbyhq.com/acme/abc?utm=x&amp;y=1"></div>"#,
        );

        let resolved = UrlResolver::new(&fetcher, 3)
            .with_renderer(&renderer)
            .resolve("https://www.adzuna.com/details/2")
            .await
            .unwrap();
        assert_eq!(resolved, "https://jobs.ashbyhq.com/acme/abc?utm=x&y=1");
        assert_eq!(renderer.render_count(), 1);
    }

    #[tokio::test]
    async fn test_never_returns_an_aggregator() {
        let fetcher = FakeFetcher::new().page(
            "https://www.adzuna.com/details/3",
            "https://www.adzuna.com/details/3",
            "<p>Access Denied</p>",
        );
        let renderer = FakeRenderer::new().page(
            "https://www.adzuna.com/details/3",
            "https://www.linkedin.com/jobs/view/3",
            "<p>Sign in</p>",
        );
        let provider = ScriptedProvider::replying("https://www.indeed.com/viewjob?jk=3");

        let err = UrlResolver::new(&fetcher, 3)
            .with_renderer(&renderer)
            .with_provider(&provider)
            .resolve("https://www.adzuna.com/details/3")
            .await
            .unwrap_err();
        let ResolveError::StuckOnAggregator { original, last } = err;
        assert_eq!(original, "https://www.adzuna.com/details/3");
        assert!(domains::is_aggregator(&last));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_model_finds_link_as_last_resort() {
        let fetcher = FakeFetcher::new();
        let renderer = FakeRenderer::new().page(
            "https://www.adzuna.com/details/4",
            "https://www.adzuna.com/details/4",
            "<button onclick=\"go()\">Continue</button>",
        );
        let provider = ScriptedProvider::replying("The link is https://acme.com/careers/4.");

        let resolved = UrlResolver::new(&fetcher, 3)
            .with_renderer(&renderer)
            .with_provider(&provider)
            .resolve("https://www.adzuna.com/details/4")
            .await
            .unwrap();
        assert_eq!(resolved, "https://acme.com/careers/4");
    }

    #[tokio::test]
    async fn test_network_errors_degrade_to_input() {
        let resolved = UrlResolver::new(&FakeFetcher::new(), 3)
            .resolve("https://acme.com/careers/5")
            .await
            .unwrap();
        assert_eq!(resolved, "https://acme.com/careers/5");
    }
}
