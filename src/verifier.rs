use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::ai::{self, AIProvider};
use crate::fetch::PageFetcher;

const CLOSED_PHRASES: &[&str] = &[
    "closed",
    "filled",
    "no longer accepting",
    "no longer available",
    "position has expired",
];

const FAILURE_PATH_SEGMENTS: &[&str] = &["404", "not-found", "notfound", "error", "expired"];

#[derive(Debug, Deserialize)]
struct Verdict {
    is_valid_job: bool,
}

/// Keyword fallback used when the classifier is unavailable.
pub fn snippet_looks_open(snippet: &str) -> bool {
    let lower = snippet.to_lowercase();
    !CLOSED_PHRASES.iter().any(|p| lower.contains(p))
}

/// Whole path segments (extension ignored) or an `error` query key. Posting
/// IDs that merely contain "404" do not count.
fn final_url_failed(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let bad_segment = parsed.path_segments().into_iter().flatten().any(|segment| {
        let stem = segment.split('.').next().unwrap_or(segment).to_lowercase();
        FAILURE_PATH_SEGMENTS.contains(&stem.as_str())
    });
    bad_segment || parsed.query_pairs().any(|(k, _)| k.eq_ignore_ascii_case("error"))
}

/// Decides whether a URL is an open job posting from a bounded snippet.
pub struct LeadVerifier<'a> {
    fetcher: &'a dyn PageFetcher,
    provider: &'a dyn AIProvider,
    snippet_bytes: usize,
}

impl<'a> LeadVerifier<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, provider: &'a dyn AIProvider, snippet_bytes: usize) -> Self {
        Self {
            fetcher,
            provider,
            snippet_bytes,
        }
    }

    pub async fn verify(&self, url: &str) -> bool {
        let page = match self.fetcher.fetch(url, Some(self.snippet_bytes)).await {
            Ok(page) => page,
            Err(e) => {
                debug!("Rejecting {}: fetch failed: {}", url, e);
                return false;
            }
        };

        if page.status >= 400 {
            debug!("Rejecting {}: HTTP {}", url, page.status);
            return false;
        }
        if final_url_failed(&page.final_url) {
            debug!("Rejecting {}: landed on {}", url, page.final_url);
            return false;
        }

        let prompt = format!(
            "Analyze this HTML snippet from a job page. Is this an OPEN job posting that accepts \
            applications? Answer false for closed postings, 404 pages, login walls or generic \
            career home pages.\n\nURL: {}\n\nHTML:\n{}\n\nReturn JSON: {{\"is_valid_job\": boolean}}",
            page.final_url,
            ai::truncate_chars(&page.body, 10_000)
        );

        match ai::extract_json::<Verdict>(self.provider, &prompt, 64).await {
            Ok(verdict) => verdict.is_valid_job,
            Err(e) => {
                warn!("Verification model failed for {}: {}; using keyword check", url, e);
                snippet_looks_open(&page.body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetcher, ScriptedProvider};

    const URL: &str = "https://jobs.lever.co/acme/1";

    #[tokio::test]
    async fn test_filled_snippet_rejected_when_model_fails() {
        let fetcher = FakeFetcher::new().page(URL, URL, "<h1>Backend Engineer</h1><p>This position has been filled.</p>");
        let provider = ScriptedProvider::failing();
        assert!(!LeadVerifier::new(&fetcher, &provider, 15_000).verify(URL).await);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_open_snippet_accepted_when_model_fails() {
        let fetcher = FakeFetcher::new().page(URL, URL, "<h1>Backend Engineer</h1><button>Apply</button>");
        let provider = ScriptedProvider::failing();
        assert!(LeadVerifier::new(&fetcher, &provider, 15_000).verify(URL).await);
    }

    #[tokio::test]
    async fn test_model_verdict_is_used() {
        let fetcher = FakeFetcher::new().page(URL, URL, "<h1>Careers at Acme</h1>");
        let provider = ScriptedProvider::replying(r#"{"is_valid_job": false}"#);
        assert!(!LeadVerifier::new(&fetcher, &provider, 15_000).verify(URL).await);
    }

    #[tokio::test]
    async fn test_http_failures_skip_the_model() {
        let provider = ScriptedProvider::replying(r#"{"is_valid_job": true}"#);

        let gone = FakeFetcher::new().status(URL, 404, "Not found");
        assert!(!LeadVerifier::new(&gone, &provider, 15_000).verify(URL).await);

        let redirected = FakeFetcher::new().page(URL, "https://jobs.lever.co/404?error=true", "");
        assert!(!LeadVerifier::new(&redirected, &provider, 15_000).verify(URL).await);

        assert!(!LeadVerifier::new(&FakeFetcher::new(), &provider, 15_000).verify(URL).await);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_posting_ids_containing_404_reach_the_model() {
        let url = "https://boards.greenhouse.io/acme/jobs/4404123";
        let fetcher = FakeFetcher::new().page(url, url, "<h1>Backend Engineer</h1><button>Apply</button>");
        let provider = ScriptedProvider::replying(r#"{"is_valid_job": true}"#);
        assert!(LeadVerifier::new(&fetcher, &provider, 15_000).verify(url).await);
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn test_failure_markers_match_whole_segments() {
        assert!(final_url_failed("https://acme.com/careers/404"));
        assert!(final_url_failed("https://acme.com/jobs/not-found.html"));
        assert!(final_url_failed("https://acme.com/jobs?Error=1"));
        assert!(!final_url_failed("https://jobs.lever.co/acme/a404b-expired-soon"));
        assert!(!final_url_failed("https://acme.wd5.myworkdayjobs.com/en-US/jobs/R-14045"));
    }

    #[tokio::test]
    async fn test_snippet_is_bounded() {
        let body = format!("{}{}", "a".repeat(100), "position filled");
        let fetcher = FakeFetcher::new().page(URL, URL, &body);
        let provider = ScriptedProvider::failing();
        // The closed marker sits past the fetched range
        assert!(LeadVerifier::new(&fetcher, &provider, 50).verify(URL).await);
    }
}
