// Domain knowledge shared by discovery, resolution and verification:
// which hosts run applicant tracking systems, which only aggregate postings,
// and which URLs are search-engine or tracking noise.

use url::Url;

/// ATS hosts used to build `site:` filters for search queries.
pub const SEARCH_ATS_DOMAINS: &[&str] = &[
    "boards.greenhouse.io",
    "jobs.lever.co",
    "myworkdayjobs.com",
    "jobs.ashbyhq.com",
    "jobs.jobvite.com",
    "careers.smartrecruiters.com",
];

/// Registrable domains that host application forms directly.
pub const KNOWN_ATS: &[&str] = &[
    "greenhouse.io",
    "lever.co",
    "myworkdayjobs.com",
    "workday.com",
    "ashbyhq.com",
    "jobvite.com",
    "smartrecruiters.com",
    "bamboohr.com",
    "icims.com",
];

/// Sites that list postings hosted elsewhere.
pub const KNOWN_AGGREGATORS: &[&str] = &[
    "adzuna.com",
    "indeed.com",
    "linkedin.com",
    "ziprecruiter.com",
    "glassdoor.com",
    "getwork.com",
    "simplyhired.com",
    "monster.com",
];

const SEARCH_ENGINES: &[&str] = &[
    "brave.com",
    "google.com",
    "bing.com",
    "duckduckgo.com",
    "yahoo.com",
];

const TRACKING_MARKERS: &[&str] = &[
    "/url?q=",
    "doubleclick.net",
    "googleadservices",
    "/aclk?",
    "bing.com/ck/",
    "/rd?",
    "click.linksynergy",
    "utm_source=",
];

const JOB_PATH_MARKERS: &[&str] = &[
    "/jobs/",
    "/job/",
    "/apply",
    "/careers/",
    "/positions/",
    "/postings/",
    "gh_jid=",
];

pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn url_on_any(url: &str, domains: &[&str]) -> bool {
    match host_of(url) {
        Some(host) => domains.iter().any(|d| host_matches(&host, d)),
        None => false,
    }
}

pub fn is_ats(url: &str) -> bool {
    url_on_any(url, KNOWN_ATS)
}

pub fn is_aggregator(url: &str) -> bool {
    url_on_any(url, KNOWN_AGGREGATORS)
}

pub fn is_search_engine(url: &str) -> bool {
    url_on_any(url, SEARCH_ENGINES)
}

/// Tracking redirects, search-engine pages and non-http links.
pub fn is_noise(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return true;
    }
    if host_of(url).is_none() {
        return true;
    }
    is_search_engine(url) || TRACKING_MARKERS.iter().any(|m| lower.contains(m))
}

/// Safety-net acceptance for URLs found without any structured context.
pub fn looks_like_job_url(url: &str) -> bool {
    if is_noise(url) {
        return false;
    }
    let lower = url.to_ascii_lowercase();
    KNOWN_ATS.iter().any(|d| lower.contains(d)) || JOB_PATH_MARKERS.iter().any(|m| lower.contains(m))
}

/// Resolves `href` against `base`, returning an absolute http(s) URL.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let joined = match Url::parse(href) {
        Ok(u) => u,
        Err(_) => Url::parse(base).ok()?.join(href).ok()?,
    };
    match joined.scheme() {
        "http" | "https" => Some(joined.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ats_and_aggregator_matching_uses_hosts() {
        assert!(is_ats("https://boards.greenhouse.io/acme/jobs/123"));
        assert!(is_ats("https://acme.wd5.myworkdayjobs.com/en-US/careers/job/1"));
        assert!(!is_ats("https://example.com/?ref=greenhouse.io"));

        assert!(is_aggregator("https://www.adzuna.com/land/ad/42"));
        assert!(is_aggregator("https://uk.indeed.com/viewjob?jk=1"));
        assert!(!is_aggregator("https://jobs.lever.co/acme/1"));
    }

    #[test]
    fn test_noise_filter() {
        assert!(is_noise("https://search.brave.com/search?q=rust"));
        assert!(is_noise("https://www.google.com/url?q=https://jobs.lever.co/x"));
        assert!(is_noise("mailto:hr@acme.com"));
        assert!(!is_noise("https://jobs.lever.co/acme/1"));
    }

    #[test]
    fn test_safety_net_accepts_job_paths_and_ats() {
        assert!(looks_like_job_url("https://acme.com/careers/backend-engineer"));
        assert!(looks_like_job_url("https://jobs.ashbyhq.com/acme/abc"));
        assert!(!looks_like_job_url("https://acme.com/blog/hello"));
        assert!(!looks_like_job_url("https://search.brave.com/jobs/"));
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("https://www.adzuna.com/details/1", "/authenticate?x=1").as_deref(),
            Some("https://www.adzuna.com/authenticate?x=1")
        );
        assert_eq!(absolutize("https://a.com/", "#top"), None);
        assert_eq!(absolutize("https://a.com/", "javascript:void(0)"), None);
    }
}
