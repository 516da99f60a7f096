use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// A page fetched over plain HTTP after following redirects.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches `url`, reading at most `max_bytes` of the body when given.
    async fn fetch(&self, url: &str, max_bytes: Option<usize>) -> Result<FetchedPage>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, max_bytes: Option<usize>) -> Result<FetchedPage> {
        let mut response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?
        {
            bytes.extend_from_slice(&chunk);
            if let Some(max) = max_bytes {
                if bytes.len() >= max {
                    bytes.truncate(max);
                    break;
                }
            }
        }

        debug!("Fetched {} -> {} ({} bytes, status {})", url, final_url, bytes.len(), status);

        Ok(FetchedPage {
            status,
            final_url,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_fetch_follows_redirects_and_caps_body() {
        let fetcher = HttpFetcher::new(Duration::from_secs(10)).unwrap();
        let page = fetcher.fetch("http://example.com", Some(64)).await.unwrap();
        assert!(page.body.len() <= 64);
        assert!(page.final_url.starts_with("http"));
    }
}
