use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thirtyfour::{ChromiumLikeCapabilities, DesiredCapabilities, WebDriver};
use tracing::{debug, info, warn};

use crate::fetch::BROWSER_USER_AGENT;

/// The landing state of a page after a real browser has rendered it.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub html: String,
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage>;
}

/// Renders pages in headless Chrome through a running chromedriver.
pub struct WebDriverRenderer {
    webdriver_url: String,
    timeout: Duration,
    settle: Duration,
}

impl WebDriverRenderer {
    pub fn new(webdriver_url: impl Into<String>, timeout: Duration, settle: Duration) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            timeout,
            settle,
        }
    }

    async fn navigate(&self, driver: &WebDriver, url: &str) -> Result<RenderedPage> {
        driver
            .goto(url)
            .await
            .context("Failed to navigate to URL")?;

        // Client-side redirects and timers need a moment to fire
        tokio::time::sleep(self.settle).await;

        let final_url = driver
            .current_url()
            .await
            .context("Failed to read current URL")?
            .to_string();
        let html = driver.source().await.context("Failed to read page source")?;

        Ok(RenderedPage { final_url, html })
    }
}

#[async_trait]
impl PageRenderer for WebDriverRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage> {
        info!("Rendering {} in browser", url);

        let mut caps = DesiredCapabilities::chrome();
        caps.set_headless()?;
        caps.set_no_sandbox()?;
        caps.add_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_arg(&format!("--user-agent={}", BROWSER_USER_AGENT))?;

        let driver = WebDriver::new(&self.webdriver_url, caps)
            .await
            .with_context(|| {
                format!(
                    "Failed to start browser session at {}. Is chromedriver running?",
                    self.webdriver_url
                )
            })?;

        let outcome = tokio::time::timeout(self.timeout, self.navigate(&driver, url)).await;

        if let Err(e) = driver.quit().await {
            warn!("Failed to close browser session: {}", e);
        }

        match outcome {
            Ok(result) => {
                if let Ok(page) = &result {
                    debug!("Browser landed on {}", page.final_url);
                }
                result
            }
            Err(_) => Err(anyhow!(
                "Browser navigation timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}
