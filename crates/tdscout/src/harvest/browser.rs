//! Chromium session wrapper.
//!
//! One session per worker: browser automation state (current page, open
//! tabs) is single-threaded per session, so sessions are never shared.
//! Element waits are bounded polling loops; callers decide what a timeout
//! means (no listings, no pagination control, ...), it is not inherently an
//! error.

use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::{Element, Page};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::error::HarvestError;

const NAV_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Desktop Chrome user agent presented to the county sites.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
}

impl BrowserSession {
    /// Launches a browser and opens the session's single working page.
    pub async fn launch(headless: bool) -> Result<Self, HarvestError> {
        let mut builder = BrowserConfig::builder().window_size(1280, 900);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(HarvestError::BrowserLaunch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HarvestError::BrowserLaunch(e.to_string()))?;

        // The handler stream must be driven for the browser to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| HarvestError::BrowserLaunch(e.to_string()))?;
        page.set_user_agent(USER_AGENT)
            .await
            .map_err(|e| HarvestError::BrowserLaunch(e.to_string()))?;

        Ok(Self {
            browser,
            handler_task,
            page,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigates the working page, bounded by the navigation timeout.
    pub async fn goto(&self, url: &str) -> Result<(), HarvestError> {
        match timeout(NAV_TIMEOUT, self.page.goto(url.to_string())).await {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;
                Ok(())
            }
            Ok(Err(e)) => Err(HarvestError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(HarvestError::Navigation {
                url: url.to_string(),
                reason: "navigation timeout".to_string(),
            }),
        }
    }

    /// The rendered HTML of the working page.
    pub async fn content(&self) -> Result<String, HarvestError> {
        self.page
            .content()
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))
    }

    /// The working page's current URL, empty when unknown.
    pub async fn current_url(&self) -> String {
        self.page.url().await.ok().flatten().unwrap_or_default()
    }

    /// Polls for an element until it appears or the wait expires.
    pub async fn wait_for_selector(
        &self,
        css: &str,
        wait: Duration,
    ) -> Result<Element, HarvestError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Ok(element) = self.page.find_element(css).await {
                return Ok(element);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HarvestError::SelectorTimeout {
                    selector: css.to_string(),
                    timeout_secs: wait.as_secs(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Finds an element without waiting.
    pub async fn try_find(&self, css: &str) -> Option<Element> {
        self.page.find_element(css).await.ok()
    }

    /// Clears an input and types the given text into it.
    pub async fn fill(&self, css: &str, text: &str) -> Result<Element, HarvestError> {
        let element = self.wait_for_selector(css, Duration::from_secs(5)).await?;
        // Clear any existing value first; type_str only appends.
        let selector_json = serde_json::to_string(css).unwrap_or_default();
        let _ = self
            .page
            .evaluate(format!(
                "document.querySelector({}).value = ''",
                selector_json
            ))
            .await;
        element
            .click()
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))?;
        element
            .type_str(text)
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))?;
        Ok(element)
    }

    /// Clicks an element through JavaScript. The portal hides several
    /// controls behind overlays that swallow pointer events, and a JS click
    /// bypasses them the same way on every page.
    pub async fn js_click(&self, css: &str) -> Result<(), HarvestError> {
        let selector_json = serde_json::to_string(css).unwrap_or_default();
        self.page
            .evaluate(format!(
                "document.querySelector({}) && document.querySelector({}).click()",
                selector_json, selector_json
            ))
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))?;
        Ok(())
    }

    /// Runs a JavaScript expression and deserializes its result.
    pub async fn evaluate<T: serde::de::DeserializeOwned>(
        &self,
        js: &str,
    ) -> Result<T, HarvestError> {
        let result = self
            .page
            .evaluate(js.to_string())
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))?;
        result
            .into_value::<T>()
            .map_err(|e| HarvestError::Browser(e.to_string()))
    }

    /// The session's cookies rendered as a `Cookie` request header, so PDF
    /// fetches can ride the authenticated browser session.
    pub async fn cookie_header(&self) -> Result<String, HarvestError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))?;
        Ok(cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; "))
    }

    /// All open pages (tabs) in the browser.
    pub async fn pages(&self) -> Result<Vec<Page>, HarvestError> {
        self.browser
            .pages()
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))
    }

    /// Waits for a tab that was not in `known_ids` to open, returning it.
    pub async fn wait_for_new_page(
        &self,
        known_ids: &[String],
        wait: Duration,
    ) -> Option<Page> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Ok(pages) = self.browser.pages().await {
                for page in pages {
                    let id = format!("{:?}", page.target_id());
                    if !known_ids.contains(&id) {
                        return Some(page);
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Target ids of all currently open pages.
    pub async fn page_ids(&self) -> Vec<String> {
        match self.browser.pages().await {
            Ok(pages) => pages
                .iter()
                .map(|p| format!("{:?}", p.target_id()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Shuts the browser down and stops the handler task.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            log::debug!("Browser close reported: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}
