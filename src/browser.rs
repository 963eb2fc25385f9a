//! Headless-browser session and page driver.
//!
//! Thin wrapper over chromiumoxide that gives the pipeline the small
//! page-automation surface it needs: navigation with soft timeouts, element
//! queries, typed input, in-page evaluation, and best-effort screenshots.
//!
//! Navigation timeouts are swallowed by design — some sites signal
//! completion without a navigation event, so the caller proceeds with
//! whatever page state exists. Failures worth knowing about are logged at
//! `warn`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config;

/// Interval for layout-visibility polling.
const VISIBILITY_POLL_MS: u64 = 250;

/// An exclusively-owned browser session for one pipeline run.
///
/// The underlying chromiumoxide handler stream must be driven for the
/// browser to make progress; [`launch`](BrowserSession::launch) spawns that
/// loop and [`close`](BrowserSession::close) tears everything down.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    nav_timeout: Duration,
    wait_timeout: Duration,
    screenshot_dir: Option<PathBuf>,
}

impl BrowserSession {
    pub async fn launch(config: &config::BrowserConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder();
        if let Some(exe) = &config.executable {
            builder = builder.chrome_executable(exe);
        }
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler: {}", e);
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
            nav_timeout: Duration::from_secs(config.nav_timeout_secs),
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
            screenshot_dir: config.screenshot_dir.clone(),
        })
    }

    /// Open a new blank page owned by this session.
    pub async fn new_page(&self) -> Result<PageDriver> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("Failed to open page")?;

        Ok(PageDriver {
            page,
            nav_timeout: self.nav_timeout,
            wait_timeout: self.wait_timeout,
            screenshot_dir: self.screenshot_dir.clone(),
        })
    }

    /// Tear the session down. Safe to call on every exit path.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

/// Driver for one browser tab.
pub struct PageDriver {
    page: Page,
    nav_timeout: Duration,
    wait_timeout: Duration,
    screenshot_dir: Option<PathBuf>,
}

impl PageDriver {
    /// Navigate to a URL, treating timeouts and errors as soft failures.
    ///
    /// Returns `true` when the navigation settled within the timeout.
    pub async fn goto_soft(&self, url: &str) -> bool {
        let nav = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };

        match tokio::time::timeout(self.nav_timeout, nav).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("navigation to {} failed: {}", url, e);
                false
            }
            Err(_) => {
                warn!("navigation to {} timed out, proceeding", url);
                false
            }
        }
    }

    /// Wait for a navigation triggered elsewhere (e.g. a submit click).
    /// Timeouts are swallowed.
    pub async fn wait_for_navigation_soft(&self) {
        match tokio::time::timeout(self.nav_timeout, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("navigation wait failed: {}", e),
            Err(_) => debug!("navigation wait timed out, proceeding"),
        }
    }

    pub async fn current_url(&self) -> String {
        match self.page.url().await {
            Ok(Some(url)) => url,
            _ => String::new(),
        }
    }

    pub async fn title(&self) -> String {
        match self.page.get_title().await {
            Ok(Some(title)) => title,
            _ => String::new(),
        }
    }

    /// Evaluate a JS expression in the page and deserialize its result.
    pub async fn eval<T: DeserializeOwned>(&self, js: &str) -> Result<T> {
        let value = self
            .page
            .evaluate(js)
            .await
            .context("page evaluation failed")?;
        value.into_value().context("unexpected evaluation result")
    }

    /// True when the selector matches at least one element.
    pub async fn exists(&self, selector: &str) -> bool {
        self.page.find_element(selector).await.is_ok()
    }

    /// Click the first element matching the selector.
    pub async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element for {}", selector))?;
        element.click().await?;
        Ok(())
    }

    /// Click without failing the caller; returns whether the click landed.
    pub async fn click_soft(&self, selector: &str) -> bool {
        match self.click(selector).await {
            Ok(()) => true,
            Err(e) => {
                debug!("click {} failed: {}", selector, e);
                false
            }
        }
    }

    /// Focus an element and type text into it, character by character.
    pub async fn type_into(&self, selector: &str, text: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element for {}", selector))?;
        element.click().await?;
        element.type_str(text).await?;
        Ok(())
    }

    /// Press a key (e.g. `"Enter"`) on the element matching the selector.
    pub async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element for {}", selector))?;
        element.press_key(key).await?;
        Ok(())
    }

    /// Layout visibility: present, non-zero box, not `display: none`.
    ///
    /// Presence in the DOM is not enough for two-step login forms that
    /// reveal the password field client-side.
    pub async fn is_visible(&self, selector: &str) -> bool {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                const rect = el.getBoundingClientRect();
                return rect.width > 0 && rect.height > 0 && el.offsetParent !== null;
            }})()"#,
            sel = js_string(selector)
        );
        self.eval::<bool>(&js).await.unwrap_or(false)
    }

    /// Poll until the selector becomes layout-visible or the wait timeout
    /// expires. Returns whether it became visible.
    pub async fn wait_for_visible(&self, selector: &str) -> bool {
        let deadline = tokio::time::Instant::now() + self.wait_timeout;
        loop {
            if self.is_visible(selector).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(VISIBILITY_POLL_MS)).await;
        }
    }

    /// Return the first selector from the list that matches an element.
    pub async fn first_present(&self, selectors: &[&str]) -> Option<String> {
        for selector in selectors {
            if self.exists(selector).await {
                return Some(selector.to_string());
            }
        }
        None
    }

    /// Write a debug screenshot. Best-effort: failures are logged and
    /// ignored, and nothing happens when no screenshot dir is configured.
    pub async fn screenshot(&self, name: &str) {
        let Some(dir) = &self.screenshot_dir else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            debug!("screenshot dir: {}", e);
            return;
        }
        let path = dir.join(format!("{}.png", name));
        if let Err(e) = self
            .page
            .save_screenshot(ScreenshotParams::builder().build(), &path)
            .await
        {
            debug!("screenshot {}: {}", path.display(), e);
        }
    }
}

/// The page-automation capability the pipeline components consume.
///
/// Everything above the browser layer takes `&dyn PageControl`, which keeps
/// the login strategies, link discoverer, and content extractor independent
/// of chromiumoxide and mockable in tests. All methods are soft: they report
/// failure through return values, never through errors, matching the
/// "proceed with whatever page state exists" policy.
#[async_trait]
pub trait PageControl: Send + Sync {
    async fn goto_soft(&self, url: &str) -> bool;
    async fn wait_for_navigation_soft(&self);
    async fn current_url(&self) -> String;
    async fn title(&self) -> String;
    async fn eval_json(&self, js: &str) -> Result<serde_json::Value>;
    async fn exists(&self, selector: &str) -> bool;
    async fn click_soft(&self, selector: &str) -> bool;
    async fn type_into_soft(&self, selector: &str, text: &str) -> bool;
    async fn press_key_soft(&self, selector: &str, key: &str) -> bool;
    async fn is_visible(&self, selector: &str) -> bool;
    async fn wait_for_visible(&self, selector: &str) -> bool;
    async fn screenshot(&self, name: &str);

    /// First selector from the list that matches an element, if any.
    async fn first_present(&self, selectors: &[&str]) -> Option<String> {
        for selector in selectors {
            if self.exists(selector).await {
                return Some(selector.to_string());
            }
        }
        None
    }
}

#[async_trait]
impl PageControl for PageDriver {
    async fn goto_soft(&self, url: &str) -> bool {
        PageDriver::goto_soft(self, url).await
    }

    async fn wait_for_navigation_soft(&self) {
        PageDriver::wait_for_navigation_soft(self).await
    }

    async fn current_url(&self) -> String {
        PageDriver::current_url(self).await
    }

    async fn title(&self) -> String {
        PageDriver::title(self).await
    }

    async fn eval_json(&self, js: &str) -> Result<serde_json::Value> {
        self.eval::<serde_json::Value>(js).await
    }

    async fn exists(&self, selector: &str) -> bool {
        PageDriver::exists(self, selector).await
    }

    async fn click_soft(&self, selector: &str) -> bool {
        PageDriver::click_soft(self, selector).await
    }

    async fn type_into_soft(&self, selector: &str, text: &str) -> bool {
        match self.type_into(selector, text).await {
            Ok(()) => true,
            Err(e) => {
                debug!("type into {} failed: {}", selector, e);
                false
            }
        }
    }

    async fn press_key_soft(&self, selector: &str, key: &str) -> bool {
        match self.press_key(selector, key).await {
            Ok(()) => true,
            Err(e) => {
                debug!("press {} on {} failed: {}", key, selector, e);
                false
            }
        }
    }

    async fn is_visible(&self, selector: &str) -> bool {
        PageDriver::is_visible(self, selector).await
    }

    async fn wait_for_visible(&self, selector: &str) -> bool {
        PageDriver::wait_for_visible(self, selector).await
    }

    async fn screenshot(&self, name: &str) {
        PageDriver::screenshot(self, name).await
    }
}

/// Quote a string for safe embedding in generated JS.
pub fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
