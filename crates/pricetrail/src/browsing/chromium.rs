//! Chromium-backed browsing session using chromiumoxide.

use super::{BrowseResult, Browsing, Element, Locator};
use crate::config::BrowserSettings;
use crate::error::BrowseError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Flags the source site renders predictably under.
const DEFAULT_ARGS: &[&str] = &[
    "--lang=pl",
    "--disable-notifications",
    "--no-sandbox",
    "--disable-gpu",
    "--disable-software-rasterizer",
    "--disable-dev-shm-usage",
];

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. PRICETRAIL_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("PRICETRAIL_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. System PATH
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 3. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// One Chromium process with a single tab.
pub struct ChromiumBrowsing {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
    closed: bool,
}

impl ChromiumBrowsing {
    /// Launch Chromium and open a blank tab.
    pub async fn launch(settings: &BrowserSettings) -> BrowseResult<Self> {
        let chrome_path = settings
            .chromium_path
            .clone()
            .or_else(find_chromium)
            .ok_or_else(|| {
                BrowseError::Launch(
                    "Chromium not found. Set PRICETRAIL_CHROMIUM_PATH or browser.chromium_path."
                        .into(),
                )
            })?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(1920, 1080);
        if !settings.headless {
            builder = builder.with_head();
        }
        for arg in DEFAULT_ARGS
            .iter()
            .map(|a| a.to_string())
            .chain(settings.args.iter().cloned())
        {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| BrowseError::Launch(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowseError::Launch(format!("failed to launch Chromium: {e}")))?;

        // Drive the CDP connection until the browser goes away
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler stopped: {e}");
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowseError::Launch(format!("failed to create new page: {e}")))?;

        Ok(Self {
            browser,
            page,
            handler,
            navigation_timeout: Duration::from_millis(settings.navigation_timeout_ms),
            closed: false,
        })
    }
}

#[async_trait]
impl Browsing for ChromiumBrowsing {
    async fn navigate(&mut self, url: &str) -> BrowseResult<()> {
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {
                // goto already waits for the load event; a late redirect is not fatal
                if let Err(e) = self.page.wait_for_navigation().await {
                    debug!("wait_for_navigation after {url}: {e}");
                }
                Ok(())
            }
            Ok(Err(e)) => Err(match classify(e, url) {
                BrowseError::SessionLost(msg) => BrowseError::SessionLost(msg),
                other => BrowseError::Navigation(other.to_string()),
            }),
            Err(_) => Err(BrowseError::Navigation(format!(
                "navigation to {url} timed out after {}ms",
                self.navigation_timeout.as_millis()
            ))),
        }
    }

    async fn find(&self, locator: &Locator) -> BrowseResult<Box<dyn Element>> {
        let css = locator.to_css();
        let inner = self
            .page
            .find_element(css.as_str())
            .await
            .map_err(|e| classify(e, &locator.to_string()))?;
        Ok(Box::new(ChromiumElement { inner }))
    }

    async fn find_all(&self, locator: &Locator) -> BrowseResult<Vec<Box<dyn Element>>> {
        let css = locator.to_css();
        let found = self
            .page
            .find_elements(css.as_str())
            .await
            .map_err(|e| classify(e, &locator.to_string()))?;
        Ok(found
            .into_iter()
            .map(|inner| Box::new(ChromiumElement { inner }) as Box<dyn Element>)
            .collect())
    }

    async fn close(&mut self) -> BrowseResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            warn!("Chromium did not exit cleanly: {e}");
        }
        self.handler.abort();

        result
            .map(|_| ())
            .map_err(|e| BrowseError::Interaction(format!("failed to close Chromium: {e}")))
    }
}

impl Drop for ChromiumBrowsing {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// A Chromium DOM element.
pub struct ChromiumElement {
    inner: chromiumoxide::element::Element,
}

#[async_trait]
impl Element for ChromiumElement {
    async fn click(&self) -> BrowseResult<()> {
        self.inner
            .click()
            .await
            .map(|_| ())
            .map_err(|e| classify(e, "click"))
    }

    async fn clear(&self) -> BrowseResult<()> {
        self.inner
            .call_js_fn(
                "function() { this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }",
                false,
            )
            .await
            .map(|_| ())
            .map_err(|e| classify(e, "clear"))
    }

    async fn send_text(&self, text: &str) -> BrowseResult<()> {
        self.inner
            .focus()
            .await
            .map_err(|e| classify(e, "focus"))?;
        self.inner
            .type_str(text)
            .await
            .map(|_| ())
            .map_err(|e| classify(e, "type"))
    }

    async fn text(&self) -> BrowseResult<String> {
        let text = self
            .inner
            .inner_text()
            .await
            .map_err(|e| classify(e, "inner_text"))?;
        Ok(text.unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> BrowseResult<Option<String>> {
        self.inner
            .attribute(name)
            .await
            .map_err(|e| classify(e, name))
    }

    async fn outer_html(&self) -> BrowseResult<String> {
        let html = self
            .inner
            .outer_html()
            .await
            .map_err(|e| classify(e, "outer_html"))?;
        Ok(html.unwrap_or_default())
    }

    async fn find(&self, locator: &Locator) -> BrowseResult<Box<dyn Element>> {
        let css = locator.to_css();
        let inner = self
            .inner
            .find_element(css.as_str())
            .await
            .map_err(|e| classify(e, &locator.to_string()))?;
        Ok(Box::new(ChromiumElement { inner }))
    }

    async fn find_all(&self, locator: &Locator) -> BrowseResult<Vec<Box<dyn Element>>> {
        let css = locator.to_css();
        let found = self
            .inner
            .find_elements(css.as_str())
            .await
            .map_err(|e| classify(e, &locator.to_string()))?;
        Ok(found
            .into_iter()
            .map(|inner| Box::new(ChromiumElement { inner }) as Box<dyn Element>)
            .collect())
    }
}

/// Map a CDP error onto the browsing error taxonomy.
fn classify(e: CdpError, what: &str) -> BrowseError {
    match e {
        CdpError::NotFound => BrowseError::ElementNotFound(what.to_string()),
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            BrowseError::SessionLost(format!("{what}: {e}"))
        }
        other => {
            // DOM.querySelector reports a missing node as a protocol error
            let msg = other.to_string();
            if msg.contains("Could not find node") || msg.contains("No node") {
                BrowseError::ElementNotFound(what.to_string())
            } else {
                BrowseError::Interaction(format!("{what}: {msg}"))
            }
        }
    }
}
