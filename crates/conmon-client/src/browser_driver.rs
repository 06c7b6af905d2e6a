use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use conmon_core::error::AppError;
use conmon_core::traits::PageDriver;
use futures::StreamExt;

/// Page driver rendering pages in headless Chromium (Chrome DevTools
/// Protocol).
///
/// One Chromium process is shared by all clones; each load opens a tab,
/// waits for `<body>`, reads the rendered DOM and closes the tab. Images are
/// not loaded.
#[derive(Clone)]
pub struct BrowserDriver {
    browser: Arc<Browser>,
    timeout: Duration,
}

impl BrowserDriver {
    /// Launch Chromium with a 90 s per-page timeout.
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(90)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
        if let Some(bin) = chrome_binary() {
            tracing::info!(path = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--blink-settings=imagesEnabled=false")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to make progress.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
        })
    }

    async fn render(&self, url: &str) -> Result<String, AppError> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to navigate to {url}: {e}")))?;
        page.find_element("body")
            .await
            .map_err(|e| AppError::HttpError(format!("Page did not render body: {e}")))?;
        let html = page
            .content()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read page content: {e}")))?;
        let _ = page.close().await;
        Ok(html)
    }
}

impl PageDriver for BrowserDriver {
    async fn load(&self, url: &str) -> Result<String, AppError> {
        tokio::time::timeout(self.timeout, self.render(url))
            .await
            .map_err(|_| AppError::Timeout(self.timeout.as_secs()))?
    }
}

/// `CHROME_BIN` if it exists, else the first well-known install path.
/// `None` leaves the lookup to chromiumoxide.
fn chrome_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    [
        // The snap wrapper drops headless flags; use the real binary.
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}
