use std::time::Duration;

use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::find::Deadline;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const URL_CHANGE_FALLBACK: Duration = Duration::from_secs(5);

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum BrowserOutcome {
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("stale element reference: {0}")]
    Stale(#[source] CmdError),
    #[error("webdriver session could not be created: {0}")]
    Session(#[from] fantoccini::error::NewSessionError),
    #[error("element reference could not be serialized: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected webdriver error: {0}")]
    Unexpected(#[source] CmdError),
}

impl BrowserOutcome {
    /// Conditions worth a fresh locate-and-retry cycle. Anything else means
    /// the driver itself misbehaved and retrying would only mask it.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            BrowserOutcome::NotFound(_) | BrowserOutcome::Timeout(_) | BrowserOutcome::Stale(_)
        )
    }
}

impl From<CmdError> for BrowserOutcome {
    fn from(err: CmdError) -> Self {
        if matches!(err, CmdError::WaitTimeout) {
            return BrowserOutcome::Timeout("bounded wait elapsed".to_string());
        }
        let message = err.to_string();
        if message.contains("no such element") {
            BrowserOutcome::NotFound(message)
        } else if message.contains("stale element reference") {
            BrowserOutcome::Stale(err)
        } else {
            BrowserOutcome::Unexpected(err)
        }
    }
}

/// One browser session, owned for the whole run and passed to every flow.
pub struct Session {
    pub(crate) client: Client,
}

impl Session {
    pub async fn launch(config: &Config) -> Result<Self, BrowserOutcome> {
        let mut args = vec![
            "--window-size=1280,1000".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--lang=es-MX".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            format!("--user-agent={USER_AGENT}"),
        ];
        if config.headless {
            args.push("--headless=new".to_string());
        }

        let mut chrome_opts = serde_json::map::Map::new();
        chrome_opts.insert("args".to_string(), json!(args));
        chrome_opts.insert("excludeSwitches".to_string(), json!(["enable-automation"]));
        chrome_opts.insert("useAutomationExtension".to_string(), json!(false));
        if let Some(binary) = &config.chrome_binary {
            chrome_opts.insert("binary".to_string(), json!(binary));
        }

        let mut caps = serde_json::map::Map::new();
        caps.insert("browserName".to_string(), json!("chrome"));
        caps.insert("goog:chromeOptions".to_string(), json!(chrome_opts));

        let mut builder = ClientBuilder::native();
        let builder = builder.capabilities(caps);
        let client = builder.connect(&config.webdriver_url).await?;
        Ok(Session { client })
    }

    pub async fn goto(&self, url: &str) -> Result<(), BrowserOutcome> {
        self.client.goto(url).await?;
        self.mask_webdriver_flag().await;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, BrowserOutcome> {
        Ok(self.client.current_url().await?.to_string())
    }

    pub async fn execute(
        &self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, BrowserOutcome> {
        Ok(self.client.execute(script, args).await?)
    }

    /// Reset the search scope to the top-level document. Frame focus is
    /// sticky, so every operation that assumes a fresh scope starts here.
    pub async fn enter_top(&self) -> Result<(), BrowserOutcome> {
        let _ = self.client.clone().enter_frame(None).await?;
        Ok(())
    }

    pub async fn wait_page_ready(&self, deadline: Deadline) -> Result<(), BrowserOutcome> {
        loop {
            let state = self.execute("return document.readyState", vec![]).await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if deadline.expired() {
                return Err(BrowserOutcome::Timeout("document ready state".to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait for the address bar to move away from `old_url`. Some pages
    /// update via AJAX without navigating, so a timeout only downgrades to
    /// a short ready-state check instead of failing.
    pub async fn wait_for_url_change(
        &self,
        old_url: &str,
        deadline: Deadline,
    ) -> Result<(), BrowserOutcome> {
        loop {
            if self.current_url().await? != old_url {
                return Ok(());
            }
            if deadline.expired() {
                return self
                    .wait_page_ready(Deadline::after(URL_CHANGE_FALLBACK))
                    .await;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll a held element until the driver reports it gone. Returns whether
    /// staleness was observed; callers treat a still-live element as "the
    /// page updated in place" and move on.
    pub async fn wait_for_staleness(&self, element: &Element, deadline: Deadline) -> bool {
        loop {
            if element.is_displayed().await.is_err() {
                return true;
            }
            if deadline.expired() {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Save a screenshot and the page markup so a failed headless run can be
    /// inspected afterwards. Never fails the caller.
    pub async fn dump_debug(&self, tag: &str) {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let png = format!("debug_{tag}_{stamp}.png");
        let html = format!("debug_{tag}_{stamp}.html");

        match self.client.screenshot().await {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(&png, bytes).await {
                    warn!("could not write {png}: {err}");
                }
            }
            Err(err) => warn!("could not capture a screenshot: {err}"),
        }
        match self.client.source().await {
            Ok(markup) => {
                if let Err(err) = tokio::fs::write(&html, markup).await {
                    warn!("could not write {html}: {err}");
                }
            }
            Err(err) => warn!("could not capture the page markup: {err}"),
        }
        info!("saved debug artifacts: {png} / {html}");
    }

    pub async fn close(self) {
        if let Err(err) = self.client.close().await {
            warn!("could not close the browser cleanly: {err}");
        }
    }

    // Sites probing navigator.webdriver only see the masked value from the
    // most recent navigation; client-side redirects land unmasked.
    async fn mask_webdriver_flag(&self) {
        let script = "Object.defineProperty(navigator, 'webdriver', {get: () => undefined});";
        if let Err(err) = self.client.execute(script, vec![]).await {
            warn!("could not mask the webdriver flag: {err}");
        }
    }
}
