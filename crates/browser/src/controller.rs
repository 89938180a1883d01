use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use sb_domain::config::BrowserConfig as BrowserSettings;
use sb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserStatus {
    Stopped,
    Running,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TabInfo {
    pub tab_id: String,
    pub url: Option<String>,
    pub title: Option<String>,
}

/// Live browser state: the process handle, the event-loop task, and the
/// tabs opened through this controller keyed by minted tab ids.
struct Running {
    browser: Browser,
    handler_task: JoinHandle<()>,
    tabs: HashMap<String, Page>,
    /// Most recently opened/used tab; the default operation target.
    current_tab: Option<String>,
    /// Set by the handler task when the websocket closes (process death).
    dead: Arc<AtomicBool>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BrowserController {
    settings: BrowserSettings,
    inner: Mutex<Option<Running>>,
}

impl BrowserController {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(None),
        }
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.nav_timeout_secs)
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Launch the browser process. Idempotent while running.
    pub async fn start(&self) -> Result<Value> {
        let mut guard = self.inner.lock().await;
        if let Some(running) = guard.as_ref() {
            if !running.dead.load(Ordering::Acquire) {
                return Ok(json!({"status": "running", "already_running": true}));
            }
            // Process died since last use; clear state and relaunch.
        }
        if let Some(old) = guard.take() {
            old.handler_task.abort();
        }

        *guard = Some(self.launch().await?);
        Ok(json!({"status": "running"}))
    }

    async fn launch(&self) -> Result<Running> {
        let mut builder = BrowserConfig::builder();
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(ref exe) = self.settings.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder
            .build()
            .map_err(|e| Error::NotReady(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::NotReady(format!("browser launch: {e}")))?;

        let dead = Arc::new(AtomicBool::new(false));
        let dead_flag = dead.clone();
        let handler_task = tokio::spawn(async move {
            // The handler drives the CDP websocket; it ends when the
            // browser process goes away.
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "browser handler event error");
                }
            }
            dead_flag.store(true, Ordering::Release);
            tracing::warn!("browser process exited");
        });

        tracing::info!(headless = self.settings.headless, "browser started");
        Ok(Running {
            browser,
            handler_task,
            tabs: HashMap::new(),
            current_tab: None,
            dead,
        })
    }

    /// Stop the browser process. Idempotent while stopped.
    pub async fn stop(&self) -> Result<Value> {
        let mut guard = self.inner.lock().await;
        let Some(mut running) = guard.take() else {
            return Ok(json!({"status": "stopped", "already_stopped": true}));
        };

        if let Err(e) = running.browser.close().await {
            tracing::debug!(error = %e, "browser close");
        }
        let _ = running.browser.wait().await;
        running.handler_task.abort();
        tracing::info!("browser stopped");
        Ok(json!({"status": "stopped"}))
    }

    pub async fn status(&self) -> Value {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(running) if !running.dead.load(Ordering::Acquire) => json!({
                "status": BrowserStatus::Running,
                "tabs": running.tabs.len(),
            }),
            _ => json!({"status": BrowserStatus::Stopped}),
        }
    }

    // ── Tabs ──────────────────────────────────────────────────────

    pub async fn tab_open(&self, url: &str) -> Result<Value> {
        let mut guard = self.lock_running().await?;
        let running = guard.as_mut().expect("checked by lock_running");

        let page = tokio::time::timeout(self.op_timeout(), running.browser.new_page(url))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(cdp_err)?;

        let tab_id = format!("tab-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        running.tabs.insert(tab_id.clone(), page);
        running.current_tab = Some(tab_id.clone());
        Ok(json!({"tab_id": tab_id, "url": url}))
    }

    pub async fn tab_close(&self, tab_id: &str) -> Result<Value> {
        let mut guard = self.lock_running().await?;
        let running = guard.as_mut().expect("checked by lock_running");

        let page = running
            .tabs
            .remove(tab_id)
            .ok_or_else(|| Error::NotRunning(format!("no tab '{tab_id}'")))?;
        if running.current_tab.as_deref() == Some(tab_id) {
            running.current_tab = running.tabs.keys().next().cloned();
        }
        page.close().await.map_err(cdp_err)?;
        Ok(json!({"closed": tab_id}))
    }

    pub async fn tabs(&self) -> Result<Vec<TabInfo>> {
        let mut guard = self.lock_running().await?;
        let running = guard.as_mut().expect("checked by lock_running");

        let mut infos = Vec::with_capacity(running.tabs.len());
        for (tab_id, page) in &running.tabs {
            let url = page.url().await.ok().flatten();
            let title = page.get_title().await.ok().flatten();
            infos.push(TabInfo {
                tab_id: tab_id.clone(),
                url,
                title,
            });
        }
        Ok(infos)
    }

    // ── Page operations ───────────────────────────────────────────

    pub async fn navigate(&self, tab_id: Option<&str>, url: &str) -> Result<Value> {
        self.with_page(tab_id, |page| {
            let url = url.to_owned();
            async move {
                page.goto(url.clone()).await.map_err(cdp_err)?;
                page.wait_for_navigation().await.map_err(cdp_err)?;
                Ok(json!({"url": url}))
            }
        })
        .await
    }

    /// Visible page text (a readable snapshot, not raw HTML).
    pub async fn snapshot(&self, tab_id: Option<&str>) -> Result<Value> {
        self.with_page(tab_id, |page| async move {
            let text: String = page
                .evaluate("document.body ? document.body.innerText : ''")
                .await
                .map_err(cdp_err)?
                .into_value()
                .map_err(|e| Error::Other(format!("snapshot decode: {e}")))?;
            let url = page.url().await.map_err(cdp_err)?;
            let title = page.get_title().await.map_err(cdp_err)?;
            Ok(json!({"url": url, "title": title, "text": text}))
        })
        .await
    }

    /// PNG screenshot, base64-encoded.
    pub async fn screenshot(&self, tab_id: Option<&str>) -> Result<Value> {
        self.with_page(tab_id, |page| async move {
            let bytes = page
                .screenshot(
                    ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .build(),
                )
                .await
                .map_err(cdp_err)?;
            Ok(json!({
                "format": "png",
                "base64": base64::engine::general_purpose::STANDARD.encode(bytes),
            }))
        })
        .await
    }

    pub async fn click(&self, tab_id: Option<&str>, selector: &str) -> Result<Value> {
        self.with_page(tab_id, |page| {
            let selector = selector.to_owned();
            async move {
                let element = page.find_element(selector.as_str()).await.map_err(cdp_err)?;
                element.click().await.map_err(cdp_err)?;
                Ok(json!({"clicked": selector}))
            }
        })
        .await
    }

    pub async fn type_text(
        &self,
        tab_id: Option<&str>,
        selector: &str,
        text: &str,
    ) -> Result<Value> {
        self.with_page(tab_id, |page| {
            let selector = selector.to_owned();
            let text = text.to_owned();
            async move {
                let element = page.find_element(selector.as_str()).await.map_err(cdp_err)?;
                element.click().await.map_err(cdp_err)?;
                element.type_str(&text).await.map_err(cdp_err)?;
                Ok(json!({"typed_into": selector}))
            }
        })
        .await
    }

    pub async fn press(&self, tab_id: Option<&str>, selector: &str, key: &str) -> Result<Value> {
        self.with_page(tab_id, |page| {
            let selector = selector.to_owned();
            let key = key.to_owned();
            async move {
                let element = page.find_element(selector.as_str()).await.map_err(cdp_err)?;
                element.press_key(&key).await.map_err(cdp_err)?;
                Ok(json!({"pressed": key, "selector": selector}))
            }
        })
        .await
    }

    /// Set a form control's value and fire its change events.
    pub async fn fill(&self, tab_id: Option<&str>, selector: &str, value: &str) -> Result<Value> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             el.value = {val}; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); \
             return true; }})()",
            sel = serde_json::to_string(selector).unwrap_or_default(),
            val = serde_json::to_string(value).unwrap_or_default(),
        );
        self.with_page(tab_id, |page| {
            let selector = selector.to_owned();
            async move {
                let found: bool = page
                    .evaluate(script)
                    .await
                    .map_err(cdp_err)?
                    .into_value()
                    .unwrap_or(false);
                if !found {
                    return Err(Error::Other(format!("no element matches '{selector}'")));
                }
                Ok(json!({"filled": selector}))
            }
        })
        .await
    }

    /// Evaluate a JS expression and return its JSON value.
    pub async fn evaluate(&self, tab_id: Option<&str>, expression: &str) -> Result<Value> {
        self.with_page(tab_id, |page| {
            let expression = expression.to_owned();
            async move {
                let result = page.evaluate(expression).await.map_err(cdp_err)?;
                let value: Value = result.into_value().unwrap_or(Value::Null);
                Ok(json!({"value": value}))
            }
        })
        .await
    }

    /// Wait (poll) until a selector matches or the deadline passes.
    pub async fn wait_for(&self, tab_id: Option<&str>, selector: &str) -> Result<Value> {
        let deadline = tokio::time::Instant::now() + self.op_timeout();
        loop {
            let found = self
                .with_page(tab_id, |page| {
                    let selector = selector.to_owned();
                    async move { Ok(json!(page.find_element(selector.as_str()).await.is_ok())) }
                })
                .await?;
            if found == json!(true) {
                return Ok(json!({"found": selector}));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    // ── Internals ─────────────────────────────────────────────────

    /// Lock the controller and verify the browser is alive; a dead process
    /// clears state so the next `start` relaunches.
    async fn lock_running(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<Running>>> {
        let mut guard = self.inner.lock().await;
        match guard.as_ref() {
            None => Err(Error::NotRunning("browser".into())),
            Some(running) if running.dead.load(Ordering::Acquire) => {
                if let Some(old) = guard.take() {
                    old.handler_task.abort();
                }
                Err(Error::NotRunning("browser (process died)".into()))
            }
            Some(_) => Ok(guard),
        }
    }

    /// Run one operation against the addressed (or current) tab with the
    /// controller deadline applied. The guard is held for the duration:
    /// DevTools RPCs serialize against the single browser process, so
    /// concurrent tool calls queue here.
    async fn with_page<F, Fut>(&self, tab_id: Option<&str>, op: F) -> Result<Value>
    where
        F: FnOnce(Page) -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let mut guard = self.lock_running().await?;
        let running = guard.as_mut().expect("checked by lock_running");

        let id = match tab_id {
            Some(id) => id.to_owned(),
            None => running
                .current_tab
                .clone()
                .ok_or_else(|| Error::NotRunning("no open tab".into()))?,
        };
        running.current_tab = Some(id.clone());
        let page = running
            .tabs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotRunning(format!("no tab '{id}'")))?;

        tokio::time::timeout(self.op_timeout(), op(page))
            .await
            .map_err(|_| Error::Timeout)?
    }
}

fn cdp_err(e: chromiumoxide::error::CdpError) -> Error {
    Error::Other(format!("browser: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> BrowserController {
        BrowserController::new(BrowserSettings::default())
    }

    #[tokio::test]
    async fn operations_while_stopped_return_not_running() {
        let c = controller();
        let err = c.navigate(None, "https://example.com").await.unwrap_err();
        assert!(matches!(err, Error::NotRunning(_)));
        let err = c.tabs().await.unwrap_err();
        assert!(matches!(err, Error::NotRunning(_)));
    }

    #[tokio::test]
    async fn stop_while_stopped_is_idempotent() {
        let c = controller();
        let v = c.stop().await.unwrap();
        assert_eq!(v["already_stopped"], true);
    }

    #[tokio::test]
    async fn status_reports_stopped() {
        let c = controller();
        let v = c.status().await;
        assert_eq!(v["status"], "stopped");
    }
}
