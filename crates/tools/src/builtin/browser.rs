//! Browser tool — a thin shim over the browser controller.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use sb_browser::BrowserController;
use sb_domain::error::{Error, Result};

use crate::tool::{Tool, ToolContext};

#[derive(Debug, Deserialize)]
struct BrowserParams {
    action: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tab_id: Option<String>,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    expression: Option<String>,
}

pub struct BrowserTool {
    controller: Arc<BrowserController>,
}

impl BrowserTool {
    pub fn new(controller: Arc<BrowserController>) -> Self {
        Self { controller }
    }
}

fn require<'a>(field: Option<&'a str>, name: &str) -> Result<&'a str> {
    field.ok_or_else(|| Error::parse("tool_args", format!("missing '{name}'")))
}

#[async_trait::async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Control a headless browser: start/stop, tabs, navigation, snapshots, \
         screenshots, clicking, typing, and JS evaluation."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["start", "stop", "status", "tabs", "open", "close_tab",
                             "navigate", "snapshot", "screenshot", "click", "type",
                             "press", "fill", "evaluate", "wait"],
                    "description": "Operation to perform"
                },
                "url": { "type": "string", "description": "Target URL (open, navigate)" },
                "tab_id": { "type": "string", "description": "Tab to address (defaults to the current tab)" },
                "selector": { "type": "string", "description": "CSS selector (click, type, press, fill, wait)" },
                "text": { "type": "string", "description": "Text to type" },
                "key": { "type": "string", "description": "Key to press, e.g. 'Enter'" },
                "value": { "type": "string", "description": "Value for fill" },
                "expression": { "type": "string", "description": "JavaScript for evaluate" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let req: BrowserParams = serde_json::from_value(params)
            .map_err(|e| Error::parse("tool_args", e))?;
        let tab = req.tab_id.as_deref();

        match req.action.as_str() {
            "start" => self.controller.start().await,
            "stop" => self.controller.stop().await,
            "status" => Ok(self.controller.status().await),
            "tabs" => Ok(json!({"tabs": self.controller.tabs().await?})),
            "open" => {
                self.controller
                    .tab_open(require(req.url.as_deref(), "url")?)
                    .await
            }
            "close_tab" => {
                self.controller
                    .tab_close(require(tab, "tab_id")?)
                    .await
            }
            "navigate" => {
                self.controller
                    .navigate(tab, require(req.url.as_deref(), "url")?)
                    .await
            }
            "snapshot" => self.controller.snapshot(tab).await,
            "screenshot" => self.controller.screenshot(tab).await,
            "click" => {
                self.controller
                    .click(tab, require(req.selector.as_deref(), "selector")?)
                    .await
            }
            "type" => {
                self.controller
                    .type_text(
                        tab,
                        require(req.selector.as_deref(), "selector")?,
                        require(req.text.as_deref(), "text")?,
                    )
                    .await
            }
            "press" => {
                self.controller
                    .press(
                        tab,
                        require(req.selector.as_deref(), "selector")?,
                        require(req.key.as_deref(), "key")?,
                    )
                    .await
            }
            "fill" => {
                self.controller
                    .fill(
                        tab,
                        require(req.selector.as_deref(), "selector")?,
                        require(req.value.as_deref(), "value")?,
                    )
                    .await
            }
            "evaluate" => {
                self.controller
                    .evaluate(tab, require(req.expression.as_deref(), "expression")?)
                    .await
            }
            "wait" => {
                self.controller
                    .wait_for(tab, require(req.selector.as_deref(), "selector")?)
                    .await
            }
            other => Err(Error::parse(
                "tool_args",
                format!("unknown browser action '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::config::BrowserConfig;

    #[tokio::test]
    async fn navigate_while_stopped_is_not_running() {
        let tool = BrowserTool::new(Arc::new(BrowserController::new(BrowserConfig::default())));
        let err = tool
            .execute(
                json!({"action": "navigate", "url": "https://example.com"}),
                &ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotRunning(_)));
    }

    #[tokio::test]
    async fn missing_required_field_is_parse_error() {
        let tool = BrowserTool::new(Arc::new(BrowserController::new(BrowserConfig::default())));
        let err = tool
            .execute(json!({"action": "click"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[tokio::test]
    async fn status_works_without_browser() {
        let tool = BrowserTool::new(Arc::new(BrowserController::new(BrowserConfig::default())));
        let out = tool
            .execute(json!({"action": "status"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out["status"], "stopped");
    }
}
