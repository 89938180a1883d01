//! Web fetch tool — fetch a URL with strict limits and extract readable
//! text from HTML.
//!
//! Safety properties:
//! - http/https schemes only
//! - hostnames resolving to private/loopback/link-local ranges are refused
//! - bounded response size and extracted-text size
//! - hard timeout per request

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use sb_domain::config::WebFetchConfig;
use sb_domain::error::{Error, Result};

use crate::tool::{Tool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSRF guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || is_v4_shared(v4)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || is_v6_unique_local(v6)
                || is_v6_link_local(v6)
        }
    }
}

/// 100.64.0.0/10 (RFC 6598 shared address space).
fn is_v4_shared(ip: &Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 100 && (o[1] & 0xC0) == 64
}

/// fc00::/7 unique-local.
fn is_v6_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFE00) == 0xFC00
}

/// fe80::/10 link-local.
fn is_v6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFFC0) == 0xFE80
}

fn validate_url(raw: &str) -> Result<reqwest::Url> {
    let parsed = reqwest::Url::parse(raw)
        .map_err(|e| Error::parse("url", e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::Other(format!(
                "blocked scheme '{other}://' (only http/https allowed)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::Other("URL has no host".into()))?;
    let port = parsed.port_or_known_default().unwrap_or(443);

    // Resolve and refuse anything that lands on a non-public address.
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Other(format!("cannot resolve '{host}': {e}")))?;
    for addr in addrs {
        if is_private_ip(&addr.ip()) {
            return Err(Error::Other(format!(
                "'{host}' resolves to a non-public address"
            )));
        }
    }

    Ok(parsed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTML → text
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Crude readable-text extraction: drop script/style blocks, strip tags,
/// decode a handful of entities, collapse blank runs.
fn html_to_text(html: &str) -> String {
    let script = regex::Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
        .expect("static regex");
    let tags = regex::Regex::new(r"(?s)<[^>]+>").expect("static regex");
    let blank_runs = regex::Regex::new(r"\n{3,}").expect("static regex");

    let without_blocks = script.replace_all(html, " ");
    let without_tags = tags.replace_all(&without_blocks, "\n");
    let decoded = without_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let trimmed_lines: Vec<&str> = decoded.lines().map(str::trim).collect();
    let joined = trimmed_lines.join("\n");
    blank_runs.replace_all(&joined, "\n\n").trim().to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct FetchParams {
    url: String,
    /// Return raw body instead of extracted text.
    #[serde(default)]
    raw: bool,
}

pub struct WebFetchTool {
    config: WebFetchConfig,
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new(config: WebFetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait::async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a public http(s) URL and return readable text (or the raw body)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL to fetch" },
                "raw": { "type": "boolean", "description": "Return the raw body without HTML extraction" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let req: FetchParams = serde_json::from_value(params)
            .map_err(|e| Error::parse("tool_args", e))?;
        let url = validate_url(&req.url)?;

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        // Stream the body with the byte cap enforced as we go.
        let mut body: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Http(e.to_string()))?;
            if body.len() + chunk.len() > self.config.max_bytes {
                body.extend_from_slice(&chunk[..self.config.max_bytes - body.len()]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let raw_text = String::from_utf8_lossy(&body).into_owned();
        let mut text = if !req.raw && content_type.contains("html") {
            html_to_text(&raw_text)
        } else {
            raw_text
        };
        if text.len() > self.config.max_text_chars {
            let mut end = self.config.max_text_chars;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            truncated = true;
        }

        Ok(json!({
            "url": req.url,
            "status": status,
            "content_type": content_type,
            "truncated": truncated,
            "text": text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("ftp://example.com/x").is_err());
    }

    #[test]
    fn rejects_loopback_and_private_hosts() {
        assert!(validate_url("http://127.0.0.1/admin").is_err());
        assert!(validate_url("http://localhost:8080/").is_err());
        assert!(validate_url("http://192.168.1.1/").is_err());
    }

    #[test]
    fn private_ip_ranges() {
        assert!(is_private_ip(&"10.0.0.1".parse().unwrap()));
        assert!(is_private_ip(&"172.16.0.1".parse().unwrap()));
        assert!(is_private_ip(&"100.64.0.1".parse().unwrap()));
        assert!(is_private_ip(&"fe80::1".parse().unwrap()));
        assert!(is_private_ip(&"fd00::1".parse().unwrap()));
        assert!(!is_private_ip(&"8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip(&"2607:f8b0::1".parse().unwrap()));
    }

    #[test]
    fn html_extraction_drops_scripts_and_tags() {
        let html = r#"<html><head><style>body{color:red}</style>
            <script>alert(1)</script></head>
            <body><h1>Title</h1><p>Hello &amp; welcome</p></body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello & welcome"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn html_extraction_collapses_blank_runs() {
        let text = html_to_text("<p>a</p>\n\n\n\n\n<p>b</p>");
        assert!(!text.contains("\n\n\n"));
    }
}
