//! Web 技术栈识别
//!
//! 依据响应头、Cookie 名与页面正文中的特征串推断服务器、框架与 CMS。
//! headers_only 时只发 HEAD 请求，不读取正文。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::Serialize;
use serde_json::Value;

use crate::tools::Tool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Technology {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// 命中的信号，如 header:server、cookie:PHPSESSID、body:wp-content
    pub source: String,
}

/// 透露产品信息的响应头
const PRODUCT_HEADERS: &[&str] = &["server", "x-powered-by", "x-generator"];

const COOKIE_SIGNALS: &[(&str, &str)] = &[
    ("PHPSESSID", "PHP"),
    ("JSESSIONID", "Java Servlet"),
    ("ASP.NET_SessionId", "ASP.NET"),
    ("laravel_session", "Laravel"),
    ("csrftoken", "Django"),
    ("ci_session", "CodeIgniter"),
];

const BODY_SIGNALS: &[(&str, &str)] = &[
    ("wp-content/", "WordPress"),
    ("Drupal.settings", "Drupal"),
    ("/media/jui/", "Joomla"),
    ("__NEXT_DATA__", "Next.js"),
    ("ng-version=", "Angular"),
    ("data-reactroot", "React"),
    ("jquery", "jQuery"),
];

static GENERATOR_RE: OnceLock<Regex> = OnceLock::new();

fn generator_pattern() -> &'static Regex {
    GENERATOR_RE.get_or_init(|| {
        Regex::new(r#"(?i)<meta[^>]+name=["']generator["'][^>]+content=["']([^"']+)["']"#).unwrap()
    })
}

/// "nginx/1.18.0 (Ubuntu)" -> ("nginx", Some("1.18.0"))
fn split_product(raw: &str) -> (String, Option<String>) {
    let head = raw.split_whitespace().next().unwrap_or(raw);
    match head.split_once('/') {
        Some((name, version)) if !version.is_empty() => (name.to_string(), Some(version.to_string())),
        _ => (head.to_string(), None),
    }
}

fn push_unique(found: &mut Vec<Technology>, tech: Technology) {
    if !found.iter().any(|t| t.name.eq_ignore_ascii_case(&tech.name)) {
        found.push(tech);
    }
}

/// 由响应头与（可选的）正文推断技术栈，按发现顺序去重
pub fn fingerprint(headers: &HeaderMap, body: Option<&str>) -> Vec<Technology> {
    let mut found = Vec::new();

    for header in PRODUCT_HEADERS {
        for value in headers.get_all(*header).iter().filter_map(|v| v.to_str().ok()) {
            let (name, version) = split_product(value);
            if !name.is_empty() {
                push_unique(&mut found, Technology { name, version, source: format!("header:{header}") });
            }
        }
    }
    if let Some(version) = headers.get("x-aspnet-version").and_then(|v| v.to_str().ok()) {
        push_unique(
            &mut found,
            Technology {
                name: "ASP.NET".to_string(),
                version: Some(version.to_string()),
                source: "header:x-aspnet-version".to_string(),
            },
        );
    }
    if headers.contains_key("cf-ray") {
        push_unique(
            &mut found,
            Technology { name: "Cloudflare".to_string(), version: None, source: "header:cf-ray".to_string() },
        );
    }

    let cookies: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    for (cookie, tech) in COOKIE_SIGNALS {
        if cookies.iter().any(|c| c.starts_with(&format!("{cookie}="))) {
            push_unique(
                &mut found,
                Technology { name: tech.to_string(), version: None, source: format!("cookie:{cookie}") },
            );
        }
    }

    if let Some(body) = body {
        if let Some(generator) = generator_pattern().captures(body).and_then(|c| c.get(1)) {
            let raw = generator.as_str();
            let (name, version) = match raw.rsplit_once(' ') {
                Some((name, version)) if version.starts_with(|c: char| c.is_ascii_digit()) => {
                    (name.to_string(), Some(version.to_string()))
                }
                _ => (raw.to_string(), None),
            };
            push_unique(&mut found, Technology { name, version, source: "body:meta-generator".to_string() });
        }
        let lowered = body.to_lowercase();
        for (needle, tech) in BODY_SIGNALS {
            if lowered.contains(&needle.to_lowercase()) {
                push_unique(
                    &mut found,
                    Technology { name: tech.to_string(), version: None, source: format!("body:{needle}") },
                );
            }
        }
    }

    found
}

pub struct TechDetectTool {
    client: reqwest::Client,
}

impl TechDetectTool {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl Tool for TechDetectTool {
    fn name(&self) -> &str {
        "detect_technologies"
    }

    fn description(&self) -> &str {
        "Identifies the web server, frameworks and CMS behind a URL from response headers, cookies and page markers. Scheme defaults to http://."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "headers_only": { "type": "boolean", "description": "Only inspect response headers (HEAD request)" },
                "task_id": { "type": "string" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = super::http::with_scheme(super::http::required_url(&args)?, "http");
        let headers_only = args.get("headers_only").and_then(Value::as_bool).unwrap_or(false);

        let request = if headers_only { self.client.head(&url) } else { self.client.get(&url) };
        let response = request
            .send()
            .await
            .map_err(|e| format!("Request to {url} failed: {e}"))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = if headers_only {
            None
        } else {
            Some(
                response
                    .text()
                    .await
                    .map_err(|e| format!("Reading body from {url} failed: {e}"))?,
            )
        };

        let technologies = fingerprint(&headers, body.as_deref());
        tracing::debug!(url = %url, count = technologies.len(), "technologies detected");
        let report = serde_json::json!({
            "url": url,
            "status": status,
            "headers_only": headers_only,
            "technologies": technologies,
        });
        serde_json::to_string_pretty(&report).map_err(|e| e.to_string())
    }
}
