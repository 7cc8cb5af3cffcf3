//! HTTP 探测工具：自定义请求与安全响应头检查

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Method};
use serde_json::Value;

use crate::tools::Tool;

/// 缺少 scheme 时补全
pub(crate) fn with_scheme(url: &str, default_scheme: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("{default_scheme}://{url}")
    }
}

pub(crate) fn required_url(args: &Value) -> Result<&str, String> {
    args.get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "Missing 'url'".to_string())
}

/// headers 既可以是对象，也可以是 JSON 字符串
fn parse_headers(raw: Option<&Value>) -> Result<HeaderMap, String> {
    let map = match raw {
        None | Some(Value::Null) => return Ok(HeaderMap::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(HeaderMap::new()),
        Some(Value::String(s)) => {
            serde_json::from_str::<Value>(s).map_err(|e| format!("Invalid headers JSON: {e}"))?
        }
        Some(v) => v.clone(),
    };
    let obj = map.as_object().ok_or("'headers' must be an object")?;
    let mut headers = HeaderMap::new();
    for (k, v) in obj {
        let value = match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let name = HeaderName::from_str(k).map_err(|e| format!("Invalid header name {k}: {e}"))?;
        let value =
            HeaderValue::from_str(&value).map_err(|e| format!("Invalid header value for {k}: {e}"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// 发送任意方法的 HTTP 请求，不跟随重定向，返回响应正文
pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .redirect(redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "make_http_request"
    }

    fn description(&self) -> &str {
        "Sends an HTTP request with a custom method, headers and body; returns the raw response body. Scheme defaults to http://."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string", "description": "GET, POST, PUT, DELETE, PATCH, ..." },
                "headers": { "type": "object", "description": "Extra request headers" },
                "data": { "type": "string", "description": "Request body" },
                "task_id": { "type": "string" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = with_scheme(required_url(&args)?, "http");
        let method = args
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = Method::from_str(&method).map_err(|e| format!("Invalid method {method}: {e}"))?;
        let headers = parse_headers(args.get("headers"))?;

        let mut request = self.client.request(method, &url).headers(headers);
        if let Some(body) = args.get("data").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            request = request.body(body.to_string());
        }
        let response = request
            .send()
            .await
            .map_err(|e| format!("Request to {url} failed: {e}"))?;
        response
            .text()
            .await
            .map_err(|e| format!("Reading body from {url} failed: {e}"))
    }
}

/// 检查关键安全响应头是否存在，并提示 Server / X-Powered-By 信息泄露
pub struct SecurityHeadersTool {
    client: reqwest::Client,
    headers: Vec<String>,
}

impl SecurityHeadersTool {
    pub fn new(headers: Vec<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, headers }
    }

    /// 由响应头生成报告
    pub fn report(&self, response_headers: &HeaderMap) -> String {
        let mut lines: Vec<String> = self
            .headers
            .iter()
            .map(|name| match header_str(response_headers, name) {
                Some(value) => format!("✓ {name}: {value}"),
                None => format!("✗ {name}: Missing"),
            })
            .collect();
        if let Some(server) = header_str(response_headers, "server") {
            lines.push(format!("⚠️ Server header disclosed: {server}"));
        }
        if let Some(powered) = header_str(response_headers, "x-powered-by") {
            lines.push(format!("⚠️ X-Powered-By header disclosed: {powered}"));
        }
        lines.join("\n")
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl Tool for SecurityHeadersTool {
    fn name(&self) -> &str {
        "check_security_headers"
    }

    fn description(&self) -> &str {
        "Checks a site's HTTP response for security headers (CSP, HSTS, ...) and server information disclosure. Scheme defaults to https://."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "task_id": { "type": "string" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = with_scheme(required_url(&args)?, "https");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Request to {url} failed: {e}"))?;
        Ok(self.report(response.headers()))
    }
}
