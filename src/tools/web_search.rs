//! 网页搜索（Google Custom Search JSON API）
//!
//! API Key 与搜索引擎 ID 从环境变量读取，变量名可配置；未配置时调用返回错误而不是空结果。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

pub const GOOGLE_CSE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// Custom Search 单次最多返回 10 条
const MAX_RESULTS: u64 = 10;
const DEFAULT_RESULTS: u64 = 5;

/// 把 CSE 响应整理为 "Snippet / Link" 列表
pub fn format_results(query: &str, body: &Value) -> String {
    let items: Vec<String> = body
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let snippet = item.get("snippet").and_then(Value::as_str).unwrap_or("");
                    let link = item.get("link").and_then(Value::as_str).unwrap_or("");
                    format!("Snippet: {}\nLink: {link}", snippet.replace('\n', " "))
                })
                .collect()
        })
        .unwrap_or_default();
    if items.is_empty() {
        return format!("Query: {query}\nNo results found.");
    }
    format!("Query: {query}\nSearch Results:\n{}", items.join("\n"))
}

pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
    api_key_env: String,
    engine_id_env: String,
}

impl WebSearchTool {
    pub fn new(endpoint: Option<&str>, api_key_env: &str, engine_id_env: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.unwrap_or(GOOGLE_CSE_ENDPOINT).to_string(),
            api_key_env: api_key_env.to_string(),
            engine_id_env: engine_id_env.to_string(),
        }
    }

    fn credential(&self, var: &str) -> Result<String, String> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| format!("web_search is not configured: set {var}"))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Searches the web for public information (product versions, advisories, write-ups) and returns snippets with links."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "num_results": { "type": "integer", "description": "1-10, default 5" },
                "task_id": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("Missing 'query'")?;
        let num = args
            .get("num_results")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_RESULTS)
            .clamp(1, MAX_RESULTS);
        let key = self.credential(&self.api_key_env)?;
        let engine = self.credential(&self.engine_id_env)?;

        tracing::info!(query = %query, num, "web_search");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("key", key.as_str()), ("cx", engine.as_str()), ("q", query)])
            .query(&[("num", num)])
            .send()
            .await
            .map_err(|e| format!("Search request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("Search API returned HTTP {}", response.status()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {e}"))?;
        Ok(format_results(query, &body))
    }
}
