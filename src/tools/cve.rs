//! CVE 详情查询（NVD 2.0 API）

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::tools::Tool;

pub const NVD_CVE_ENDPOINT: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

static CVE_ID_RE: OnceLock<Regex> = OnceLock::new();

fn cve_pattern() -> &'static Regex {
    CVE_ID_RE.get_or_init(|| Regex::new(r"^CVE-\d{4}-\d{4,}$").unwrap())
}

/// 规范化为大写；格式不符返回 None
pub fn normalize_cve_id(raw: &str) -> Option<String> {
    let id = raw.trim().to_uppercase();
    cve_pattern().is_match(&id).then_some(id)
}

pub struct CveLookupTool {
    client: reqwest::Client,
    endpoint: String,
}

impl CveLookupTool {
    pub fn new(endpoint: Option<&str>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.unwrap_or(NVD_CVE_ENDPOINT).to_string(),
        }
    }
}

#[async_trait]
impl Tool for CveLookupTool {
    fn name(&self) -> &str {
        "lookup_cve"
    }

    fn description(&self) -> &str {
        "Looks up CVE details (description, CVSS, references) from the National Vulnerability Database."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "cve_id": { "type": "string", "description": "CVE-YYYY-NNNNN" },
                "task_id": { "type": "string" }
            },
            "required": ["cve_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let raw = args.get("cve_id").and_then(Value::as_str).unwrap_or("");
        let cve_id = normalize_cve_id(raw)
            .ok_or_else(|| format!("Invalid CVE format '{raw}'. Use CVE-YYYY-NNNNN"))?;

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("cveId", cve_id.as_str())])
            .send()
            .await
            .map_err(|e| format!("NVD request failed: {e}"))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(format!("CVE {cve_id} not found"));
        }
        if !response.status().is_success() {
            return Err(format!("NVD returned HTTP {}", response.status().as_u16()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("Invalid NVD response: {e}"))?;
        serde_json::to_string_pretty(&body).map_err(|e| e.to_string())
    }
}
