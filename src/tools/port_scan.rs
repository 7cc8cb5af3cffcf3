//! TCP connect 端口扫描
//!
//! 逐端口尝试连接（单端口超时），返回开放端口的 JSON 数组，例如 `[80]`。

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use crate::tools::Tool;

pub struct PortScannerTool {
    connect_timeout: Duration,
}

impl PortScannerTool {
    pub fn new(connect_timeout_ms: u64) -> Self {
        Self {
            connect_timeout: Duration::from_millis(connect_timeout_ms.max(1)),
        }
    }

    async fn resolve(&self, target: &str) -> Result<std::net::IpAddr, String> {
        let mut addrs = lookup_host((target, 0))
            .await
            .map_err(|e| format!("Cannot resolve {target}: {e}"))?;
        addrs
            .next()
            .map(|a| a.ip())
            .ok_or_else(|| format!("Cannot resolve {target}: no addresses"))
    }
}

fn parse_ports(args: &Value) -> Result<Vec<u16>, String> {
    let raw = args
        .get("ports")
        .and_then(Value::as_array)
        .ok_or("Missing 'ports' (array of integers)")?;
    raw.iter()
        .map(|p| {
            p.as_u64()
                .or_else(|| p.as_str().and_then(|s| s.trim().parse().ok()))
                .and_then(|n| u16::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("Invalid port: {p}"))
        })
        .collect()
}

#[async_trait]
impl Tool for PortScannerTool {
    fn name(&self) -> &str {
        "port_scanner"
    }

    fn description(&self) -> &str {
        "Scans the given TCP ports on the target host and returns the list of open ports."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "target_ip": { "type": "string", "description": "Target IP address or hostname" },
                "ports": { "type": "array", "items": { "type": "integer" }, "description": "Ports to scan" },
                "task_id": { "type": "string", "description": "Id of the pending task this scan serves" }
            },
            "required": ["target_ip", "ports"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let target = args
            .get("target_ip")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("Missing 'target_ip'")?;
        let ports = parse_ports(&args)?;
        let ip = self.resolve(target).await?;

        let mut open = Vec::new();
        for port in ports {
            let addr = SocketAddr::new(ip, port);
            if let Ok(Ok(_)) = timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                open.push(port);
            }
        }
        tracing::debug!(target = %target, open = ?open, "port scan finished");
        serde_json::to_string(&open).map_err(|e| e.to_string())
    }
}
