//! OpenAI 兼容 API 客户端
//!
//! 直接以 reqwest 调用任意 OpenAI 兼容端点的 `/chat/completions`（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 工具以 function 定义下发；请求结构化输出时使用 `response_format: json_object` 并把 schema 写入一条 system 消息。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentRole;
use crate::llm::{LlmClient, LlmError, OutputSchema};
use crate::memory::{Message, Role};
use crate::tools::ToolSpec;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 HTTP Client、端点、model 名与 API Key
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key,
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 组装 chat/completions 请求体
    pub fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        schema: Option<&OutputSchema>,
    ) -> Value {
        let mut wire: Vec<Value> = messages.iter().map(to_wire_message).collect();
        let mut body = json!({
            "model": self.model,
            "temperature": 0.2,
        });

        if let Some(schema) = schema {
            let schema_text = serde_json::to_string(&schema.schema).unwrap_or_default();
            wire.push(json!({
                "role": "system",
                "content": format!(
                    "Respond with a single JSON object named `{}` that conforms to this JSON Schema:\n{}",
                    schema.name, schema_text
                ),
            }));
            if tools.is_empty() {
                body["response_format"] = json!({ "type": "json_object" });
            }
        }

        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }

        body["messages"] = Value::Array(wire);
        body
    }
}

fn to_wire_message(m: &Message) -> Value {
    match m.role {
        Role::System => json!({ "role": "system", "content": m.content }),
        Role::Human => json!({ "role": "user", "content": m.content }),
        Role::Ai => {
            let mut v = json!({ "role": "assistant", "content": m.content });
            if !m.tool_calls.is_empty() {
                v["tool_calls"] = Value::Array(
                    m.tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": { "name": c.name, "arguments": c.args.to_string() }
                            })
                        })
                        .collect(),
                );
            }
            v
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
            "content": m.content,
        }),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        role: AgentRole,
        messages: &[Message],
        tools: &[ToolSpec],
        schema: Option<&OutputSchema>,
    ) -> Result<Message, LlmError> {
        let body = self.build_request(messages, tools, schema);
        tracing::debug!(role = %role, model = %self.model, messages = messages.len(), "llm request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        // 提取 token 使用统计
        if let Some(usage) = payload.get("usage") {
            let prompt = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
            let completion = usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            self.usage.add(prompt, completion);
        }

        let raw = payload
            .pointer("/choices/0/message")
            .cloned()
            .ok_or(LlmError::EmptyResponse)?;
        let mut message = Message::normalize(raw);
        message.role = Role::Ai;
        Ok(message)
    }
}
