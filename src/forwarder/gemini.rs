use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::forwarder::Upstream;
use crate::types::{Conversation, GenerationParams};
use crate::Result;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// 错误响应体的最大保留长度
const MAX_ERROR_BODY_CHARS: usize = 4096;

/// Gemini API 请求格式
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<&'a GenerationParams>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

/// 转换规范化对话为 Gemini 格式
fn convert_request(conversation: &Conversation) -> GeminiRequest<'_> {
    let contents = conversation
        .turns
        .iter()
        .map(|turn| GeminiContent {
            role: turn.role.upstream_label(),
            parts: vec![GeminiPart { text: &turn.text }],
        })
        .collect();

    GeminiRequest {
        contents,
        generation_config: conversation.generation.as_ref(),
    }
}

/// 从错误响应体中取出可读的错误信息
fn upstream_error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "Gemini API 错误".to_string(),
        None => body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

/// Gemini generateContent 客户端
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_base: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.api_base, self.model)
    }
}

impl Upstream for GeminiClient {
    async fn generate(&self, api_key: &str, conversation: &Conversation) -> Result<Value> {
        let gemini_req = convert_request(conversation);

        // 密钥在查询串里，错误信息中去掉 URL
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key)])
            .json(&gemini_req)
            .send()
            .await
            .map_err(|e| RelayError::HttpError(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::HttpError(e.without_url()))?;

        if !status.is_success() {
            return Err(RelayError::upstream(
                status.as_u16(),
                upstream_error_message(&body),
            ));
        }

        Ok(serde_json::from_str(&body)?)
    }
}
