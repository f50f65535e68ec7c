pub mod extract;
pub mod gemini;
pub mod normalize;

pub use gemini::GeminiClient;
pub use normalize::normalize;

use crate::config::{mask_key, ChatPolicy, Config, CredentialPool};
use crate::error::RelayError;
use crate::metrics;
use crate::types::{ChatReply, ChatRequest, Conversation};
use crate::Result;
use serde_json::Value;
use tracing::{info, warn};

/// 上游生成接口 - 每次调用对应一次出站请求
#[allow(async_fn_in_trait)]
pub trait Upstream {
    async fn generate(&self, api_key: &str, conversation: &Conversation) -> Result<Value>;
}

/// 聊天转发器：规范化请求，按顺序尝试密钥池中的每个密钥
#[derive(Debug)]
pub struct ChatForwarder<U = GeminiClient> {
    upstream: U,
    credentials: CredentialPool,
    policy: ChatPolicy,
}

impl ChatForwarder<GeminiClient> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let upstream = GeminiClient::new(&config.upstream)?;
        Ok(Self::new(
            upstream,
            config.api_keys.clone(),
            config.chat.clone(),
        ))
    }
}

impl<U: Upstream> ChatForwarder<U> {
    pub fn new(upstream: U, credentials: CredentialPool, policy: ChatPolicy) -> Self {
        Self {
            upstream,
            credentials,
            policy,
        }
    }

    pub fn credentials(&self) -> &CredentialPool {
        &self.credentials
    }

    pub fn policy(&self) -> &ChatPolicy {
        &self.policy
    }

    /// 处理一个聊天请求
    pub async fn handle(&self, req: &ChatRequest) -> Result<ChatReply> {
        let conversation = normalize(req, &self.policy)?;
        self.forward(&conversation).await
    }

    /// 依次尝试每个密钥，返回第一个成功提取的回复
    pub async fn forward(&self, conversation: &Conversation) -> Result<ChatReply> {
        let metrics = metrics::global_metrics();
        let mut attempts = 0;
        let mut last_error = None;

        for key in self.credentials.iter() {
            attempts += 1;
            metrics.record_attempt();

            match self.attempt(key, conversation).await {
                Ok(reply) => {
                    info!(attempt = attempts, key = %mask_key(key), "上游返回回复");
                    return Ok(ChatReply::new(reply));
                }
                Err(e) => {
                    metrics.record_attempt_failure();
                    warn!(
                        attempt = attempts,
                        key = %mask_key(key),
                        error = %e,
                        "API 密钥调用失败，尝试下一个"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(RelayError::AllCredentialsExhausted {
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "没有可用的 API 密钥".to_string()),
        })
    }

    async fn attempt(&self, api_key: &str, conversation: &Conversation) -> Result<String> {
        let body = self.upstream.generate(api_key, conversation).await?;
        extract::extract_reply(&body).ok_or_else(|| extract::missing_reply_error(&body))
    }
}
