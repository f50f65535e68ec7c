use crate::error::RelayError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// /chat 的入站请求体
///
/// `messages` 与 `history` 含义相同；两者都非空时以 `messages` 为准。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: Option<String>,
    pub messages: Option<Vec<InboundTurn>>,
    pub history: Option<Vec<InboundTurn>>,
    pub custom_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
}

impl ChatRequest {
    /// 仅包含一条新消息的请求
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// 解析 application/x-www-form-urlencoded 请求体
    ///
    /// 表单只能携带标量字段，历史对话需使用 JSON。
    pub fn from_form(body: &[u8]) -> Result<Self> {
        let mut req = ChatRequest::default();
        for (name, value) in url::form_urlencoded::parse(body) {
            match name.as_ref() {
                "message" => req.message = Some(value.into_owned()),
                "customPrompt" => req.custom_prompt = Some(value.into_owned()),
                "temperature" => req.temperature = Some(parse_form_number("temperature", &value)?),
                "topK" => req.top_k = Some(parse_form_number("topK", &value)?),
                "topP" => req.top_p = Some(parse_form_number("topP", &value)?),
                _ => {}
            }
        }
        Ok(req)
    }

    /// 非空白的新消息
    pub fn new_message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.trim().is_empty())
    }

    /// 历史对话（`messages` 优先，其次 `history`）
    pub fn history_turns(&self) -> &[InboundTurn] {
        match (&self.messages, &self.history) {
            (Some(messages), _) if !messages.is_empty() => messages.as_slice(),
            (_, Some(history)) => history.as_slice(),
            _ => &[],
        }
    }

    pub fn generation_params(&self) -> Option<GenerationParams> {
        let params = GenerationParams {
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
        };
        if params.is_empty() {
            None
        } else {
            Some(params)
        }
    }

    /// 验证请求参数
    pub fn validate(&self) -> Result<()> {
        if self.new_message().is_none() && self.history_turns().is_empty() {
            return Err(RelayError::invalid_input("请提供 message 或 messages 数组"));
        }

        // 验证 temperature (0.0 - 2.0)
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(RelayError::invalid_input(format!(
                    "temperature 必须在 0.0 到 2.0 之间，当前值: {}",
                    temp
                )));
            }
        }

        // 验证 topP (0.0 - 1.0)
        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(RelayError::invalid_input(format!(
                    "topP 必须在 0.0 到 1.0 之间，当前值: {}",
                    top_p
                )));
            }
        }

        if self.top_k == Some(0) {
            return Err(RelayError::invalid_input("topK 必须大于 0"));
        }

        Ok(())
    }
}

fn parse_form_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        RelayError::invalid_input(format!("{} 不是有效的数字: {}", name, value))
    })
}

/// 入站的一条历史消息，字段都可能缺失
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundTurn {
    pub role: Option<String>,
    #[serde(alias = "text")]
    pub content: Option<String>,
}

impl InboundTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            content: Some(content.into()),
        }
    }

    /// 转换为规范化的对话轮次；角色未知或文本为空时返回 None
    pub fn to_turn(&self) -> Option<ConversationTurn> {
        let role = Role::from_label(self.role.as_deref()?)?;
        let text = self.content.as_deref().filter(|t| !t.trim().is_empty())?;
        Some(ConversationTurn {
            role,
            text: text.to_string(),
        })
    }
}

/// 说话方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// 识别各前端使用的角色标签
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "bot" | "assistant" | "model" => Some(Role::Assistant),
            _ => None,
        }
    }

    /// Gemini 使用的角色名
    pub fn upstream_label(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }
}

/// 规范化后的对话轮次
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// 生成参数，序列化后即 Gemini 的 generationConfig
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl GenerationParams {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_k.is_none() && self.top_p.is_none()
    }
}

/// 发往上游的完整对话
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub turns: Vec<ConversationTurn>,
    pub generation: Option<GenerationParams>,
}

/// /chat 的成功响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

impl ChatReply {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}
