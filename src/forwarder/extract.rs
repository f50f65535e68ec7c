use crate::error::RelayError;
use serde_json::Value;

/// 从上游响应体中提取回复文本的策略
pub type ExtractStrategy = fn(&Value) -> Option<String>;

/// 按顺序尝试，第一个非空结果胜出
pub const STRATEGIES: &[ExtractStrategy] = &[
    first_candidate_parts,
    any_candidate_parts,
    first_candidate_output,
    first_candidate_content_string,
];

/// 提取回复文本
pub fn extract_reply(body: &Value) -> Option<String> {
    STRATEGIES.iter().find_map(|strategy| strategy(body))
}

/// 无法提取时描述原因
pub fn missing_reply_error(body: &Value) -> RelayError {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return RelayError::upstream(200, format!("回复被拦截: {}", reason));
    }
    if let Some(reason) = body
        .pointer("/candidates/0/finishReason")
        .and_then(Value::as_str)
    {
        return RelayError::upstream(200, format!("上游未返回文本 (finishReason: {})", reason));
    }
    RelayError::upstream(200, "上游响应中没有可用的回复文本")
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn parts_text(candidate: &Value) -> Option<String> {
    let parts = candidate.pointer("/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    non_blank(text)
}

// candidates[0].content.parts[*].text
fn first_candidate_parts(body: &Value) -> Option<String> {
    parts_text(body.pointer("/candidates/0")?)
}

fn any_candidate_parts(body: &Value) -> Option<String> {
    body.get("candidates")?
        .as_array()?
        .iter()
        .find_map(parts_text)
}

// 旧版 generateText
fn first_candidate_output(body: &Value) -> Option<String> {
    let output = body.pointer("/candidates/0/output")?.as_str()?;
    non_blank(output.to_string())
}

// 旧版 generateMessage
fn first_candidate_content_string(body: &Value) -> Option<String> {
    let content = body.pointer("/candidates/0/content")?.as_str()?;
    non_blank(content.to_string())
}
