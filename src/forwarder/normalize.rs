use crate::config::ChatPolicy;
use crate::error::RelayError;
use crate::types::{ChatRequest, Conversation, ConversationTurn};
use crate::Result;

/// 把入站请求整理为发往上游的对话
///
/// 顺序：前导提示（作为 user 轮次）、截断后的历史、新消息。
/// 无效的历史轮次会被静默丢弃，截断发生在丢弃之后。
pub fn normalize(req: &ChatRequest, policy: &ChatPolicy) -> Result<Conversation> {
    req.validate()?;

    let mut turns = Vec::new();

    let preamble = req
        .custom_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .or_else(|| {
            policy
                .system_preamble
                .as_deref()
                .filter(|p| !p.trim().is_empty())
        });
    if let Some(preamble) = preamble {
        turns.push(ConversationTurn::user(preamble));
    }

    let history: Vec<ConversationTurn> = req
        .history_turns()
        .iter()
        .filter_map(|turn| turn.to_turn())
        .collect();
    let new_message = req.new_message();

    if history.is_empty() && new_message.is_none() {
        return Err(RelayError::invalid_input("messages 中没有有效的对话轮次"));
    }

    let skip = history.len().saturating_sub(policy.history_limit);
    turns.extend(history.into_iter().skip(skip));

    if let Some(message) = new_message {
        turns.push(ConversationTurn::user(message));
    }

    Ok(Conversation {
        turns,
        generation: req.generation_params(),
    })
}
