// Chat Completions response → Anthropic-style message.

use serde_json::{json, Value};

use super::models::OpenAiResponse;
use crate::proxy::mappers::message_envelope;

pub struct NoChoices;

pub fn build_client_response(model: &str, response: &OpenAiResponse) -> Result<Value, NoChoices> {
    let Some(choice) = response.choices.first() else {
        return Err(NoChoices);
    };

    let mut content: Vec<Value> = Vec::new();

    if let Some(reasoning) = choice
        .message
        .reasoning_content
        .as_deref()
        .filter(|r| !r.is_empty())
    {
        content.push(json!({"type": "thinking", "thinking": reasoning}));
    }

    if let Some(text) = choice.message.content.as_deref().filter(|t| !t.is_empty()) {
        content.push(json!({"type": "text", "text": text}));
    }

    let has_tool_calls = !choice.message.tool_calls.is_empty();
    for call in &choice.message.tool_calls {
        let input = serde_json::from_str::<Value>(&call.function.arguments)
            .unwrap_or_else(|_| json!({}));
        content.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.function.name,
            "input": input,
        }));
    }

    let stop_reason = if has_tool_calls { "tool_use" } else { "end_turn" };
    let usage = response.usage.clone().unwrap_or_default();

    Ok(message_envelope(
        model,
        content,
        stop_reason,
        usage.prompt_tokens,
        usage.completion_tokens,
    ))
}
