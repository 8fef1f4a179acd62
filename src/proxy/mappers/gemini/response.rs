// Gemini generateContent response → Anthropic-style message.

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::models::GoogleResponse;
use super::recovery::{parse_malformed_function_call, strip_malformed_remainder};
use crate::proxy::mappers::{message_envelope, unix_timestamp};
use crate::proxy::signature_cache::SignatureCache;

pub struct NoCandidates;

pub fn build_client_response(
    model: &str,
    response: &GoogleResponse,
    signatures: &SignatureCache,
) -> Result<Value, NoCandidates> {
    let Some(candidate) = response.candidates.first() else {
        return Err(NoCandidates);
    };

    let mut thinking_text = String::new();
    let mut thinking_signature: Option<String> = None;
    let mut text_buf = String::new();
    let mut tool_uses: Vec<Value> = Vec::new();

    let parts = candidate
        .content
        .as_ref()
        .map(|content| content.parts.as_slice())
        .unwrap_or_default();

    let minted_at = unix_timestamp();
    for part in parts {
        if let Some(signature) = &part.thought_signature {
            thinking_signature = Some(signature.clone());
        }
        if let Some(text) = &part.text {
            if part.thought {
                if thinking_text.is_empty() {
                    thinking_text = text.clone();
                }
            } else {
                text_buf.push_str(text);
            }
        }
        if let Some(call) = &part.function_call {
            let tool_id = format!("call_function_{}_{}", minted_at, tool_uses.len() + 1);
            let mut block = json!({
                "type": "tool_use",
                "id": tool_id,
                "name": call.name,
                "input": call.args,
            });
            if let Some(signature) = &part.thought_signature {
                block["signature"] = json!(signature);
                // Cache it in case the client fails to echo it next turn.
                signatures.store(&tool_id, signature.clone());
            }
            tool_uses.push(block);
        }
    }

    if candidate.finish_reason.as_deref() == Some("MALFORMED_FUNCTION_CALL") {
        if let Some(message) = candidate.finish_message.as_deref().filter(|m| !m.is_empty()) {
            match parse_malformed_function_call(message) {
                Some((name, args)) => {
                    debug!("Recovered malformed function call: {}", name);
                    let tool_id = format!("call_function_{}_{}", minted_at, tool_uses.len() + 1);
                    tool_uses.push(json!({
                        "type": "tool_use",
                        "id": tool_id,
                        "name": name,
                        "input": args,
                    }));
                }
                None => {
                    warn!("Malformed function call could not be recovered, degrading to text");
                    text_buf.push_str(&strip_malformed_remainder(message));
                }
            }
        }
    }

    let mut content: Vec<Value> = Vec::new();
    if !thinking_text.is_empty() {
        let mut block = json!({"type": "thinking", "thinking": thinking_text});
        if let Some(signature) = thinking_signature {
            block["signature"] = json!(signature);
        }
        content.push(block);
    }
    if !text_buf.is_empty() {
        content.push(json!({"type": "text", "text": text_buf}));
    }
    let stop_reason = if tool_uses.is_empty() {
        "end_turn"
    } else {
        "tool_use"
    };
    content.extend(tool_uses);

    let usage = response.usage_metadata.clone().unwrap_or_default();
    Ok(message_envelope(
        model,
        content,
        stop_reason,
        usage.prompt_token_count,
        usage.candidates_token_count,
    ))
}
