// Generic request → Gemini generateContent encoding.
//
// Per-message translation stays local; the role-turn constraints of the wire
// format (no adjacent same-role turns, no leading `model` turn) are enforced
// by two passes at the end.

use serde_json::{Map, Value};
use tracing::debug;

use super::models::{
    FunctionCall, FunctionDeclaration, FunctionResponse, GeminiTool, GoogleContent, GooglePart,
    GoogleRequest,
};
use crate::constants::SKIP_SIGNATURE_SENTINEL;
use crate::proxy::mappers::generic::{
    tool_id_map, ContentBlock, GenericMessage, GenericRequest, GenericTool,
};
use crate::proxy::signature_cache::SignatureCache;
use std::collections::HashMap;

pub fn build_google_request(request: &GenericRequest, signatures: &SignatureCache) -> GoogleRequest {
    let tool_names = tool_id_map(&request.messages);

    let mut contents: Vec<GoogleContent> = Vec::new();
    for message in &request.messages {
        let (role, parts) = match message.role.as_str() {
            // The system prompt travels as systemInstruction, never as a turn.
            "system" => continue,
            "user" => ("user", user_parts(message, &tool_names)),
            "assistant" => ("model", assistant_parts(message, signatures)),
            "tool" => ("user", tool_message_parts(message)),
            other => {
                debug!("Dropping message with unknown role: {}", other);
                continue;
            }
        };
        if !parts.is_empty() {
            contents.push(GoogleContent {
                role: role.to_string(),
                parts,
            });
        }
    }

    merge_adjacent_roles(&mut contents);
    ensure_user_leads(&mut contents);

    GoogleRequest {
        contents,
        tools: build_tool_declarations(request.tools.as_deref()),
        system_instruction: request
            .system
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| GoogleContent {
                role: String::new(),
                parts: vec![GooglePart::text(s)],
            }),
        cached_content: None,
        generation_config: None,
    }
}

fn user_parts(message: &GenericMessage, tool_names: &HashMap<String, String>) -> Vec<GooglePart> {
    let Some(blocks) = message.content_blocks() else {
        let text = message.content_text();
        if text.is_empty() {
            return Vec::new();
        }
        return vec![GooglePart::text(text)];
    };

    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } if !text.is_empty() => parts.push(GooglePart::text(text)),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let name = tool_names
                    .get(&tool_use_id)
                    .cloned()
                    .unwrap_or_else(|| tool_use_id.clone());
                parts.push(GooglePart {
                    function_response: Some(FunctionResponse {
                        name,
                        response: tool_response_payload(&content),
                    }),
                    ..GooglePart::default()
                });
            }
            _ => {}
        }
    }
    parts
}

fn assistant_parts(message: &GenericMessage, signatures: &SignatureCache) -> Vec<GooglePart> {
    let mut parts = Vec::new();

    match message.content_blocks() {
        Some(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } if !text.is_empty() => {
                        parts.push(GooglePart::text(text));
                    }
                    ContentBlock::ToolUse {
                        id,
                        name,
                        input,
                        signature,
                    } if !name.is_empty() => {
                        // Block signature wins; otherwise reattach the one we
                        // cached when the call was first emitted.
                        let signature = signature
                            .filter(|s| !s.is_empty())
                            .or_else(|| signatures.get(&id))
                            .unwrap_or_else(|| SKIP_SIGNATURE_SENTINEL.to_string());
                        parts.push(GooglePart {
                            function_call: Some(FunctionCall {
                                name,
                                args: object_or_empty(&input),
                            }),
                            thought_signature: Some(signature),
                            ..GooglePart::default()
                        });
                    }
                    _ => {}
                }
            }
        }
        None => {
            let text = message.content_text();
            if !text.is_empty() {
                parts.push(GooglePart::text(text));
            }
        }
    }

    for call in &message.tool_calls {
        let args = serde_json::from_str::<Map<String, Value>>(&call.function.arguments)
            .unwrap_or_default();
        let signature = signatures
            .get(&call.id)
            .unwrap_or_else(|| SKIP_SIGNATURE_SENTINEL.to_string());
        parts.push(GooglePart {
            function_call: Some(FunctionCall {
                name: call.function.name.clone(),
                args,
            }),
            thought_signature: Some(signature),
            ..GooglePart::default()
        });
    }

    parts
}

fn tool_message_parts(message: &GenericMessage) -> Vec<GooglePart> {
    let name = message
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .or_else(|| message.tool_call_id.clone())
        .unwrap_or_default();
    let content = message.content_text();
    let response = match serde_json::from_str::<Map<String, Value>>(&content) {
        Ok(object) => object,
        Err(_) => result_wrapper(Value::String(content)),
    };
    vec![GooglePart {
        function_response: Some(FunctionResponse { name, response }),
        ..GooglePart::default()
    }]
}

// Builds the functionResponse payload from a tool_result's content: objects
// pass through, strings are unwrapped when they hold a JSON object and
// wrapped as {"result": ...} otherwise, absent content degrades to "ok".
fn tool_response_payload(content: &Value) -> Map<String, Value> {
    match content {
        Value::Null => result_wrapper(Value::String("ok".to_string())),
        Value::Object(object) => object.clone(),
        Value::String(text) => match serde_json::from_str::<Map<String, Value>>(text) {
            Ok(object) => object,
            Err(_) => result_wrapper(Value::String(text.clone())),
        },
        other => result_wrapper(Value::String(other.to_string())),
    }
}

fn result_wrapper(value: Value) -> Map<String, Value> {
    let mut object = Map::new();
    object.insert("result".to_string(), value);
    object
}

fn object_or_empty(input: &Value) -> Map<String, Value> {
    match input {
        Value::Object(object) => object.clone(),
        _ => Map::new(),
    }
}

fn build_tool_declarations(tools: Option<&[GenericTool]>) -> Option<Vec<GeminiTool>> {
    let declarations: Vec<FunctionDeclaration> = tools?
        .iter()
        .filter_map(|tool| tool.spec())
        .map(|spec| FunctionDeclaration {
            name: spec.name.to_string(),
            description: spec.description.map(str::to_string),
            parameters: spec.parameters.cloned(),
        })
        .collect();

    if declarations.is_empty() {
        None
    } else {
        Some(vec![GeminiTool {
            function_declarations: declarations,
        }])
    }
}

// Gemini rejects conversations where two adjacent turns share a role.
fn merge_adjacent_roles(contents: &mut Vec<GoogleContent>) {
    let mut merged: Vec<GoogleContent> = Vec::with_capacity(contents.len());
    for content in contents.drain(..) {
        match merged.last_mut() {
            Some(last) if last.role == content.role => last.parts.extend(content.parts),
            _ => merged.push(content),
        }
    }
    *contents = merged;
}

// Gemini requires the first turn to be a user turn; a conversation resuming
// from an assistant message gets a synthetic opener.
fn ensure_user_leads(contents: &mut Vec<GoogleContent>) {
    if contents.first().is_some_and(|c| c.role == "model") {
        debug!("Conversation opens with a model turn, prepending placeholder user turn");
        contents.insert(
            0,
            GoogleContent {
                role: "user".to_string(),
                parts: vec![GooglePart::text("continue")],
            },
        );
    }
}
