// Generic request → Chat Completions encoding. Anthropic-style block arrays
// are split into the OpenAI vocabulary: tool_result blocks become `tool`
// messages, tool_use blocks become `tool_calls`, thinking blocks are dropped
// (the upstream generates its own reasoning).

use serde_json::Value;

use super::models::{OpenAiFunctionDef, OpenAiMessage, OpenAiRequest, OpenAiToolDef};
use crate::proxy::mappers::generic::{
    tool_id_map, ContentBlock, GenericRequest, GenericTool, ToolCall, ToolCallFunction,
};

pub fn build_openai_request(request: &GenericRequest) -> OpenAiRequest {
    let tool_names = tool_id_map(&request.messages);
    let mut messages: Vec<OpenAiMessage> = Vec::new();

    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        messages.push(OpenAiMessage {
            role: "system".to_string(),
            content: Some(system.to_string()),
            ..OpenAiMessage::default()
        });
    }

    for message in &request.messages {
        match message.role.as_str() {
            "system" => continue,
            "user" => {
                let Some(blocks) = message.content_blocks() else {
                    let text = message.content_text();
                    if !text.is_empty() {
                        messages.push(OpenAiMessage {
                            role: "user".to_string(),
                            content: Some(text),
                            ..OpenAiMessage::default()
                        });
                    }
                    continue;
                };

                let mut text_parts: Vec<String> = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } if !text.is_empty() => text_parts.push(text),
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => {
                            messages.push(OpenAiMessage {
                                role: "tool".to_string(),
                                content: Some(tool_result_text(&content)),
                                tool_call_id: Some(tool_use_id.clone()),
                                name: tool_names.get(&tool_use_id).cloned(),
                                ..OpenAiMessage::default()
                            });
                        }
                        _ => {}
                    }
                }
                if !text_parts.is_empty() {
                    messages.push(OpenAiMessage {
                        role: "user".to_string(),
                        content: Some(text_parts.join("\n")),
                        ..OpenAiMessage::default()
                    });
                }
            }
            "assistant" => {
                let mut content: Option<String> = None;
                let mut tool_calls: Vec<ToolCall> = Vec::new();

                match message.content_blocks() {
                    Some(blocks) => {
                        let mut text_parts: Vec<String> = Vec::new();
                        for block in blocks {
                            match block {
                                ContentBlock::Text { text } if !text.is_empty() => {
                                    text_parts.push(text);
                                }
                                // The upstream regenerates its own reasoning.
                                ContentBlock::Thinking { .. } => {}
                                ContentBlock::ToolUse { id, name, input, .. } => {
                                    tool_calls.push(ToolCall {
                                        id,
                                        call_type: "function".to_string(),
                                        function: ToolCallFunction {
                                            name,
                                            arguments: arguments_text(&input),
                                        },
                                    });
                                }
                                _ => {}
                            }
                        }
                        if !text_parts.is_empty() {
                            content = Some(text_parts.join("\n"));
                        }
                    }
                    None => {
                        let text = message.content_text();
                        if !text.is_empty() {
                            content = Some(text);
                        }
                    }
                }

                tool_calls.extend(message.tool_calls.iter().cloned());

                messages.push(OpenAiMessage {
                    role: "assistant".to_string(),
                    content,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    ..OpenAiMessage::default()
                });
            }
            "tool" => {
                messages.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(message.content_text()),
                    tool_call_id: message.tool_call_id.clone(),
                    name: message.name.clone(),
                    ..OpenAiMessage::default()
                });
            }
            _ => {}
        }
    }

    OpenAiRequest {
        model: request.model.clone(),
        messages,
        tools: build_tool_defs(request.tools.as_deref()),
    }
}

// tool_result content for the OpenAI shape is always a string: strings pass
// through, anything else degrades to its JSON text, absence becomes "ok".
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::Null => "ok".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn arguments_text(input: &Value) -> String {
    match input {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

fn build_tool_defs(tools: Option<&[GenericTool]>) -> Option<Vec<OpenAiToolDef>> {
    let defs: Vec<OpenAiToolDef> = tools?
        .iter()
        .filter_map(|tool| tool.spec())
        .map(|spec| OpenAiToolDef {
            def_type: "function",
            function: OpenAiFunctionDef {
                name: spec.name.to_string(),
                description: spec.description.map(str::to_string),
                parameters: spec.parameters.cloned(),
            },
        })
        .collect();

    (!defs.is_empty()).then_some(defs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_from(value: Value) -> GenericRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn system_prompt_leads_the_message_list() {
        let request = request_from(json!({
            "model": "m",
            "system": "S",
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let openai = build_openai_request(&request);

        assert_eq!(openai.messages[0].role, "system");
        assert_eq!(openai.messages[0].content.as_deref(), Some("S"));
        assert_eq!(openai.messages[1].role, "user");
    }

    #[test]
    fn tool_results_precede_user_text() {
        let request = request_from(json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "c1", "name": "bash", "input": {"cmd": "ls"}}
                ]},
                {"role": "user", "content": [
                    {"type": "text", "text": "here you go"},
                    {"type": "tool_result", "tool_use_id": "c1", "content": "file1"}
                ]}
            ]
        }));
        let openai = build_openai_request(&request);

        // assistant, tool, user
        assert_eq!(openai.messages[0].role, "assistant");
        assert_eq!(openai.messages[1].role, "tool");
        assert_eq!(openai.messages[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(openai.messages[1].name.as_deref(), Some("bash"));
        assert_eq!(openai.messages[1].content.as_deref(), Some("file1"));
        assert_eq!(openai.messages[2].role, "user");
        assert_eq!(openai.messages[2].content.as_deref(), Some("here you go"));
    }

    #[test]
    fn assistant_blocks_become_tool_calls_and_thinking_is_dropped() {
        let request = request_from(json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                    {"type": "text", "text": "doing it"},
                    {"type": "tool_use", "id": "c1", "name": "bash", "input": {"cmd": "ls"}}
                ]}
            ]
        }));
        let openai = build_openai_request(&request);

        let assistant = &openai.messages[0];
        assert_eq!(assistant.content.as_deref(), Some("doing it"));
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].function.name, "bash");
        assert_eq!(
            serde_json::from_str::<Value>(&calls[0].function.arguments).unwrap(),
            json!({"cmd": "ls"})
        );

        let serialized = serde_json::to_string(&openai).unwrap();
        assert!(!serialized.contains("thinking"));
    }

    #[test]
    fn openai_shape_passes_through() {
        let request = request_from(json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "c9", "type": "function",
                     "function": {"name": "web_search", "arguments": "{\"q\":\"x\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "c9", "name": "web_search", "content": "results"}
            ]
        }));
        let openai = build_openai_request(&request);

        let calls = openai.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "c9");
        assert_eq!(openai.messages[1].role, "tool");
        assert_eq!(openai.messages[1].content.as_deref(), Some("results"));
    }

    #[test]
    fn tool_defs_project_both_shapes() {
        let request = request_from(json!({
            "model": "m",
            "messages": [],
            "tools": [
                {"type": "function", "function": {"name": "a", "parameters": {"type": "object"}}},
                {"name": "b", "input_schema": {"type": "object"}}
            ]
        }));
        let openai = build_openai_request(&request);
        let tools = openai.tools.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].function.name, "a");
        assert_eq!(tools[1].function.name, "b");

        let serialized = serde_json::to_value(&tools[1]).unwrap();
        assert_eq!(serialized["type"], "function");
    }
}
