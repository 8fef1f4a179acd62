// Client-facing request model. The relay accepts an Anthropic-style body in
// which `content` is either a scalar string or an array of typed blocks, and
// tolerates OpenAI-shaped `tool_calls` / `tool` messages in the same
// conversation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct GenericRequest {
    pub model: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub messages: Vec<GenericMessage>,
    #[serde(default)]
    pub tools: Option<Vec<GenericTool>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenericMessage {
    pub role: String,
    // String or block array; kept raw so either shape survives deserialization.
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl GenericMessage {
    // Parses `content` as a block array. Elements that do not match a known
    // block shape are dropped rather than failing the whole message.
    pub fn content_blocks(&self) -> Option<Vec<ContentBlock>> {
        let array = self.content.as_ref()?.as_array()?;
        Some(
            array
                .iter()
                .filter_map(|block| serde_json::from_value(block.clone()).ok())
                .collect(),
        )
    }

    pub fn content_text(&self) -> String {
        self.content.as_ref().map(extract_text).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

// Tool definitions arrive in two shapes; the resolver hides the difference.
#[derive(Debug, Clone, Deserialize)]
pub struct GenericTool {
    #[serde(rename = "type", default)]
    pub tool_type: Option<String>,
    #[serde(default)]
    pub function: Option<GenericToolFunction>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenericToolFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

pub struct ToolSpec<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub parameters: Option<&'a Value>,
}

impl GenericTool {
    // OpenAI shape wins when both are populated; entries with an empty name
    // resolve to None and are skipped by the encoders.
    pub fn spec(&self) -> Option<ToolSpec<'_>> {
        if self.tool_type.as_deref() == Some("function") {
            if let Some(function) = &self.function {
                if !function.name.is_empty() {
                    return Some(ToolSpec {
                        name: &function.name,
                        description: function.description.as_deref(),
                        parameters: function.parameters.as_ref(),
                    });
                }
            }
        }
        match &self.name {
            Some(name) if !name.is_empty() => Some(ToolSpec {
                name,
                description: self.description.as_deref(),
                parameters: self.input_schema.as_ref(),
            }),
            _ => None,
        }
    }
}

// Flattens message content to plain text: strings pass through, block arrays
// contribute their text blocks joined by newlines, anything else degrades to
// its JSON text.
pub fn extract_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match serde_json::from_value(block.clone()) {
                Ok(ContentBlock::Text { text }) => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// Maps every tool_use id the assistant has ever produced in this conversation
// to its function name, so later tool results can be correlated.
pub fn tool_id_map(messages: &[GenericMessage]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for message in messages {
        if message.role != "assistant" {
            continue;
        }
        if let Some(blocks) = message.content_blocks() {
            for block in blocks {
                if let ContentBlock::ToolUse { id, name, .. } = block {
                    if !id.is_empty() && !name.is_empty() {
                        names.insert(id, name);
                    }
                }
            }
        }
        for call in &message.tool_calls {
            if !call.id.is_empty() && !call.function.name.is_empty() {
                names.insert(call.id.clone(), call.function.name.clone());
            }
        }
    }
    names
}
