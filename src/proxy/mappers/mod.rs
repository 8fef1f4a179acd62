pub mod gemini;
pub mod generic;
pub mod openai;

use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

// Anthropic-style response envelope shared by both decode paths. The id is a
// hex-encoded nanosecond timestamp; serde_json leaves HTML characters
// unescaped, which the client expects.
pub(crate) fn message_envelope(
    model: &str,
    content: Vec<Value>,
    stop_reason: &str,
    input_tokens: u32,
    output_tokens: u32,
) -> Value {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    json!({
        "id": format!("{:x}", nanos),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
        },
        "base_resp": {
            "status_code": 0,
            "status_msg": "",
        },
    })
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let envelope = message_envelope("m", vec![json!({"type": "text", "text": "hi"})], "end_turn", 5, 1);
        assert_eq!(envelope["type"], "message");
        assert_eq!(envelope["role"], "assistant");
        assert_eq!(envelope["model"], "m");
        assert_eq!(envelope["stop_reason"], "end_turn");
        assert_eq!(envelope["usage"]["input_tokens"], 5);
        assert_eq!(envelope["usage"]["output_tokens"], 1);
        assert_eq!(envelope["base_resp"]["status_code"], 0);
        assert!(envelope["id"].as_str().unwrap().len() > 8);
    }
}
