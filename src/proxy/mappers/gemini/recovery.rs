// Recovery for MALFORMED_FUNCTION_CALL finishes. Gemini reports the call it
// failed to emit as `Malformed function call: call:<name>(<args>)` in
// finishMessage; we re-parse that into a usable tool_use, repairing bareword
// JSON keys when needed.

use serde_json::{Map, Value};
use tracing::warn;

const MALFORMED_PREFIX: &str = "Malformed function call: ";

pub fn parse_malformed_function_call(message: &str) -> Option<(String, Map<String, Value>)> {
    let message = message.strip_prefix(MALFORMED_PREFIX).unwrap_or(message);
    let message = message.trim();

    if !message.starts_with("call:") {
        return None;
    }

    let start_brace = message.find('{')?;
    let end_brace = message.rfind('}')?;
    if end_brace < start_brace {
        return None;
    }

    // Name sits between "call:" and the opening brace, possibly with a
    // trailing "(" and colon-separated namespace segments.
    let name_part = message[5..start_brace].trim_end_matches([' ', '(']);
    let name = name_part.trim_matches([':', ' ']).replace(':', "_");

    let args_raw = &message[start_brace..=end_brace];
    if let Ok(args) = serde_json::from_str::<Map<String, Value>>(args_raw) {
        return Some((name, args));
    }

    let repaired = quote_bareword_keys(args_raw);
    match serde_json::from_str::<Map<String, Value>>(&repaired) {
        Ok(args) => Some((name, args)),
        Err(_) => {
            warn!("Unable to parse malformed function call args: {}", args_raw);
            None
        }
    }
}

// Fallback when even the repaired parse fails: drop the prefix and everything
// through the dangling argument braces, keeping only the trailing prose.
pub fn strip_malformed_remainder(message: &str) -> String {
    let content = message.strip_prefix(MALFORMED_PREFIX).unwrap_or(message);
    let remainder = if let Some(idx) = content.rfind("})") {
        &content[idx + 2..]
    } else if let Some(idx) = content.rfind('}') {
        &content[idx + 1..]
    } else {
        content
    };
    remainder.trim().to_string()
}

// Adds double quotes around bareword keys followed by `:`, leaving string
// contents untouched. `{msg:"hi"}` becomes `{"msg":"hi"}`; bare values such
// as true/false/null pass through unquoted.
fn quote_bareword_keys(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut key_start: Option<usize> = None;
    let mut in_string = false;
    let mut previous: Option<char> = None;

    for (i, c) in input.char_indices() {
        if c == '"' && previous != Some('\\') {
            in_string = !in_string;
        }

        if !in_string {
            if c.is_ascii_alphanumeric() || c == '_' {
                if key_start.is_none() {
                    key_start = Some(i);
                }
            } else {
                if let Some(start) = key_start {
                    if c == ':' {
                        out.push('"');
                        out.push_str(&input[start..i]);
                        out.push('"');
                        key_start = None;
                    } else if c == ' ' || c == '\t' || c == '\n' {
                        // Whitespace may still separate the word from its
                        // colon; keep scanning.
                    } else {
                        out.push_str(&input[start..i]);
                        key_start = None;
                    }
                }
                out.push(c);
            }
        } else {
            if let Some(start) = key_start {
                out.push_str(&input[start..i]);
                key_start = None;
            }
            out.push(c);
        }

        previous = Some(c);
    }

    if let Some(start) = key_start {
        out.push_str(&input[start..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recovers_well_formed_args() {
        let (name, args) =
            parse_malformed_function_call(r#"Malformed function call: call:bash(  {"cmd":"ls"})"#)
                .unwrap();
        assert_eq!(name, "bash");
        assert_eq!(Value::Object(args), json!({"cmd": "ls"}));
    }

    #[test]
    fn repairs_bareword_keys_and_namespaced_names() {
        let (name, args) =
            parse_malformed_function_call(r#"call:feishu:send_text{msg:"hi"}"#).unwrap();
        assert_eq!(name, "feishu_send_text");
        assert_eq!(Value::Object(args), json!({"msg": "hi"}));
    }

    #[test]
    fn rejects_non_call_messages() {
        assert!(parse_malformed_function_call("something else entirely").is_none());
        assert!(parse_malformed_function_call("call:bash(no braces)").is_none());
        assert!(parse_malformed_function_call("call:}{reversed").is_none());
    }

    #[test]
    fn quote_bareword_keys_cases() {
        assert_eq!(quote_bareword_keys(r#"{msg:"hi"}"#), r#"{"msg":"hi"}"#);
        assert_eq!(
            quote_bareword_keys(r#"{a:1, b:"x", c:true}"#),
            r#"{"a":1, "b":"x", "c":true}"#
        );
        // Already-quoted keys and string contents are untouched.
        assert_eq!(quote_bareword_keys(r#"{"k":"a:b"}"#), r#"{"k":"a:b"}"#);
    }

    #[test]
    fn strip_remainder_drops_dangling_braces() {
        assert_eq!(
            strip_malformed_remainder(
                "Malformed function call: call:bash({\"cmd\":\"ls\"}) and then some text"
            ),
            "and then some text"
        );
        assert_eq!(
            strip_malformed_remainder("Malformed function call: call:x{bad trailing"),
            "call:x{bad trailing"
        );
    }
}
