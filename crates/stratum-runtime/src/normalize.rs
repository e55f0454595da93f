//! Normalization of producer outputs flowing between dependent steps.

use serde_json::Value;

/// Collapse raw producer outputs into the native value handed to a
/// consumer's `content` argument.
///
/// Tool outputs arrive as `{"content": [{"text": "<json>"}, ...]}`;
/// resource outputs arrive already decoded. Text payloads are parsed as
/// JSON when possible (kept as plain strings otherwise), decoded list
/// payloads are concatenated, and a single surviving value is
/// unwrapped.
pub fn normalize_outputs(outputs: &[Value]) -> Value {
    let mut normalized: Vec<Value> = Vec::new();
    for output in outputs {
        collect(output, &mut normalized);
    }
    match normalized.len() {
        0 => Value::Null,
        1 => normalized.remove(0),
        _ => Value::Array(normalized),
    }
}

fn collect(output: &Value, into: &mut Vec<Value>) {
    if let Some(entries) = output.get("content").and_then(Value::as_array) {
        for entry in entries {
            let Some(text) = entry.get("text").and_then(Value::as_str) else {
                continue;
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => into.extend(items),
                Ok(value) => into.push(value),
                Err(_) => into.push(Value::String(text.to_string())),
            }
        }
        return;
    }
    match output {
        Value::Array(items) => into.extend(items.iter().cloned()),
        other => into.push(other.clone()),
    }
}
