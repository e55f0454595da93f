//! Plan intake: extraction from raw planner text and normalization of
//! the omissions the planner is known to make.

use serde_json::{Map, Value};

/// Extract the first JSON array from raw planner output.
///
/// The model wraps plans in prose more often than not; take everything
/// from the first `[` to the last `]` and refuse candidates whose
/// brackets do not balance (truncated generations).
pub fn extract_plan_text(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    let candidate = &raw[start..=end];
    brackets_balanced(candidate).then_some(candidate)
}

fn brackets_balanced(text: &str) -> bool {
    let mut stack = Vec::new();
    for c in text.chars() {
        match c {
            '{' | '[' => stack.push(c),
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

/// Fill the omissions the planner is known to make. Explicit fields are
/// never overridden.
///
/// - missing `type` is inferred from the presence of `tool`;
/// - resource steps default `server` to `file` and `tool` to
///   `read_file`;
/// - a top-level `uri`/`path` on a resource step moves into
///   `arguments.uri`;
/// - missing `arguments` defaults to `{}`.
pub(crate) fn normalize(value: &mut Value) {
    let Some(steps) = value.as_array_mut() else {
        return;
    };
    for step in steps {
        let Some(object) = step.as_object_mut() else {
            continue;
        };

        if !object.contains_key("type") {
            let kind = if object.contains_key("tool") { "tool" } else { "resource" };
            object.insert("type".to_string(), Value::String(kind.to_string()));
        }

        let is_resource = object.get("type").and_then(Value::as_str) == Some("resource");
        if is_resource {
            if !object.contains_key("server") {
                object.insert("server".to_string(), Value::String("file".to_string()));
            }
            for key in ["uri", "path"] {
                if let Some(moved) = object.remove(key) {
                    let arguments = object
                        .entry("arguments")
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Some(arguments) = arguments.as_object_mut() {
                        arguments.entry("uri").or_insert(moved);
                    }
                }
            }
            if !object.contains_key("tool") {
                object.insert("tool".to_string(), Value::String("read_file".to_string()));
            }
        }

        if !object.contains_key("arguments") {
            object.insert("arguments".to_string(), Value::Object(Map::new()));
        }
    }
}
