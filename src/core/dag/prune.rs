use serde_json::Value;

/// Remove, at any depth, every node for which `predicate(key, value)` holds.
/// Object entries are tested with `Some(key)`, array elements with `None`.
/// Returns the number of nodes removed.
pub fn prune_fields<P>(value: &mut Value, predicate: &P) -> usize
where
    P: Fn(Option<&str>, &Value) -> bool,
{
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|k, v| !predicate(Some(k), v));
            let mut removed = before - map.len();
            for child in map.values_mut() {
                removed += prune_fields(child, predicate);
            }
            removed
        }
        Value::Array(items) => {
            let before = items.len();
            items.retain(|v| !predicate(None, v));
            let mut removed = before - items.len();
            for item in items.iter_mut() {
                removed += prune_fields(item, predicate);
            }
            removed
        }
        _ => 0,
    }
}

/// Shorter scripts are only removed on an exact match; substring redaction
/// would mangle unrelated text.
const MIN_REDACTED_LEN: usize = 8;

pub const SCRIPT_PLACEHOLDER: &str = "[script removed]";

/// Replace copies of `script` inside free text.
pub fn redact_script(text: &str, script: &str) -> String {
    if script.len() < MIN_REDACTED_LEN {
        return text.to_string();
    }
    text.replace(script, SCRIPT_PLACEHOLDER)
}

/// Strip a script from a response tree: drops every `script` entry and any
/// node whose string value is the script itself, then replaces copies of the
/// script embedded in longer strings such as error messages.
pub fn strip_script(value: &mut Value, script: &str) -> usize {
    let removed = prune_fields(value, &|key, v| {
        key == Some("script") || (!script.is_empty() && v.as_str() == Some(script))
    });
    if script.len() < MIN_REDACTED_LEN {
        return removed;
    }
    removed + redact(value, script)
}

fn redact(value: &mut Value, script: &str) -> usize {
    match value {
        Value::String(s) if s.contains(script) => {
            *s = s.replace(script, SCRIPT_PLACEHOLDER);
            1
        }
        Value::Object(map) => map.values_mut().map(|v| redact(v, script)).sum(),
        Value::Array(items) => items.iter_mut().map(|v| redact(v, script)).sum(),
        _ => 0,
    }
}
