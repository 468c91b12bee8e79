use pagepilot_core::ActionResult;
use serde_json::Value;

/// Turn a `tools/call` result into an [`ActionResult`].
///
/// The readable text comes from, in order: the first text item of `content`,
/// `structuredContent.result`, the whole `structuredContent`, and finally the
/// stringified result. `isError: true` is reported as a failure.
pub fn normalize_tool_result(tool_name: &str, result: &Value) -> ActionResult {
    let (text, raw) = extract(result);

    if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
        let reason = if text.trim().is_empty() {
            "MCP tool returned an error".to_string()
        } else {
            text
        };
        return ActionResult {
            success: false,
            message: format!("MCP tool \"{}\" failed: {}", tool_name, reason),
            data: Some(raw),
            error: Some(reason),
        };
    }

    ActionResult::ok_with_data(format!("MCP tool \"{}\" result: {}", tool_name, text), raw)
}

fn extract(result: &Value) -> (String, Value) {
    let first_text = result
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|items| {
            items.iter().find_map(|item| {
                let is_text = item.get("type").and_then(|t| t.as_str()).map_or(true, |t| t == "text");
                if is_text {
                    item.get("text").and_then(|t| t.as_str())
                } else {
                    None
                }
            })
        });
    if let Some(text) = first_text {
        return (text.to_string(), Value::String(text.to_string()));
    }

    if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
        if let Some(inner) = structured.get("result") {
            return (stringify(inner), inner.clone());
        }
        return (stringify(structured), structured.clone());
    }

    (stringify(result), result.clone())
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_content() {
        let r = normalize_tool_result("write_file", &json!({"content": [{"type": "text", "text": "ok"}]}));
        assert!(r.success);
        assert_eq!(r.message, "MCP tool \"write_file\" result: ok");
        assert_eq!(r.data, Some(json!("ok")));
    }

    #[test]
    fn test_skips_non_text_items() {
        let r = normalize_tool_result(
            "shot",
            &json!({"content": [{"type": "image", "data": "..."}, {"type": "text", "text": "saved"}]}),
        );
        assert_eq!(r.message, "MCP tool \"shot\" result: saved");
    }

    #[test]
    fn test_structured_result_field() {
        let r = normalize_tool_result("add", &json!({"content": [], "structuredContent": {"result": 5}}));
        assert_eq!(r.message, "MCP tool \"add\" result: 5");
        assert_eq!(r.data, Some(json!(5)));
    }

    #[test]
    fn test_whole_structured_content() {
        let r = normalize_tool_result("stat", &json!({"structuredContent": {"size": 10}}));
        assert_eq!(r.message, "MCP tool \"stat\" result: {\"size\":10}");
    }

    #[test]
    fn test_stringified_fallback() {
        let r = normalize_tool_result("odd", &json!({"value": [1, 2]}));
        assert!(r.success);
        assert_eq!(r.data, Some(json!({"value": [1, 2]})));
        assert!(r.message.contains("[1,2]"));
    }

    #[test]
    fn test_is_error() {
        let r = normalize_tool_result(
            "divide",
            &json!({"isError": true, "content": [{"type": "text", "text": "division by zero"}]}),
        );
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("division by zero"));
        assert_eq!(r.message, "MCP tool \"divide\" failed: division by zero");
    }
}
