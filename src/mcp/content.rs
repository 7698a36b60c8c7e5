//! Shaping MCP tool results into one JSON payload.
//!
//! Precedence: a structured result wins outright; a single text item that
//! parses as JSON is used as that JSON; otherwise every text item is
//! concatenated and carried as a JSON string. Non-text items contribute
//! nothing to the text fallback.

use serde_json::Value;

/// A tool-result content item, reduced to what payload shaping needs.
#[derive(Debug, Clone, PartialEq)]
pub enum McpContent {
    Text(String),
    /// Images, audio, resources: irrelevant for the JSON payload.
    Other,
}

pub fn result_payload(structured: Option<Value>, contents: &[McpContent]) -> Value {
    if let Some(structured) = structured {
        return structured;
    }

    if contents.len() == 1 {
        if let McpContent::Text(text) = &contents[0] {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                return parsed;
            }
        }
    }

    let concatenated: String = contents
        .iter()
        .filter_map(|item| match item {
            McpContent::Text(text) => Some(text.as_str()),
            McpContent::Other => None,
        })
        .collect();

    Value::String(concatenated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_content_wins() {
        let payload = result_payload(
            Some(json!({"temp": 57})),
            &[McpContent::Text("ignored".into())],
        );
        assert_eq!(payload, json!({"temp": 57}));
    }

    #[test]
    fn single_json_text_is_parsed() {
        let payload = result_payload(None, &[McpContent::Text(r#"{"temp":57}"#.into())]);
        assert_eq!(payload, json!({"temp": 57}));
    }

    #[test]
    fn single_non_json_text_stays_a_string() {
        let payload = result_payload(None, &[McpContent::Text("57 degrees".into())]);
        assert_eq!(payload, json!("57 degrees"));
    }

    #[test]
    fn multiple_texts_concatenate_even_when_json() {
        let payload = result_payload(
            None,
            &[
                McpContent::Text("{\"a\":1}".into()),
                McpContent::Text("{\"b\":2}".into()),
            ],
        );
        assert_eq!(payload, json!("{\"a\":1}{\"b\":2}"));
    }

    #[test]
    fn non_text_items_are_skipped() {
        let payload = result_payload(
            None,
            &[
                McpContent::Text("before ".into()),
                McpContent::Other,
                McpContent::Text("after".into()),
            ],
        );
        assert_eq!(payload, json!("before after"));
    }

    #[test]
    fn empty_contents_become_empty_string() {
        assert_eq!(result_payload(None, &[]), json!(""));
    }
}
