//! Tool descriptors and call results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Bare name from the server, or `<provider>#<tool>` once qualified.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(default = "empty_object_schema", alias = "inputSchema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_object_schema(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Same tool under a `<provider>#<tool>` name.
    pub fn qualified(mut self, provider: &str) -> Self {
        self.name = format!("{provider}#{}", self.name);
        self
    }
}

/// One element of a tool call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultPart {
    /// The tool ran and reported a failure.
    Error { error: Value },
    Text { text: String },
    /// Anything else the provider returned (images, resources, ...).
    Other(Value),
}

impl ResultPart {
    pub fn text(text: impl Into<String>) -> Self {
        ResultPart::Text { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ResultPart::Error {
            error: Value::String(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResultPart::Error { .. })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResultPart::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Error payload rendered as text.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ResultPart::Error { error: Value::String(s) } => Some(s.clone()),
            ResultPart::Error { error } => Some(error.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_parts_deserialize_by_shape() {
        let parts: Vec<ResultPart> = serde_json::from_value(json!([
            {"type": "text", "text": "12:00"},
            {"error": "bad timezone"},
            {"type": "image", "data": "AAAA"}
        ]))
        .unwrap();
        assert_eq!(parts[0].as_text(), Some("12:00"));
        assert!(parts[1].is_error());
        assert_eq!(parts[1].error_message().as_deref(), Some("bad timezone"));
        assert!(matches!(parts[2], ResultPart::Other(_)));
    }

    #[test]
    fn test_structured_error_message() {
        let part = ResultPart::Error {
            error: json!({"code": 400}),
        };
        assert_eq!(part.error_message().as_deref(), Some("{\"code\":400}"));
    }

    #[test]
    fn test_descriptor_accepts_input_schema_alias() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "get_current_time",
            "inputSchema": {"type": "object", "properties": {"timezone": {"type": "string"}}}
        }))
        .unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.parameters["properties"]["timezone"]["type"], "string");
        assert_eq!(tool.qualified("time").name, "time#get_current_time");
    }
}
