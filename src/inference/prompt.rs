//! System prompt construction.
//!
//! The default prompt teaches the model the JSON wire format for tool calls,
//! which is what the extractor recovers when a backend has no native tool
//! binding. Thinking-capable models are also told how to fence reasoning.

use crate::tool_provider::ToolDescriptor;

use super::thinking::{THINKING_CLOSE, THINKING_OPEN};

const TOOL_CALL_EXAMPLE: &str = r#"{
  "tool_calls": [
    {
      "name": "exact_tool_name",
      "args": {
        "argument_name": "argument_value"
      },
      "id": "unique_identifier_for_this_call",
      "type": "tool_call"
    }
  ]
}"#;

const TOOL_RULES: &[&str] = &[
    "Use only the exact tool names you were given.",
    "A response that calls tools must contain only the tool call JSON, with no other text.",
    "Give every tool call a unique id in UUID format when not using native tool calling.",
    "Always include \"type\": \"tool_call\" in each JSON tool call.",
    "Make sure the JSON is well formed and parsable.",
    "The tool_calls value must be a valid JSON array.",
    "After calling tools, wait for their results before going on.",
    "Do not wrap tool calls in markdown code blocks.",
    "When answering without tools, reply with normal text.",
];

/// The prompt used when the caller does not override the system message.
pub fn default_system_prompt(thinking: bool) -> String {
    let mut prompt = String::from("You are an AI assistant that can use tools to help answer questions.\n");

    if thinking {
        prompt.push_str(&format!(
            "\nYou can reason through a problem before giving your final answer. \
             Put that reasoning in a thinking section:\n{THINKING_OPEN}\n\
             [your detailed reasoning]\n{THINKING_CLOSE}\n"
        ));
    }

    prompt.push_str(
        "\nThe available tools are provided to you. When you use a tool you MUST use its exact \
         name, and respond in a format the system can process.\n\n\
         If the model interface supports structured tool calling, use it.\n\
         Otherwise respond with JSON in exactly this format when calling tools:\n",
    );
    prompt.push_str(TOOL_CALL_EXAMPLE);
    prompt.push_str("\n\nCRITICAL INSTRUCTIONS FOR TOOL USAGE:\n");
    for (i, rule) in TOOL_RULES.iter().enumerate() {
        prompt.push_str(&format!("{}. {rule}\n", i + 1));
    }

    if thinking {
        prompt.push_str(&format!(
            "\nIMPORTANT INSTRUCTIONS FOR THINKING MODE:\n\
             1. Use {THINKING_OPEN}...{THINKING_CLOSE} sections to show your reasoning\n\
             2. Always surround the reasoning with the '{THINKING_OPEN}' and '{THINKING_CLOSE}' tags\n\
             3. Put thinking sections at the start of the response when reasoning is needed\n"
        ));
    }

    prompt.push_str(
        "\nAfter each tool call you will receive its result. You may need further tool calls \
         based on those results before you can answer; this can take several rounds.\n\
         If you can answer directly without tools, reply with text.\n",
    );
    prompt
}

/// Describe tools in text for models without native tool binding.
pub fn tool_catalog_prompt(tools: &[ToolDescriptor]) -> String {
    let mut prompt = String::from("You can call the following tools:\n");
    for tool in tools {
        prompt.push_str(&format!("\n- name: {}\n", tool.name));
        if !tool.description.is_empty() {
            prompt.push_str(&format!("  description: {}\n", tool.description));
        }
        prompt.push_str(&format!("  parameters: {}\n", tool.parameters));
    }
    prompt
}
