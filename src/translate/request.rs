//! Translate Anthropic Messages API requests into Azure chat completion requests.
//!
//! Every Anthropic message becomes exactly one backend message whose content is
//! the message's text, flattened. Tool definitions are forwarded as function
//! tools with a fixed `"auto"` tool choice.

use super::anthropic_types::{MessagesRequest, Tool};
use super::openai_types::{ChatCompletionRequest, ChatFunction, ChatMessage, ChatTool};

pub const DEFAULT_MAX_TOKENS: u64 = 4096;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;

/// Translate an Anthropic Messages API request for the given deployment.
/// Pure function; the caller has already resolved the deployment name.
pub fn anthropic_to_openai(req: &MessagesRequest, deployment: &str) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(ref system) = req.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.as_text(),
        });
    }

    messages.extend(req.messages.iter().map(|msg| ChatMessage {
        role: msg.role.as_str().to_string(),
        content: msg.content.as_text(),
    }));

    let tools: Option<Vec<ChatTool>> = req
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| tools.iter().map(translate_tool).collect());

    let tool_choice = tools.as_ref().map(|_| "auto".to_string());

    ChatCompletionRequest {
        deployment: deployment.to_string(),
        messages,
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        stream: req.stream.unwrap_or(false),
        tools,
        tool_choice,
    }
}

fn translate_tool(tool: &Tool) -> ChatTool {
    ChatTool {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool
                .input_schema
                .clone()
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
        },
    }
}
