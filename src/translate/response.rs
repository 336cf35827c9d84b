use super::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage};
use super::openai_types::ChatCompletionResponse;
use crate::error::{ProxyError, Result};

/// Translate a complete chat completion into an Anthropic Messages response.
/// `original_model` is what the client asked for, echoed back verbatim.
pub fn openai_to_anthropic(
    resp: &ChatCompletionResponse,
    original_model: &str,
) -> Result<MessagesResponse> {
    let choice = resp.choices.first().ok_or(ProxyError::UpstreamEmptyResponse)?;

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(ref text) = choice.message.content {
        if !text.is_empty() {
            content.push(ResponseContentBlock::Text { text: text.clone() });
        }
    }

    if let Some(ref tool_calls) = choice.message.tool_calls {
        for tc in tool_calls {
            content.push(ResponseContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input: parse_tool_arguments(&tc.function.arguments),
            });
        }
    }

    let stop_reason = map_finish_reason(choice.finish_reason.as_deref().unwrap_or_default());

    let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens.unwrap_or(0),
        output_tokens: u.completion_tokens.unwrap_or(0),
    });

    Ok(MessagesResponse {
        id: new_message_id(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    })
}

/// Only tool calls are distinguished; every other finish reason ends the turn.
pub fn map_finish_reason(reason: &str) -> &'static str {
    if reason == "tool_calls" {
        "tool_use"
    } else {
        "end_turn"
    }
}

/// Unparseable arguments become an empty object rather than failing the response.
fn parse_tool_arguments(arguments: &str) -> serde_json::Value {
    serde_json::from_str(arguments)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
}

pub fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}
