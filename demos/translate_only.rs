//! Demonstrate the translation layer without a server or network calls.
//!
//! Usage:
//!   `cargo run --example translate_only`

use azure_claude_proxy::config::Deployments;
use azure_claude_proxy::models;
use azure_claude_proxy::translate::anthropic_types::MessagesRequest;
use azure_claude_proxy::translate::openai_types::ChatCompletionResponse;
use azure_claude_proxy::translate::request::anthropic_to_openai;
use azure_claude_proxy::translate::response::openai_to_anthropic;
use azure_claude_proxy::translate::streaming::StreamTranslator;
use serde_json::json;

fn main() -> anyhow::Result<()> {
    let deployments = Deployments {
        opus: "gpt-4o".to_string(),
        sonnet: "gpt-4o".to_string(),
        haiku: "gpt-4o-mini".to_string(),
    };

    // What an Anthropic client sends
    let anthropic_req: MessagesRequest = serde_json::from_value(json!({
        "model": "claude-3-5-haiku-20241022",
        "system": "You are a geography expert. Be concise.",
        "messages": [
            {"role": "user", "content": "What is the capital of France?"},
            {"role": "assistant", "content": [{"type": "text", "text": "Paris."}]},
            {"role": "user", "content": "And Germany?"}
        ],
        "tools": [{
            "name": "lookup_capital",
            "description": "Look up a country's capital",
            "input_schema": {"type": "object", "properties": {"country": {"type": "string"}}}
        }],
        "stream": true
    }))?;

    let deployment = models::resolve(&anthropic_req.model, &deployments);
    let chat_req = anthropic_to_openai(&anthropic_req, deployment);

    println!("=== Deployment: {} ===", chat_req.deployment);
    println!("{}", serde_json::to_string_pretty(&chat_req)?);

    // A complete backend reply, translated back
    let chat_resp: ChatCompletionResponse = serde_json::from_value(json!({
        "id": "chatcmpl-demo",
        "choices": [{
            "message": {
                "role": "assistant",
                "content": "Let me check.",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "lookup_capital", "arguments": "{\"country\":\"Germany\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 42, "completion_tokens": 8}
    }))?;

    let anthropic_resp = openai_to_anthropic(&chat_resp, &anthropic_req.model)?;

    println!();
    println!("=== Translated Response (Anthropic format) ===");
    println!("{}", serde_json::to_string_pretty(&anthropic_resp)?);

    // The streaming translator, fed in awkward byte-sized pieces
    println!();
    println!("=== Streaming Translation Demo ===");

    let upstream = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"The capital\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" is Berlin.\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    let mut translator = StreamTranslator::new(&anthropic_req.model);
    let start = translator.message_start();
    println!("  event: {} {}", start.event_name(), serde_json::to_string(&start)?);

    for piece in upstream.as_bytes().chunks(13) {
        for event in translator.feed(piece) {
            println!("  event: {} {}", event.event_name(), serde_json::to_string(&event)?);
        }
    }

    println!();
    println!("Done! The translation layer works without any network calls.");
    Ok(())
}
