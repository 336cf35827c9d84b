//! API translation between Anthropic and Azure `OpenAI` chat completion formats.
//!
//! All translation here is pure (no I/O): requests, complete responses, and the
//! streaming state machine.

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
