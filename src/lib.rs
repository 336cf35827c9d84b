//! Anthropic Messages API front end for Azure OpenAI chat completion deployments.
//!
//! Requests arriving in Anthropic shape are mapped to a deployment by model
//! family, translated to chat completion requests, and the replies (complete or
//! streamed) are translated back.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod server;
pub mod translate;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use logging::SharedLogger;
pub use server::{build_router, AppState};
