//! Maps Claude model identifiers onto Azure deployment names.
//!
//! Matching is by model family substring, so dated or suffixed identifiers
//! (`claude-3-opus-20240229`, `claude-opus-4-1`, ...) resolve without a table.
//! Anything that is neither opus nor haiku falls back to the sonnet deployment.

use crate::config::Deployments;

/// Logical model tier a Claude model id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Opus,
    Sonnet,
    Haiku,
}

impl ModelTier {
    /// Classify a model id. Never fails: unknown ids are treated as sonnet.
    #[must_use]
    pub fn of(model_id: &str) -> Self {
        if model_id.contains("opus") {
            Self::Opus
        } else if model_id.contains("haiku") {
            Self::Haiku
        } else {
            Self::Sonnet
        }
    }
}

/// Resolve `model_id` to the deployment configured for its tier.
#[must_use]
pub fn resolve<'a>(model_id: &str, deployments: &'a Deployments) -> &'a str {
    match ModelTier::of(model_id) {
        ModelTier::Opus => &deployments.opus,
        ModelTier::Sonnet => &deployments.sonnet,
        ModelTier::Haiku => &deployments.haiku,
    }
}
