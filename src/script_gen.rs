//! Script generator seam.
//!
//! Dialogue generation (prompting, model choice, grounding) lives outside
//! this crate; the pipeline only needs something that turns a topic into an
//! ordered turn sequence. Failures here are fatal pre-synthesis errors.

use async_trait::async_trait;

use crate::script::Script;

/// The external script-generation collaborator.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Produce a complete script for the given topic or source text.
    async fn generate_script(&self, topic: &str) -> anyhow::Result<Script>;
}

/// Generator that returns a pre-built script, for callers that already have
/// a dialogue (or tests).
pub struct FixedScript(pub Script);

#[async_trait]
impl ScriptGenerator for FixedScript {
    async fn generate_script(&self, _topic: &str) -> anyhow::Result<Script> {
        Ok(self.0.clone())
    }
}
