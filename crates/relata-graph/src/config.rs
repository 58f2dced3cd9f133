use serde::{Deserialize, Serialize};

/// Graph behaviour switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Write a subtype's discriminator value into its serialized form when the
    /// attribute itself is absent
    pub emit_discriminator: bool,
    /// Queue relations declared `auto_fetch` for the fetch layer on
    /// construction
    pub auto_fetch: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            emit_discriminator: true,
            auto_fetch: true,
        }
    }
}
