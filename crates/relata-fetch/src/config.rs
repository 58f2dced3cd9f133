use serde::{Deserialize, Serialize};

/// How batch responses are reconciled with the stubs they were meant to fill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Destroy stubs whose ids a successful batch response did not contain
    pub destroy_missing_from_batch: bool,
    /// Destroy a failed batch's stubs, as a failed single fetch does
    pub destroy_stubs_on_batch_failure: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            destroy_missing_from_batch: false,
            destroy_stubs_on_batch_failure: true,
        }
    }
}
