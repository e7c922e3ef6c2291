//! Engine tuning knobs.

/// Settlement engine configuration.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// How many times a commit is retried after an optimistic conflict
    /// before the conflict is surfaced to the caller.
    pub commit_retries: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self { commit_retries: 1 }
    }
}
