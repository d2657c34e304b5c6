use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Behaviour switches for a [crate::Synchronizer]
pub struct SyncSettings {
    /// Confirm goal completion with a `check-goal` request whenever the position or goal changes,
    /// in addition to waiting for the server to push a goal-reached event
    pub pull_check: bool,
    /// If the connection isn't up when the first position fix lands, fetch the initial goal with
    /// a `generate-goal` request instead of the goal-request push
    pub goal_fetch_fallback: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            pull_check: true,
            goal_fetch_fallback: true,
        }
    }
}
