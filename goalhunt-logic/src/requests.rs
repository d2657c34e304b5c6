use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::coordinate::Coordinate;

/// Message used when the server rejects a request without saying why
pub const GENERIC_REJECTION: &str = "Could not get response.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The server couldn't be reached or the exchange broke off
    #[error("network failure: {0}")]
    Network(String),
    /// The server answered with a non-success status
    #[error("{message} (status {status})")]
    Rejected { status: u16, message: String },
    /// Cancelled by the owner before it resolved
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Success status, but the payload wasn't what the caller expected
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl RequestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Body of a `check-goal` request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalCheck {
    pub user_position: Coordinate,
    pub goal_position: Coordinate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalCheckResult {
    pub is_goal_reached: bool,
}

/// Request/response operations offered by the goal server
pub trait GoalApi: Send + Sync {
    /// Ask for an initial goal near `at`
    fn generate_goal(
        &self,
        at: Coordinate,
    ) -> impl Future<Output = Result<Coordinate, RequestError>> + Send;
    /// Ask whether the user position is on the goal
    fn check_goal(&self, check: GoalCheck) -> impl Future<Output = Result<bool, RequestError>> + Send;
    /// Cancel every call still in flight
    fn cancel_all(&self);
}

/// Cancellation handles of every outstanding call
#[derive(Debug, Default)]
pub struct InFlightSet {
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, CancellationToken>>,
}

impl InFlightSet {
    /// Track a new call, the call stops being tracked when the returned guard drops
    pub fn register(self: &Arc<Self>) -> InFlightGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, token.clone());
        InFlightGuard {
            set: self.clone(),
            id,
            token,
        }
    }

    /// Cancel and forget every tracked call, returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner));
        let count = drained.len();
        for token in drained.into_values() {
            token.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A call registered in an [InFlightSet]
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<InFlightSet>,
    id: u64,
    token: CancellationToken,
}

impl InFlightGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drive `call` to completion unless cancelled first. A call that already resolved wins over
    /// a cancellation that lands in the same poll.
    pub async fn run<T>(
        self,
        call: impl Future<Output = Result<T, RequestError>>,
    ) -> Result<T, RequestError> {
        let res = tokio::select! {
            biased;

            res = call => res,
            _ = self.token.cancelled() => Err(RequestError::Cancelled),
        };
        drop(self);
        res
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{sync::oneshot, task::yield_now, test};

    #[test]
    async fn test_resolved_call_is_untracked() {
        let set = Arc::new(InFlightSet::default());
        let guard = set.register();
        assert_eq!(set.len(), 1);

        let res = guard.run(async { Ok(5) }).await;
        assert_eq!(res, Ok(5));
        assert!(set.is_empty(), "Resolved call still tracked");
        assert_eq!(set.cancel_all(), 0, "Cancelled a finished call");
    }

    #[test]
    async fn test_cancel_all_cancels_pending() {
        let set = Arc::new(InFlightSet::default());
        let (send, recv) = oneshot::channel();

        let guard = set.register();
        tokio::spawn(async move {
            let res = guard
                .run(std::future::pending::<Result<(), RequestError>>())
                .await;
            send.send(res).ok();
        });
        yield_now().await;

        assert_eq!(set.len(), 1);
        assert_eq!(set.cancel_all(), 1);
        assert!(set.is_empty());

        let res = recv.await.expect("Call never resolved");
        assert_eq!(res, Err(RequestError::Cancelled));
    }

    #[test]
    async fn test_terminal_error_beats_cancel() {
        let set = Arc::new(InFlightSet::default());
        let guard = set.register();
        guard.token().cancel();

        let res: Result<(), _> = guard
            .run(async { Err(RequestError::Network("unreachable".into())) })
            .await;
        assert_eq!(res, Err(RequestError::Network("unreachable".into())));
        assert!(set.is_empty());
    }

    #[test]
    async fn test_check_body_shape() {
        let c = Coordinate::new(1.0, 2.0).unwrap();
        let body = serde_json::to_value(GoalCheck {
            user_position: c,
            goal_position: c,
        })
        .unwrap();
        assert!(body.get("userPosition").is_some());
        assert!(body.get("goalPosition").is_some());

        let res: GoalCheckResult = serde_json::from_str(r#"{"isGoalReached": true}"#).unwrap();
        assert!(res.is_goal_reached);
    }
}
