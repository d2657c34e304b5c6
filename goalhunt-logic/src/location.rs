use crate::coordinate::Coordinate;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("permission to read the device position was denied")]
    PermissionDenied,
    #[error("device position unavailable: {0}")]
    Unavailable(String),
    #[error("timed out waiting for a position fix")]
    Timeout,
}

pub type PositionResult = Result<Coordinate, PositionError>;

/// Source of the device's position
pub trait LocationService: Send + Sync {
    /// Capture the position once. This is a one-shot fix, not a stream of updates, and can't be
    /// cancelled once issued.
    fn current_position(&self) -> impl Future<Output = PositionResult> + Send;
}
