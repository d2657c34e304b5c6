use goalhunt_logic::{Coordinate, LocationService, PositionError, PositionResult};

/// Device position handed to us on the command line
pub struct FixedLocation(Option<Coordinate>);

impl FixedLocation {
    pub fn new(position: Option<Coordinate>) -> Self {
        Self(position)
    }
}

impl LocationService for FixedLocation {
    async fn current_position(&self) -> PositionResult {
        self.0.ok_or_else(|| {
            PositionError::Unavailable("no device position given (use --lat and --lng)".into())
        })
    }
}
