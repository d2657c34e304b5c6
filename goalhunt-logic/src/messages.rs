use serde::{Deserialize, Serialize};

use crate::coordinate::Coordinate;

/// An event pushed from us to the server over the persistent connection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Best-effort push of the current position
    #[serde(rename = "updateLocation")]
    LocationUpdate(Coordinate),
    /// Ask the server to assign a goal near the given position
    #[serde(rename = "requestGoalLocation")]
    GoalRequest(Coordinate),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocationUpdate(_) => "updateLocation",
            Self::GoalRequest(_) => "requestGoalLocation",
        }
    }
}

/// An event the server pushes to us, validated at the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Assigns (or overwrites) the goal
    #[serde(rename = "goalLocation")]
    GoalLocation(Coordinate),
    /// The server decided we reached the goal
    #[serde(rename = "goalEvent")]
    GoalReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    GoalLocation,
    GoalReached,
}

impl ServerEvent {
    pub fn kind(&self) -> ServerEventKind {
        match self {
            Self::GoalLocation(_) => ServerEventKind::GoalLocation,
            Self::GoalReached => ServerEventKind::GoalReached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_shape() {
        let c = Coordinate::new(37.0, -122.0).unwrap();
        let json = serde_json::to_string(&ClientEvent::GoalRequest(c)).unwrap();
        assert_eq!(
            json,
            r#"{"event":"requestGoalLocation","data":{"lat":37.0,"lng":-122.0}}"#
        );
    }

    #[test]
    fn test_goal_reached_without_payload() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"event":"goalEvent"}"#).expect("Failed to parse goalEvent");
        assert_eq!(event, ServerEvent::GoalReached);
        assert_eq!(event.kind(), ServerEventKind::GoalReached);
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(serde_json::from_str::<ServerEvent>(r#"{"event":"chat","data":"hi"}"#).is_err());
    }
}
