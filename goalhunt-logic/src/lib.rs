mod coordinate;
mod location;
mod messages;
mod requests;
mod settings;
mod synchronizer;
#[cfg(test)]
mod tests;
mod transport;

pub use coordinate::{Coordinate, CoordinateComponent, CoordinateError};
pub use location::{LocationService, PositionError, PositionResult};
pub use messages::{ClientEvent, ServerEvent, ServerEventKind};
pub use requests::{
    GENERIC_REJECTION, GoalApi, GoalCheck, GoalCheckResult, InFlightGuard, InFlightSet,
    RequestError,
};
pub use settings::SyncSettings;
pub use synchronizer::{
    ConfirmationSource, GoalReachedNotice, SyncObserver, SyncPhase, SyncSnapshot, Synchronizer,
    UtcDT,
};
pub use transport::{
    ConnectionHandle, ConnectionState, ConnectionTracker, EventHandler, HandlerRegistry,
    Transport,
};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
