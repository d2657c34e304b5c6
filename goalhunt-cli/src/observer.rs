use goalhunt_logic::{
    GoalReachedNotice, PositionError, RequestError, SyncObserver, SyncSnapshot,
};
use log::{debug, error};

/// Reports to the terminal
pub struct ConsoleObserver;

impl SyncObserver for ConsoleObserver {
    fn goal_reached(&self, notice: GoalReachedNotice) {
        println!("Goal Reached! ({})", notice.at.format("%H:%M:%S"));
    }

    fn state_changed(&self, snapshot: &SyncSnapshot) {
        debug!("State is now {snapshot:?}");
    }

    fn position_failed(&self, why: &PositionError) {
        error!("No device position, set one by typing \"<lat>,<lng>\": {why}");
    }

    fn goal_fetch_failed(&self, why: &RequestError) {
        println!("Could not fetch a goal: {why}");
    }
}
