use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    coordinate::Coordinate,
    location::{LocationService, PositionError, PositionResult},
    messages::{ClientEvent, ServerEvent, ServerEventKind},
    requests::{GoalApi, GoalCheck, RequestError},
    settings::SyncSettings,
    transport::{ConnectionHandle, ConnectionState, Transport},
};

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Uninitialized,
    /// The one-shot device position request is out, or it failed
    AwaitingDevicePosition,
    /// We have a position, goal and position may change freely from here on
    Active,
}

/// Which path told us the goal was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationSource {
    /// The server pushed a goal-reached event
    Push,
    /// A `check-goal` request came back positive
    PullCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalReachedNotice {
    pub source: ConfirmationSource,
    pub at: UtcDT,
    /// The goal we had when the notice fired
    pub goal: Option<Coordinate>,
}

/// Read-only copy of a synchronizer's state for presentation layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub phase: SyncPhase,
    pub current: Option<Coordinate>,
    pub goal: Option<Coordinate>,
    pub goal_requested: bool,
    /// Number of goal-reached notifications fired so far, duplicates included
    pub goal_reached_count: u64,
    pub last_reached: Option<UtcDT>,
}

/// Receives everything the user should find out about. None of these may block.
pub trait SyncObserver: Send + Sync {
    fn goal_reached(&self, notice: GoalReachedNotice);
    fn state_changed(&self, _snapshot: &SyncSnapshot) {}
    fn position_failed(&self, _why: &PositionError) {}
    /// The initial goal couldn't be fetched over the request channel
    fn goal_fetch_failed(&self, _why: &RequestError) {}
}

impl<O: SyncObserver> SyncObserver for Arc<O> {
    fn goal_reached(&self, notice: GoalReachedNotice) {
        (**self).goal_reached(notice)
    }

    fn state_changed(&self, snapshot: &SyncSnapshot) {
        (**self).state_changed(snapshot)
    }

    fn position_failed(&self, why: &PositionError) {
        (**self).position_failed(why)
    }

    fn goal_fetch_failed(&self, why: &RequestError) {
        (**self).goal_fetch_failed(why)
    }
}

#[derive(Debug)]
struct SyncState {
    phase: SyncPhase,
    current: Option<Coordinate>,
    goal: Option<Coordinate>,
    goal_requested: bool,
    goal_reached_count: u64,
    last_reached: Option<UtcDT>,
}

impl SyncState {
    fn new() -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            current: None,
            goal: None,
            goal_requested: false,
            goal_reached_count: 0,
            last_reached: None,
        }
    }

    fn as_snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            phase: self.phase,
            current: self.current,
            goal: self.goal,
            goal_requested: self.goal_requested,
            goal_reached_count: self.goal_reached_count,
            last_reached: self.last_reached,
        }
    }

    fn goal_check(&self) -> Option<GoalCheck> {
        Some(GoalCheck {
            user_position: self.current?,
            goal_position: self.goal?,
        })
    }
}

/// Everything that can change state, funneled through the main loop
#[derive(Debug)]
enum SyncInput {
    Server(ServerEvent),
    Reposition(Coordinate),
    CheckResult(Result<bool, RequestError>),
    GoalFetched(Result<Coordinate, RequestError>),
}

type Inbox = (
    mpsc::UnboundedSender<SyncInput>,
    Mutex<mpsc::UnboundedReceiver<SyncInput>>,
);

/// Owns the current position and the goal, keeps them in sync with the goal server over
/// [Transport] and [GoalApi], and tells the [SyncObserver] when the goal is reached.
///
/// Call [Synchronizer::main_loop] to run it and [Synchronizer::dispose] to stop it, dropping it
/// also disposes.
pub struct Synchronizer<L, T, R, O>
where
    L: LocationService,
    T: Transport,
    R: GoalApi + 'static,
    O: SyncObserver,
{
    state: RwLock<SyncState>,
    transport: Arc<T>,
    connection: ConnectionHandle,
    location: L,
    requests: Arc<R>,
    observer: O,
    settings: SyncSettings,
    inbox: Inbox,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl<L, T, R, O> Synchronizer<L, T, R, O>
where
    L: LocationService,
    T: Transport,
    R: GoalApi + 'static,
    O: SyncObserver,
{
    /// Subscribe to the transport's inbound events and start connecting to `address`
    pub fn new(
        address: &str,
        settings: SyncSettings,
        transport: Arc<T>,
        location: L,
        requests: Arc<R>,
        observer: O,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        for kind in [ServerEventKind::GoalLocation, ServerEventKind::GoalReached] {
            let tx = tx.clone();
            transport.on(
                kind,
                Box::new(move |event| {
                    tx.send(SyncInput::Server(*event)).ok();
                }),
            );
        }

        let connection = transport.connect(address);

        Self {
            state: RwLock::new(SyncState::new()),
            transport,
            connection,
            location,
            requests,
            observer,
            settings,
            inbox: (tx, Mutex::new(rx)),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub async fn snapshot(&self) -> SyncSnapshot {
        self.state.read().await.as_snapshot()
    }

    pub fn connection(&self) -> ConnectionHandle {
        self.connection.clone()
    }

    /// Explicitly move the current position (e.g. the user picked a spot on the map)
    pub fn reposition(&self, position: Coordinate) {
        if self.disposed.load(Ordering::SeqCst) {
            debug!("Disposed, ignoring move to {position}");
            return;
        }
        self.inbox.0.send(SyncInput::Reposition(position)).ok();
    }

    /// Stop the main loop, cancel every in-flight request and disconnect the transport.
    /// Resources are only released on the first call.
    pub fn dispose(&self) {
        self.cancel.cancel();

        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Disposing synchronizer");
        self.requests.cancel_all();
        self.transport.disconnect();
    }

    async fn push_location(&self, position: Coordinate) {
        if self.connection.is_connected() {
            debug!("Pushing location {position}");
            self.transport
                .send(ClientEvent::LocationUpdate(position))
                .await;
        } else {
            debug!("Not connected, skipping location push");
        }
    }

    /// Request a goal, at most once per synchronizer
    async fn request_goal(&self, state: &mut SyncState, position: Coordinate) {
        if state.goal_requested {
            return;
        }

        if self.connection.is_connected() {
            info!("Requesting a goal near {position}");
            state.goal_requested = true;
            self.transport.send(ClientEvent::GoalRequest(position)).await;
        } else if self.settings.goal_fetch_fallback {
            info!("Not connected, fetching a goal near {position} instead");
            state.goal_requested = true;
            self.spawn_goal_fetch(position);
        } else {
            debug!("Not connected, deferring goal request");
        }
    }

    fn spawn_goal_fetch(&self, position: Coordinate) {
        let requests = self.requests.clone();
        let inbox = self.inbox.0.clone();
        tokio::spawn(async move {
            let res = requests.generate_goal(position).await;
            inbox.send(SyncInput::GoalFetched(res)).ok();
        });
    }

    fn maybe_pull_check(&self, state: &SyncState) {
        if !self.settings.pull_check {
            return;
        }

        if let Some(check) = state.goal_check() {
            debug!(
                "Checking goal, {}m away",
                check.user_position.distance_to(&check.goal_position).round()
            );
            let requests = self.requests.clone();
            let inbox = self.inbox.0.clone();
            tokio::spawn(async move {
                let res = requests.check_goal(check).await;
                inbox.send(SyncInput::CheckResult(res)).ok();
            });
        }
    }

    fn emit_state_update(&self, state: &SyncState) {
        self.observer.state_changed(&state.as_snapshot());
    }

    async fn handle_position(&self, res: PositionResult) {
        match res {
            Ok(position) => {
                info!("Device position is {position}");
                let mut state = self.state.write().await;
                state.current = Some(position);
                state.phase = SyncPhase::Active;
                self.push_location(position).await;
                self.request_goal(&mut state, position).await;
                self.maybe_pull_check(&state);
                self.emit_state_update(&state);
            }
            Err(why) => {
                // No retry, we stay here until disposed
                error!("Failed to get device position: {why}");
                self.observer.position_failed(&why);
            }
        }
    }

    async fn handle_connected(&self) {
        let mut state = self.state.write().await;
        if let Some(position) = state.current {
            self.push_location(position).await;
            if state.phase == SyncPhase::Active {
                self.request_goal(&mut state, position).await;
            }
        }
    }

    async fn set_goal(&self, goal: Coordinate) {
        let mut state = self.state.write().await;
        // Last write wins, whichever path it came from
        state.goal = Some(goal);
        self.maybe_pull_check(&state);
        self.emit_state_update(&state);
    }

    async fn goal_reached(&self, source: ConfirmationSource) {
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.goal_reached_count += 1;
        state.last_reached = Some(now);
        let notice = GoalReachedNotice {
            source,
            at: now,
            goal: state.goal,
        };
        self.emit_state_update(&state);
        drop(state);

        info!("Goal reached! (via {source:?})");
        self.observer.goal_reached(notice);
    }

    async fn consume_input(&self, input: SyncInput) {
        match input {
            SyncInput::Server(ServerEvent::GoalLocation(goal)) => {
                info!("Received goal location {goal}");
                self.set_goal(goal).await;
            }
            SyncInput::Server(ServerEvent::GoalReached) => {
                self.goal_reached(ConfirmationSource::Push).await;
            }
            SyncInput::Reposition(position) => {
                info!("Moved to {position}");
                let mut state = self.state.write().await;
                state.current = Some(position);
                self.push_location(position).await;
                self.maybe_pull_check(&state);
                self.emit_state_update(&state);
            }
            SyncInput::CheckResult(Ok(true)) => {
                self.goal_reached(ConfirmationSource::PullCheck).await;
            }
            SyncInput::CheckResult(Ok(false)) => {
                debug!("Goal check: not there yet");
            }
            SyncInput::CheckResult(Err(why)) if why.is_cancelled() => {
                debug!("Goal check cancelled");
            }
            SyncInput::CheckResult(Err(why)) => {
                warn!("Goal check failed: {why}");
            }
            SyncInput::GoalFetched(Ok(goal)) => {
                info!("Fetched goal location {goal}");
                self.set_goal(goal).await;
            }
            SyncInput::GoalFetched(Err(why)) if why.is_cancelled() => {
                debug!("Goal fetch cancelled");
            }
            SyncInput::GoalFetched(Err(why)) => {
                error!("Could not fetch goal: {why}");
                self.observer.goal_fetch_failed(&why);
            }
        }
    }

    /// Main loop of the synchronizer, issues the device position request and then handles
    /// inbound events, repositions, request results and connection changes until disposed.
    pub async fn main_loop(&self) {
        self.state.write().await.phase = SyncPhase::AwaitingDevicePosition;
        info!("Requesting device position");

        let position = self.location.current_position().fuse();
        tokio::pin!(position);

        let mut connection = self.connection.clone();
        let mut connection_open = true;
        let mut inbox = self.inbox.1.lock().await;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    break;
                }

                res = &mut position => {
                    self.handle_position(res).await;
                }

                Some(input) = inbox.recv() => {
                    self.consume_input(input).await;
                }

                state = connection.changed(), if connection_open => {
                    match state {
                        Some(ConnectionState::Connected) => {
                            info!("Connected to goal server");
                            self.handle_connected().await;
                        }
                        Some(other) => debug!("Connection is now {other:?}"),
                        None => connection_open = false,
                    }
                }
            }
        }

        self.dispose();
    }
}

impl<L, T, R, O> Drop for Synchronizer<L, T, R, O>
where
    L: LocationService,
    T: Transport,
    R: GoalApi + 'static,
    O: SyncObserver,
{
    fn drop(&mut self) {
        self.dispose();
    }
}
