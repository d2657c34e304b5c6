use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use tokio::{
    sync::{Mutex as AsyncMutex, oneshot},
    task::yield_now,
};

use crate::{
    ClientEvent, ConnectionHandle, ConnectionState, ConnectionTracker, Coordinate, EventHandler,
    GoalApi, GoalCheck, GoalReachedNotice, HandlerRegistry, InFlightSet, LocationService,
    PositionError, PositionResult, RequestError, ServerEvent, ServerEventKind, SyncObserver,
    Transport,
};

/// Let spawned tasks and the main loop catch up
pub async fn settle() {
    for _ in 0..50 {
        yield_now().await;
    }
}

pub struct MockTransport {
    connection: ConnectionTracker,
    handlers: HandlerRegistry,
    /// Whether a connect attempt succeeds right away
    reachable: bool,
    sent: Mutex<Vec<ClientEvent>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockTransport {
    fn new(reachable: bool) -> Self {
        Self {
            connection: ConnectionTracker::default(),
            handlers: HandlerRegistry::default(),
            reachable,
            sent: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    /// Connecting never completes unless the test says so
    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Deliver an inbound event, returns how many handlers saw it
    pub fn inject(&self, event: &ServerEvent) -> usize {
        self.handlers.dispatch(event)
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.connection.set(state);
    }

    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn connect(&self, _address: &str) -> ConnectionHandle {
        if self.connection.state() == ConnectionState::Disconnected {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connection.set(if self.reachable {
                ConnectionState::Connected
            } else {
                ConnectionState::Connecting
            });
        }
        self.connection.handle()
    }

    fn handle(&self) -> ConnectionHandle {
        self.connection.handle()
    }

    async fn send(&self, event: ClientEvent) {
        if self.connection.is_connected() {
            self.sent.lock().unwrap().push(event);
        }
    }

    fn on(&self, kind: ServerEventKind, handler: EventHandler) {
        self.handlers.register(kind, handler);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connection.set(ConnectionState::Disconnected);
        self.handlers.clear();
    }
}

pub struct MockLocation {
    fix: AsyncMutex<Option<oneshot::Receiver<PositionResult>>>,
    pub requests: Arc<AtomicUsize>,
}

impl MockLocation {
    pub fn resolved(res: PositionResult) -> Self {
        let (location, fix) = Self::pending();
        fix.send(res).ok();
        location
    }

    pub fn pending() -> (Self, oneshot::Sender<PositionResult>) {
        let (tx, rx) = oneshot::channel();
        let location = Self {
            fix: AsyncMutex::new(Some(rx)),
            requests: Arc::new(AtomicUsize::new(0)),
        };
        (location, tx)
    }
}

impl LocationService for MockLocation {
    async fn current_position(&self) -> PositionResult {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let fix = self.fix.lock().await.take();
        match fix {
            Some(fix) => fix
                .await
                .unwrap_or_else(|_| Err(PositionError::Unavailable("fix dropped".into()))),
            None => Err(PositionError::Unavailable("already requested".into())),
        }
    }
}

#[derive(Default)]
pub struct MockGoalApi {
    pub in_flight: Arc<InFlightSet>,
    /// What goal checks answer
    pub reached: bool,
    /// Goal checks never resolve on their own
    pub hold: bool,
    pub goal: Option<Coordinate>,
    pub fail_generate: bool,
    pub(crate) checks: Mutex<Vec<GoalCheck>>,
    pub(crate) outcomes: Mutex<Vec<Result<bool, RequestError>>>,
    pub(crate) generated: AtomicUsize,
}

impl MockGoalApi {
    pub fn with_goal(goal: Coordinate) -> Self {
        Self {
            goal: Some(goal),
            ..Default::default()
        }
    }

    pub fn checks(&self) -> Vec<GoalCheck> {
        self.checks.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<Result<bool, RequestError>> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

impl GoalApi for MockGoalApi {
    async fn generate_goal(&self, at: Coordinate) -> Result<Coordinate, RequestError> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        let call = self.in_flight.register();
        let res = if self.fail_generate {
            Err(RequestError::Rejected {
                status: 500,
                message: "no goals today".into(),
            })
        } else {
            Ok(self.goal.unwrap_or(at))
        };
        call.run(async move { res }).await
    }

    async fn check_goal(&self, check: GoalCheck) -> Result<bool, RequestError> {
        self.checks.lock().unwrap().push(check);
        let call = self.in_flight.register();
        let (hold, reached) = (self.hold, self.reached);
        let res = call
            .run(async move {
                if hold {
                    std::future::pending().await
                } else {
                    Ok(reached)
                }
            })
            .await;
        self.outcomes.lock().unwrap().push(res.clone());
        res
    }

    fn cancel_all(&self) {
        self.in_flight.cancel_all();
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    notices: Mutex<Vec<GoalReachedNotice>>,
    position_failures: AtomicUsize,
    fetch_failures: AtomicUsize,
}

impl RecordingObserver {
    pub fn notices(&self) -> Vec<GoalReachedNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn position_failures(&self) -> usize {
        self.position_failures.load(Ordering::SeqCst)
    }

    pub fn fetch_failures(&self) -> usize {
        self.fetch_failures.load(Ordering::SeqCst)
    }
}

impl SyncObserver for RecordingObserver {
    fn goal_reached(&self, notice: GoalReachedNotice) {
        self.notices.lock().unwrap().push(notice);
    }

    fn position_failed(&self, _why: &PositionError) {
        self.position_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn goal_fetch_failed(&self, _why: &RequestError) {
        self.fetch_failures.fetch_add(1, Ordering::SeqCst);
    }
}
