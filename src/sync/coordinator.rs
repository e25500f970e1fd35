use kursiyer_common::config::AppConfig;
use kursiyer_common::{debug, error, info, warn};
use kursiyer_core::fees::{self, FeeSchedule, Report, Totals};
use kursiyer_core::notify::{Notification, NotificationCenter};
use kursiyer_core::session::{Rebind, SessionBinding};
use kursiyer_core::snapshot::{SchoolSnapshotStore, SchoolsSnapshot, SnapshotOrigin};
use kursiyer_core::{Candidates, ClassKey, School, SyncError};
use kursiyer_storage::DocumentStore;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::dispatcher::MutationDispatcher;
use super::events::{Command, FeedUpdate, SyncEvent};
use super::feed::ChangeFeedAdapter;
use crate::auth::{AuthService, AuthState};

/// Writes failing back to back before the coordinator warns that local counts may have
/// drifted from the store.
const WRITE_FAILURE_WARN_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    Loading,
    Ready,
    /// Initial load failed. Only `reload` leaves this state.
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub schools_path: String,
    pub notification_capacity: usize,
    pub fees: FeeSchedule,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            schools_path: "schools".to_string(),
            notification_capacity: 64,
            fees: FeeSchedule::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, SyncError> {
        Ok(Self {
            schools_path: config.schools_path.clone(),
            notification_capacity: config.notification_capacity,
            fees: FeeSchedule::default().with_overrides(&config.fees)?,
        })
    }
}

/// Cloneable sender for commands into a running coordinator.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl SyncHandle {
    fn send(&self, command: Command) -> bool {
        self.tx.send(SyncEvent::Command(command)).is_ok()
    }

    pub fn login(&self, school_id: impl Into<String>) -> bool {
        self.send(Command::Login {
            school_id: school_id.into(),
        })
    }

    pub fn logout(&self) -> bool {
        self.send(Command::Logout)
    }

    pub fn change_candidates(&self, school_id: impl Into<String>, class: ClassKey, delta: i64) -> bool {
        self.send(Command::ChangeCandidates {
            school_id: school_id.into(),
            class,
            delta,
        })
    }

    pub fn reload(&self) -> bool {
        self.send(Command::Reload)
    }

    pub fn dismiss(&self, notification_id: u64) -> bool {
        self.send(Command::Dismiss(notification_id))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }
}

/// Sole owner of the school collection and the session. Every reaction (auth change, feed
/// delivery, fetch or write completion, user command) runs here, one at a time.
pub struct SyncCoordinator {
    auth: Arc<dyn AuthService>,
    auth_rx: watch::Receiver<AuthState>,
    auth_open: bool,
    schedule: FeeSchedule,
    snapshots: SchoolSnapshotStore,
    session: SessionBinding,
    notifications: NotificationCenter,
    view_tx: watch::Sender<ViewState>,
    feed: ChangeFeedAdapter,
    dispatcher: MutationDispatcher,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    events_rx: mpsc::UnboundedReceiver<SyncEvent>,
    epoch: u64,
    signed_in: bool,
    running: bool,
    pending_fetches: usize,
    pending_writes: usize,
    consecutive_write_failures: u32,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthService>,
        config: CoordinatorConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(ViewState::Loading);
        let mut auth_rx = auth.watch();
        // The current auth state is handled by the first `step`.
        auth_rx.mark_changed();

        Self {
            feed: ChangeFeedAdapter::new(Arc::clone(&store), config.schools_path.clone(), events_tx.clone()),
            dispatcher: MutationDispatcher::new(store, config.schools_path.clone(), events_tx.clone()),
            auth,
            auth_rx,
            auth_open: true,
            schedule: config.fees,
            snapshots: SchoolSnapshotStore::new(),
            session: SessionBinding::new(),
            notifications: NotificationCenter::new(config.notification_capacity),
            view_tx,
            events_tx,
            events_rx,
            epoch: 0,
            signed_in: false,
            running: true,
            pending_fetches: 0,
            pending_writes: 0,
            consecutive_write_failures: 0,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            tx: self.events_tx.clone(),
        }
    }

    /// Processes the next auth change or queued event, waiting for one if needed. Returns
    /// false once the coordinator has shut down.
    pub async fn step(&mut self) -> bool {
        if !self.running {
            return false;
        }
        tokio::select! {
            biased;
            changed = self.auth_rx.changed(), if self.auth_open => match changed {
                Ok(()) => {
                    let state = self.auth_rx.borrow_and_update().clone();
                    self.on_auth_changed(state);
                }
                Err(_) => {
                    warn!("auth service went away; keeping current state");
                    self.auth_open = false;
                }
            },
            event = self.events_rx.recv() => match event {
                Some(event) => self.handle_event(event),
                None => self.running = false,
            },
        }
        self.running
    }

    /// Handles everything already queued without waiting.
    pub fn drain(&mut self) {
        while self.running {
            if self.auth_open && self.auth_rx.has_changed().unwrap_or(false) {
                let state = self.auth_rx.borrow_and_update().clone();
                self.on_auth_changed(state);
                continue;
            }
            match self.events_rx.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => break,
            }
        }
    }

    /// Runs until no fetch or write is outstanding and the queue is empty.
    pub async fn settle(&mut self) {
        loop {
            self.drain();
            if !self.running || (self.pending_fetches == 0 && self.pending_writes == 0) {
                break;
            }
            if !self.step().await {
                break;
            }
        }
    }

    pub async fn run(mut self) {
        info!("sync coordinator started");
        while self.step().await {}
        self.feed.stop();
        info!("sync coordinator stopped");
    }

    pub fn on_auth_changed(&mut self, state: AuthState) {
        match state {
            AuthState::SignedIn { email } => {
                info!("auth user {} signed in, starting sync", email);
                self.start_session();
            }
            AuthState::SignedOut => {
                if !self.signed_in {
                    return;
                }
                info!("auth user signed out, clearing state");
                self.epoch += 1;
                self.signed_in = false;
                self.feed.stop();
                self.session.logout();
                self.snapshots.replace_all(Vec::new(), SnapshotOrigin::Cleared);
                self.view_tx.send_replace(ViewState::Loading);
            }
        }
    }

    fn start_session(&mut self) {
        self.epoch += 1;
        self.signed_in = true;
        self.view_tx.send_replace(ViewState::Loading);

        self.pending_fetches += 1;
        self.feed.fetch_initial(self.epoch);
        if let Err(e) = self.feed.start(self.epoch) {
            self.report_error(&e);
        }
    }

    pub fn handle_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Feed { epoch, update } => self.on_feed(epoch, update),
            SyncEvent::InitialFetch { epoch, result } => self.on_initial_fetch(epoch, result),
            SyncEvent::WriteCompleted {
                school_id,
                class,
                result,
            } => self.on_write_completed(&school_id, class, result),
            SyncEvent::Command(command) => self.on_command(command),
        }
    }

    fn on_feed(&mut self, epoch: u64, update: FeedUpdate) {
        if epoch != self.epoch || !self.signed_in {
            debug!("dropping feed delivery from epoch {} (current {})", epoch, self.epoch);
            return;
        }
        match update {
            FeedUpdate::Schools(schools) => {
                // Only data supersedes the initial fetch; a feed error leaves it in play.
                self.feed.mark_delivered();
                self.apply_collection(schools, SnapshotOrigin::Feed);
                self.view_tx.send_if_modified(|view| {
                    if *view == ViewState::Loading {
                        *view = ViewState::Ready;
                        true
                    } else {
                        false
                    }
                });
            }
            FeedUpdate::Error(e) => self.report_error(&e),
        }
    }

    fn on_initial_fetch(&mut self, epoch: u64, result: Result<Vec<School>, SyncError>) {
        self.pending_fetches = self.pending_fetches.saturating_sub(1);
        if epoch != self.epoch || !self.signed_in {
            debug!("dropping initial fetch from epoch {} (current {})", epoch, self.epoch);
            return;
        }
        if !self.feed.accepts_initial_fetch() {
            return;
        }
        match result {
            Ok(schools) => {
                self.apply_collection(schools, SnapshotOrigin::InitialFetch);
                self.view_tx.send_replace(ViewState::Ready);
            }
            Err(e) => self.report_error(&e),
        }
    }

    fn on_write_completed(&mut self, school_id: &str, class: ClassKey, result: Result<(), SyncError>) {
        self.pending_writes = self.pending_writes.saturating_sub(1);
        match result {
            Ok(()) => {
                self.consecutive_write_failures = 0;
                debug!("persisted {} for {}", class, school_id);
            }
            Err(e) => {
                self.consecutive_write_failures += 1;
                self.report_error(&e);
                if self.consecutive_write_failures >= WRITE_FAILURE_WARN_THRESHOLD {
                    warn!(
                        "{} candidate writes failed in a row; local counts may differ from the store",
                        self.consecutive_write_failures
                    );
                }
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        let result = match command {
            Command::Login { school_id } => self.login(&school_id).map(|_| ()),
            Command::Logout => {
                self.logout();
                Ok(())
            }
            Command::ChangeCandidates {
                school_id,
                class,
                delta,
            } => self
                .request_candidate_change(&school_id, class, delta)
                .map(|_| ()),
            Command::Reload => {
                self.reload();
                Ok(())
            }
            Command::Dismiss(id) => {
                self.dismiss(id);
                Ok(())
            }
            Command::Shutdown => {
                self.running = false;
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!("command rejected: {}", e);
        }
    }

    fn apply_collection(&mut self, schools: Vec<School>, origin: SnapshotOrigin) {
        let snapshot = self.snapshots.replace_all(schools, origin);
        self.rebind_session(&snapshot);
    }

    fn rebind_session(&mut self, snapshot: &SchoolsSnapshot) {
        if self.session.rebind(snapshot) == Rebind::Retained {
            debug!("active school missing from snapshot {}", snapshot.seq);
        }
    }

    /// Blocking errors fail the view; the rest become dismissible notifications.
    fn report_error(&mut self, e: &SyncError) {
        if e.is_blocking() {
            error!("{}", e);
            self.view_tx.send_replace(ViewState::Failed {
                message: e.user_message().to_string(),
            });
        } else {
            warn!("{}", e);
            self.notifications.push_error(e);
        }
    }

    /// Selects the school to act as. Validation failures become notifications.
    pub fn login(&mut self, school_id: &str) -> Result<School, SyncError> {
        let snapshot = self.snapshots.snapshot();
        match self.session.login(&snapshot, school_id) {
            Ok(school) => {
                info!("logged in as {} ({})", school.name, school.id);
                Ok(school)
            }
            Err(e) => {
                self.report_error(&e);
                Err(e)
            }
        }
    }

    /// Clears the session and signs out of the auth service.
    pub fn logout(&mut self) {
        if let Some(previous) = self.session.logout() {
            info!("logged out of {}", previous.id);
        }
        self.auth.sign_out();
    }

    pub fn request_candidate_change(
        &mut self,
        school_id: &str,
        class: ClassKey,
        delta: i64,
    ) -> Result<Candidates, SyncError> {
        match self
            .dispatcher
            .request_candidate_change(&mut self.snapshots, school_id, class, delta)
        {
            Ok(candidates) => {
                self.pending_writes += 1;
                let snapshot = self.snapshots.snapshot();
                self.rebind_session(&snapshot);
                Ok(candidates)
            }
            Err(e) => {
                self.report_error(&e);
                Err(e)
            }
        }
    }

    /// Restarts the subscription and the initial fetch under a new epoch.
    pub fn reload(&mut self) {
        if !self.signed_in {
            debug!("reload ignored while signed out");
            return;
        }
        info!("reloading schools");
        self.start_session();
    }

    pub fn dismiss(&mut self, notification_id: u64) -> bool {
        self.notifications.dismiss(notification_id)
    }

    pub fn snapshot(&self) -> Arc<SchoolsSnapshot> {
        self.snapshots.snapshot()
    }

    pub fn session(&self) -> Option<School> {
        self.session.current()
    }

    pub fn view(&self) -> ViewState {
        self.view_tx.borrow().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.current()
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Totals for the logged-in school.
    pub fn session_totals(&self) -> Option<Totals> {
        self.session
            .current()
            .map(|school| fees::aggregate(&school.candidates, &self.schedule))
    }

    pub fn report(&self) -> Report {
        fees::report(self.snapshots.snapshot().schools(), &self.schedule)
    }

    pub fn pending_writes(&self) -> usize {
        self.pending_writes
    }

    pub fn consecutive_write_failures(&self) -> u32 {
        self.consecutive_write_failures
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<SchoolsSnapshot>> {
        self.snapshots.watch()
    }

    pub fn watch_session(&self) -> watch::Receiver<Option<School>> {
        self.session.watch()
    }

    pub fn watch_view(&self) -> watch::Receiver<ViewState> {
        self.view_tx.subscribe()
    }

    pub fn watch_notifications(&self) -> watch::Receiver<VecDeque<Notification>> {
        self.notifications.watch()
    }
}
