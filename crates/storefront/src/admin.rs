//! Admin session guard.
//!
//! Decides whether the current session belongs to an admin. Every step is
//! bounded in time, and a missing or unanswered step always resolves to
//! [`AdminStatus::Denied`].
//!
//! # Architecture
//!
//! - A full resolution reads the session (3 s bound) and then looks the
//!   session email up in the `admin_whitelist` table (2 s bound), the whole
//!   chain raced against a 5 s watchdog
//! - The chain and the watchdog write into a single-assignment verdict; the
//!   first write wins and the loser's write is dropped. A chain that loses is
//!   abandoned, not cancelled
//! - Only one resolution or re-check runs at a time; a trigger arriving while
//!   one is in flight is dropped
//! - `SIGNED_IN` schedules a debounced allow-list re-check, `SIGNED_OUT`
//!   denies immediately. A generation counter makes any check that was in
//!   flight during a sign-out commit nothing
//! - Leaving `Granted` empties the shared order list in the same call that
//!   publishes the new state

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use secrecy::SecretString;
use serde_json::json;
use soltan_core::{Email, Order};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::collection::SharedVec;
use crate::config::SyncTimings;
use crate::error::{clear_sentry_user, set_sentry_user};
use crate::gateway::{AuthEvent, AuthEventKind, Gateway, GatewayError, Query, Session, Table};
use crate::storage::{self, Storage, keys};

/// Where the privilege decision stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminStatus {
    #[default]
    Unresolved,
    Resolving,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminState {
    pub status: AdminStatus,
    /// A full resolution has not committed yet.
    pub loading: bool,
}

impl Default for AdminState {
    fn default() -> Self {
        Self {
            status: AdminStatus::Unresolved,
            loading: true,
        }
    }
}

impl AdminState {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.status == AdminStatus::Granted
    }

    /// Whether the order feed should be live.
    #[must_use]
    pub fn feed_active(&self) -> bool {
        !self.loading && self.is_admin()
    }
}

/// Single-assignment cell: the first [`settle`](Verdict::settle) wins.
struct Verdict {
    settled: AtomicBool,
    value: Mutex<Option<AdminStatus>>,
    ready: Notify,
}

impl Verdict {
    fn new() -> Self {
        Self {
            settled: AtomicBool::new(false),
            value: Mutex::new(None),
            ready: Notify::new(),
        }
    }

    /// Record `status` unless a verdict already exists. Returns whether this
    /// call decided the outcome.
    fn settle(&self, status: AdminStatus) -> bool {
        if self.settled.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        self.ready.notify_one();
        true
    }

    fn get(&self) -> Option<AdminStatus> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait(&self) -> AdminStatus {
        loop {
            if let Some(status) = self.get() {
                return status;
            }
            self.ready.notified().await;
        }
    }
}

/// Releases the single-flight flag when the owning check ends, including
/// when its task is aborted.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::AcqRel)).then_some(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Commits the outcome of a full resolution when it ends, including when the
/// caller stops polling it midway. An undecided resolution commits `Denied`.
struct Resolution<'a> {
    inner: &'a AdminInner,
    generation: u64,
    verdict: Arc<Verdict>,
    watchdog: JoinHandle<()>,
}

impl Drop for Resolution<'_> {
    fn drop(&mut self) {
        self.watchdog.abort();
        if self.verdict.settle(AdminStatus::Denied) {
            debug!("Admin resolution abandoned before a verdict");
        }
        let status = self.verdict.get().unwrap_or(AdminStatus::Denied);
        self.inner.commit_if_current(self.generation, status);
    }
}

/// Tracks admin privilege for the current session.
#[derive(Clone)]
pub struct AdminGuard {
    inner: Arc<AdminInner>,
}

struct AdminInner {
    gateway: Arc<dyn Gateway>,
    session_storage: Arc<dyn Storage>,
    orders: SharedVec<Order>,
    timings: SyncTimings,
    state: watch::Sender<AdminState>,
    in_flight: AtomicBool,
    generation: AtomicU64,
    pending_recheck: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AdminGuard {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn Gateway>,
        session_storage: Arc<dyn Storage>,
        orders: SharedVec<Order>,
        timings: SyncTimings,
    ) -> Self {
        let (state, _) = watch::channel(AdminState::default());
        Self {
            inner: Arc::new(AdminInner {
                gateway,
                session_storage,
                orders,
                timings,
                state,
                in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                pending_recheck: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    // =========================================================================
    // Observers
    // =========================================================================

    #[must_use]
    pub fn state(&self) -> AdminState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.state().is_admin()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AdminState> {
        self.inner.state.subscribe()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Run the initial full resolution.
    pub async fn initialize(&self) -> AdminStatus {
        self.resolve().await
    }

    /// Full resolution: session, then allow-list, under the watchdog.
    ///
    /// Returns the committed status, or the current one if another check was
    /// already in flight.
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> AdminStatus {
        let Some(_flight) = InFlight::acquire(&self.inner.in_flight) else {
            debug!("Admin resolution already in flight");
            return self.state().status;
        };
        let generation = self.inner.generation.load(Ordering::Acquire);
        self.inner.state.send_modify(|state| {
            state.status = AdminStatus::Resolving;
            state.loading = true;
        });

        let verdict = Arc::new(Verdict::new());

        // Detached on purpose: once the watchdog wins, the chain's late
        // result is dropped by the verdict.
        let chain = {
            let inner = Arc::clone(&self.inner);
            let verdict = Arc::clone(&verdict);
            tokio::spawn(async move {
                let status = inner.resolution_chain().await;
                if !verdict.settle(status) {
                    debug!(?status, "Admin resolution finished after the watchdog");
                }
            })
        };
        drop(chain);

        let watchdog = {
            let verdict = Arc::clone(&verdict);
            let limit = self.inner.timings.watchdog;
            tokio::spawn(async move {
                sleep(limit).await;
                if verdict.settle(AdminStatus::Denied) {
                    warn!(?limit, "Admin resolution timed out");
                }
            })
        };

        let commit = Resolution {
            inner: &self.inner,
            generation,
            verdict: Arc::clone(&verdict),
            watchdog,
        };
        let status = verdict.wait().await;
        drop(commit);
        status
    }

    /// Look `email` up in the allow-list again, without the watchdog.
    #[instrument(skip(self))]
    pub async fn recheck(&self, email: &str) -> Option<AdminStatus> {
        let Some(_flight) = InFlight::acquire(&self.inner.in_flight) else {
            debug!("Admin re-check skipped, another check is in flight");
            return None;
        };
        let generation = self.inner.generation.load(Ordering::Acquire);
        let status = if self.inner.check_allowlist(email).await {
            AdminStatus::Granted
        } else {
            AdminStatus::Denied
        };
        self.inner.commit_if_current(generation, status);
        Some(status)
    }

    // =========================================================================
    // Auth events
    // =========================================================================

    /// Start reacting to auth state changes. Events emitted after this call
    /// returns are seen.
    pub fn listen_for_auth_events(&self) {
        let mut events = self.inner.gateway.on_auth_state_change();
        let guard = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => guard.handle_auth_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed auth events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.inner.tasks().push(task);
    }

    /// React to one auth event.
    pub fn handle_auth_event(&self, event: &AuthEvent) {
        match event.kind {
            AuthEventKind::SignedIn => {
                let Some(email) = event.session.as_ref().and_then(Session::email) else {
                    return;
                };
                self.schedule_recheck(email.to_owned());
            }
            AuthEventKind::SignedOut => {
                self.inner.cancel_pending_recheck();
                self.inner.revoke();
            }
            AuthEventKind::InitialSession
            | AuthEventKind::TokenRefreshed
            | AuthEventKind::UserUpdated => {}
        }
    }

    /// Replace any pending re-check with one that runs after the debounce.
    fn schedule_recheck(&self, email: String) {
        let guard = self.clone();
        let delay = self.inner.timings.signin_debounce;
        let task = tokio::spawn(async move {
            sleep(delay).await;
            guard.recheck(&email).await;
        });
        let previous = self.inner.pending_recheck().replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    // =========================================================================
    // Sign-in / sign-out
    // =========================================================================

    /// Sign in with email and password. Privilege follows through the
    /// resulting `SIGNED_IN` event.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when the credentials are refused or the
    /// service cannot be reached.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn sign_in(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, GatewayError> {
        let session = self.inner.gateway.sign_in(email, password).await?;
        info!(user_id = %session.user.id, "Signed in");
        set_sentry_user(&session.user.id, session.email());
        Ok(session)
    }

    /// Sign out remotely, then drop privilege locally without waiting for the
    /// auth event.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Err(e) = self.inner.gateway.sign_out().await {
            warn!(error = %e, "Remote sign-out failed");
        }
        self.inner.cancel_pending_recheck();
        self.inner.revoke();
    }

    // =========================================================================
    // Session marker
    // =========================================================================

    /// Keep the session marker present while granted, refreshed on every
    /// heartbeat, and absent otherwise.
    pub fn maintain_session_marker(&self) {
        let inner = Arc::clone(&self.inner);
        let mut state = self.inner.state.subscribe();
        let task = tokio::spawn(async move {
            loop {
                let granted = state.borrow_and_update().is_admin();
                if granted {
                    storage::save_json(
                        &*inner.session_storage,
                        keys::ADMIN_SESSION,
                        &json!({ "timestamp": Utc::now().timestamp_millis() }),
                    );
                    tokio::select! {
                        changed = state.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        () = sleep(inner.timings.marker_heartbeat) => {}
                    }
                } else {
                    storage::remove_key(&*inner.session_storage, keys::ADMIN_SESSION);
                    if state.changed().await.is_err() {
                        break;
                    }
                }
            }
        });
        self.inner.tasks().push(task);
    }

    /// Stop background tasks and any pending re-check.
    pub fn shutdown(&self) {
        self.inner.cancel_pending_recheck();
        for task in self.inner.tasks().drain(..) {
            task.abort();
        }
    }
}

impl AdminInner {
    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_recheck(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending_recheck
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_pending_recheck(&self) {
        if let Some(task) = self.pending_recheck().take() {
            task.abort();
        }
    }

    async fn resolution_chain(&self) -> AdminStatus {
        let session = match timeout(self.timings.session_timeout, self.gateway.get_session()).await
        {
            Ok(Ok(Some(session))) => session,
            Ok(Ok(None)) => {
                debug!("No session");
                return AdminStatus::Denied;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Session lookup failed");
                return AdminStatus::Denied;
            }
            Err(_) => {
                warn!(limit = ?self.timings.session_timeout, "Session lookup timed out");
                return AdminStatus::Denied;
            }
        };
        let Some(email) = session.email() else {
            debug!("Session has no email");
            return AdminStatus::Denied;
        };

        if self.check_allowlist(email).await {
            AdminStatus::Granted
        } else {
            AdminStatus::Denied
        }
    }

    /// Whether `email` is on the allow-list. Errors and timeouts count as no.
    async fn check_allowlist(&self, email: &str) -> bool {
        let query = Query::new().eq("email", email).limit(1);
        match timeout(
            self.timings.allowlist_timeout,
            self.gateway.query(Table::AdminWhitelist, query),
        )
        .await
        {
            Ok(Ok(rows)) => rows
                .iter()
                .any(|row| row.get("email").and_then(|v| v.as_str()) == Some(email)),
            Ok(Err(e)) => {
                warn!(error = %e, "Allow-list lookup failed");
                false
            }
            Err(_) => {
                warn!(limit = ?self.timings.allowlist_timeout, "Allow-list lookup timed out");
                false
            }
        }
    }

    fn commit_if_current(&self, generation: u64, status: AdminStatus) {
        if self.generation.load(Ordering::Acquire) == generation {
            self.commit(status);
        } else {
            debug!(?status, "Dropping admin verdict from before a sign-out");
        }
    }

    /// Deny now and invalidate every check still in flight.
    fn revoke(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        clear_sentry_user();
        self.commit(AdminStatus::Denied);
    }

    /// Publish `status` and finish loading. The order list is emptied right
    /// after the state changes so no refill can slip in between.
    fn commit(&self, status: AdminStatus) {
        let mut previous = AdminStatus::Unresolved;
        self.state.send_modify(|state| {
            previous = state.status;
            state.status = status;
            state.loading = false;
        });

        if status == AdminStatus::Granted {
            if previous != AdminStatus::Granted {
                info!("Admin access granted");
            }
        } else {
            self.orders.clear();
            if previous == AdminStatus::Granted {
                info!(?status, "Admin access revoked");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use soltan_core::{CustomerDetails, OrderId};

    use super::*;
    use crate::gateway::{MemoryGateway, SessionUser};
    use crate::storage::MemoryStorage;

    const OWNER: &str = "owner@soltan.shop";

    struct Fixture {
        gateway: Arc<MemoryGateway>,
        session_storage: Arc<MemoryStorage>,
        orders: SharedVec<Order>,
        guard: AdminGuard,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.add_account(OWNER, "correct horse");
        gateway.seed(Table::AdminWhitelist, vec![json!({"email": OWNER})]);
        let session_storage = Arc::new(MemoryStorage::new());
        let orders = SharedVec::default();
        let guard = AdminGuard::new(
            gateway.clone(),
            session_storage.clone(),
            orders.clone(),
            SyncTimings::default(),
        );
        Fixture {
            gateway,
            session_storage,
            orders,
            guard,
        }
    }

    fn signed_in(email: &str) -> AuthEvent {
        AuthEvent {
            kind: AuthEventKind::SignedIn,
            session: Some(Session {
                access_token: SecretString::from("token".to_owned()),
                user: SessionUser {
                    id: "user-1".to_owned(),
                    email: Some(email.to_owned()),
                },
            }),
        }
    }

    fn order() -> Order {
        Order::place(
            OrderId::new("ORD-1-AAAAAA"),
            &CustomerDetails::new("Jo", "1", "Home"),
            vec![],
            Utc::now(),
        )
    }

    async fn sign_in(f: &Fixture) {
        f.gateway
            .sign_in(
                &Email::parse(OWNER).unwrap(),
                &SecretString::from("correct horse".to_owned()),
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_verdict_first_write_wins() {
        let verdict = Verdict::new();
        assert!(verdict.settle(AdminStatus::Granted));
        assert!(!verdict.settle(AdminStatus::Denied));
        assert_eq!(verdict.get(), Some(AdminStatus::Granted));
    }

    #[test]
    fn test_initial_state() {
        let f = fixture();
        let state = f.guard.state();
        assert_eq!(state.status, AdminStatus::Unresolved);
        assert!(state.loading);
        assert!(!state.feed_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_session_is_denied() {
        let f = fixture();
        assert_eq!(f.guard.initialize().await, AdminStatus::Denied);
        assert!(!f.guard.is_loading());
        assert_eq!(f.gateway.query_count(Table::AdminWhitelist), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allowlisted_session_is_granted() {
        let f = fixture();
        sign_in(&f).await;
        assert_eq!(f.guard.initialize().await, AdminStatus::Granted);
        assert!(f.guard.state().feed_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_session_denied_within_watchdog() {
        let f = fixture();
        sign_in(&f).await;
        f.gateway.set_session_delay(Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        assert_eq!(f.guard.initialize().await, AdminStatus::Denied);
        assert!(started.elapsed() <= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_resolution_still_settles() {
        let f = fixture();
        sign_in(&f).await;
        f.gateway.set_session_delay(Duration::from_secs(10));

        let abandoned = tokio::time::timeout(Duration::from_secs(1), f.guard.resolve()).await;
        assert!(abandoned.is_err());
        let state = f.guard.state();
        assert_eq!(state.status, AdminStatus::Denied);
        assert!(!state.loading);

        f.gateway.set_session_delay(Duration::ZERO);
        assert_eq!(f.guard.resolve().await, AdminStatus::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_allowlist_is_denied() {
        let f = fixture();
        sign_in(&f).await;
        f.gateway
            .set_query_delay(Table::AdminWhitelist, Duration::from_secs(4));
        assert_eq!(f.guard.initialize().await, AdminStatus::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_beats_slow_chain() {
        let f = fixture();
        sign_in(&f).await;
        let timings = SyncTimings {
            watchdog: Duration::from_secs(1),
            ..SyncTimings::default()
        };
        f.gateway.set_session_delay(Duration::from_millis(1_500));
        let guard = AdminGuard::new(
            f.gateway.clone(),
            f.session_storage.clone(),
            f.orders.clone(),
            timings,
        );

        assert_eq!(guard.initialize().await, AdminStatus::Denied);
        // The chain would have granted; its late verdict must not land.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(guard.state().status, AdminStatus::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolution_is_dropped() {
        let f = fixture();
        sign_in(&f).await;
        f.gateway
            .set_query_delay(Table::AdminWhitelist, Duration::from_millis(500));

        let (first, second) = tokio::join!(f.guard.resolve(), f.guard.resolve());
        assert_eq!(first, AdminStatus::Granted);
        assert_eq!(second, AdminStatus::Resolving);
        assert_eq!(f.gateway.query_count(Table::AdminWhitelist), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_in_burst_is_debounced() {
        let f = fixture();
        f.guard.initialize().await;

        for _ in 0..3 {
            f.guard.handle_auth_event(&signed_in(OWNER));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(f.gateway.query_count(Table::AdminWhitelist), 1);
        assert!(f.guard.is_admin());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_out_clears_orders_immediately() {
        let f = fixture();
        sign_in(&f).await;
        f.guard.initialize().await;
        f.orders.replace(vec![order()]);

        f.guard.handle_auth_event(&AuthEvent {
            kind: AuthEventKind::SignedOut,
            session: None,
        });
        assert_eq!(f.guard.state().status, AdminStatus::Denied);
        assert!(f.orders.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_cancels_pending_recheck() {
        let f = fixture();
        f.guard.initialize().await;
        f.guard.handle_auth_event(&signed_in(OWNER));
        f.guard.handle_auth_event(&AuthEvent {
            kind: AuthEventKind::SignedOut,
            session: None,
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.gateway.query_count(Table::AdminWhitelist), 0);
        assert!(!f.guard.is_admin());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_events_are_ignored() {
        let f = fixture();
        f.guard.initialize().await;
        f.guard.handle_auth_event(&AuthEvent {
            kind: AuthEventKind::TokenRefreshed,
            session: None,
        });
        assert_eq!(f.guard.state().status, AdminStatus::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_denies_without_event() {
        let f = fixture();
        sign_in(&f).await;
        f.guard.initialize().await;
        f.orders.replace(vec![order()]);

        f.guard.logout().await;
        assert!(!f.guard.is_admin());
        assert!(f.orders.is_empty());
        assert!(f.gateway.get_session().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_marker_follows_privilege() {
        let f = fixture();
        f.guard.maintain_session_marker();
        sign_in(&f).await;
        f.guard.initialize().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.session_storage.get(keys::ADMIN_SESSION).unwrap().is_some());

        f.guard.logout().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.session_storage.get(keys::ADMIN_SESSION).unwrap().is_none());
        f.guard.shutdown();
    }
}
