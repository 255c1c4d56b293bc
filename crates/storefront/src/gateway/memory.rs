//! In-process gateway.
//!
//! Keeps every table as a vector of JSON rows behind a mutex and pushes
//! change events to subscribers synchronously with each write. Failure and
//! latency can be injected per table so callers can exercise their fallback
//! paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use soltan_core::Email;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::{
    AuthEvent, AuthEventKind, ChangeEvent, Direction, Filter, Gateway, GatewayError, Query, Row,
    Session, SessionUser, Subscription, SubscriptionId, Table,
};

const AUTH_EVENT_CAPACITY: usize = 64;

/// Gateway backed by in-memory tables.
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    auth_events: broadcast::Sender<AuthEvent>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<Table, Vec<Row>>,
    next_id: i64,
    subscribers: HashMap<SubscriptionId, (Table, mpsc::UnboundedSender<ChangeEvent>)>,
    accounts: HashMap<String, (String, SecretString)>,
    session: Option<Session>,
    failing: HashSet<Table>,
    query_delays: HashMap<Table, Duration>,
    session_delay: Option<Duration>,
    query_counts: HashMap<Table, usize>,
    unsubscribe_count: usize,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
            auth_events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Seeding and fault injection
    // =========================================================================

    /// Insert rows without notifying subscribers.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Row>) {
        let mut state = self.lock();
        for row in rows {
            let row = state.stamp(table, row);
            state.tables.entry(table).or_default().push(row);
        }
    }

    /// Register an account that can sign in.
    pub fn add_account(&self, email: &str, password: &str) {
        let user_id = Uuid::new_v4().to_string();
        self.lock().accounts.insert(
            email.to_owned(),
            (user_id, SecretString::from(password.to_owned())),
        );
    }

    /// Make every table operation on `table` fail until cleared.
    pub fn set_failing(&self, table: Table, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(table);
        } else {
            state.failing.remove(&table);
        }
    }

    /// Delay every query on `table` by `delay`.
    pub fn set_query_delay(&self, table: Table, delay: Duration) {
        self.lock().query_delays.insert(table, delay);
    }

    /// Delay `get_session` by `delay`.
    pub fn set_session_delay(&self, delay: Duration) {
        self.lock().session_delay = Some(delay);
    }

    /// Push a raw change event to the subscribers of `table`.
    pub fn push_change(&self, table: Table, event: ChangeEvent) {
        self.lock().notify(table, &event);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    /// Number of queries issued against `table` so far.
    #[must_use]
    pub fn query_count(&self, table: Table) -> usize {
        self.lock().query_counts.get(&table).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn subscriber_count(&self, table: Table) -> usize {
        self.lock()
            .subscribers
            .values()
            .filter(|(t, tx)| *t == table && !tx.is_closed())
            .count()
    }

    /// Number of `unsubscribe` calls that released a live subscription.
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.lock().unsubscribe_count
    }

    fn check_available(&self, table: Table) -> Result<(), GatewayError> {
        if self.lock().failing.contains(&table) {
            return Err(GatewayError::Unavailable(format!("{table} is unreachable")));
        }
        Ok(())
    }

    fn broadcast_auth(&self, kind: AuthEventKind, session: Option<Session>) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.auth_events.send(AuthEvent { kind, session });
    }
}

impl MemoryState {
    /// Fill server-generated columns.
    fn stamp(&mut self, table: Table, row: Row) -> Row {
        let Value::Object(mut fields) = row else {
            return row;
        };
        if table == Table::Products && fields.get("id").is_none_or(Value::is_null) {
            fields.insert("id".to_owned(), Value::from(self.next_id));
            self.next_id += 1;
        } else if let Some(id) = fields.get("id").and_then(Value::as_i64) {
            self.next_id = self.next_id.max(id + 1);
        }
        if table == Table::Orders && !fields.contains_key("created_at") {
            fields.insert(
                "created_at".to_owned(),
                Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        Value::Object(fields)
    }

    fn notify(&mut self, table: Table, event: &ChangeEvent) {
        self.subscribers
            .retain(|_, (t, tx)| *t != table || tx.send(event.clone()).is_ok());
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(row))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn merge(row: &Row, patch: &Row) -> Row {
    let mut fields: Map<String, Value> = row.as_object().cloned().unwrap_or_default();
    if let Some(patch) = patch.as_object() {
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
    }
    Value::Object(fields)
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn query(&self, table: Table, query: Query) -> Result<Vec<Row>, GatewayError> {
        let delay = {
            let mut state = self.lock();
            *state.query_counts.entry(table).or_default() += 1;
            state.query_delays.get(&table).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available(table)?;

        let mut rows: Vec<Row> = self
            .lock()
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, GatewayError> {
        self.check_available(table)?;
        if rows.iter().any(|row| !row.is_object()) {
            return Err(GatewayError::Rejected("rows must be JSON objects".to_owned()));
        }

        let mut state = self.lock();
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let row = state.stamp(table, row);
            state.tables.entry(table).or_default().push(row.clone());
            state.notify(table, &ChangeEvent::insert(row.clone()));
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn update(
        &self,
        table: Table,
        filters: Vec<Filter>,
        patch: Row,
    ) -> Result<(), GatewayError> {
        self.check_available(table)?;

        let mut state = self.lock();
        let mut events = Vec::new();
        if let Some(rows) = state.tables.get_mut(&table) {
            for row in rows.iter_mut().filter(|row| matches_all(row, &filters)) {
                let updated = merge(row, &patch);
                events.push(ChangeEvent::update(row.clone(), updated.clone()));
                *row = updated;
            }
        }
        for event in &events {
            state.notify(table, event);
        }
        Ok(())
    }

    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<(), GatewayError> {
        self.check_available(table)?;

        let mut state = self.lock();
        let removed: Vec<Row> = match state.tables.get_mut(&table) {
            Some(rows) => {
                let (removed, kept): (Vec<Row>, Vec<Row>) = rows
                    .drain(..)
                    .partition(|row| matches_all(row, &filters));
                *rows = kept;
                removed
            }
            None => Vec::new(),
        };
        for row in removed {
            state.notify(table, &ChangeEvent::delete(row));
        }
        Ok(())
    }

    async fn subscribe(&self, table: Table) -> Result<Subscription, GatewayError> {
        let id = SubscriptionId::new();
        let (tx, events) = mpsc::unbounded_channel();
        self.lock().subscribers.insert(id, (table, tx));
        debug!(%id, %table, "Subscribed");
        Ok(Subscription { id, table, events })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.lock();
        if state.subscribers.remove(&id).is_some() {
            state.unsubscribe_count += 1;
            debug!(%id, "Unsubscribed");
        }
    }

    async fn sign_in(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, GatewayError> {
        let session = {
            let mut state = self.lock();
            let Some((user_id, expected)) = state.accounts.get(email.as_str()) else {
                return Err(GatewayError::Auth("Invalid login credentials".to_owned()));
            };
            if expected.expose_secret() != password.expose_secret() {
                return Err(GatewayError::Auth("Invalid login credentials".to_owned()));
            }
            let session = Session {
                access_token: SecretString::from(Uuid::new_v4().to_string()),
                user: SessionUser {
                    id: user_id.clone(),
                    email: Some(email.as_str().to_owned()),
                },
            };
            state.session = Some(session.clone());
            session
        };
        self.broadcast_auth(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        self.lock().session = None;
        self.broadcast_auth(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        let delay = self.lock().session_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.lock().session.clone())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }
}
