//! Remote data service boundary.
//!
//! # Architecture
//!
//! - The remote service is the source of truth for products, orders and the
//!   admin allow-list; everything held locally is a cache
//! - Every operation is a suspension point with no latency bound; callers add
//!   their own timeouts where they need one
//! - Rows cross the boundary as untyped JSON objects in the remote naming;
//!   [`crate::schema`] translates them to the local types
//!
//! # Implementations
//!
//! - [`MemoryGateway`] - in-process tables with realtime channels, used by
//!   tests and local demos
//! - [`RestGateway`] - HTTP client for a `PostgREST`/`GoTrue` style service,
//!   with a polling change feed for realtime

mod memory;
mod rest;

pub use memory::MemoryGateway;
pub use rest::RestGateway;

use std::fmt;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use soltan_core::Email;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// A row as exchanged with the remote service (a JSON object).
pub type Row = Value;

/// Errors that can occur when talking to the remote service.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Remote service returned {status}: {message}")]
    Status { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The operation needs a signed-in session.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Sign-in was refused.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The service could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the payload.
    #[error("Rejected: {0}")]
    Rejected(String),
}

// =============================================================================
// Tables and queries
// =============================================================================

/// Remote tables this client reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Products,
    Orders,
    AdminWhitelist,
}

impl Table {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Orders => "orders",
            Self::AdminWhitelist => "admin_whitelist",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `row` satisfies this filter.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub column: String,
    pub direction: Direction,
}

/// A table read: equality filters, optional ordering and row cap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<SortOrder>,
    pub limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(SortOrder {
            column: column.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// =============================================================================
// Realtime
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A pushed row change. `new` is set for inserts and updates, `old` for
/// updates and deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub new: Option<Row>,
    pub old: Option<Row>,
}

impl ChangeEvent {
    #[must_use]
    pub const fn insert(row: Row) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    #[must_use]
    pub const fn update(old: Row, new: Row) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(new),
            old: Some(old),
        }
    }

    #[must_use]
    pub const fn delete(old: Row) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }
}

/// Handle identifying one realtime subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open change stream on one table.
///
/// The stream ends (the receiver yields `None`) once the subscription is
/// released with [`Gateway::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub table: Table,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

// =============================================================================
// Auth
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub email: Option<String>,
}

/// An authenticated session. The token is redacted from `Debug` output.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub user: SessionUser,
}

impl Session {
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

// =============================================================================
// Gateway contract
// =============================================================================

/// Operation set of the remote persistence, auth and realtime service.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Read rows from `table`.
    async fn query(&self, table: Table, query: Query) -> Result<Vec<Row>, GatewayError>;

    /// Insert rows and return them as stored (with generated columns).
    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, GatewayError>;

    /// Merge `patch` into every row matching all `filters`.
    async fn update(
        &self,
        table: Table,
        filters: Vec<Filter>,
        patch: Row,
    ) -> Result<(), GatewayError>;

    /// Delete every row matching all `filters`.
    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<(), GatewayError>;

    /// Open a change stream for inserts, updates and deletes on `table`.
    async fn subscribe(&self, table: Table) -> Result<Subscription, GatewayError>;

    /// Release a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId);

    async fn sign_in(&self, email: &Email, password: &SecretString)
    -> Result<Session, GatewayError>;

    async fn sign_out(&self) -> Result<(), GatewayError>;

    async fn get_session(&self) -> Result<Option<Session>, GatewayError>;

    /// Receive auth state changes from now on. Dropping the receiver
    /// unsubscribes.
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_filter_matches_exact_value() {
        let row = json!({"email": "owner@soltan.shop", "id": 1});
        assert!(Filter::eq("email", "owner@soltan.shop").matches(&row));
        assert!(!Filter::eq("email", "Owner@soltan.shop").matches(&row));
        assert!(Filter::eq("id", 1).matches(&row));
        assert!(!Filter::eq("missing", 1).matches(&row));
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new()
            .eq("status", "pending")
            .order_by("created_at", Direction::Descending)
            .limit(100);
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.limit, Some(100));
        assert_eq!(
            query.order.map(|o| o.direction),
            Some(Direction::Descending)
        );
    }

    #[test]
    fn test_table_names() {
        assert_eq!(Table::Products.to_string(), "products");
        assert_eq!(Table::AdminWhitelist.name(), "admin_whitelist");
    }
}
