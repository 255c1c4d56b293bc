//! HTTP gateway for a `PostgREST` + `GoTrue` style service.
//!
//! - Table operations go to `<base>/rest/v1/<table>` with equality filters
//!   encoded as `column=eq.value`
//! - Password sign-in goes to `<base>/auth/v1/token?grant_type=password`
//! - The signed-in session is kept in memory only; auth events are emitted
//!   locally when this client signs in or out
//! - Realtime is a polling change feed: each subscription re-reads its table
//!   on an interval and diffs rows by `id` into insert/update/delete events

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use soltan_core::Email;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::{
    AuthEvent, AuthEventKind, ChangeEvent, Direction, Filter, Gateway, GatewayError, Query, Row,
    Session, SessionUser, Subscription, SubscriptionId, Table,
};
use crate::config::GatewayConfig;

const AUTH_EVENT_CAPACITY: usize = 64;
const ERROR_BODY_PREVIEW: usize = 200;

/// Client for the remote data service over HTTP.
#[derive(Clone)]
pub struct RestGateway {
    inner: Arc<RestGatewayInner>,
}

struct RestGatewayInner {
    client: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
    poll_interval: Duration,
    session: Mutex<Option<Session>>,
    feeds: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
    auth_events: broadcast::Sender<AuthEvent>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: TokenUser,
}

#[derive(Deserialize)]
struct TokenUser {
    id: String,
    email: Option<String>,
}

impl RestGateway {
    /// Create a new client.
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            inner: Arc::new(RestGatewayInner {
                client: reqwest::Client::new(),
                base_url: config.url.clone(),
                api_key: config.api_key.clone(),
                poll_interval: config.poll_interval,
                session: Mutex::new(None),
                feeds: Mutex::new(HashMap::new()),
                auth_events,
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn feeds(&self) -> MutexGuard<'_, HashMap<SubscriptionId, JoinHandle<()>>> {
        self.inner
            .feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|e| GatewayError::Rejected(format!("invalid endpoint {path}: {e}")))
    }

    fn table_url(&self, table: Table, filters: &[Filter]) -> Result<Url, GatewayError> {
        let mut url = self.endpoint(&format!("rest/v1/{}", table.name()))?;
        {
            let mut pairs = url.query_pairs_mut();
            for filter in filters {
                pairs.append_pair(&filter.column, &format!("eq.{}", filter_value(&filter.value)));
            }
        }
        Ok(url)
    }

    /// Build a request carrying the api key and the best available bearer
    /// token (the session token once signed in, the api key otherwise).
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let bearer = self.session().as_ref().map_or_else(
            || self.inner.api_key.expose_secret().to_owned(),
            |s| s.access_token.expose_secret().to_owned(),
        );
        self.inner
            .client
            .request(method, url)
            .header("apikey", self.inner.api_key.expose_secret())
            .bearer_auth(bearer)
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, GatewayError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
            error!(status = %status, body = %message, "Remote service returned non-success status");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }

    async fn fetch(&self, table: Table, query: &Query) -> Result<Vec<Row>, GatewayError> {
        let mut url = self.table_url(table, &query.filters)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            if let Some(order) = &query.order {
                let direction = match order.direction {
                    Direction::Ascending => "asc",
                    Direction::Descending => "desc",
                };
                pairs.append_pair("order", &format!("{}.{direction}", order.column));
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }

        let body = self.send(self.request(Method::GET, url)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        let _ = self.inner.auth_events.send(AuthEvent { kind, session });
    }
}

/// Render a filter value the way `PostgREST` expects it in a query string.
fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Key rows by their `id` column for diffing.
fn index_by_id(rows: Vec<Row>) -> HashMap<String, Row> {
    rows.into_iter()
        .filter_map(|row| {
            let key = row.get("id").map(filter_value)?;
            Some((key, row))
        })
        .collect()
}

/// Changes that turn `previous` into `current`.
fn diff_rows(previous: &HashMap<String, Row>, current: &HashMap<String, Row>) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for (key, row) in current {
        match previous.get(key) {
            None => events.push(ChangeEvent::insert(row.clone())),
            Some(old) if old != row => events.push(ChangeEvent::update(old.clone(), row.clone())),
            Some(_) => {}
        }
    }
    for (key, row) in previous {
        if !current.contains_key(key) {
            events.push(ChangeEvent::delete(row.clone()));
        }
    }
    events
}

async fn run_feed(
    gateway: RestGateway,
    table: Table,
    mut known: HashMap<String, Row>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }
        let current = match gateway.fetch(table, &Query::new()).await {
            Ok(rows) => index_by_id(rows),
            Err(e) => {
                debug!(error = %e, %table, "Change feed poll failed");
                continue;
            }
        };
        for event in diff_rows(&known, &current) {
            if tx.send(event).is_err() {
                return;
            }
        }
        known = current;
    }
}

#[async_trait]
impl Gateway for RestGateway {
    #[instrument(skip(self, query), fields(%table))]
    async fn query(&self, table: Table, query: Query) -> Result<Vec<Row>, GatewayError> {
        self.fetch(table, &query).await
    }

    #[instrument(skip(self, rows), fields(%table, count = rows.len()))]
    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, GatewayError> {
        let url = self.table_url(table, &[])?;
        let request = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&rows);
        let body = self.send(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    #[instrument(skip(self, filters, patch), fields(%table))]
    async fn update(
        &self,
        table: Table,
        filters: Vec<Filter>,
        patch: Row,
    ) -> Result<(), GatewayError> {
        let url = self.table_url(table, &filters)?;
        self.send(self.request(Method::PATCH, url).json(&patch))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, filters), fields(%table))]
    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<(), GatewayError> {
        let url = self.table_url(table, &filters)?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    /// The diff baseline is read before this returns, so any write made after
    /// `subscribe` completes shows up as an event.
    async fn subscribe(&self, table: Table) -> Result<Subscription, GatewayError> {
        let known = match self.fetch(table, &Query::new()).await {
            Ok(rows) => index_by_id(rows),
            Err(e) => {
                warn!(error = %e, %table, "Change feed could not read initial snapshot");
                HashMap::new()
            }
        };
        let id = SubscriptionId::new();
        let (tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_feed(
            self.clone(),
            table,
            known,
            tx,
            self.inner.poll_interval,
        ));
        self.feeds().insert(id, task);
        debug!(%id, %table, "Started polling change feed");
        Ok(Subscription { id, table, events })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(task) = self.feeds().remove(&id) {
            task.abort();
            debug!(%id, "Stopped polling change feed");
        }
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn sign_in(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, GatewayError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let request = self
            .inner
            .client
            .post(url)
            .header("apikey", self.inner.api_key.expose_secret())
            .json(&json!({
                "email": email.as_str(),
                "password": password.expose_secret(),
            }));

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Auth("Invalid login credentials".to_owned()));
        }
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message: body.chars().take(ERROR_BODY_PREVIEW).collect(),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        let session = Session {
            access_token: SecretString::from(token.access_token),
            user: SessionUser {
                id: token.user.id,
                email: token.user.email,
            },
        };
        *self.session() = Some(session.clone());
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        let had_session = self.session().is_some();
        let result = if had_session {
            match self.endpoint("auth/v1/logout") {
                Ok(url) => self.send(self.request(Method::POST, url)).await.map(|_| ()),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };
        // The local session is dropped even if the remote call failed.
        *self.session() = None;
        self.emit(AuthEventKind::SignedOut, None);
        result
    }

    async fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        Ok(self.session().clone())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.auth_events.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gateway::ChangeKind;

    fn gateway() -> RestGateway {
        RestGateway::new(&GatewayConfig {
            url: Url::parse("https://vault.example.co/").unwrap(),
            api_key: SecretString::from("anon-key".to_owned()),
            poll_interval: Duration::from_secs(2),
        })
    }

    #[test]
    fn test_table_url_encodes_filters() {
        let url = gateway()
            .table_url(
                Table::AdminWhitelist,
                &[Filter::eq("email", "owner+vip@soltan.shop")],
            )
            .unwrap();
        assert_eq!(url.path(), "/rest/v1/admin_whitelist");
        assert_eq!(url.query(), Some("email=eq.owner%2Bvip%40soltan.shop"));
    }

    #[test]
    fn test_filter_value_rendering() {
        assert_eq!(filter_value(&json!("ORD-1")), "ORD-1");
        assert_eq!(filter_value(&json!(42)), "42");
        assert_eq!(filter_value(&json!(true)), "true");
    }

    #[test]
    fn test_diff_rows() {
        let previous = index_by_id(vec![
            json!({"id": 1, "name": "Ring"}),
            json!({"id": 2, "name": "Chain"}),
        ]);
        let current = index_by_id(vec![
            json!({"id": 1, "name": "Ring"}),
            json!({"id": 2, "name": "Gold Chain"}),
            json!({"id": 3, "name": "Hoodie"}),
        ]);

        let mut kinds: Vec<ChangeKind> = diff_rows(&previous, &current)
            .into_iter()
            .map(|e| e.kind)
            .collect();
        kinds.sort_by_key(|k| format!("{k:?}"));
        assert_eq!(kinds, vec![ChangeKind::Insert, ChangeKind::Update]);

        let removed = diff_rows(&current, &previous);
        let deletes: Vec<_> = removed
            .iter()
            .filter(|e| e.kind == ChangeKind::Delete)
            .collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes.first().unwrap().old.as_ref().unwrap()["id"], 3);
    }

    #[tokio::test]
    async fn test_subscribe_survives_unreachable_baseline() {
        let gateway = RestGateway::new(&GatewayConfig {
            url: Url::parse("http://127.0.0.1:9/").unwrap(),
            api_key: SecretString::from("anon-key".to_owned()),
            poll_interval: Duration::from_secs(60),
        });
        let mut subscription = gateway.subscribe(Table::Orders).await.unwrap();
        assert_eq!(gateway.feeds().len(), 1);

        gateway.unsubscribe(subscription.id).await;
        assert!(gateway.feeds().is_empty());
        assert!(subscription.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_session_starts_empty() {
        assert!(gateway().get_session().await.unwrap().is_none());
    }
}
