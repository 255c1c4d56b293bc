//! Order feed synchronizer.
//!
//! # Architecture
//!
//! - The feed is live only while the admin guard is settled and granted
//! - On activation: a subscription on `orders`, then one fetch of the newest
//!   orders. Every later event triggers a full refetch
//! - On deactivation: the subscription is released. The list is emptied
//!   once access is denied, and kept while a resolution is still running. A
//!   fetch that finishes after deactivation is thrown away
//! - A separate mirror task copies every version of the list to local
//!   storage; the copy is never read back

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use soltan_core::Order;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::admin::{AdminState, AdminStatus};
use crate::collection::SharedVec;
use crate::gateway::{
    ChangeEvent, Direction, Gateway, GatewayError, Query, Subscription, SubscriptionId, Table,
};
use crate::schema::{OrderRow, decode_rows};
use crate::storage::{self, Storage, keys};

/// Keeps the shared order list in step with the remote `orders` table while
/// the admin guard allows it.
#[derive(Clone)]
pub struct OrderFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    gateway: Arc<dyn Gateway>,
    orders: SharedVec<Order>,
    limit: usize,
    task: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl OrderFeed {
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>, orders: SharedVec<Order>, limit: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                gateway,
                orders,
                limit,
                task: Mutex::new(None),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Start following `admin`. Replaces a previously started run.
    pub fn start(&self, admin: watch::Receiver<AdminState>) {
        let task = tokio::spawn(Arc::clone(&self.inner).run(admin));
        if let Some(previous) = self.inner.task().replace(task) {
            previous.abort();
        }
    }

    /// Stop following and release the subscription if one is open.
    pub async fn shutdown(&self) {
        if let Some(task) = self.inner.task().take() {
            task.abort();
        }
        let subscription = self.inner.subscription().take();
        if let Some(id) = subscription {
            self.inner.gateway.unsubscribe(id).await;
            debug!(%id, "Order subscription released");
        }
    }

    #[must_use]
    pub fn orders(&self) -> Arc<Vec<Order>> {
        self.inner.orders.snapshot()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<Vec<Order>>> {
        self.inner.orders.watch()
    }
}

impl FeedInner {
    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscription(&self) -> MutexGuard<'_, Option<SubscriptionId>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>, mut admin: watch::Receiver<AdminState>) {
        loop {
            if !activated(&mut admin).await {
                return;
            }
            info!("Order feed active");
            self.follow(&mut admin).await;
            let revoked = admin.borrow().status == AdminStatus::Denied;
            if revoked {
                self.orders.clear();
            }
            info!(revoked, "Order feed inactive");
        }
    }

    /// Follow the table until the feed is deactivated.
    ///
    /// The subscription is opened before the first fetch so a write landing
    /// between the two still produces an event.
    async fn follow(&self, admin: &mut watch::Receiver<AdminState>) {
        let gate = admin.clone();
        let subscription = self.open_subscription().await;

        let fetched = tokio::select! {
            () = self.refetch(&gate) => true,
            _ = deactivated(admin) => false,
        };

        match subscription {
            Some(subscription) => {
                if fetched {
                    self.stream(subscription.events, admin, &gate).await;
                }
                self.release(subscription.id).await;
            }
            None if fetched => {
                deactivated(admin).await;
            }
            None => {}
        }
    }

    /// Refetch on every change event until the feed is deactivated.
    async fn stream(
        &self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
        admin: &mut watch::Receiver<AdminState>,
        gate: &watch::Receiver<AdminState>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        debug!(kind = ?event.kind, "Order change, refetching");
                        tokio::select! {
                            () = self.refetch(gate) => {}
                            _ = deactivated(admin) => return,
                        }
                    }
                    None => {
                        warn!("Order change stream closed");
                        deactivated(admin).await;
                        return;
                    }
                },
                _ = deactivated(admin) => return,
            }
        }
    }

    async fn open_subscription(&self) -> Option<Subscription> {
        match self.gateway.subscribe(Table::Orders).await {
            Ok(subscription) => {
                *self.subscription() = Some(subscription.id);
                Some(subscription)
            }
            Err(e) => {
                warn!(error = %e, "Could not subscribe to order changes");
                None
            }
        }
    }

    async fn release(&self, id: SubscriptionId) {
        let owned = self.subscription().take_if(|current| *current == id).is_some();
        if owned {
            self.gateway.unsubscribe(id).await;
            debug!(%id, "Order subscription released");
        }
    }

    /// Replace the list with the newest orders, unless the feed was
    /// deactivated meanwhile. Failures leave the list as it was.
    #[instrument(skip_all)]
    async fn refetch(&self, gate: &watch::Receiver<AdminState>) {
        match self.fetch().await {
            Ok(orders) => {
                let count = orders.len();
                let applied = self
                    .orders
                    .apply_if(|_| gate.borrow().feed_active().then_some(orders));
                if applied {
                    debug!(count, "Order feed updated");
                } else {
                    debug!("Discarding order fetch that finished after deactivation");
                }
            }
            Err(e) => warn!(error = %e, "Order fetch failed"),
        }
    }

    async fn fetch(&self) -> Result<Vec<Order>, GatewayError> {
        let rows = self
            .gateway
            .query(
                Table::Orders,
                Query::new()
                    .order_by("created_at", Direction::Descending)
                    .limit(self.limit),
            )
            .await?;
        Ok(decode_rows::<OrderRow>(rows, Table::Orders.name())
            .into_iter()
            .map(Order::from)
            .collect())
    }
}

/// Wait until the feed should be live. `false` once the guard is gone.
async fn activated(admin: &mut watch::Receiver<AdminState>) -> bool {
    admin.wait_for(AdminState::feed_active).await.is_ok()
}

/// Wait until the feed should stop. Returns `false` if the guard is gone,
/// which also means stop.
async fn deactivated(admin: &mut watch::Receiver<AdminState>) -> bool {
    admin.wait_for(|state| !state.feed_active()).await.is_ok()
}

/// Copy every version of the order list to local storage.
pub fn spawn_mirror(orders: &SharedVec<Order>, storage: Arc<dyn Storage>) -> JoinHandle<()> {
    let mut rx = orders.watch();
    tokio::spawn(async move {
        loop {
            let snapshot = Arc::clone(&rx.borrow_and_update());
            storage::save_json(&*storage, keys::ORDERS, snapshot.as_slice());
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
