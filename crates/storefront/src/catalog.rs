//! Catalog synchronizer.
//!
//! # Architecture
//!
//! - One initial load ordered by ascending id; on success the result also
//!   refreshes the local fallback cache, on failure the cache is used instead
//! - After the load attempt, whatever its outcome, a realtime subscription on
//!   `products` feeds a single listener task that applies changes in arrival
//!   order
//! - Inserts are upserts followed by a re-sort; updates replace in place;
//!   deletes remove by the old row's id
//! - The remote table stays the source of truth: the local list is a cache
//!   that heals itself from the change stream

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use soltan_core::Product;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::collection::SharedVec;
use crate::gateway::{
    ChangeEvent, ChangeKind, Direction, Gateway, GatewayError, Query, SubscriptionId, Table,
};
use crate::schema::{ProductRow, decode_row, decode_rows, row_product_id};
use crate::storage::{self, Storage, keys};
use crate::toast::Toaster;

/// Keeps the local product list in step with the remote `products` table.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    gateway: Arc<dyn Gateway>,
    storage: Arc<dyn Storage>,
    toaster: Toaster,
    products: SharedVec<Product>,
    loading: watch::Sender<bool>,
    initialized: AtomicBool,
    shut_down: AtomicBool,
    listener: Mutex<Option<(SubscriptionId, JoinHandle<()>)>>,
}

/// Clears the loading flag when dropped, whichever way the load ends.
struct LoadingGuard<'a>(&'a watch::Sender<bool>);

impl<'a> LoadingGuard<'a> {
    fn start(flag: &'a watch::Sender<bool>) -> Self {
        flag.send_replace(true);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl Catalog {
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>, storage: Arc<dyn Storage>, toaster: Toaster) -> Self {
        let (loading, _) = watch::channel(false);
        Self {
            inner: Arc::new(CatalogInner {
                gateway,
                storage,
                toaster,
                products: SharedVec::default(),
                loading,
                initialized: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Load the catalog and start following changes. Runs once; later calls
    /// return immediately.
    #[instrument(skip(self))]
    pub async fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            debug!("Catalog already initialized");
            return;
        }

        {
            let _loading = LoadingGuard::start(&self.inner.loading);
            match self.fetch().await {
                Ok(products) => {
                    info!(count = products.len(), "Loaded catalog");
                    storage::save_json(&*self.inner.storage, keys::PRODUCTS_CACHE, &products);
                    self.inner.products.replace(products);
                }
                Err(e) => {
                    warn!(error = %e, "Catalog fetch failed, falling back to local cache");
                    let cached: Vec<Product> =
                        storage::load_json(&*self.inner.storage, keys::PRODUCTS_CACHE)
                            .unwrap_or_default();
                    info!(count = cached.len(), "Hydrated catalog from cache");
                    self.inner.products.replace(cached);
                }
            }
        }

        self.follow_changes().await;
    }

    /// Re-read the whole catalog.
    ///
    /// Failures leave the list and the cache untouched and show a toast.
    #[instrument(skip(self))]
    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok(products) => self.inner.products.replace(products),
            Err(e) => {
                warn!(error = %e, "Catalog refresh failed");
                self.inner.toaster.info("Failed to refresh products");
            }
        }
    }

    /// Release the realtime subscription. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((id, task)) = listener {
            self.inner.gateway.unsubscribe(id).await;
            task.abort();
            debug!(%id, "Catalog subscription released");
        }
    }

    /// Current product list.
    #[must_use]
    pub fn products(&self) -> Arc<Vec<Product>> {
        self.inner.products.snapshot()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        *self.inner.loading.borrow()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<Vec<Product>>> {
        self.inner.products.watch()
    }

    #[must_use]
    pub fn watch_loading(&self) -> watch::Receiver<bool> {
        self.inner.loading.subscribe()
    }

    async fn fetch(&self) -> Result<Vec<Product>, GatewayError> {
        let rows = self
            .inner
            .gateway
            .query(
                Table::Products,
                Query::new().order_by("id", Direction::Ascending),
            )
            .await?;
        Ok(decode_rows::<ProductRow>(rows, Table::Products.name())
            .into_iter()
            .map(Product::from)
            .collect())
    }

    async fn follow_changes(&self) {
        let subscription = match self.inner.gateway.subscribe(Table::Products).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "Could not subscribe to catalog changes");
                return;
            }
        };
        let id = subscription.id;

        // Shutdown may have run while the subscription was being opened.
        if self.inner.shut_down.load(Ordering::Acquire) {
            self.inner.gateway.unsubscribe(id).await;
            return;
        }

        let task = tokio::spawn(listen(self.inner.products.clone(), subscription.events));
        *self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((id, task));
        debug!(%id, "Following catalog changes");
    }
}

async fn listen(products: SharedVec<Product>, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
    while let Some(event) = events.recv().await {
        products.apply_if(|current| applied(current, &event));
    }
    debug!("Catalog change stream closed");
}

/// The product list after `event`, or `None` if the event changes nothing.
#[must_use]
pub fn applied(products: &[Product], event: &ChangeEvent) -> Option<Vec<Product>> {
    match event.kind {
        ChangeKind::Insert => {
            let product = decode_product(event.new.as_ref()?)?;
            let mut next: Vec<Product> = products
                .iter()
                .filter(|p| p.id != product.id)
                .cloned()
                .collect();
            next.push(product);
            next.sort_by_key(|p| p.id);
            Some(next)
        }
        ChangeKind::Update => {
            let product = decode_product(event.new.as_ref()?)?;
            let index = products.iter().position(|p| p.id == product.id)?;
            if products.get(index) == Some(&product) {
                return None;
            }
            let mut next = products.to_vec();
            if let Some(slot) = next.get_mut(index) {
                *slot = product;
            }
            Some(next)
        }
        ChangeKind::Delete => {
            let id = event.old.as_ref().and_then(row_product_id)?;
            products.iter().any(|p| p.id == id).then(|| {
                products.iter().filter(|p| p.id != id).cloned().collect()
            })
        }
    }
}

fn decode_product(row: &serde_json::Value) -> Option<Product> {
    decode_row::<ProductRow>(row.clone(), Table::Products.name()).map(Product::from)
}
