//! Store context shared by every front end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::admin::AdminGuard;
use crate::cart::CartEngine;
use crate::catalog::Catalog;
use crate::collection::SharedVec;
use crate::config::{StoreConfig, SyncTimings};
use crate::error::StoreError;
use crate::gateway::{Gateway, RestGateway};
use crate::orders::{self, OrderFeed};
use crate::storage::{FileStorage, MemoryStorage, Storage};
use crate::toast::Toaster;

/// Every synchronizer of one storefront session, wired together.
///
/// This struct is cheaply cloneable via `Arc`. Build it once, call
/// [`start`](Self::start), and call [`shutdown`](Self::shutdown) when done.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    gateway: Arc<dyn Gateway>,
    storage: Arc<dyn Storage>,
    timings: SyncTimings,
    toaster: Toaster,
    catalog: Catalog,
    admin: AdminGuard,
    feed: OrderFeed,
    cart: CartEngine,
    orders: SharedVec<soltan_core::Order>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl Store {
    /// Create a new store.
    ///
    /// # Arguments
    ///
    /// * `gateway` - Remote data service
    /// * `storage` - Durable local storage (cart, catalog cache, order mirror)
    /// * `session_storage` - Storage that only lives as long as the session
    /// * `timings` - Timeouts and intervals of the synchronizers
    #[must_use]
    pub fn new(
        gateway: Arc<dyn Gateway>,
        storage: Arc<dyn Storage>,
        session_storage: Arc<dyn Storage>,
        timings: SyncTimings,
    ) -> Self {
        let toaster = Toaster::new(timings.toast_ttl);
        let orders = SharedVec::default();
        let catalog = Catalog::new(Arc::clone(&gateway), Arc::clone(&storage), toaster.clone());
        let admin = AdminGuard::new(
            Arc::clone(&gateway),
            session_storage,
            orders.clone(),
            timings,
        );
        let feed = OrderFeed::new(Arc::clone(&gateway), orders.clone(), timings.order_limit);
        let cart = CartEngine::new(
            Arc::clone(&gateway),
            Arc::clone(&storage),
            toaster.clone(),
            orders.clone(),
        );

        Self {
            inner: Arc::new(StoreInner {
                gateway,
                storage,
                timings,
                toaster,
                catalog,
                admin,
                feed,
                cart,
                orders,
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Build a store talking to the configured REST service, with file-backed
    /// durable storage and in-memory session storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be created.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let gateway: Arc<dyn Gateway> = Arc::new(RestGateway::new(&config.gateway));
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(&config.storage_dir)?);
        Ok(Self::new(
            gateway,
            storage,
            Arc::new(MemoryStorage::new()),
            config.timings,
        ))
    }

    /// Load local state, start the background tasks, and run the catalog load
    /// and the admin resolution concurrently. Later calls do nothing.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.cart.load();
        let mirror = orders::spawn_mirror(&self.inner.orders, Arc::clone(&self.inner.storage));
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(mirror);
        self.inner.admin.listen_for_auth_events();
        self.inner.admin.maintain_session_marker();
        self.inner.feed.start(self.inner.admin.watch());

        let ((), status) = tokio::join!(self.inner.catalog.initialize(), self.inner.admin.initialize());
        info!(
            products = self.inner.catalog.products().len(),
            admin = ?status,
            "Store started"
        );
    }

    /// Release every subscription and stop the background tasks. Safe to call
    /// more than once.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.catalog.shutdown().await;
        self.inner.feed.shutdown().await;
        self.inner.admin.shutdown();
        let tasks: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        info!("Store shut down");
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.inner.gateway
    }

    #[must_use]
    pub fn timings(&self) -> &SyncTimings {
        &self.inner.timings
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    #[must_use]
    pub fn admin(&self) -> &AdminGuard {
        &self.inner.admin
    }

    #[must_use]
    pub fn orders(&self) -> &OrderFeed {
        &self.inner.feed
    }

    #[must_use]
    pub fn cart(&self) -> &CartEngine {
        &self.inner.cart
    }

    #[must_use]
    pub fn toaster(&self) -> &Toaster {
        &self.inner.toaster
    }
}
