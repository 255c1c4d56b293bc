//! Cart and order submission.
//!
//! # Architecture
//!
//! - Cart lines live in a copy-on-write shared vector; every mutation goes
//!   through one of the pure reducers in `soltan_core::types::cart`
//! - Once the persisted cart has been loaded, every mutation is written back
//!   to local storage after it is published. A writer lock keeps saves in
//!   mutation order. Before loading, writes are suppressed so an empty startup
//!   cart never overwrites a saved one
//! - Checkout validates locally, writes the order through the gateway and
//!   only then clears the cart
//! - Catalog and order management for admins lives in [`manage`]

mod manage;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use rust_decimal::Decimal;
use soltan_core::types::cart;
use soltan_core::{CartItem, CustomerDetails, LineKey, Order, OrderId, Product, ProductId};
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::collection::SharedVec;
use crate::error::{CheckoutError, add_breadcrumb};
use crate::gateway::{Gateway, Table};
use crate::schema::{NewOrderRow, to_row};
use crate::storage::{self, Storage, keys};
use crate::toast::Toaster;

/// The shopping cart plus checkout and admin catalog/order actions.
#[derive(Clone)]
pub struct CartEngine {
    inner: Arc<CartInner>,
}

struct CartInner {
    gateway: Arc<dyn Gateway>,
    storage: Arc<dyn Storage>,
    toaster: Toaster,
    items: SharedVec<CartItem>,
    orders: SharedVec<Order>,
    loaded: AtomicBool,
    /// Held across apply-then-save so saves land in mutation order.
    writer: Mutex<()>,
}

impl CartInner {
    fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CartEngine {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn Gateway>,
        storage: Arc<dyn Storage>,
        toaster: Toaster,
        orders: SharedVec<Order>,
    ) -> Self {
        Self {
            inner: Arc::new(CartInner {
                gateway,
                storage,
                toaster,
                items: SharedVec::default(),
                orders,
                loaded: AtomicBool::new(false),
                writer: Mutex::new(()),
            }),
        }
    }

    /// Restore the persisted cart and start persisting changes.
    ///
    /// A missing or unreadable cart loads as empty.
    pub fn load(&self) {
        let items: Vec<CartItem> =
            storage::load_json(&*self.inner.storage, keys::CART).unwrap_or_default();
        info!(lines = items.len(), "Loaded cart");
        self.inner.items.replace(items);
        self.inner.loaded.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::Acquire)
    }

    // =========================================================================
    // Observers
    // =========================================================================

    #[must_use]
    pub fn items(&self) -> Arc<Vec<CartItem>> {
        self.inner.items.snapshot()
    }

    /// Sum of price times quantity over all lines.
    #[must_use]
    pub fn total(&self) -> Decimal {
        cart::cart_total(&self.items())
    }

    /// Number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items().iter().map(|item| item.quantity).sum()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<Vec<CartItem>>> {
        self.inner.items.watch()
    }

    // =========================================================================
    // Cart mutations
    // =========================================================================

    /// Add one unit of `product` in `size`, merging with an existing line.
    pub fn add_to_cart(&self, product: &Product, size: Option<&str>) {
        self.mutate(|items| cart::with_added(items, product, size));
        let product_id = product.id.to_string();
        add_breadcrumb(
            "cart",
            "Added to cart",
            Some(&[("product_id", product_id.as_str())]),
        );
        self.inner.toaster.success("Secured in Vault");
    }

    /// Remove every line of `product_id`, whatever its size.
    pub fn remove_from_cart(&self, product_id: ProductId) {
        self.mutate(|items| cart::without_product(items, product_id));
    }

    /// Remove the single line identified by `key`.
    pub fn remove_line(&self, key: &LineKey) {
        self.mutate(|items| cart::without_line(items, key));
    }

    /// Set the quantity of every line of `product_id`. Below 1 removes them.
    pub fn update_quantity(&self, product_id: ProductId, quantity: i64) {
        if quantity < 1 {
            self.remove_from_cart(product_id);
            return;
        }
        self.mutate(|items| cart::with_product_quantity(items, product_id, quantity));
    }

    /// Set the quantity of the line identified by `key`. Below 1 removes it.
    pub fn update_line_quantity(&self, key: &LineKey, quantity: i64) {
        if quantity < 1 {
            self.remove_line(key);
            return;
        }
        self.mutate(|items| cart::with_line_quantity(items, key, quantity));
    }

    pub fn clear_cart(&self) {
        self.mutate(|_| Vec::new());
    }

    fn mutate(&self, f: impl FnOnce(&[CartItem]) -> Vec<CartItem>) {
        let _writer = self.inner.writer();
        let next = self.inner.items.update(f);
        if self.is_loaded() {
            storage::save_json(&*self.inner.storage, keys::CART, next.as_slice());
        }
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Submit the current cart as an order.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NameTooShort`] without contacting the gateway
    /// when the trimmed name is too short, or [`CheckoutError::Gateway`] when
    /// the order could not be written. The cart is left intact on error.
    #[instrument(skip(self, customer))]
    pub async fn create_order(&self, customer: &CustomerDetails) -> Result<Order, CheckoutError> {
        if let Err(e) = customer.validate() {
            self.inner.toaster.info("Name is too short");
            return Err(e.into());
        }

        let now = Utc::now();
        let order = Order::place(
            OrderId::generate(now.timestamp_millis()),
            customer,
            self.items().to_vec(),
            now,
        );

        let result = match to_row(&NewOrderRow::from(&order)) {
            Ok(row) => self
                .inner
                .gateway
                .insert(Table::Orders, vec![row])
                .await
                .map_err(CheckoutError::from),
            Err(e) => Err(CheckoutError::from(e)),
        };

        match result {
            Ok(_) => {
                info!(order_id = %order.id, total = %order.total, "Order placed");
                let placed = order.clone();
                self.inner
                    .orders
                    .apply(|orders| std::iter::once(placed).chain(orders.iter().cloned()).collect());
                self.clear_cart();
                self.inner.toaster.success("Order placed successfully");
                Ok(order)
            }
            Err(e) => {
                error!(error = %e, order_id = %order.id, "Failed to create order");
                self.inner.toaster.info("Failed to create order");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::OnceLock;
    use std::time::Duration;

    use serde_json::json;
    use soltan_core::{Price, ProductSpecs};

    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::storage::{MemoryStorage, StorageError};

    fn product(id: i32, cents: u32) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            price: Price::from_cents(cents),
            image: "img.jpg".to_string(),
            images: vec![],
            description: None,
            category: "Rings".to_string(),
            collections: vec![],
            is_new: false,
            story: None,
            technical_specs: vec![],
            specs: ProductSpecs::default(),
            sizes: vec!["S".to_string(), "M".to_string()],
        }
    }

    struct Fixture {
        gateway: Arc<MemoryGateway>,
        storage: Arc<MemoryStorage>,
        toaster: Toaster,
        orders: SharedVec<Order>,
        cart: CartEngine,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        let storage = Arc::new(MemoryStorage::new());
        let toaster = Toaster::new(Duration::from_secs(3));
        let orders = SharedVec::default();
        let cart = CartEngine::new(
            gateway.clone(),
            storage.clone(),
            toaster.clone(),
            orders.clone(),
        );
        Fixture {
            gateway,
            storage,
            toaster,
            orders,
            cart,
        }
    }

    #[test]
    fn test_writes_suppressed_before_load() {
        let f = fixture();
        f.storage
            .set(keys::CART, &serde_json::to_string(&[CartItem::new(product(9, 100), None)]).unwrap())
            .unwrap();

        f.cart.add_to_cart(&product(1, 100), None);
        let saved: Vec<CartItem> = storage::load_json(&*f.storage, keys::CART).unwrap();
        assert_eq!(saved[0].product.id, ProductId::new(9));

        f.cart.load();
        assert_eq!(f.cart.items().len(), 1);
        f.cart.add_to_cart(&product(2, 100), None);
        let saved: Vec<CartItem> = storage::load_json(&*f.storage, keys::CART).unwrap();
        assert_eq!(saved.len(), 2);
    }

    #[test]
    fn test_malformed_cart_loads_empty() {
        let f = fixture();
        f.storage.set(keys::CART, "{oops").unwrap();
        f.cart.load();
        assert!(f.cart.items().is_empty());
        assert!(f.cart.is_loaded());
    }

    /// Records how many cart lines a watcher sees while each save runs.
    #[derive(Default)]
    struct WatchingStorage {
        inner: MemoryStorage,
        cart: OnceLock<watch::Receiver<Arc<Vec<CartItem>>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Storage for WatchingStorage {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if let Some(cart) = self.cart.get() {
                self.seen.lock().unwrap().push(cart.borrow().len());
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_save_runs_after_change_is_published() {
        let storage = Arc::new(WatchingStorage::default());
        let cart = CartEngine::new(
            Arc::new(MemoryGateway::new()),
            storage.clone(),
            Toaster::new(Duration::from_secs(3)),
            SharedVec::default(),
        );
        cart.load();
        assert!(storage.cart.set(cart.watch()).is_ok());

        cart.add_to_cart(&product(1, 100), None);
        cart.add_to_cart(&product(2, 100), None);
        cart.clear_cart();

        assert_eq!(*storage.seen.lock().unwrap(), vec![1, 2, 0]);
        let saved: Vec<CartItem> = storage::load_json(&*storage, keys::CART).unwrap();
        assert!(saved.is_empty());
    }

    #[test]
    fn test_add_merges_by_line_and_toasts() {
        let f = fixture();
        f.cart.load();
        let ring = product(1, 1000);

        f.cart.add_to_cart(&ring, Some("M"));
        f.cart.add_to_cart(&ring, Some("M"));
        f.cart.add_to_cart(&ring, Some("S"));

        let items = f.cart.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].quantity, 2);
        assert_eq!(f.cart.item_count(), 3);
        assert_eq!(f.toaster.current().unwrap().message, "Secured in Vault");
    }

    #[test]
    fn test_quantity_below_one_removes() {
        let f = fixture();
        f.cart.load();
        let ring = product(1, 1000);
        f.cart.add_to_cart(&ring, Some("M"));
        f.cart.add_to_cart(&ring, Some("S"));
        f.cart.add_to_cart(&product(2, 500), None);

        f.cart.update_line_quantity(&LineKey::new(ring.id, Some("M")), 0);
        assert_eq!(f.cart.items().len(), 2);

        f.cart.update_quantity(ring.id, 4);
        assert_eq!(f.cart.items()[0].quantity, 4);

        f.cart.update_quantity(ring.id, -1);
        assert_eq!(f.cart.items().len(), 1);
        assert_eq!(f.cart.items()[0].product.id, ProductId::new(2));
    }

    #[test]
    fn test_total() {
        let f = fixture();
        f.cart.load();
        let a = product(1, 1000);
        let b = product(2, 500);
        f.cart.add_to_cart(&a, None);
        f.cart.update_quantity(a.id, 2);
        f.cart.add_to_cart(&b, None);
        f.cart.update_quantity(b.id, 3);
        assert_eq!(f.cart.total(), Decimal::from(35));
    }

    #[tokio::test]
    async fn test_short_name_is_rejected_locally() {
        let f = fixture();
        f.cart.load();
        f.cart.add_to_cart(&product(1, 1000), None);

        let result = f
            .cart
            .create_order(&CustomerDetails::new(" J ", "1", "Home"))
            .await;
        assert!(matches!(result, Err(CheckoutError::NameTooShort)));
        assert!(f.gateway.rows(Table::Orders).is_empty());
        assert_eq!(f.cart.items().len(), 1);
        assert_eq!(f.toaster.current().unwrap().message, "Name is too short");
    }

    #[tokio::test]
    async fn test_create_order_writes_sanitized_row() {
        let f = fixture();
        f.cart.load();
        f.cart.add_to_cart(&product(1, 1000), Some("M"));
        f.cart.update_quantity(ProductId::new(1), 2);
        f.cart.add_to_cart(&product(2, 500), None);

        let order = f
            .cart
            .create_order(&CustomerDetails::new("  Jo ", "<555>", "<b>X</b>"))
            .await
            .unwrap();

        assert!(order.id.as_str().starts_with("ORD-"));
        assert_eq!(order.total, Decimal::from(25));
        let rows = f.gateway.rows(Table::Orders);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["customer_name"], "Jo");
        assert_eq!(rows[0]["customer_phone"], "555");
        assert_eq!(rows[0]["customer_address"], "bX/b");
        assert_eq!(rows[0]["sizes"], json!(["M"]));
        assert_eq!(rows[0]["total"], 25.0);

        assert!(f.cart.items().is_empty());
        assert_eq!(f.orders.snapshot()[0].id, order.id);
        assert_eq!(f.toaster.current().unwrap().message, "Order placed successfully");
        let saved: Vec<CartItem> = storage::load_json(&*f.storage, keys::CART).unwrap();
        assert!(saved.is_empty());
    }

    #[tokio::test]
    async fn test_failed_order_keeps_cart() {
        let f = fixture();
        f.cart.load();
        f.cart.add_to_cart(&product(1, 1000), None);
        f.gateway.set_failing(Table::Orders, true);

        let result = f
            .cart
            .create_order(&CustomerDetails::new("Jo", "1", "Home"))
            .await;
        assert!(matches!(result, Err(CheckoutError::Gateway(_))));
        assert_eq!(f.cart.items().len(), 1);
        assert!(f.orders.is_empty());
        assert_eq!(f.toaster.current().unwrap().message, "Failed to create order");
    }
}
