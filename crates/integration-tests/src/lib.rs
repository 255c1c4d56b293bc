//! Integration tests for the Soltan storefront.
//!
//! Every test drives a full [`Store`] against the in-memory gateway with a
//! paused clock, so timeouts and debounces run instantly and in order.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p soltan-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `catalog_sync` - Initial load, cache fallback, live changes
//! - `admin_session` - Bounded resolution, sign-in debounce, sign-out
//! - `order_feed` - Feed gating by the admin guard
//! - `checkout` - Cart arithmetic, order submission, persistence

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Value, json};
use soltan_core::Email;
use soltan_storefront::gateway::Table;
use soltan_storefront::{MemoryGateway, MemoryStorage, Store, SyncTimings};

pub const ADMIN_EMAIL: &str = "owner@soltan.shop";
pub const ADMIN_PASSWORD: &str = "correct horse battery";
pub const CUSTOMER_EMAIL: &str = "guest@soltan.shop";
pub const CUSTOMER_PASSWORD: &str = "guest password";

/// A store wired to an in-memory gateway and in-memory storage.
pub struct TestContext {
    pub gateway: Arc<MemoryGateway>,
    pub storage: Arc<MemoryStorage>,
    pub session_storage: Arc<MemoryStorage>,
    pub store: Store,
}

impl TestContext {
    /// Gateway with one allow-listed admin account and one plain account.
    #[must_use]
    pub fn new() -> Self {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.add_account(ADMIN_EMAIL, ADMIN_PASSWORD);
        gateway.add_account(CUSTOMER_EMAIL, CUSTOMER_PASSWORD);
        gateway.seed(Table::AdminWhitelist, vec![json!({ "email": ADMIN_EMAIL })]);
        Self::with_parts(gateway, Arc::new(MemoryStorage::new()))
    }

    /// Store over an existing gateway and durable storage, as after a restart.
    #[must_use]
    pub fn with_parts(gateway: Arc<MemoryGateway>, storage: Arc<MemoryStorage>) -> Self {
        let session_storage = Arc::new(MemoryStorage::new());
        let store = Store::new(
            gateway.clone(),
            storage.clone(),
            session_storage.clone(),
            SyncTimings::default(),
        );
        Self {
            gateway,
            storage,
            session_storage,
            store,
        }
    }

    /// Sign in through the store's admin guard.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when the credentials are refused.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let email = Email::parse(email)?;
        self.store
            .admin()
            .sign_in(&email, &SecretString::from(password.to_owned()))
            .await?;
        Ok(())
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Let spawned tasks run. Under a paused clock this advances 10 ms.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// A `products` row as the remote service stores it.
#[must_use]
pub fn product_row(id: i32, name: &str, price: f64) -> Value {
    json!({
        "id": id,
        "name": name,
        "price": price,
        "image": format!("{}.jpg", name.to_lowercase().replace(' ', "-")),
        "images": [],
        "description": null,
        "category": "Rings",
        "collections": ["Full Collection"],
        "is_new": false,
        "story": null,
        "technical_specs": [],
        "specs": { "material": "Silver", "weight": "12g", "resistance": "Water" },
        "sizes": ["S", "M", "L"],
    })
}

/// An `orders` row created `minute` minutes after noon on 2025-01-01.
#[must_use]
pub fn order_row(id: &str, minute: u32) -> Value {
    json!({
        "id": id,
        "customer_name": "Jo Doe",
        "customer_phone": "555-0100",
        "customer_address": "1 Main St",
        "items": [],
        "sizes": [],
        "total": 0.0,
        "status": "pending",
        "created_at": format!("2025-01-01T12:{minute:02}:00.000Z"),
    })
}
