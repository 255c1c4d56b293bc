//! Soltan storefront state synchronization.
//!
//! Keeps local, optimistic views of three independently changing datasets
//! (the product catalog, the admin identity and the order feed) consistent
//! with a remote source of truth that pushes change events, while tolerating
//! latency, timeouts and partial failure.
//!
//! # Modules
//!
//! - [`gateway`] - Remote data service contract, in-memory and REST implementations
//! - [`catalog`] - Catalog synchronizer with local fallback cache
//! - [`admin`] - Admin session guard (bounded resolution, debounced re-checks)
//! - [`orders`] - Order feed gated by the admin guard
//! - [`cart`] - Cart, checkout and admin catalog/order actions
//! - [`store`] - Context object wiring everything together

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod admin;
pub mod cart;
pub mod catalog;
pub mod collection;
pub mod config;
pub mod error;
pub mod gateway;
pub mod orders;
pub mod schema;
pub mod storage;
pub mod store;
pub mod toast;

pub use admin::{AdminGuard, AdminState, AdminStatus};
pub use cart::CartEngine;
pub use catalog::Catalog;
pub use config::{ConfigError, GatewayConfig, StoreConfig, SyncTimings};
pub use error::{CheckoutError, StatusUpdateError, StoreError};
pub use gateway::{Gateway, GatewayError, MemoryGateway, RestGateway};
pub use orders::OrderFeed;
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
pub use store::Store;
pub use toast::Toaster;
