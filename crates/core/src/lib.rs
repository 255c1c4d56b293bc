//! Soltan Core - Shared domain types.
//!
//! This crate provides the types shared by every Soltan component:
//! - `storefront` - Client-side state synchronization layer
//! - `cli` - Command-line front end for browsing, seeding and order handling
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no gateway
//! access, no async runtime. Translation to the remote schema lives in the
//! storefront crate; the types here use the local naming.
//!
//! # Modules
//!
//! - [`types`] - Ids, prices, emails, statuses, products, cart lines, orders and toasts

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
