//! Core types for Soltan.
//!
//! This module provides type-safe wrappers for the storefront domain.

pub mod cart;
pub mod email;
pub mod id;
pub mod order;
pub mod price;
pub mod product;
pub mod status;
pub mod toast;

pub use cart::{CartItem, LineKey, cart_total};
pub use email::{Email, EmailError};
pub use id::*;
pub use order::{CustomerDetails, CustomerError, MIN_CUSTOMER_NAME_CHARS, Order, strip_markup};
pub use price::{Price, PriceError};
pub use product::{NewProduct, Product, ProductCollection, ProductSpecs};
pub use status::*;
pub use toast::{ToastKind, ToastMessage};
