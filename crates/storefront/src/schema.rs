//! Translation between remote rows and local types.
//!
//! The remote tables use `snake_case` columns and a few different names
//! (`customer_phone` for the contact number, `created_at` for the order
//! timestamp). Each direction has its own row type so the mapping stays
//! explicit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soltan_core::{
    CartItem, NewProduct, Order, OrderId, OrderStatus, Price, Product, ProductCollection,
    ProductId, ProductSpecs,
};
use tracing::warn;

use crate::gateway::Row;

// =============================================================================
// Products
// =============================================================================

/// A `products` row as returned by the remote service.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRow {
    pub id: i32,
    pub name: String,
    pub price: Price,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub collections: Option<Vec<String>>,
    #[serde(default)]
    pub is_new: Option<bool>,
    #[serde(default)]
    pub story: Option<String>,
    #[serde(default)]
    pub technical_specs: Option<Vec<String>>,
    #[serde(default)]
    pub specs: Option<ProductSpecs>,
    #[serde(default)]
    pub sizes: Option<Vec<String>>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: ProductId::new(row.id),
            name: row.name,
            price: row.price,
            image: row.image.unwrap_or_default(),
            images: row.images.unwrap_or_default(),
            description: row.description,
            category: row.category.unwrap_or_default(),
            collections: row
                .collections
                .unwrap_or_default()
                .iter()
                .filter_map(|label| ProductCollection::from_label(label))
                .collect(),
            is_new: row.is_new.unwrap_or(false),
            story: row.story,
            technical_specs: row.technical_specs.unwrap_or_default(),
            specs: row.specs.unwrap_or_default(),
            sizes: row.sizes.unwrap_or_default(),
        }
    }
}

/// Column values written when creating or editing a product.
///
/// The id is never part of the payload: the remote service assigns it on
/// insert and it is the filter on update.
#[derive(Debug, Clone, Serialize)]
pub struct NewProductRow {
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub image: String,
    pub images: Vec<String>,
    pub description: Option<String>,
    pub category: String,
    pub collections: Vec<&'static str>,
    pub is_new: bool,
    pub story: Option<String>,
    pub technical_specs: Vec<String>,
    pub specs: ProductSpecs,
    pub sizes: Vec<String>,
}

impl From<&NewProduct> for NewProductRow {
    fn from(product: &NewProduct) -> Self {
        Self {
            name: product.name.clone(),
            price: product.price.amount(),
            image: product.image.clone(),
            images: product.images.clone(),
            description: product.description.clone(),
            category: product.category.clone(),
            collections: product.collections.iter().map(|c| c.label()).collect(),
            is_new: product.is_new,
            story: product.story.clone(),
            technical_specs: product.technical_specs.clone(),
            specs: product.specs.clone(),
            sizes: product.sizes.clone(),
        }
    }
}

impl From<&Product> for NewProductRow {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            price: product.price.amount(),
            image: product.image.clone(),
            images: product.images.clone(),
            description: product.description.clone(),
            category: product.category.clone(),
            collections: product.collections.iter().map(|c| c.label()).collect(),
            is_new: product.is_new,
            story: product.story.clone(),
            technical_specs: product.technical_specs.clone(),
            specs: product.specs.clone(),
            sizes: product.sizes.clone(),
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// An `orders` row as returned by the remote service.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRow {
    pub id: String,
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: String,
    #[serde(default)]
    pub customer_address: String,
    #[serde(default)]
    pub items: Vec<CartItem>,
    pub total: Decimal,
    #[serde(default)]
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: OrderId::new(row.id),
            customer_name: row.customer_name,
            contact_number: row.customer_phone,
            address: row.customer_address,
            items: row.items,
            total: row.total,
            timestamp: row.created_at,
            status: row.status,
        }
    }
}

/// An `orders` row as written at checkout.
#[derive(Debug, Clone, Serialize)]
pub struct NewOrderRow<'a> {
    pub id: &'a str,
    pub customer_name: &'a str,
    pub customer_phone: &'a str,
    pub customer_address: &'a str,
    pub items: &'a [CartItem],
    pub sizes: Vec<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub status: OrderStatus,
}

impl<'a> From<&'a Order> for NewOrderRow<'a> {
    fn from(order: &'a Order) -> Self {
        Self {
            id: order.id.as_str(),
            customer_name: &order.customer_name,
            customer_phone: &order.contact_number,
            customer_address: &order.address,
            items: &order.items,
            sizes: order.sizes(),
            total: order.total,
            status: order.status,
        }
    }
}

// =============================================================================
// Decoding helpers
// =============================================================================

/// Decode one row, logging and returning `None` if it does not fit `T`.
pub fn decode_row<T: DeserializeOwned>(row: Row, table: &str) -> Option<T> {
    match serde_json::from_value(row) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(error = %e, table, "Skipping malformed row");
            None
        }
    }
}

/// Decode every well-formed row, skipping the rest.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>, table: &str) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| decode_row(row, table))
        .collect()
}

/// Extract a product id from a row, if it carries one.
#[must_use]
pub fn row_product_id(row: &Value) -> Option<ProductId> {
    row.get("id")
        .and_then(Value::as_i64)
        .and_then(|id| i32::try_from(id).ok())
        .map(ProductId::new)
}

/// Serialize a row payload.
///
/// # Errors
///
/// Returns an error if `payload` does not serialize to JSON.
pub fn to_row<T: Serialize>(payload: &T) -> Result<Row, serde_json::Error> {
    serde_json::to_value(payload)
}
