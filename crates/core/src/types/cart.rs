//! Cart lines and the pure cart reducers.
//!
//! Every reducer takes the current lines by reference and returns a freshly
//! built vector; holders of the previous vector never see it change.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::product::Product;

/// Identity of a cart line: the same product in two sizes is two lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineKey {
    pub product_id: ProductId,
    pub size: Option<String>,
}

impl LineKey {
    #[must_use]
    pub fn new(product_id: ProductId, size: Option<&str>) -> Self {
        Self {
            product_id,
            size: size.map(str::to_owned),
        }
    }
}

/// A product snapshot in the cart.
///
/// Serialized flat (product fields next to `quantity` and `selectedSize`),
/// which is also the shape stored inside remote order rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    #[serde(flatten)]
    pub product: Product,
    /// Always at least 1.
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_size: Option<String>,
}

impl CartItem {
    #[must_use]
    pub fn new(product: Product, selected_size: Option<String>) -> Self {
        Self {
            product,
            quantity: 1,
            selected_size,
        }
    }

    #[must_use]
    pub fn key(&self) -> LineKey {
        LineKey::new(self.product.id, self.selected_size.as_deref())
    }

    fn matches(&self, key: &LineKey) -> bool {
        self.product.id == key.product_id && self.selected_size == key.size
    }

    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.product.price * self.quantity
    }
}

/// Sum of price × quantity over all lines.
#[must_use]
pub fn cart_total(items: &[CartItem]) -> Decimal {
    items.iter().map(CartItem::line_total).sum()
}

/// Add one unit of `product` in `size`, merging into an existing line.
#[must_use]
pub fn with_added(items: &[CartItem], product: &Product, size: Option<&str>) -> Vec<CartItem> {
    let key = LineKey::new(product.id, size);
    if items.iter().any(|item| item.matches(&key)) {
        items
            .iter()
            .map(|item| {
                if item.matches(&key) {
                    CartItem {
                        quantity: item.quantity.saturating_add(1),
                        ..item.clone()
                    }
                } else {
                    item.clone()
                }
            })
            .collect()
    } else {
        let mut next = items.to_vec();
        next.push(CartItem::new(product.clone(), size.map(str::to_owned)));
        next
    }
}

/// Drop every line of `product_id`, whatever its size.
#[must_use]
pub fn without_product(items: &[CartItem], product_id: ProductId) -> Vec<CartItem> {
    items
        .iter()
        .filter(|item| item.product.id != product_id)
        .cloned()
        .collect()
}

/// Drop the single line identified by `key`.
#[must_use]
pub fn without_line(items: &[CartItem], key: &LineKey) -> Vec<CartItem> {
    items
        .iter()
        .filter(|item| !item.matches(key))
        .cloned()
        .collect()
}

/// Set the quantity of every line of `product_id`; below 1 removes them.
#[must_use]
pub fn with_product_quantity(
    items: &[CartItem],
    product_id: ProductId,
    quantity: i64,
) -> Vec<CartItem> {
    let Some(quantity) = positive_quantity(quantity) else {
        return without_product(items, product_id);
    };
    items
        .iter()
        .map(|item| {
            if item.product.id == product_id {
                CartItem {
                    quantity,
                    ..item.clone()
                }
            } else {
                item.clone()
            }
        })
        .collect()
}

/// Set the quantity of the line identified by `key`; below 1 removes it.
#[must_use]
pub fn with_line_quantity(items: &[CartItem], key: &LineKey, quantity: i64) -> Vec<CartItem> {
    let Some(quantity) = positive_quantity(quantity) else {
        return without_line(items, key);
    };
    items
        .iter()
        .map(|item| {
            if item.matches(key) {
                CartItem {
                    quantity,
                    ..item.clone()
                }
            } else {
                item.clone()
            }
        })
        .collect()
}

fn positive_quantity(quantity: i64) -> Option<u32> {
    if quantity < 1 {
        return None;
    }
    Some(u32::try_from(quantity).unwrap_or(u32::MAX))
}
