//! Orders and the customer details collected at checkout.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::cart::{CartItem, cart_total};
use super::id::OrderId;
use super::status::OrderStatus;

/// Minimum length, in characters after trimming, of a customer name.
pub const MIN_CUSTOMER_NAME_CHARS: usize = 2;

/// Remove `<` and `>` and trim surrounding whitespace.
///
/// ```
/// assert_eq!(soltan_core::strip_markup("  <b>X</b> "), "bX/b");
/// ```
#[must_use]
pub fn strip_markup(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>'))
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Validation errors for [`CustomerDetails`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CustomerError {
    #[error("name must be at least {MIN_CUSTOMER_NAME_CHARS} characters")]
    NameTooShort,
}

/// Free-text customer fields as typed into the checkout form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub phone: String,
    pub address: String,
}

impl CustomerDetails {
    #[must_use]
    pub fn new(name: impl Into<String>, phone: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            address: address.into(),
        }
    }

    /// Check the fields that must hold before anything is sent anywhere.
    ///
    /// # Errors
    ///
    /// Returns [`CustomerError::NameTooShort`] when the trimmed name has fewer
    /// than [`MIN_CUSTOMER_NAME_CHARS`] characters.
    pub fn validate(&self) -> Result<(), CustomerError> {
        if self.name.trim().chars().count() < MIN_CUSTOMER_NAME_CHARS {
            return Err(CustomerError::NameTooShort);
        }
        Ok(())
    }

    /// Copy with every field passed through [`strip_markup`].
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self {
            name: strip_markup(&self.name),
            phone: strip_markup(&self.phone),
            address: strip_markup(&self.address),
        }
    }
}

/// A submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub customer_name: String,
    pub contact_number: String,
    pub address: String,
    pub items: Vec<CartItem>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub timestamp: DateTime<Utc>,
    pub status: OrderStatus,
}

impl Order {
    /// Build a pending order from checkout input.
    ///
    /// Customer fields are sanitized here and the total is always derived
    /// from `items`.
    #[must_use]
    pub fn place(
        id: OrderId,
        customer: &CustomerDetails,
        items: Vec<CartItem>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let customer = customer.sanitized();
        Self {
            id,
            customer_name: customer.name,
            contact_number: customer.phone,
            address: customer.address,
            total: cart_total(&items),
            items,
            timestamp,
            status: OrderStatus::Pending,
        }
    }

    /// Selected sizes of the lines that have one, in line order.
    #[must_use]
    pub fn sizes(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.selected_size.clone())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::id::ProductId;
    use crate::types::price::Price;
    use crate::types::product::{Product, ProductSpecs};

    fn line(id: i32, cents: u32, quantity: u32, size: Option<&str>) -> CartItem {
        CartItem {
            product: Product {
                id: ProductId::new(id),
                name: format!("Product {id}"),
                price: Price::from_cents(cents),
                image: String::new(),
                images: vec![],
                description: None,
                category: "Rings".to_string(),
                collections: vec![],
                is_new: false,
                story: None,
                technical_specs: vec![],
                specs: ProductSpecs::default(),
                sizes: vec![],
            },
            quantity,
            selected_size: size.map(str::to_owned),
        }
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<b>X</b>"), "bX/b");
        assert_eq!(strip_markup("  12 Main St  "), "12 Main St");
        assert_eq!(strip_markup("<>"), "");
    }

    #[test]
    fn test_name_length_boundary() {
        assert!(CustomerDetails::new("Jo", "123", "x").validate().is_ok());
        assert_eq!(
            CustomerDetails::new("J", "123", "x").validate(),
            Err(CustomerError::NameTooShort)
        );
        assert_eq!(
            CustomerDetails::new("  J  ", "123", "x").validate(),
            Err(CustomerError::NameTooShort)
        );
        // Characters, not bytes.
        assert!(CustomerDetails::new("Żó", "1", "x").validate().is_ok());
    }

    #[test]
    fn test_place_sanitizes_and_totals() {
        let customer = CustomerDetails::new(" Jo ", "<123>", "<b>X</b>");
        let order = Order::place(
            OrderId::new("ORD-1-AAAAAA"),
            &customer,
            vec![line(1, 1000, 2, Some("M")), line(2, 500, 3, None)],
            Utc::now(),
        );

        assert_eq!(order.customer_name, "Jo");
        assert_eq!(order.contact_number, "123");
        assert_eq!(order.address, "bX/b");
        assert_eq!(order.total, Decimal::from(35));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.sizes(), vec!["M".to_string()]);
    }

    #[test]
    fn test_local_shape() {
        let order = Order::place(
            OrderId::new("ORD-1-AAAAAA"),
            &CustomerDetails::new("Jo", "1", "Home"),
            vec![line(1, 250, 1, None)],
            DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["customerName"], "Jo");
        assert_eq!(value["contactNumber"], "1");
        assert_eq!(value["total"], 2.5);
        assert_eq!(value["status"], "pending");
        assert_eq!(value["timestamp"], "2025-01-02T03:04:05Z");
    }
}
