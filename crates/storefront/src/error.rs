//! Unified error handling with Sentry integration.
//!
//! Synchronizers never let a gateway failure escape: they turn it into a toast
//! or a logged, unchanged state. The typed errors here are what the public
//! mutating operations return so callers can still branch on the outcome.

use soltan_core::{CustomerError, OrderId, OrderStatus};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::storage::StorageError;

/// Library-level error type for the storefront.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Remote data service operation failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Local storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serializing a payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Log this error under `action` and send it to Sentry.
    pub fn report(&self, action: &str) {
        let event_id = sentry::capture_error(self);
        tracing::error!(
            error = %self,
            sentry_event_id = %event_id,
            "{action}"
        );
    }

    /// The part of the error worth showing to an admin.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Gateway(inner) => inner.to_string(),
            other => other.to_string(),
        }
    }
}

/// Why an order could not be submitted.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Name is too short")]
    NameTooShort,

    #[error("Failed to create order: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Failed to encode order: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<CustomerError> for CheckoutError {
    fn from(err: CustomerError) -> Self {
        match err {
            CustomerError::NameTooShort => Self::NameTooShort,
        }
    }
}

/// Why an order status change was refused.
#[derive(Debug, Error)]
pub enum StatusUpdateError {
    #[error("Invalid status transition for order {id}: {from} -> {to}")]
    InvalidTransition {
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Failed to update order status: {0}")]
    Gateway(#[from] GatewayError),
}

/// Set the Sentry user context for a signed-in admin.
pub fn set_sentry_user(user_id: &str, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a user action.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::from(GatewayError::NotAuthenticated);
        assert_eq!(err.to_string(), "Gateway error: Not authenticated");
        assert_eq!(err.reason(), "Not authenticated");
    }

    #[test]
    fn test_customer_error_maps_to_checkout() {
        assert!(matches!(
            CheckoutError::from(CustomerError::NameTooShort),
            CheckoutError::NameTooShort
        ));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = StatusUpdateError::InvalidTransition {
            id: OrderId::new("ORD-1-AAAAAA"),
            from: OrderStatus::Shipped,
            to: OrderStatus::Pending,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition for order ORD-1-AAAAAA: shipped -> pending"
        );
    }

    #[test]
    fn test_report_without_client_is_noop() {
        let err = StoreError::from(GatewayError::Unavailable("down".to_string()));
        err.report("Failed to add product");
    }
}
