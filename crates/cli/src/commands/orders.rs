//! Order commands for admins.

use std::time::Duration;

use soltan_core::{Order, OrderId, OrderStatus};
use soltan_storefront::Store;
use tokio::time::timeout;

use super::CommandError;
use super::admin::{self, Credentials};

const FEED_TIMEOUT: Duration = Duration::from_secs(10);

/// Sign in and print the most recent orders.
///
/// # Errors
///
/// Returns an error if sign-in fails or the feed does not deliver in time.
pub async fn list(store: &Store, credentials: &Credentials) -> Result<(), Box<dyn std::error::Error>> {
    sign_in_and_wait_for_feed(store, credentials).await?;

    let orders = store.orders().orders();
    if orders.is_empty() {
        println!("No orders");
        return Ok(());
    }
    for order in orders.iter() {
        println!("{}", format_order(order));
    }
    Ok(())
}

/// Sign in and move one order forward.
///
/// # Errors
///
/// Returns an error if sign-in fails, the transition goes backwards, or the
/// update is refused.
pub async fn set_status(
    store: &Store,
    id: &str,
    status: OrderStatus,
    credentials: &Credentials,
) -> Result<(), Box<dyn std::error::Error>> {
    sign_in_and_wait_for_feed(store, credentials).await?;

    store
        .cart()
        .update_order_status(&OrderId::new(id), status)
        .await?;
    println!("Order {id} marked as {status}");
    Ok(())
}

/// The feed activates once the guard grants access; wait for its first fetch
/// so status checks see the current orders.
async fn sign_in_and_wait_for_feed(
    store: &Store,
    credentials: &Credentials,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut feed = store.orders().watch();
    admin::sign_in(store, credentials).await?;
    timeout(FEED_TIMEOUT, feed.changed())
        .await
        .map_err(|_| CommandError::FeedTimeout)??;
    Ok(())
}

fn format_order(order: &Order) -> String {
    let total = format!("${:.2}", order.total);
    format!(
        "{:<26} {:<9} {total:>10}  {:<24} {}",
        order.id.as_str(),
        order.status.as_str(),
        order.customer_name,
        order.timestamp.format("%Y-%m-%d %H:%M")
    )
}
