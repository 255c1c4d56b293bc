//! Place an order from the command line.

use soltan_core::{CustomerDetails, Order, ProductId};
use soltan_storefront::Store;

use super::CommandError;

/// Fill the cart with `items` and submit it.
///
/// Starts from an empty cart so lines left over from an earlier run are not
/// ordered again.
///
/// # Errors
///
/// Returns an error if an item is malformed or not in the catalog, or if the
/// checkout is refused.
pub async fn place(
    store: &Store,
    name: &str,
    phone: &str,
    address: &str,
    items: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let lines = items
        .iter()
        .map(|item| parse_item(item))
        .collect::<Result<Vec<_>, _>>()?;

    let products = store.catalog().products();
    let cart = store.cart();
    cart.clear_cart();
    for (id, size) in &lines {
        let product = products
            .iter()
            .find(|product| product.id == *id)
            .ok_or(CommandError::UnknownProduct(id.as_i32()))?;
        cart.add_to_cart(product, size.as_deref());
    }

    let order = cart
        .create_order(&CustomerDetails::new(name, phone, address))
        .await?;
    print_receipt(&order);
    Ok(())
}

/// Parse `<product id>` or `<product id>:<size>`.
fn parse_item(item: &str) -> Result<(ProductId, Option<String>), CommandError> {
    let invalid = || CommandError::InvalidItem(item.to_owned());
    let (id, size) = match item.split_once(':') {
        Some((id, size)) if !size.trim().is_empty() => (id, Some(size.trim().to_owned())),
        Some(_) => return Err(invalid()),
        None => (item, None),
    };
    let id = id.trim().parse::<i32>().map_err(|_| invalid())?;
    Ok((ProductId::new(id), size))
}

fn print_receipt(order: &Order) {
    println!("Order {} placed for {}", order.id, order.customer_name);
    for item in &order.items {
        let size = item
            .selected_size
            .as_deref()
            .map(|size| format!(" ({size})"))
            .unwrap_or_default();
        println!(
            "  {} x {}{size}  ${:.2}",
            item.quantity,
            item.product.name,
            item.line_total()
        );
    }
    println!("Total ${:.2}", order.total);
}
