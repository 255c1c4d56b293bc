//! Catalog commands: list, watch and seed.

use std::collections::BTreeMap;
use std::path::Path;

use soltan_core::{NewProduct, Product};
use soltan_storefront::Store;
use tracing::{info, warn};

use super::CommandError;
use super::admin::{self, Credentials};

/// Print the current catalog.
///
/// # Errors
///
/// Never fails; the signature matches the other commands.
#[allow(clippy::unnecessary_wraps)]
pub fn list(store: &Store) -> Result<(), Box<dyn std::error::Error>> {
    let products = store.catalog().products();
    if products.is_empty() {
        println!("No products");
        return Ok(());
    }
    for product in products.iter() {
        println!("{}", format_product(product));
    }
    println!("{} products", products.len());
    Ok(())
}

/// Print every catalog change until Ctrl+C.
///
/// # Errors
///
/// Returns an error if the Ctrl+C handler cannot be installed.
pub async fn watch(store: &Store) -> Result<(), Box<dyn std::error::Error>> {
    let mut rx = store.catalog().watch();
    let mut previous = rx.borrow_and_update().clone();
    println!("Watching {} products, Ctrl+C to stop", previous.len());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                return Ok(());
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = rx.borrow_and_update().clone();
                for line in describe_changes(&previous, &current) {
                    println!("{line}");
                }
                previous = current;
            }
        }
    }
}

/// Sign in and insert every product of a YAML file.
///
/// The new rows show up in the catalog through its change subscription.
///
/// # Errors
///
/// Returns an error if sign-in fails, the file cannot be read or parsed, or
/// any product is refused.
pub async fn seed(
    store: &Store,
    file_path: &str,
    credentials: &Credentials,
) -> Result<(), Box<dyn std::error::Error>> {
    let products = load_products(file_path).await?;
    info!(path = %file_path, count = products.len(), "Parsed seed file");

    admin::sign_in(store, credentials).await?;

    let mut failed = 0;
    for product in &products {
        match store.cart().add_product(product).await {
            Ok(()) => println!("added  {}", product.name),
            Err(e) => {
                warn!(name = %product.name, error = %e, "Product refused");
                println!("failed {}: {e}", product.name);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(CommandError::SeedIncomplete {
            failed,
            total: products.len(),
        }
        .into());
    }
    println!("Seeded {} products", products.len());
    Ok(())
}

async fn load_products(file_path: &str) -> Result<Vec<NewProduct>, Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(CommandError::FileNotFound(file_path.to_owned()).into());
    }
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_yaml::from_str(&content)?)
}

fn format_product(product: &Product) -> String {
    let mut line = format!(
        "{:>5}  {:<32} {:>10}  {}",
        product.id.to_string(),
        product.name,
        product.price.to_string(),
        product.category
    );
    if product.is_new {
        line.push_str("  [new]");
    }
    if !product.sizes.is_empty() {
        line.push_str(&format!("  sizes: {}", product.sizes.join("/")));
    }
    line
}

/// One line per product added, removed or changed between two versions.
fn describe_changes(previous: &[Product], current: &[Product]) -> Vec<String> {
    let before: BTreeMap<_, _> = previous.iter().map(|p| (p.id, p)).collect();
    let after: BTreeMap<_, _> = current.iter().map(|p| (p.id, p)).collect();

    let mut lines = Vec::new();
    for (id, product) in &after {
        match before.get(id) {
            None => lines.push(format!("+ {}", format_product(product))),
            Some(old) if old != product => lines.push(format!("~ {}", format_product(product))),
            Some(_) => {}
        }
    }
    for (id, product) in &before {
        if !after.contains_key(id) {
            lines.push(format!("- {}", format_product(product)));
        }
    }
    lines
}
