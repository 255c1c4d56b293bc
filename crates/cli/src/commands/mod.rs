//! Subcommand implementations.
//!
//! Results are written to stdout; logs go to stderr.

#![allow(clippy::print_stdout)]

pub mod admin;
pub mod catalog;
pub mod checkout;
pub mod orders;

use thiserror::Error;

/// Errors raised by the commands themselves, on top of storefront errors.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Neither `--password` nor the environment provided a password.
    #[error("No password given: pass --password or set {0}")]
    MissingPassword(&'static str),

    /// The signed-in account is not on the admin allowlist.
    #[error("{0} is not an admin")]
    NotAdmin(String),

    /// A checkout item could not be parsed.
    #[error("Invalid item {0:?}: expected <product id> or <product id>:<size>")]
    InvalidItem(String),

    /// A checkout item names a product missing from the catalog.
    #[error("Product {0} is not in the catalog")]
    UnknownProduct(i32),

    /// The seed file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Some products of a seed file were refused.
    #[error("{failed} of {total} products could not be added")]
    SeedIncomplete { failed: usize, total: usize },

    /// The order feed did not deliver in time.
    #[error("Timed out waiting for the order feed")]
    FeedTimeout,
}
