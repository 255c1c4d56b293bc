//! Newtype IDs for type-safe entity references.
//!
//! Integer ids assigned by the remote service are declared with `define_id!`.
//! Orders are identified by a client-generated string token instead, see
//! [`OrderId`].

use core::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Macro to define a type-safe integer ID wrapper.
///
/// Creates a newtype wrapper around `i32` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `PartialOrd`, `Ord`, `Hash`
/// - Conversion methods: `new()`, `as_i32()`
/// - `From<i32>` and `Into<i32>` implementations
///
/// # Example
///
/// ```rust
/// # use soltan_core::define_id;
/// define_id!(WidgetId);
/// define_id!(GadgetId);
///
/// let widget = WidgetId::new(1);
/// let gadget = GadgetId::new(1);
///
/// // These are different types, so this won't compile:
/// // let _: WidgetId = gadget;
/// # let _ = (widget, gadget);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            /// Create a new ID from an i32 value.
            #[must_use]
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            /// Get the underlying i32 value.
            #[must_use]
            pub const fn as_i32(&self) -> i32 {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i32> for $name {
            fn from(id: i32) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(ProductId);

const ORDER_ID_PREFIX: &str = "ORD";
const ORDER_ID_SUFFIX_LEN: usize = 6;
const SUFFIX_RADIX: u32 = 36;

/// Client-generated order identifier.
///
/// Format: `ORD-<unix millis>-<6 uppercase base-36 characters>`. The
/// timestamp keeps ids roughly creation-ordered; the random suffix separates
/// orders placed within the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Wrap an existing order id (e.g. one read back from the remote service).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id for an order created at `now_millis`.
    #[must_use]
    pub fn generate(now_millis: i64) -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..ORDER_ID_SUFFIX_LEN)
            .filter_map(|_| char::from_digit(rng.random_range(0..SUFFIX_RADIX), SUFFIX_RADIX))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self(format!("{ORDER_ID_PREFIX}-{now_millis}-{suffix}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_product_ids_order_numerically() {
        let mut ids = vec![ProductId::new(10), ProductId::new(2), ProductId::new(7)];
        ids.sort();
        assert_eq!(ids, vec![ProductId::new(2), ProductId::new(7), ProductId::new(10)]);
    }

    #[test]
    fn test_product_id_serde_is_transparent() {
        let json = serde_json::to_string(&ProductId::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_generated_order_id_shape() {
        let id = OrderId::generate(1_700_000_000_000);
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.first(), Some(&"ORD"));
        assert_eq!(parts.get(1), Some(&"1700000000000"));
        let suffix = parts.get(2).unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn test_generated_suffixes_stay_in_alphabet() {
        for _ in 0..500 {
            let id = OrderId::generate(0);
            let suffix = id.as_str().rsplit('-').next().unwrap();
            assert_eq!(suffix.len(), ORDER_ID_SUFFIX_LEN);
            assert!(suffix.chars().all(|c| c.is_digit(SUFFIX_RADIX) && !c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_generated_order_ids_differ() {
        let a = OrderId::generate(1);
        let b = OrderId::generate(1);
        // 36^6 possible suffixes; a collision here means the rng is broken.
        assert_ne!(a, b);
    }
}
