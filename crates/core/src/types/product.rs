//! Catalog products.

use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::price::Price;

/// Named merchandising collections a product can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductCollection {
    #[serde(rename = "Top Sellers")]
    TopSellers,
    #[serde(rename = "Full Collection")]
    FullCollection,
}

impl ProductCollection {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::TopSellers => "Top Sellers",
            Self::FullCollection => "Full Collection",
        }
    }

    /// Look up a collection by its display label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Top Sellers" => Some(Self::TopSellers),
            "Full Collection" => Some(Self::FullCollection),
            _ => None,
        }
    }
}

/// Physical details shown on every product card.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductSpecs {
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub weight: String,
    #[serde(default)]
    pub resistance: String,
}

/// A catalog product as held in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
    /// Primary image reference.
    pub image: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: String,
    #[serde(default)]
    pub collections: Vec<ProductCollection>,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    #[serde(default)]
    pub technical_specs: Vec<String>,
    #[serde(default)]
    pub specs: ProductSpecs,
    /// Size variants offered for this product.
    #[serde(default)]
    pub sizes: Vec<String>,
}

/// A product that has not been assigned an id by the remote service yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub price: Price,
    pub image: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    #[serde(default)]
    pub collections: Vec<ProductCollection>,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub story: Option<String>,
    #[serde(default)]
    pub technical_specs: Vec<String>,
    #[serde(default)]
    pub specs: ProductSpecs,
    #[serde(default)]
    pub sizes: Vec<String>,
}

impl NewProduct {
    /// Attach the id the remote service assigned.
    #[must_use]
    pub fn with_id(self, id: ProductId) -> Product {
        Product {
            id,
            name: self.name,
            price: self.price,
            image: self.image,
            images: self.images,
            description: self.description,
            category: self.category,
            collections: self.collections,
            is_new: self.is_new,
            story: self.story,
            technical_specs: self.technical_specs,
            specs: self.specs,
            sizes: self.sizes,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_cached_product_fills_defaults() {
        let json = r#"{"id":3,"name":"Crown Ring","price":120,"image":"ring.jpg","category":"Rings"}"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert_eq!(product.id, ProductId::new(3));
        assert!(product.images.is_empty());
        assert!(!product.is_new);
        assert_eq!(product.specs, ProductSpecs::default());
        assert!(product.sizes.is_empty());
    }

    #[test]
    fn test_local_shape_uses_camel_case() {
        let product = NewProduct {
            name: "Vault Hoodie".to_string(),
            price: Price::from_cents(8900),
            image: "hoodie.jpg".to_string(),
            images: vec![],
            description: None,
            category: "Clothes".to_string(),
            collections: vec![ProductCollection::TopSellers],
            is_new: true,
            story: None,
            technical_specs: vec!["Heavyweight cotton".to_string()],
            specs: ProductSpecs::default(),
            sizes: vec!["M".to_string(), "L".to_string()],
        }
        .with_id(ProductId::new(9));

        let value = serde_json::to_value(&product).unwrap();
        assert_eq!(value["isNew"], true);
        assert_eq!(value["technicalSpecs"][0], "Heavyweight cotton");
        assert_eq!(value["collections"][0], "Top Sellers");
    }

    #[test]
    fn test_collection_labels() {
        assert_eq!(
            ProductCollection::from_label("Full Collection"),
            Some(ProductCollection::FullCollection)
        );
        assert_eq!(ProductCollection::from_label("Clearance"), None);
        assert_eq!(ProductCollection::TopSellers.label(), "Top Sellers");
    }
}
