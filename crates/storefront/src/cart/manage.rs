//! Admin actions on the catalog and on order status.
//!
//! Product writes go straight to the gateway and leave the local catalog
//! alone; the catalog's change subscription brings the result back.

use serde_json::json;
use soltan_core::{NewProduct, OrderId, OrderStatus, Product, ProductId};
use tracing::{error, info, instrument};

use super::CartEngine;
use crate::error::{StatusUpdateError, StoreError};
use crate::gateway::{Filter, Table};
use crate::schema::{NewProductRow, to_row};

impl CartEngine {
    /// Create a product.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the gateway
    /// refuses the insert.
    #[instrument(skip(self, product), fields(name = %product.name))]
    pub async fn add_product(&self, product: &NewProduct) -> Result<(), StoreError> {
        let result = async {
            let row = to_row(&NewProductRow::from(product))?;
            self.inner.gateway.insert(Table::Products, vec![row]).await?;
            Ok::<_, StoreError>(())
        }
        .await;

        match &result {
            Ok(()) => {
                info!("Product added");
                self.inner.toaster.success("Product added successfully");
            }
            Err(e) => {
                e.report("Failed to add product");
                self.inner
                    .toaster
                    .info(format!("Failed to add product: {}", e.reason()));
            }
        }
        result
    }

    /// Overwrite every editable column of `product`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the gateway
    /// refuses the update.
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn update_product(&self, product: &Product) -> Result<(), StoreError> {
        let result = async {
            let row = to_row(&NewProductRow::from(product))?;
            self.inner
                .gateway
                .update(
                    Table::Products,
                    vec![Filter::eq("id", product.id.as_i32())],
                    row,
                )
                .await?;
            Ok::<_, StoreError>(())
        }
        .await;

        match &result {
            Ok(()) => {
                self.inner.toaster.success("Product updated successfully");
            }
            Err(e) => {
                e.report("Failed to update product");
                self.inner.toaster.info("Failed to update product");
            }
        }
        result
    }

    /// # Errors
    ///
    /// Returns an error if the gateway refuses the delete.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: ProductId) -> Result<(), StoreError> {
        let result = self
            .inner
            .gateway
            .delete(Table::Products, vec![Filter::eq("id", product_id.as_i32())])
            .await;

        match result.map_err(StoreError::from) {
            Ok(()) => {
                self.inner.toaster.success("Product deleted");
                Ok(())
            }
            Err(e) => {
                e.report("Failed to delete product");
                self.inner.toaster.info("Failed to delete product");
                Err(e)
            }
        }
    }

    /// Move an order forward to `status`.
    ///
    /// The local copy changes only after the gateway accepted the update.
    ///
    /// # Errors
    ///
    /// Returns [`StatusUpdateError::InvalidTransition`] for a known order whose
    /// status would not move forward, or [`StatusUpdateError::Gateway`] when
    /// the update failed.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn update_order_status(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<(), StatusUpdateError> {
        let current = self
            .inner
            .orders
            .snapshot()
            .iter()
            .find(|order| &order.id == order_id)
            .map(|order| order.status);

        if let Some(from) = current.filter(|from| !from.can_advance_to(status)) {
            self.inner.toaster.info("Invalid status transition");
            return Err(StatusUpdateError::InvalidTransition {
                id: order_id.clone(),
                from,
                to: status,
            });
        }

        let result = self
            .inner
            .gateway
            .update(
                Table::Orders,
                vec![Filter::eq("id", order_id.as_str())],
                json!({ "status": status }),
            )
            .await;

        match result {
            Ok(()) => {
                self.inner.orders.apply(|orders| {
                    orders
                        .iter()
                        .map(|order| {
                            let mut order = order.clone();
                            if &order.id == order_id {
                                order.status = status;
                            }
                            order
                        })
                        .collect()
                });
                info!(%status, "Order status updated");
                self.inner
                    .toaster
                    .success(format!("Order #{order_id} marked as {status}"));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to update order status");
                self.inner.toaster.info("Failed to update order status");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use soltan_core::{CustomerDetails, Order, Price, ProductSpecs};

    use super::*;
    use crate::collection::SharedVec;
    use crate::gateway::{Gateway, MemoryGateway, Query};
    use crate::storage::MemoryStorage;
    use crate::toast::Toaster;

    fn new_product() -> NewProduct {
        NewProduct {
            name: "Onyx Signet".to_string(),
            price: Price::from_cents(8900),
            image: "onyx.jpg".to_string(),
            images: vec![],
            description: Some("Heavy".to_string()),
            category: "Rings".to_string(),
            collections: vec![],
            is_new: true,
            story: None,
            technical_specs: vec!["925".to_string()],
            specs: ProductSpecs::default(),
            sizes: vec![],
        }
    }

    fn setup() -> (Arc<MemoryGateway>, Toaster, SharedVec<Order>, CartEngine) {
        let gateway = Arc::new(MemoryGateway::new());
        let toaster = Toaster::new(Duration::from_secs(3));
        let orders = SharedVec::default();
        let engine = CartEngine::new(
            gateway.clone(),
            Arc::new(MemoryStorage::new()),
            toaster.clone(),
            orders.clone(),
        );
        (gateway, toaster, orders, engine)
    }

    fn pending_order(id: &str) -> Order {
        Order::place(
            OrderId::new(id),
            &CustomerDetails::new("Jo", "1", "Home"),
            vec![],
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_add_update_delete_product() {
        let (gateway, toaster, _, engine) = setup();

        engine.add_product(&new_product()).await.unwrap();
        assert_eq!(toaster.current().unwrap().message, "Product added successfully");
        let rows = gateway.rows(Table::Products);
        assert_eq!(rows[0]["is_new"], true);
        assert_eq!(rows[0]["technical_specs"][0], "925");

        let mut product = new_product().with_id(ProductId::new(1));
        product.name = "Onyx Signet II".to_string();
        engine.update_product(&product).await.unwrap();
        assert_eq!(gateway.rows(Table::Products)[0]["name"], "Onyx Signet II");
        assert_eq!(toaster.current().unwrap().message, "Product updated successfully");

        engine.delete_product(ProductId::new(1)).await.unwrap();
        assert!(gateway.rows(Table::Products).is_empty());
        assert_eq!(toaster.current().unwrap().message, "Product deleted");
    }

    #[tokio::test]
    async fn test_add_product_failure_reason() {
        let (gateway, toaster, _, engine) = setup();
        gateway.set_failing(Table::Products, true);

        assert!(engine.add_product(&new_product()).await.is_err());
        assert_eq!(
            toaster.current().unwrap().message,
            "Failed to add product: Service unavailable: products is unreachable"
        );
        assert!(engine.delete_product(ProductId::new(1)).await.is_err());
        assert_eq!(toaster.current().unwrap().message, "Failed to delete product");
    }

    #[tokio::test]
    async fn test_status_moves_forward_only() {
        let (gateway, toaster, orders, engine) = setup();
        gateway
            .insert(Table::Orders, vec![serde_json::json!({"id": "ORD-1", "status": "pending"})])
            .await
            .unwrap();
        orders.replace(vec![pending_order("ORD-1")]);
        let id = OrderId::new("ORD-1");

        engine
            .update_order_status(&id, OrderStatus::Shipped)
            .await
            .unwrap();
        assert_eq!(orders.snapshot()[0].status, OrderStatus::Shipped);
        assert_eq!(
            toaster.current().unwrap().message,
            "Order #ORD-1 marked as shipped"
        );
        let remote = gateway
            .query(Table::Orders, Query::new().eq("id", "ORD-1"))
            .await
            .unwrap();
        assert_eq!(remote[0]["status"], "shipped");

        let result = engine.update_order_status(&id, OrderStatus::Pending).await;
        assert!(matches!(
            result,
            Err(StatusUpdateError::InvalidTransition { .. })
        ));
        assert_eq!(toaster.current().unwrap().message, "Invalid status transition");
        assert_eq!(orders.snapshot()[0].status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn test_status_failure_keeps_local_state() {
        let (gateway, toaster, orders, engine) = setup();
        orders.replace(vec![pending_order("ORD-2")]);
        gateway.set_failing(Table::Orders, true);

        let result = engine
            .update_order_status(&OrderId::new("ORD-2"), OrderStatus::Delivered)
            .await;
        assert!(matches!(result, Err(StatusUpdateError::Gateway(_))));
        assert_eq!(orders.snapshot()[0].status, OrderStatus::Pending);
        assert_eq!(toaster.current().unwrap().message, "Failed to update order status");
    }
}
