use crate::{
    entities::{product, Product},
    errors::ServiceError,
};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// One inventory movement: `quantity` units of `product_id` leaving stock.
#[derive(Debug, Clone)]
pub struct SaleLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Inventory ledger over the products table.
///
/// Stock only moves at settlement time, as a paired decrement of
/// `quantity` and increment of `sold` in a single guarded UPDATE per
/// product, so concurrent orders cannot lose updates or oversell.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Commits the stock movements for one order inside the caller's
    /// transaction.
    ///
    /// # Errors
    ///
    /// * `InsufficientStock` - a line would drive `quantity` negative
    /// * `NotFound` - a line references a product that no longer exists
    #[instrument(skip(self, conn, lines), fields(line_count = lines.len()))]
    pub async fn commit_sale(
        &self,
        conn: &impl ConnectionTrait,
        lines: &[SaleLine],
    ) -> Result<(), ServiceError> {
        for line in lines {
            let result = Product::update_many()
                .col_expr(
                    product::Column::Quantity,
                    Expr::col(product::Column::Quantity).sub(line.quantity),
                )
                .col_expr(
                    product::Column::Sold,
                    Expr::col(product::Column::Sold).add(line.quantity),
                )
                .filter(product::Column::Id.eq(line.product_id))
                .filter(product::Column::Quantity.gte(line.quantity))
                .exec(conn)
                .await?;

            if result.rows_affected == 0 {
                // Distinguish a vanished product from an oversell.
                let exists = Product::find_by_id(line.product_id).one(conn).await?;
                return match exists {
                    Some(p) => {
                        warn!(
                            product_id = %line.product_id,
                            on_hand = p.quantity,
                            requested = line.quantity,
                            "rejected oversell at settlement"
                        );
                        Err(ServiceError::InsufficientStock(format!(
                            "Product {} has {} units on hand, {} requested",
                            line.product_id, p.quantity, line.quantity
                        )))
                    }
                    None => Err(ServiceError::NotFound(format!(
                        "Product {} not found",
                        line.product_id
                    ))),
                };
            }
        }

        Ok(())
    }

    /// Current on-hand/sold counters for a product.
    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }
}
