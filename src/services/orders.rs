use crate::{
    entities::{order, order_item, Order, OrderItem, OrderModel, PaymentMethod},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Line item snapshot captured from the cart at order time.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub color: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Shipping address snapshot copied from the customer's address book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub alias: String,
    pub details: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
}

/// Everything needed to persist one order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub items: Vec<NewOrderItem>,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipping_address: ShippingAddress,
}

/// Order with its line items, the shape returned to API callers.
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: OrderModel,
    pub items: Vec<order_item::Model>,
}

/// Order ledger: persists immutable order snapshots and drives the three
/// monotone status transitions.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Inserts the order snapshot and its line items on the given
    /// connection. Runs inside the settlement transaction, so it takes the
    /// connection rather than opening its own.
    pub async fn insert_order(
        &self,
        conn: &impl ConnectionTrait,
        input: NewOrder,
    ) -> Result<OrderModel, ServiceError> {
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let order = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(input.customer_id),
            tax: Set(input.tax),
            shipping: Set(input.shipping),
            total: Set(input.total),
            payment_method: Set(input.payment_method),
            paid: Set(input.paid_at.is_some()),
            paid_at: Set(input.paid_at),
            delivered: Set(false),
            delivered_at: Set(None),
            cancelled: Set(false),
            cancelled_at: Set(None),
            address_alias: Set(input.shipping_address.alias),
            address_details: Set(input.shipping_address.details),
            address_phone: Set(input.shipping_address.phone),
            address_city: Set(input.shipping_address.city),
            address_postal_code: Set(input.shipping_address.postal_code),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let order = order.insert(conn).await?;

        for item in input.items {
            let order_item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                color: Set(item.color),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                created_at: Set(now),
            };
            order_item.insert(conn).await?;
        }

        Ok(order)
    }

    /// Retrieves an order with its line items.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order.find_related(OrderItem).all(&*self.db).await?;

        Ok(OrderWithItems { order, items })
    }

    /// Lists orders, newest first, optionally scoped to one customer.
    pub async fn list_orders(
        &self,
        customer_id: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if let Some(customer_id) = customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((data, total))
    }

    /// Marks an order paid. Idempotent: a second call leaves the original
    /// `paid_at` untouched.
    #[instrument(skip(self))]
    pub async fn mark_paid(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.find_order_model(order_id).await?;
        if order.paid {
            return Ok(order);
        }

        let mut active: order::ActiveModel = order.into();
        active.paid = Set(true);
        active.paid_at = Set(Some(Utc::now()));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender.send_or_log(Event::OrderPaid(order_id)).await;
        info!(%order_id, "order marked paid");
        Ok(updated)
    }

    /// Marks an order delivered. Fails on a cancelled order.
    #[instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.find_order_model(order_id).await?;
        if order.cancelled {
            return Err(ServiceError::Conflict(format!(
                "Order {} is cancelled and cannot be delivered",
                order_id
            )));
        }
        if order.delivered {
            return Ok(order);
        }

        let mut active: order::ActiveModel = order.into();
        active.delivered = Set(true);
        active.delivered_at = Set(Some(Utc::now()));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderDelivered(order_id))
            .await;
        info!(%order_id, "order marked delivered");
        Ok(updated)
    }

    /// Cancels an order. Fails on a delivered order.
    #[instrument(skip(self))]
    pub async fn mark_cancelled(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.find_order_model(order_id).await?;
        if order.delivered {
            return Err(ServiceError::Conflict(format!(
                "Order {} is delivered and cannot be cancelled",
                order_id
            )));
        }
        if order.cancelled {
            return Ok(order);
        }

        let mut active: order::ActiveModel = order.into();
        active.cancelled = Set(true);
        active.cancelled_at = Set(Some(Utc::now()));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;
        info!(%order_id, "order cancelled");
        Ok(updated)
    }

    async fn find_order_model(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}
