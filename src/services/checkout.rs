use crate::{
    config::AppConfig,
    entities::{
        cart_item, customer, customer_address, Cart, CartItem, CartModel, Customer,
        CustomerAddress, OrderModel, PaymentMethod,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        coupons::CouponService,
        inventory::{InventoryService, SaleLine},
        orders::{NewOrder, NewOrderItem, OrderService, ShippingAddress},
        payment_gateway::{self, CreateSessionInput, GatewaySession, PaymentGateway},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Checkout orchestrator: turns a cart into a durable order.
///
/// Two paths share one settlement core. The cash path runs synchronously
/// inside the request. The card path only creates a hosted gateway session;
/// order creation and settlement are deferred to the payment-completed
/// webhook, reconciled by [`CheckoutService::reconcile_completed_session`].
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    coupons: Arc<CouponService>,
    inventory: Arc<InventoryService>,
    orders: Arc<OrderService>,
    gateway: Option<Arc<PaymentGateway>>,
}

/// A cart resolved and authorized for checkout.
struct ResolvedCheckout {
    cart: CartModel,
    items: Vec<cart_item::Model>,
    total: Decimal,
    address: ShippingAddress,
}

/// Payment-completed notification, already authenticated and parsed by the
/// webhook handler. Every field is gateway-supplied; nothing here comes
/// from the client, which is what makes the card path tamper-proof.
#[derive(Debug, Clone)]
pub struct CompletedSession {
    pub cart_id: Uuid,
    pub customer_email: String,
    pub amount_total_minor: i64,
    pub tax_minor: i64,
    pub shipping_minor: i64,
    pub shipping_address: ShippingAddress,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        coupons: Arc<CouponService>,
        inventory: Arc<InventoryService>,
        orders: Arc<OrderService>,
        gateway: Option<Arc<PaymentGateway>>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            coupons,
            inventory,
            orders,
            gateway,
        }
    }

    /// Cash-on-delivery checkout: creates the order (`paid = false`) and
    /// runs settlement synchronously, all in one transaction.
    #[instrument(skip(self))]
    pub async fn create_cash_order(
        &self,
        customer_id: Uuid,
        cart_id: Uuid,
        address_alias: &str,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let resolved = self
            .resolve_checkout(&txn, customer_id, cart_id, address_alias)
            .await?;

        let order = self
            .orders
            .insert_order(
                &txn,
                NewOrder {
                    customer_id,
                    items: snapshot_items(&resolved.items),
                    tax: self.config.order_tax,
                    shipping: self.config.order_shipping,
                    total: resolved.total,
                    payment_method: PaymentMethod::Cash,
                    paid_at: None,
                    shipping_address: resolved.address.clone(),
                },
            )
            .await?;

        let coupon_id = resolved.cart.coupon_id;
        self.settle(&txn, &resolved.cart, &resolved.items).await?;

        txn.commit().await?;

        self.publish_settlement_events(order.id, coupon_id).await;
        info!(order_id = %order.id, %cart_id, "cash order created");
        Ok(order)
    }

    /// Card checkout: resolves and validates exactly like the cash path,
    /// then hands off to the gateway. No order exists and no side effect
    /// runs until the completion webhook arrives.
    #[instrument(skip(self))]
    pub async fn create_checkout_session(
        &self,
        customer_id: Uuid,
        customer_email: &str,
        cart_id: Uuid,
        address_alias: &str,
    ) -> Result<GatewaySession, ServiceError> {
        let gateway = self.gateway.as_ref().ok_or_else(|| {
            ServiceError::GatewayError("payment gateway is not configured".to_string())
        })?;

        let resolved = self
            .resolve_checkout(&*self.db, customer_id, cart_id, address_alias)
            .await?;

        let amount_minor = payment_gateway::to_minor_units(resolved.total)?;
        let address = &resolved.address;

        let mut metadata = vec![("shipping_alias".to_string(), address.alias.clone())];
        let optional = [
            ("shipping_details", &address.details),
            ("shipping_phone", &address.phone),
            ("shipping_city", &address.city),
            ("shipping_postal_code", &address.postal_code),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                metadata.push((key.to_string(), value.clone()));
            }
        }

        let session = gateway
            .create_session(CreateSessionInput {
                amount_minor,
                currency: self.config.currency.clone(),
                description: format!("Order of {} item(s)", resolved.items.len()),
                customer_email: customer_email.to_string(),
                cart_id,
                success_url: self
                    .config
                    .checkout_success_url
                    .clone()
                    .unwrap_or_else(|| "https://example.com/orders".to_string()),
                cancel_url: self
                    .config
                    .checkout_cancel_url
                    .clone()
                    .unwrap_or_else(|| "https://example.com/cart".to_string()),
                metadata,
            })
            .await?;

        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                cart_id,
                session_id: session.id.clone(),
            })
            .await;

        Ok(session)
    }

    /// Reconciles a gateway "payment completed" notification into an order.
    ///
    /// Idempotent: the cart's existence is the processing token. A cart
    /// that is already gone means an earlier delivery settled it, so the
    /// re-delivery is acknowledged as a no-op (`Ok(None)`).
    #[instrument(skip(self, event), fields(cart_id = %event.cart_id))]
    pub async fn reconcile_completed_session(
        &self,
        event: CompletedSession,
    ) -> Result<Option<OrderModel>, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = match Cart::find_by_id(event.cart_id).one(&txn).await? {
            Some(cart) => cart,
            None => {
                info!(cart_id = %event.cart_id, "cart already consumed; duplicate delivery ignored");
                return Ok(None);
            }
        };

        let customer = Customer::find()
            .filter(customer::Column::Email.eq(event.customer_email.clone()))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No customer with email {}",
                    event.customer_email
                ))
            })?;

        let items = cart.find_related(CartItem).all(&txn).await?;
        if items.is_empty() {
            warn!(cart_id = %cart.id, "completed session references an empty cart");
            return Err(ServiceError::EmptyCart);
        }

        // Amounts come from the gateway payload, not from the cart: the
        // gateway charged what the session said, and that is the financial
        // record.
        let order = self
            .orders
            .insert_order(
                &txn,
                NewOrder {
                    customer_id: customer.id,
                    items: snapshot_items(&items),
                    tax: Decimal::new(event.tax_minor, 2),
                    shipping: Decimal::new(event.shipping_minor, 2),
                    total: Decimal::new(event.amount_total_minor, 2),
                    payment_method: PaymentMethod::Card,
                    paid_at: Some(Utc::now()),
                    shipping_address: event.shipping_address,
                },
            )
            .await?;

        let cart_id = cart.id;
        let coupon_id = cart.coupon_id;
        self.settle(&txn, &cart, &items).await?;

        txn.commit().await?;

        self.publish_settlement_events(order.id, coupon_id).await;
        self.event_sender
            .send_or_log(Event::PaymentReconciled {
                cart_id,
                order_id: order.id,
            })
            .await;

        info!(order_id = %order.id, %cart_id, "gateway payment reconciled into order");
        Ok(Some(order))
    }

    /// Resolves the cart and shipping address, enforcing ownership and the
    /// non-empty invariant, and computes the amount to charge.
    async fn resolve_checkout(
        &self,
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
        cart_id: Uuid,
        address_alias: &str,
    ) -> Result<ResolvedCheckout, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if cart.customer_id != customer_id {
            return Err(ServiceError::Forbidden(
                "Cart does not belong to the requesting customer".to_string(),
            ));
        }

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(conn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let effective = cart.discounted_total.unwrap_or(cart.subtotal);
        let total = effective + self.config.order_tax + self.config.order_shipping;

        let address = CustomerAddress::find()
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .filter(customer_address::Column::Alias.eq(address_alias))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No address found with alias {}", address_alias))
            })?;

        Ok(ResolvedCheckout {
            cart,
            items,
            total,
            address: ShippingAddress {
                alias: address.alias,
                details: address.details,
                phone: address.phone,
                city: address.city,
                postal_code: address.postal_code,
            },
        })
    }

    /// The settlement side effects shared by both paths, in order: coupon
    /// consumption, inventory debit, cart deletion. Runs on the caller's
    /// transaction so a failure anywhere rolls everything back, order
    /// insert included.
    async fn settle(
        &self,
        conn: &impl ConnectionTrait,
        cart: &CartModel,
        items: &[cart_item::Model],
    ) -> Result<(), ServiceError> {
        if let Some(coupon_id) = cart.coupon_id {
            self.coupons.consume_usage(conn, coupon_id).await?;
        }

        let lines: Vec<SaleLine> = items
            .iter()
            .map(|item| SaleLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect();
        self.inventory.commit_sale(conn, &lines).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(conn)
            .await?;
        Cart::delete_by_id(cart.id).exec(conn).await?;

        Ok(())
    }

    async fn publish_settlement_events(&self, order_id: Uuid, coupon_id: Option<Uuid>) {
        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;
        if let Some(coupon_id) = coupon_id {
            self.event_sender
                .send_or_log(Event::CouponRedeemed { coupon_id, order_id })
                .await;
        }
        self.event_sender
            .send_or_log(Event::StockCommitted { order_id })
            .await;
    }
}

fn snapshot_items(items: &[cart_item::Model]) -> Vec<NewOrderItem> {
    items
        .iter()
        .map(|item| NewOrderItem {
            product_id: item.product_id,
            color: item.color.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn gateway_minor_amounts_convert_to_exact_decimals() {
        // 21000 minor units -> 210.00
        assert_eq!(Decimal::new(21000, 2), dec!(210.00));
        assert_eq!(Decimal::new(0, 2), dec!(0.00));
        assert_eq!(Decimal::new(4999, 2), dec!(49.99));
    }

    #[test]
    fn snapshot_copies_stored_prices() {
        let now = Utc::now();
        let item = cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            color: Some("black".to_string()),
            quantity: 2,
            unit_price: dec!(100),
            created_at: now,
            updated_at: now,
        };

        let snapshot = snapshot_items(std::slice::from_ref(&item));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].product_id, item.product_id);
        assert_eq!(snapshot[0].quantity, 2);
        assert_eq!(snapshot[0].unit_price, dec!(100));
        assert_eq!(snapshot[0].color.as_deref(), Some("black"));
    }
}
