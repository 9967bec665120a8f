use crate::{
    entities::{cart, cart_item, Cart, CartItem, CartModel, Product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::{self, CouponService},
};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Cart pricing engine: owns each customer's in-progress cart.
///
/// Every mutation recomputes the subtotal from the stored line prices and
/// clears any applied coupon, so a stale discount can never survive a cart
/// change. Coupon usage is NOT consumed here; that happens at settlement.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    coupons: Arc<CouponService>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        coupons: Arc<CouponService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            coupons,
        }
    }

    /// Retrieves the customer's cart with all its items.
    ///
    /// # Errors
    ///
    /// * `NotFound` - the customer has no cart yet
    #[instrument(skip(self))]
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let cart = self.find_cart(&*self.db, customer_id).await?;
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await?;

        Ok(CartWithItems { cart, items })
    }

    /// Adds one unit of a product to the cart, creating the cart lazily on
    /// first use.
    ///
    /// The product's current catalog price is captured on the new line. If
    /// a line with the same product and color already exists, its quantity
    /// is incremented instead and its original price kept.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        input: AddItemInput,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let cart = match Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
        {
            Some(cart) => cart,
            None => {
                let cart = cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    customer_id: Set(customer_id),
                    subtotal: Set(Decimal::ZERO),
                    coupon_id: Set(None),
                    discounted_total: Set(None),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                };
                let cart = cart.insert(&txn).await?;
                self.event_sender.send_or_log(Event::CartCreated(cart.id)).await;
                cart
            }
        };

        let existing_item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .filter(match &input.color {
                Some(color) => cart_item::Column::Color.eq(color.clone()),
                None => cart_item::Column::Color.is_null(),
            })
            .one(&txn)
            .await?;

        if let Some(item) = existing_item {
            let quantity = item.quantity;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(quantity + 1);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(input.product_id),
                color: Set(input.color.clone()),
                quantity: Set(1),
                unit_price: Set(product.price),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            item.insert(&txn).await?;
        }

        let cart_id = cart.id;
        let (cart, items) = self.reprice_cart(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                product_id: input.product_id,
            })
            .await;

        info!(%cart_id, product_id = %input.product_id, "added item to cart");
        Ok(CartWithItems { cart, items })
    }

    /// Sets the quantity of a cart line.
    ///
    /// The line keeps the unit price captured when it was added; the
    /// subtotal is recomputed from stored prices, not re-fetched ones.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - quantity below 1
    /// * `NotFound` - no such item in this customer's cart
    #[instrument(skip(self))]
    pub async fn set_item_quantity(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let cart = self.find_cart(&txn, customer_id).await?;
        let item = self.find_item(&txn, cart.id, item_id).await?;

        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(quantity);
        item.updated_at = Set(Utc::now());
        item.update(&txn).await?;

        let (cart, items) = self.reprice_cart(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                cart_id: cart.id,
                item_id,
            })
            .await;

        Ok(CartWithItems { cart, items })
    }

    /// Removes a line from the cart.
    ///
    /// # Errors
    ///
    /// * `NotFound` - no such item in this customer's cart
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.find_cart(&txn, customer_id).await?;
        let item = self.find_item(&txn, cart.id, item_id).await?;

        CartItem::delete_by_id(item.id).exec(&txn).await?;

        let (cart, items) = self.reprice_cart(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                item_id,
            })
            .await;

        Ok(CartWithItems { cart, items })
    }

    /// Empties the cart: deletes every line, zeroes the subtotal and drops
    /// any applied coupon.
    #[instrument(skip(self))]
    pub async fn clear(&self, customer_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.find_cart(&txn, customer_id).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let (cart, items) = self.reprice_cart(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(cart.id)).await;

        info!(cart_id = %cart.id, "cleared cart");
        Ok(CartWithItems { cart, items })
    }

    /// Applies a coupon to the cart, computing the discounted total.
    ///
    /// Usage is not consumed here; an abandoned cart must never burn a
    /// redemption. The coupon is re-validated and consumed at settlement.
    ///
    /// # Errors
    ///
    /// * `NotFound` - the customer has no cart, or the coupon does not exist
    /// * `Conflict` - the same coupon is already applied
    /// * `CouponExpired` / `CouponQuotaExceeded` - coupon not applicable
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        customer_id: Uuid,
        coupon_name: &str,
    ) -> Result<CartWithItems, ServiceError> {
        let coupon = self.coupons.validate(coupon_name).await?;

        let txn = self.db.begin().await?;
        let cart = self.find_cart(&txn, customer_id).await?;

        if cart.coupon_id == Some(coupon.id) {
            return Err(ServiceError::Conflict(format!(
                "Coupon {} is already applied to this cart",
                coupon.name
            )));
        }

        let discount =
            coupons::compute_discount(cart.subtotal, coupon.discount_percent, coupon.max_discount_amount);
        let discounted_total = cart.subtotal - discount;

        let cart_id = cart.id;
        let mut active: cart::ActiveModel = cart.into();
        active.coupon_id = Set(Some(coupon.id));
        active.discounted_total = Set(Some(discounted_total));
        active.updated_at = Set(Utc::now());
        let cart = active.update(&txn).await?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(&txn)
            .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CouponApplied {
                cart_id,
                coupon_id: coupon.id,
            })
            .await;

        info!(%cart_id, coupon = %coupon.name, %discount, "applied coupon");
        Ok(CartWithItems { cart, items })
    }

    async fn find_cart(
        &self,
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound("Cart does not exist for this customer".to_string())
            })
    }

    async fn find_item(
        &self,
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found in cart", item_id)))
    }

    /// Recomputes the subtotal from the stored line prices and clears any
    /// applied coupon. Every mutation funnels through here, which is what
    /// keeps the stale-discount invariant.
    async fn reprice_cart(
        &self,
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<(CartModel, Vec<cart_item::Model>), ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let subtotal = subtotal_of(
            items
                .iter()
                .map(|item| (item.unit_price, item.quantity)),
        );

        let mut cart: cart::ActiveModel = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?
            .into();

        cart.subtotal = Set(subtotal);
        cart.coupon_id = Set(None);
        cart.discounted_total = Set(None);
        cart.updated_at = Set(Utc::now());

        let cart = cart.update(conn).await?;
        Ok((cart, items))
    }
}

/// Sums `unit_price x quantity` over the lines, rounding once at the
/// aggregate to the currency's minor unit, half away from zero.
pub fn subtotal_of(lines: impl Iterator<Item = (Decimal, i32)>) -> Decimal {
    lines
        .map(|(unit_price, quantity)| unit_price * Decimal::from(quantity))
        .sum::<Decimal>()
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Input for adding an item to the cart
#[derive(Debug, Deserialize)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub color: Option<String>,
}

/// Cart with items
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}

impl CartWithItems {
    /// The amount a checkout would charge before tax and shipping.
    pub fn effective_total(&self) -> Decimal {
        self.cart.discounted_total.unwrap_or(self.cart.subtotal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn subtotal_is_sum_of_line_totals() {
        // The worked example: [{100 x 2}, {50 x 1}] -> 250
        let subtotal = subtotal_of(vec![(dec!(100), 2), (dec!(50), 1)].into_iter());
        assert_eq!(subtotal, dec!(250.00));
    }

    #[test]
    fn subtotal_of_empty_cart_is_zero() {
        let subtotal = subtotal_of(std::iter::empty());
        assert_eq!(subtotal, dec!(0));
    }

    #[test]
    fn subtotal_rounds_once_at_the_aggregate() {
        // Three lines of $0.335: per-line rounding would give 3 x $0.34 =
        // $1.02; a single aggregate rounding gives $1.01 (1.005 away from
        // zero).
        let subtotal = subtotal_of(vec![(dec!(0.335), 1); 3].into_iter());
        assert_eq!(subtotal, dec!(1.01));
    }

    #[test]
    fn effective_total_prefers_the_discounted_total() {
        let now = Utc::now();
        let cart = CartModel {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            subtotal: dec!(250),
            coupon_id: Some(Uuid::new_v4()),
            discounted_total: Some(dec!(210)),
            created_at: now,
            updated_at: now,
        };
        let with_items = CartWithItems { cart, items: vec![] };
        assert_eq!(with_items.effective_total(), dec!(210));
    }

    #[test]
    fn effective_total_falls_back_to_subtotal() {
        let now = Utc::now();
        let cart = CartModel {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            subtotal: dec!(250),
            coupon_id: None,
            discounted_total: None,
            created_at: now,
            updated_at: now,
        };
        let with_items = CartWithItems { cart, items: vec![] };
        assert_eq!(with_items.effective_total(), dec!(250));
    }
}
