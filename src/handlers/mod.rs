pub mod carts;
pub mod common;
pub mod orders;
pub mod webhooks;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        CartService, CheckoutService, CouponService, InventoryService, OrderService,
        PaymentGateway,
    },
};
use std::sync::Arc;
use tracing::info;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub inventory: Arc<InventoryService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
}

impl AppServices {
    /// Wires the service graph from the shared database pool, event sender
    /// and configuration.
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        let coupons = Arc::new(CouponService::new(db.clone()));
        let inventory = Arc::new(InventoryService::new(db.clone()));
        let orders = Arc::new(OrderService::new(db.clone(), event_sender.clone()));
        let carts = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            coupons.clone(),
        ));

        let gateway = config.payment_gateway_secret.as_ref().map(|secret| {
            Arc::new(PaymentGateway::new(
                config.payment_gateway_url.clone(),
                secret.clone(),
            ))
        });
        if gateway.is_none() {
            info!("Payment gateway secret not configured; card checkout disabled");
        }

        let checkout = Arc::new(CheckoutService::new(
            db,
            event_sender,
            config,
            coupons.clone(),
            inventory.clone(),
            orders.clone(),
            gateway,
        ));

        Self {
            carts,
            coupons,
            inventory,
            orders,
            checkout,
        }
    }
}
