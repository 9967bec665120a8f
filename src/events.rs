use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the checkout core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemUpdated { cart_id: Uuid, item_id: Uuid },
    CartItemRemoved { cart_id: Uuid, item_id: Uuid },
    CartCleared(Uuid),
    CouponApplied { cart_id: Uuid, coupon_id: Uuid },

    // Order events
    OrderCreated(Uuid),
    OrderPaid(Uuid),
    OrderDelivered(Uuid),
    OrderCancelled(Uuid),

    // Settlement events
    CouponRedeemed { coupon_id: Uuid, order_id: Uuid },
    StockCommitted { order_id: Uuid },

    // Gateway events
    CheckoutSessionCreated { cart_id: Uuid, session_id: String },
    PaymentReconciled { cart_id: Uuid, order_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery is best-effort; business outcomes never depend on it.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}

/// Processes incoming events. The storefront only needs them for
/// operational visibility, so the processor logs and moves on.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order created");
            }
            Event::PaymentReconciled { cart_id, order_id } => {
                info!(%cart_id, %order_id, "payment reconciled into order");
            }
            Event::CouponRedeemed { coupon_id, order_id } => {
                info!(%coupon_id, %order_id, "coupon redemption consumed");
            }
            other => {
                info!(event = ?other, "event");
            }
        }
    }

    info!("Event processing loop stopped");
}
