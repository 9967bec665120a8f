use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{auth::AuthenticatedUser, errors::ServiceError, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        // The id is an order id on reads and status transitions, and a
        // cart id on the two checkout entry points.
        .route("/:id", get(get_order))
        .route("/:id", post(create_cash_order))
        .route("/:id/checkout-session", get(create_checkout_session))
        .route("/:id/pay", patch(pay_order))
        .route("/:id/deliver", patch(deliver_order))
        .route("/:id/cancel", patch(cancel_order))
}

/// List orders: customers see their own, staff see everything
async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let scope = if user.is_staff() { None } else { Some(user.id) };
    let (orders, total) = state
        .services
        .orders
        .list_orders(scope, query.page, query.per_page)
        .await?;

    Ok(success_response(serde_json::json!({
        "orders": orders,
        "total": total,
        "page": query.page,
        "per_page": query.per_page,
    })))
}

/// Get one order; fails `Forbidden` when it belongs to someone else
async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    if !user.is_staff() && order.order.customer_id != user.id {
        return Err(ServiceError::Forbidden(
            "Order does not belong to the requesting customer".to_string(),
        ));
    }

    Ok(success_response(order))
}

/// Cash-on-delivery checkout for the given cart
async fn create_cash_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<CashCheckoutRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let order = state
        .services
        .checkout
        .create_cash_order(user.id, cart_id, &payload.shipping_address)
        .await?;

    Ok(created_response(order))
}

/// Card checkout: creates a hosted gateway session and returns the
/// redirect reference. Settlement is deferred to the completion webhook.
async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(cart_id): Path<Uuid>,
    Query(query): Query<CheckoutSessionQuery>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    if query.shipping_address.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "shipping_address is required".to_string(),
        ));
    }

    let session = state
        .services
        .checkout
        .create_checkout_session(user.id, &user.email, cart_id, &query.shipping_address)
        .await?;

    Ok(success_response(session))
}

/// Mark an order paid (admin/manager)
async fn pay_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    user.require_staff()?;
    let order = state.services.orders.mark_paid(id).await?;
    Ok(success_response(order))
}

/// Mark an order delivered (admin/manager)
async fn deliver_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    user.require_staff()?;
    let order = state.services.orders.mark_delivered(id).await?;
    Ok(success_response(order))
}

/// Cancel an order: owner or staff
async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    if !user.is_staff() {
        let order = state.services.orders.get_order(id).await?;
        if order.order.customer_id != user.id {
            return Err(ServiceError::Forbidden(
                "Order does not belong to the requesting customer".to_string(),
            ));
        }
    }

    let order = state.services.orders.mark_cancelled(id).await?;
    Ok(success_response(order))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct CashCheckoutRequest {
    /// Alias of a saved address in the caller's address book
    #[validate(length(min = 1, max = 20))]
    pub shipping_address: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionQuery {
    pub shipping_address: String,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}
