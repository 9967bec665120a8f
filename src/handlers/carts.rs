use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::carts::AddItemInput,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, patch, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/", post(add_to_cart))
        .route("/", delete(clear_cart))
        .route("/applyCoupon", patch(apply_coupon))
        .route("/:item_id", patch(update_item_quantity))
        .route("/:item_id", delete(remove_item))
}

/// Get the caller's cart with items
async fn get_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.get_cart(user.id).await?;
    Ok(success_response(cart))
}

/// Add one unit of a product to the cart, creating the cart if needed
async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .add_item(
            user.id,
            AddItemInput {
                product_id: payload.product_id,
                color: payload.color,
            },
        )
        .await?;

    Ok(success_response(cart))
}

/// Set the quantity of a cart item
async fn update_item_quantity(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .set_item_quantity(user.id, item_id, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Remove an item from the cart
async fn remove_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.remove_item(user.id, item_id).await?;
    Ok(success_response(cart))
}

/// Clear all items from the cart
async fn clear_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.clear(user.id).await?;
    Ok(success_response(cart))
}

/// Apply a coupon by name to the cart
async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .apply_coupon(user.id, &payload.name)
        .await?;

    Ok(success_response(cart))
}

// Request DTOs

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 3, max = 50))]
    pub name: String,
}
