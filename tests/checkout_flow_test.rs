//! Integration tests for the checkout orchestrator: the cash path, its
//! settlement side effects, and the order status transitions.

mod common;

use axum::http::{Method, StatusCode};
use common::{decimal_field, response_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use storefront_api::auth::Role;
use storefront_api::entities::{coupon, product, Cart, Order};

/// Builds a cart of [{100 x 2}, {50 x 1}] for the customer and returns
/// (cart_id, product ids).
async fn build_example_cart(
    app: &TestApp,
    token: &str,
) -> (String, uuid::Uuid, uuid::Uuid) {
    let hundred = app.seed_product(dec!(100), 10).await;
    let fifty = app.seed_product(dec!(50), 10).await;

    for _ in 0..2 {
        app.request(
            Method::POST,
            "/api/v1/cart",
            Some(token),
            Some(json!({ "product_id": hundred.id })),
        )
        .await;
    }
    let response = app
        .request(
            Method::POST,
            "/api/v1/cart",
            Some(token),
            Some(json!({ "product_id": fifty.id })),
        )
        .await;
    let body = response_json(response).await;
    let cart_id = body["cart"]["id"].as_str().unwrap().to_string();

    (cart_id, hundred.id, fifty.id)
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn cash_checkout_settles_the_worked_example() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("buyer@example.com").await;
    let token = app.token_for(customer.id, &customer.email, Role::User);

    let (cart_id, hundred_id, fifty_id) = build_example_cart(&app, &token).await;
    let coupon = app.seed_coupon("summer20", dec!(20), dec!(40), 5).await;

    app.request(
        Method::PATCH,
        "/api/v1/cart/applyCoupon",
        Some(&token),
        Some(json!({ "name": "summer20" })),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}", cart_id),
            Some(&token),
            Some(json!({ "shipping_address": "home" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    assert_eq!(decimal_field(&body["total"]), dec!(210));
    assert_eq!(body["payment_method"], json!("cash"));
    assert_eq!(body["paid"], json!(false));
    assert_eq!(body["address_alias"], json!("home"));

    // Coupon usage consumed exactly once.
    let coupon = coupon::Entity::find_by_id(coupon.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.usage_count, 1);

    // Stock decremented, units-sold incremented.
    let hundred = product::Entity::find_by_id(hundred_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hundred.quantity, 8);
    assert_eq!(hundred.sold, 2);
    let fifty = product::Entity::find_by_id(fifty_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fifty.quantity, 9);
    assert_eq!(fifty.sold, 1);

    // Cart is gone.
    let carts = Cart::find().all(&*app.state.db).await.unwrap();
    assert!(carts.is_empty());

    // Exactly one order exists and the owner can read it back.
    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);

    let order_id = body["id"].as_str().unwrap();
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_of_someone_elses_cart_is_forbidden() {
    let app = TestApp::new().await;
    let owner = app.seed_customer("owner@example.com").await;
    let owner_token = app.token_for(owner.id, &owner.email, Role::User);
    let (cart_id, _, _) = build_example_cart(&app, &owner_token).await;

    let intruder = app.seed_customer("intruder@example.com").await;
    let intruder_token = app.token_for(intruder.id, &intruder.email, Role::User);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}", cart_id),
            Some(&intruder_token),
            Some(json!({ "shipping_address": "home" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_of_an_empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("buyer@example.com").await;
    let token = app.token_for(customer.id, &customer.email, Role::User);

    let (cart_id, _, _) = build_example_cart(&app, &token).await;
    app.request(Method::DELETE, "/api/v1/cart", Some(&token), None)
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}", cart_id),
            Some(&token),
            Some(json!({ "shipping_address": "home" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_with_an_unknown_address_alias_is_not_found() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("buyer@example.com").await;
    let token = app.token_for(customer.id, &customer.email, Role::User);
    let (cart_id, _, _) = build_example_cart(&app, &token).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}", cart_id),
            Some(&token),
            Some(json!({ "shipping_address": "nowhere" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn oversold_checkout_rolls_back_entirely() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("buyer@example.com").await;
    let token = app.token_for(customer.id, &customer.email, Role::User);

    // Only one unit on hand, two requested.
    let scarce = app.seed_product(dec!(100), 1).await;
    for _ in 0..2 {
        app.request(
            Method::POST,
            "/api/v1/cart",
            Some(&token),
            Some(json!({ "product_id": scarce.id })),
        )
        .await;
    }
    let coupon = app.seed_coupon("summer20", dec!(20), dec!(40), 5).await;
    let response = app
        .request(
            Method::PATCH,
            "/api/v1/cart/applyCoupon",
            Some(&token),
            Some(json!({ "name": "summer20" })),
        )
        .await;
    let body = response_json(response).await;
    let cart_id = body["cart"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}", cart_id),
            Some(&token),
            Some(json!({ "shipping_address": "home" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Nothing was partially applied: no order, coupon untouched, cart and
    // stock intact.
    assert!(Order::find().all(&*app.state.db).await.unwrap().is_empty());
    let coupon = coupon::Entity::find_by_id(coupon.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.usage_count, 0);
    let scarce = product::Entity::find_by_id(scarce.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scarce.quantity, 1);
    assert_eq!(scarce.sold, 0);
    assert_eq!(Cart::find().all(&*app.state.db).await.unwrap().len(), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn coupon_quota_bounds_competing_checkouts() {
    let app = TestApp::new().await;
    app.seed_coupon("lastone", dec!(10), dec!(100), 1).await;

    // Two customers, each with a valid cart holding the same coupon.
    let mut tokens_and_carts = Vec::new();
    for email in ["first@example.com", "second@example.com"] {
        let customer = app.seed_customer(email).await;
        let token = app.token_for(customer.id, &customer.email, Role::User);
        let product = app.seed_product(dec!(100), 10).await;
        app.request(
            Method::POST,
            "/api/v1/cart",
            Some(&token),
            Some(json!({ "product_id": product.id })),
        )
        .await;
        let response = app
            .request(
                Method::PATCH,
                "/api/v1/cart/applyCoupon",
                Some(&token),
                Some(json!({ "name": "lastone" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        let cart_id = body["cart"]["id"].as_str().unwrap().to_string();
        tokens_and_carts.push((token, cart_id));
    }

    // Both passed validation at apply time; only the first settlement may
    // consume the final redemption.
    let first = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}", tokens_and_carts[0].1),
            Some(&tokens_and_carts[0].0),
            Some(json!({ "shipping_address": "home" })),
        )
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}", tokens_and_carts[1].1),
            Some(&tokens_and_carts[1].0),
            Some(json!({ "shipping_address": "home" })),
        )
        .await;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    assert_eq!(Order::find().all(&*app.state.db).await.unwrap().len(), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn status_transitions_are_gated_and_monotone() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("buyer@example.com").await;
    let token = app.token_for(customer.id, &customer.email, Role::User);
    let (cart_id, _, _) = build_example_cart(&app, &token).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}", cart_id),
            Some(&token),
            Some(json!({ "shipping_address": "home" })),
        )
        .await;
    let body = response_json(response).await;
    let order_id = body["id"].as_str().unwrap().to_string();

    // A plain user cannot mark orders paid.
    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}/pay", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A manager can.
    let staff = app.seed_customer("ops@example.com").await;
    let staff_token = app.token_for(staff.id, &staff.email, Role::Manager);
    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}/pay", order_id),
            Some(&staff_token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["paid"], json!(true));
    let first_paid_at = body["paid_at"].clone();

    // Paying again is an idempotent no-op.
    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}/pay", order_id),
            Some(&staff_token),
            None,
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["paid_at"], first_paid_at);

    // The owner cancels their order; delivery is then refused.
    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}/cancel", order_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}/deliver", order_id),
            Some(&staff_token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn customers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let buyer = app.seed_customer("buyer@example.com").await;
    let buyer_token = app.token_for(buyer.id, &buyer.email, Role::User);
    let (cart_id, _, _) = build_example_cart(&app, &buyer_token).await;
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}", cart_id),
            Some(&buyer_token),
            Some(json!({ "shipping_address": "home" })),
        )
        .await;
    let order_id = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let other = app.seed_customer("other@example.com").await;
    let other_token = app.token_for(other.id, &other.email, Role::User);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            Some(&other_token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .request(Method::GET, "/api/v1/orders", Some(&other_token), None)
        .await;
    let body = response_json(response).await;
    assert_eq!(body["total"], json!(0));

    let response = app
        .request(Method::GET, "/api/v1/orders", Some(&buyer_token), None)
        .await;
    let body = response_json(response).await;
    assert_eq!(body["total"], json!(1));
}
