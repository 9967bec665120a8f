use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    auth::{self, Role},
    config::AppConfig,
    db,
    entities::{coupon, customer, customer_address, product},
    events::{self, EventSender},
    handlers::AppServices,
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Helper harness for spinning up an application state backed by a
/// temporary SQLite database.
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

#[allow(dead_code)]
impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for sqlite database");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test_secret_key_for_testing_purposes_only".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.payment_webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());

        let db = db::establish_connection(&cfg.database_url)
            .await
            .expect("sqlite connection");
        db::run_migrations(&db).await.expect("migrations");

        let db = Arc::new(db);
        let cfg = Arc::new(cfg);

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db.clone(), Arc::new(event_sender.clone()), cfg.clone());

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Mints a bearer token the app will accept.
    pub fn token_for(&self, user_id: Uuid, email: &str, role: Role) -> String {
        auth::issue_token(&self.state.config.jwt_secret, user_id, email, role, 3600)
            .expect("token")
    }

    /// Sends a request through the router without binding a socket.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).expect("json body")))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        self.router.clone().oneshot(request).await.expect("response")
    }

    /// Seeds a customer with one saved address aliased "home".
    pub async fn seed_customer(&self, email: &str) -> customer::Model {
        let now = Utc::now();
        let customer = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            name: Set("Test Customer".to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed customer");

        customer_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer.id),
            alias: Set("home".to_string()),
            details: Set(Some("1 Test Street".to_string())),
            phone: Set(Some("+201000000000".to_string())),
            city: Set(Some("Cairo".to_string())),
            postal_code: Set(Some("11311".to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address");

        customer
    }

    /// Seeds a product with the given price and stock on hand.
    pub async fn seed_product(&self, price: Decimal, quantity: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Test Product".to_string()),
            price: Set(price),
            quantity: Set(quantity),
            sold: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Seeds a coupon valid for the next 30 days.
    pub async fn seed_coupon(
        &self,
        name: &str,
        discount_percent: Decimal,
        max_discount_amount: Decimal,
        usage_limit: i32,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_lowercase()),
            expires_at: Set(now + Duration::days(30)),
            discount_percent: Set(discount_percent),
            max_discount_amount: Set(max_discount_amount),
            usage_count: Set(0),
            usage_limit: Set(usage_limit),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }
}

/// Reads a response body as JSON.
#[allow(dead_code)]
pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Parses a JSON field serialized by rust_decimal into a `Decimal`, so
/// assertions compare numerically rather than by string scale.
#[allow(dead_code)]
pub fn decimal_field(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected decimal string, got {}", value))
        .parse()
        .expect("decimal field")
}
