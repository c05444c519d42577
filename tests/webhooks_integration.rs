use actix_web::test::TestRequest;
use actix_web::{test, web, App};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use sard_bookstore::api::webhooks_paymob::{paymob_webhook, sign_callback};
use sard_bookstore::models::OrderStatus;
use sard_bookstore::orders;

mod support;

const WEBHOOK_KEY: &str = "test-webhook-key";

async fn insert_pending_order(
    pool: &PgPool,
    user_id: Uuid,
    book_id: Uuid,
    payment_id: &str,
    price: Decimal,
) -> Uuid {
    sqlx::query(
        r#"INSERT INTO orders (user_id, book_id, price, points, payment_id, status)
           VALUES ($1, $2, $3, 0, $4, 'pending')
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(book_id)
    .bind(price)
    .bind(payment_id)
    .fetch_one(pool)
    .await
    .expect("insert pending order")
    .get("id")
}

async fn order_status(pool: &PgPool, order_id: Uuid) -> String {
    sqlx::query("SELECT status FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .expect("select order status")
        .get("status")
}

fn webhook_uri(payment_id: &str, success: &str) -> String {
    let hmac = sign_callback(WEBHOOK_KEY, payment_id, success);
    format!("/paymob/webhook?order={payment_id}&success={success}&hmac={hmac}")
}

#[actix_web::test]
async fn successful_webhook_completes_order_and_grants_book() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let user_id = support::insert_user(pool, 0).await;
    let book_id = support::insert_book(pool, false, None, Some(Decimal::new(10000, 2))).await;
    let payment_id = format!("{}", rand_remote_id());
    let order_id =
        insert_pending_order(pool, user_id, book_id, &payment_id, Decimal::new(10000, 2)).await;

    let state = web::Data::new(support::build_state(pool.clone(), Some(WEBHOOK_KEY)));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymob_webhook)).await;

    let req = TestRequest::get()
        .uri(&webhook_uri(&payment_id, "true"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    assert_eq!(order_status(pool, order_id).await, "completed");
    assert!(support::owns_book(pool, user_id, book_id).await);
}

#[actix_web::test]
async fn duplicate_webhook_delivery_is_idempotent() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let user_id = support::insert_user(pool, 0).await;
    let book_id = support::insert_book(pool, false, None, Some(Decimal::new(5000, 2))).await;
    let payment_id = format!("{}", rand_remote_id());
    let order_id =
        insert_pending_order(pool, user_id, book_id, &payment_id, Decimal::new(5000, 2)).await;

    let state = web::Data::new(support::build_state(pool.clone(), Some(WEBHOOK_KEY)));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymob_webhook)).await;

    let first = TestRequest::get()
        .uri(&webhook_uri(&payment_id, "true"))
        .to_request();
    let resp = test::call_service(&app, first).await;
    assert!(resp.status().is_success());

    let second = TestRequest::get()
        .uri(&webhook_uri(&payment_id, "true"))
        .to_request();
    let resp = test::call_service(&app, second).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["idempotent"], serde_json::json!(true));

    assert_eq!(order_status(pool, order_id).await, "completed");
    assert!(support::owns_book(pool, user_id, book_id).await);
    assert_eq!(support::completed_orders_count(pool, user_id, book_id).await, 1);

    // Still one entitlement row.
    let owned_rows: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM user_books WHERE user_id = $1 AND book_id = $2",
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_one(pool)
    .await
    .expect("count user_books")
    .get("n");
    assert_eq!(owned_rows, 1);
}

#[actix_web::test]
async fn paid_duplicate_checkout_settles_failed_and_keeps_one_completed_order() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let user_id = support::insert_user(pool, 0).await;
    let book_id = support::insert_book(pool, false, None, Some(Decimal::new(10000, 2))).await;

    // First checkout already paid and settled.
    sqlx::query(
        r#"INSERT INTO orders (user_id, book_id, price, points, status)
           VALUES ($1, $2, $3, 0, 'completed')"#,
    )
    .bind(user_id)
    .bind(book_id)
    .bind(Decimal::new(10000, 2))
    .execute(pool)
    .await
    .expect("insert completed order");
    sqlx::query("INSERT INTO user_books (user_id, book_id) VALUES ($1, $2)")
        .bind(user_id)
        .bind(book_id)
        .execute(pool)
        .await
        .expect("grant book");

    // Second checkout for the same book, opened in parallel and also paid.
    let payment_id = format!("{}", rand_remote_id());
    let order_id =
        insert_pending_order(pool, user_id, book_id, &payment_id, Decimal::new(10000, 2)).await;

    let state = web::Data::new(support::build_state(pool.clone(), Some(WEBHOOK_KEY)));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymob_webhook)).await;

    let req = TestRequest::get()
        .uri(&webhook_uri(&payment_id, "true"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], serde_json::json!("failed"));
    assert_eq!(body["retry_payment_url"], serde_json::Value::Null);

    assert_eq!(order_status(pool, order_id).await, "failed");
    let reason: Option<String> = sqlx::query("SELECT failure_reason FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .expect("select reason")
        .get("failure_reason");
    assert_eq!(reason.as_deref(), Some("book already purchased"));

    // The first purchase stays intact.
    assert_eq!(support::completed_orders_count(pool, user_id, book_id).await, 1);
    assert!(support::owns_book(pool, user_id, book_id).await);
}

#[actix_web::test]
async fn failed_webhook_marks_order_failed_without_entitlement() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let user_id = support::insert_user(pool, 0).await;
    let book_id = support::insert_book(pool, false, None, Some(Decimal::new(7500, 2))).await;
    let payment_id = format!("{}", rand_remote_id());
    // Zero price keeps the retry-link mint from reaching out to the gateway.
    let order_id =
        insert_pending_order(pool, user_id, book_id, &payment_id, Decimal::ZERO).await;

    let state = web::Data::new(support::build_state(pool.clone(), Some(WEBHOOK_KEY)));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymob_webhook)).await;

    let hmac = sign_callback(WEBHOOK_KEY, &payment_id, "false");
    let uri = format!(
        "/paymob/webhook?order={payment_id}&success=false&hmac={hmac}&txn_response_code=DECLINED"
    );
    let req = TestRequest::get().uri(&uri).to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], serde_json::json!("failed"));

    assert_eq!(order_status(pool, order_id).await, "failed");
    assert!(!support::owns_book(pool, user_id, book_id).await);

    let reason: Option<String> = sqlx::query("SELECT failure_reason FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .expect("select reason")
        .get("failure_reason");
    assert_eq!(reason.as_deref(), Some("DECLINED"));
}

#[actix_web::test]
async fn duplicate_failed_delivery_is_idempotent_and_keeps_first_reason() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let user_id = support::insert_user(pool, 0).await;
    let book_id = support::insert_book(pool, false, None, Some(Decimal::new(5000, 2))).await;
    let payment_id = format!("{}", rand_remote_id());
    // Zero price keeps the retry-link mint from reaching out to the gateway.
    let order_id =
        insert_pending_order(pool, user_id, book_id, &payment_id, Decimal::ZERO).await;

    let state = web::Data::new(support::build_state(pool.clone(), Some(WEBHOOK_KEY)));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymob_webhook)).await;

    let hmac = sign_callback(WEBHOOK_KEY, &payment_id, "false");
    let first = TestRequest::get()
        .uri(&format!(
            "/paymob/webhook?order={payment_id}&success=false&hmac={hmac}&txn_response_code=DECLINED"
        ))
        .to_request();
    let resp = test::call_service(&app, first).await;
    assert!(resp.status().is_success());
    assert_eq!(order_status(pool, order_id).await, "failed");

    // Redelivery of the failure, this time with a different reason.
    let second = TestRequest::get()
        .uri(&format!(
            "/paymob/webhook?order={payment_id}&success=false&hmac={hmac}&txn_response_code=TIMEOUT"
        ))
        .to_request();
    let resp = test::call_service(&app, second).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], serde_json::json!("failed"));
    assert_eq!(body["idempotent"], serde_json::json!(true));

    assert_eq!(order_status(pool, order_id).await, "failed");
    let reason: Option<String> = sqlx::query("SELECT failure_reason FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .expect("select reason")
        .get("failure_reason");
    assert_eq!(reason.as_deref(), Some("DECLINED"));
    assert!(!support::owns_book(pool, user_id, book_id).await);
}

#[actix_web::test]
async fn failed_order_can_be_retried_with_a_new_order() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let state_plain = support::build_state(pool.clone(), Some(WEBHOOK_KEY));

    let user_id = support::insert_user(pool, 0).await;
    // Free here so the retry purchase needs no gateway round-trip.
    let book_id = support::insert_book(pool, true, None, None).await;
    let payment_id = format!("{}", rand_remote_id());
    let order_id =
        insert_pending_order(pool, user_id, book_id, &payment_id, Decimal::ZERO).await;

    let state = web::Data::new(state_plain.clone());
    let app = test::init_service(App::new().app_data(state.clone()).service(paymob_webhook)).await;

    let req = TestRequest::get()
        .uri(&webhook_uri(&payment_id, "false"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(order_status(pool, order_id).await, "failed");

    // A failed order never flips back; the user just purchases again.
    let outcome = orders::create_order(&state_plain, user_id, book_id)
        .await
        .expect("retry purchase");
    assert_eq!(outcome.order.status, OrderStatus::Completed);
    assert_ne!(outcome.order.id, order_id);
    assert_eq!(order_status(pool, order_id).await, "failed");
}

#[actix_web::test]
async fn webhook_for_unknown_payment_id_is_not_found() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let state = web::Data::new(support::build_state(pool.clone(), Some(WEBHOOK_KEY)));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymob_webhook)).await;

    let req = TestRequest::get()
        .uri(&webhook_uri("does-not-exist", "true"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn webhook_with_bad_signature_is_rejected() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let user_id = support::insert_user(pool, 0).await;
    let book_id = support::insert_book(pool, false, None, Some(Decimal::new(10000, 2))).await;
    let payment_id = format!("{}", rand_remote_id());
    let order_id =
        insert_pending_order(pool, user_id, book_id, &payment_id, Decimal::new(10000, 2)).await;

    let state = web::Data::new(support::build_state(pool.clone(), Some(WEBHOOK_KEY)));
    let app = test::init_service(App::new().app_data(state.clone()).service(paymob_webhook)).await;

    let uri = format!("/paymob/webhook?order={payment_id}&success=true&hmac=deadbeef");
    let req = TestRequest::get().uri(&uri).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);

    // Nothing was touched.
    assert_eq!(order_status(pool, order_id).await, "pending");
    assert!(!support::owns_book(pool, user_id, book_id).await);
}

fn rand_remote_id() -> u64 {
    // Paymob order ids are numeric.
    u64::from(Uuid::new_v4().as_fields().0)
}
