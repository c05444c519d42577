// src/api/orders.rs

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::auth::AuthUser;
use crate::models::Order;
use crate::orders::{self, OrderError};
use crate::{db, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub book_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order: Order,
    /// Hosted checkout URL; null for free and points purchases.
    pub payment_url: Option<String>,
}

fn order_error_response(e: &OrderError) -> HttpResponse {
    match e {
        OrderError::BookNotFound | OrderError::UserNotFound => {
            HttpResponse::NotFound().json(json!({"error": e.to_string()}))
        }
        OrderError::AlreadyOwned => HttpResponse::Conflict().json(json!({"error": e.to_string()})),
        OrderError::InsufficientPoints { .. } => {
            HttpResponse::BadRequest().json(json!({"error": e.to_string()}))
        }
        OrderError::MisconfiguredPricing => {
            // Catalog data problem, not a user error.
            log::error!("order failed: {e}");
            HttpResponse::InternalServerError().json(json!({"error": e.to_string()}))
        }
        OrderError::Gateway(inner) => {
            log::error!("paymob error during order creation: {inner}");
            HttpResponse::BadGateway().json(json!({
                "error": "payment gateway error",
                "details": inner.to_string()
            }))
        }
        OrderError::UnknownPayment(_) => {
            HttpResponse::NotFound().json(json!({"error": e.to_string()}))
        }
        OrderError::Db(inner) => {
            log::error!("order db error: {inner}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[utoipa::path(
    post,
    path = "/orders",
    tag = "orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Order created", body = CreateOrderResponse),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Book already owned"),
        (status = 400, description = "Not enough points")
    )
)]
#[post("/orders")]
pub async fn create_order(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<CreateOrderRequest>,
) -> impl Responder {
    match orders::create_order(&state, user.id, payload.book_id).await {
        Ok(outcome) => HttpResponse::Ok().json(CreateOrderResponse {
            order: outcome.order,
            payment_url: outcome.payment_url,
        }),
        Err(e) => order_error_response(&e),
    }
}

#[utoipa::path(
    get,
    path = "/orders",
    tag = "orders",
    responses((status = 200, description = "The caller's completed orders"))
)]
#[get("/orders")]
pub async fn list_my_orders(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> impl Responder {
    match db::list_my_orders(&state.pool, user.id).await {
        Ok(orders) => HttpResponse::Ok().json(json!({"orders": orders})),
        Err(e) => {
            log::error!("list_my_orders db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/orders/{id}")]
pub async fn get_order(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<Uuid>,
) -> impl Responder {
    let order_id = path.into_inner();

    let row = sqlx::query(
        r#"SELECT id, user_id, book_id, price, points, payment_id, status,
                  failure_reason, created_at, updated_at
           FROM orders
           WHERE id = $1 AND user_id = $2"#,
    )
    .bind(order_id)
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await;

    match row {
        Ok(Some(r)) => {
            use sqlx::Row;
            let status: String = r.get("status");
            let order = Order {
                id: r.get("id"),
                user_id: r.get("user_id"),
                book_id: r.get("book_id"),
                price: r.get("price"),
                points: r.get("points"),
                payment_id: r.get("payment_id"),
                status: crate::models::OrderStatus::parse(&status)
                    .unwrap_or(crate::models::OrderStatus::Failed),
                failure_reason: r.get("failure_reason"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            };
            HttpResponse::Ok().json(order)
        }
        Ok(None) => HttpResponse::NotFound().json(json!({"error": "order not found"})),
        Err(e) => {
            log::error!("get_order db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Unlocked content (audio url etc.) for a completed order.
#[get("/orders/{id}/book")]
pub async fn get_order_book(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<Uuid>,
) -> impl Responder {
    match db::get_unlocked_book(&state.pool, path.into_inner(), user.id).await {
        Ok(Some(book)) => HttpResponse::Ok().json(book),
        Ok(None) => HttpResponse::NotFound().json(json!({"error": "order not found"})),
        Err(e) => {
            log::error!("get_order_book db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
