// src/api/webhooks_paymob.rs

use actix_web::{get, web, HttpResponse};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use utoipa::ToSchema;

use crate::models::OrderStatus;
use crate::orders::{self, OrderError};
use crate::AppState;

/// Paymob делает transaction-callback GET-запросом с параметрами в query
/// (браузерный redirect проходит через тот же URL). Нам достаточно:
/// - order (id заказа на стороне Paymob)
/// - success ("true"/"false")
/// - hmac (подпись)
/// - data.message / txn_response_code для текста ошибки
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymobCallbackQuery {
    pub order: String,
    pub success: String,
    pub hmac: Option<String>,
    #[serde(rename = "data.message")]
    pub data_message: Option<String>,
    pub txn_response_code: Option<String>,
}

/// HMAC-SHA256 в hex над `{order}{success}`.
pub fn sign_callback(secret: &str, order: &str, success: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(order.as_bytes());
    mac.update(success.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn signature_valid(state: &AppState, query: &PaymobCallbackQuery) -> bool {
    let Some(key) = state.paymob_webhook_key.as_deref() else {
        log::warn!("PAYMOB_WEBHOOK_KEY is not set, skipping webhook signature check");
        return true;
    };
    let expected = sign_callback(key, &query.order, &query.success);
    matches!(query.hmac.as_deref(), Some(got) if got == expected)
}

#[utoipa::path(
    get,
    path = "/paymob/webhook",
    tag = "webhooks",
    params(
        ("order" = String, Query, description = "Remote order id at Paymob"),
        ("success" = String, Query, description = "\"true\" or \"false\""),
        ("hmac" = Option<String>, Query, description = "Callback signature")
    ),
    responses(
        (status = 200, description = "Callback reconciled"),
        (status = 401, description = "Bad signature"),
        (status = 404, description = "No order for this payment id")
    )
)]
#[get("/paymob/webhook")]
pub async fn paymob_webhook(
    query: web::Query<PaymobCallbackQuery>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let query = query.into_inner();

    if !signature_valid(&state, &query) {
        log::warn!("paymob webhook signature mismatch order={}", query.order);
        return HttpResponse::Unauthorized().json(json!({"error": "bad signature"}));
    }

    let success = query.success == "true";
    let failure_reason = query
        .data_message
        .as_deref()
        .or(query.txn_response_code.as_deref());

    let outcome =
        match orders::apply_payment_callback(&state, &query.order, success, failure_reason).await {
            Ok(o) => o,
            Err(OrderError::UnknownPayment(id)) => {
                // Невозможно сопоставить webhook с заказом — не гадаем.
                log::warn!("paymob webhook for unknown payment_id={id}");
                return HttpResponse::NotFound().json(json!({
                    "status": "failed",
                    "message": format!("order not found for payment id {id}")
                }));
            }
            Err(e) => {
                log::error!("paymob webhook error order={}: {e}", query.order);
                return HttpResponse::InternalServerError().finish();
            }
        };

    if outcome.already_settled {
        return HttpResponse::Ok().json(json!({
            "status": outcome.order.status.as_str(),
            "message": "already settled",
            "idempotent": true
        }));
    }

    // Answer with the settled status: a paid duplicate checkout comes in as
    // success=true but settles as failed.
    if outcome.order.status == OrderStatus::Completed {
        HttpResponse::Ok().json(json!({
            "status": "success",
            "message": "Payment completed"
        }))
    } else {
        let reason = outcome
            .order
            .failure_reason
            .as_deref()
            .unwrap_or("Unknown error");
        HttpResponse::Ok().json(json!({
            "status": "failed",
            "message": format!("Payment failed: {reason}"),
            "retry_payment_url": outcome.retry_payment_url
        }))
    }
}
