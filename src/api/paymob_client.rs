// src/api/paymob_client.rs
//
// Минимальный клиент для Paymob Accept API (https://accept.paymob.com/api)
// Авторизация: одноразовый auth-токен, получаемый по api_key.

use std::fmt;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::User;

const PAYMOB_API_BASE: &str = "https://accept.paymob.com/api";

// Запросы идут внутри транзакции покупки — ждать можно только ограниченно.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> Result<reqwest::Client, PaymobError> {
    Ok(reqwest::Client::builder()
        .timeout(GATEWAY_TIMEOUT)
        .build()?)
}

#[derive(Debug)]
pub enum PaymobError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    InvalidResponse(String),
}

impl fmt::Display for PaymobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymobError::Http(e) => write!(f, "http error: {e}"),
            PaymobError::Api { status, body } => {
                write!(f, "paymob api error status={status} body={body}")
            }
            PaymobError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl std::error::Error for PaymobError {}

impl From<reqwest::Error> for PaymobError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

/// Billing data Paymob requires for a payment key. Fields the user profile
/// does not carry are filled with the gateway's accepted placeholders.
#[derive(Debug, Serialize)]
pub struct BillingData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub country: String,
    pub city: String,
    pub street: String,
    pub building: String,
    pub floor: String,
    pub apartment: String,
}

impl BillingData {
    pub fn from_user(user: &User) -> Self {
        Self {
            first_name: user.name.clone().unwrap_or_else(|| "Reader".to_string()),
            last_name: "NA".to_string(),
            email: user.email.clone(),
            phone_number: user
                .phone
                .clone()
                .unwrap_or_else(|| "01000000000".to_string()),
            country: "EG".to_string(),
            city: "Cairo".to_string(),
            street: "NA".to_string(),
            building: "NA".to_string(),
            floor: "NA".to_string(),
            apartment: "NA".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

/// Gateway amounts are integer minor units (piastres). Returns None for
/// non-positive prices or values that do not fit.
pub fn amount_cents(price: Decimal) -> Option<i64> {
    if price <= Decimal::ZERO {
        return None;
    }
    (price * Decimal::from(100)).round().to_i64()
}

pub async fn authenticate(api_key: &str) -> Result<String, PaymobError> {
    let client = http_client()?;

    let resp = client
        .post(format!("{PAYMOB_API_BASE}/auth/tokens"))
        .json(&serde_json::json!({ "api_key": api_key }))
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(PaymobError::Api {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str::<AuthResponse>(&body)
        .map(|r| r.token)
        .map_err(|e| PaymobError::InvalidResponse(format!("{e}; body={body}")))
}

/// Регистрирует заказ на стороне Paymob и возвращает его id — мы сохраняем
/// его в `orders.payment_id` и сверяем по нему webhook.
pub async fn create_payment_order(
    auth_token: &str,
    amount_cents: i64,
    currency: &str,
) -> Result<String, PaymobError> {
    let client = http_client()?;

    let resp = client
        .post(format!("{PAYMOB_API_BASE}/ecommerce/orders"))
        .json(&serde_json::json!({
            "auth_token": auth_token,
            "amount_cents": amount_cents,
            "currency": currency,
        }))
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(PaymobError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|e| PaymobError::InvalidResponse(format!("{e}; body={body}")))?;

    // Paymob отдаёт числовой id.
    match value.get("id") {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(PaymobError::InvalidResponse(format!(
            "no order id in response; body={body}"
        ))),
    }
}

/// Payment key: the token the hosted payment page is opened with.
pub async fn generate_payment_key(
    auth_token: &str,
    integration_id: &str,
    order_id: &str,
    amount_cents: i64,
    billing: &BillingData,
) -> Result<String, PaymobError> {
    let client = http_client()?;

    let resp = client
        .post(format!("{PAYMOB_API_BASE}/acceptance/payment_keys"))
        .json(&serde_json::json!({
            "auth_token": auth_token,
            "amount_cents": amount_cents,
            "order_id": order_id,
            "billing_data": billing,
            "currency": "EGP",
            "integration_id": integration_id,
        }))
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(PaymobError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|e| PaymobError::InvalidResponse(format!("{e}; body={body}")))?;

    value
        .get("token")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| PaymobError::InvalidResponse(format!("no token in response; body={body}")))
}

/// URL of the externally hosted checkout iframe for a payment token.
pub fn payment_url(iframe_id: &str, payment_token: &str) -> String {
    format!("https://accept.paymob.com/api/acceptance/iframes/{iframe_id}?payment_token={payment_token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_cents_converts_pounds_to_piastres() {
        assert_eq!(amount_cents(Decimal::new(10000, 2)), Some(10000)); // 100.00
        assert_eq!(amount_cents(Decimal::new(995, 2)), Some(995)); // 9.95
        assert_eq!(amount_cents(Decimal::from(42)), Some(4200));
    }

    #[test]
    fn amount_cents_rejects_non_positive() {
        assert_eq!(amount_cents(Decimal::ZERO), None);
        assert_eq!(amount_cents(Decimal::from(-5)), None);
    }

    #[test]
    fn payment_url_embeds_token() {
        let url = payment_url("12345", "tok_abc");
        assert_eq!(
            url,
            "https://accept.paymob.com/api/acceptance/iframes/12345?payment_token=tok_abc"
        );
    }
}
