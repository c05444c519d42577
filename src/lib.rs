pub mod ai;
pub mod api;
pub mod db;
pub mod docs;
pub mod mailer;
pub mod models;
pub mod orders;

use sqlx::PgPool;

use crate::mailer::Mailer;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub paymob_api_key: String,
    pub paymob_integration_id: String,
    pub paymob_iframe_id: String,
    /// Shared secret for webhook signatures. When unset (dev), the signature
    /// check is skipped with a warning.
    pub paymob_webhook_key: Option<String>,
    pub groq_api_key: String,
    pub ai_daily_limit: i32,
    pub mailer: Option<Mailer>,
}
