// src/mailer.rs
//
// Transactional email over SMTP. Every send from a request path is
// best-effort: callers log failures and move on.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;

use crate::models::{Order, OrderStatus};

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("smtp error: {0}")]
    Smtp(String),
    #[error("send task failed: {0}")]
    Task(String),
}

#[derive(Clone)]
pub struct Mailer {
    smtp_host: String,
    smtp_port: u16,
    credentials: Credentials,
    from: String,
}

impl Mailer {
    /// Reads SMTP_* variables; returns None when SMTP_HOST is absent so the
    /// service can run without email in dev.
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        let smtp_port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(587);
        let user = std::env::var("SMTP_USER").unwrap_or_default();
        let password = std::env::var("SMTP_PASSWORD").unwrap_or_default();
        let from = std::env::var("EMAIL_FROM").unwrap_or_else(|_| user.clone());

        Some(Self {
            smtp_host,
            smtp_port,
            credentials: Credentials::new(user, password),
            from,
        })
    }

    fn build_transport(&self) -> Result<SmtpTransport, MailerError> {
        Ok(SmtpTransport::relay(&self.smtp_host)
            .map_err(|e| MailerError::Smtp(format!("relay: {e}")))?
            .port(self.smtp_port)
            .credentials(self.credentials.clone())
            .build())
    }

    async fn send(&self, to: &str, subject: &str, html: String) -> Result<(), MailerError> {
        let email = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| MailerError::Address(format!("from: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| MailerError::Address(format!("to: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| MailerError::Smtp(format!("build message: {e}")))?;

        let mailer = self.build_transport()?;

        // Blocking SMTP transport, driven off the async runtime.
        tokio::task::spawn_blocking(move || {
            mailer
                .send(&email)
                .map_err(|e| MailerError::Smtp(e.to_string()))
        })
        .await
        .map_err(|e| MailerError::Task(e.to_string()))?
        .map(|_| ())
    }

    pub async fn send_order_confirmation(
        &self,
        to: &str,
        book_title: &str,
        order: &Order,
    ) -> Result<(), MailerError> {
        let body = match order.status {
            OrderStatus::Completed => format!(
                "<p>Your purchase of <b>{book_title}</b> is complete. \
                 The book is now in your library.</p>\
                 <p>Order: {}</p>",
                order.id
            ),
            _ => format!(
                "<p>Your order for <b>{book_title}</b> has been created. \
                 Finish the payment to unlock the book.</p>\
                 <p>Order: {}</p>",
                order.id
            ),
        };
        self.send(to, "Your order", body).await
    }

    pub async fn send_payment_status(&self, to: &str, order: &Order) -> Result<(), MailerError> {
        let body = match order.status {
            OrderStatus::Completed => format!(
                "<p>Payment received — your book is unlocked.</p><p>Order: {}</p>",
                order.id
            ),
            _ => format!(
                "<p>Payment failed{}.</p><p>You can retry the purchase at any time. Order: {}</p>",
                order
                    .failure_reason
                    .as_deref()
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default(),
                order.id
            ),
        };
        self.send(to, "Payment update", body).await
    }

    pub async fn send_verification_code(
        &self,
        to: &str,
        code: &str,
        ttl_minutes: i64,
    ) -> Result<(), MailerError> {
        let body = format!(
            "<p>Your verification code is <b>{code}</b>. \
             It expires in {ttl_minutes} minutes.</p>"
        );
        self.send(to, "Email verification", body).await
    }

    pub async fn send_reset_code(
        &self,
        to: &str,
        code: &str,
        ttl_minutes: i64,
    ) -> Result<(), MailerError> {
        let body = format!(
            "<p>Your password reset code is <b>{code}</b>. \
             It expires in {ttl_minutes} minutes.</p>\
             <p>If you didn't request this, you can ignore this email.</p>"
        );
        self.send(to, "Reset password", body).await
    }
}
