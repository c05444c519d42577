// src/orders.rs
//
// Order engine: resolves a book's pricing mode, executes the purchase
// atomically (free / points / gateway checkout) and reconciles gateway
// webhooks against pending orders.

use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::api::paymob_client::{self, BillingData, PaymobError};
use crate::models::{Book, Order, OrderStatus, User};
use crate::AppState;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("book not found")]
    BookNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("you already own this book")]
    AlreadyOwned,
    #[error("not enough points: have {have}, need {need}")]
    InsufficientPoints { have: i32, need: i32 },
    #[error("book has no valid pricing configuration")]
    MisconfiguredPricing,
    #[error("payment gateway error: {0}")]
    Gateway(#[from] PaymobError),
    #[error("no pending order for payment id {0}")]
    UnknownPayment(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Which flow governs a purchase. Resolved once from the book record, with
/// free taking precedence over points, and points over money.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PricingMode {
    Free,
    Points(i32),
    Money(Decimal),
}

impl PricingMode {
    pub fn resolve(book: &Book) -> Result<Self, OrderError> {
        if book.is_free {
            return Ok(PricingMode::Free);
        }
        if let Some(points) = book.price_points {
            if points > 0 {
                return Ok(PricingMode::Points(points));
            }
        }
        if let Some(price) = book.price {
            if price > Decimal::ZERO {
                return Ok(PricingMode::Money(price));
            }
        }
        Err(OrderError::MisconfiguredPricing)
    }
}

#[derive(Debug)]
pub struct PurchaseOutcome {
    pub order: Order,
    /// Hosted checkout URL; present only on the money path.
    pub payment_url: Option<String>,
}

#[derive(Debug)]
pub struct CallbackOutcome {
    pub order: Order,
    /// True when the webhook was a duplicate delivery for an order that had
    /// already reached a terminal status.
    pub already_settled: bool,
    /// Fresh checkout URL for the same remote order after a failed payment.
    pub retry_payment_url: Option<String>,
}

fn order_from_row(r: &PgRow) -> Order {
    let status: String = r.get("status");
    Order {
        id: r.get("id"),
        user_id: r.get("user_id"),
        book_id: r.get("book_id"),
        price: r.get("price"),
        points: r.get("points"),
        payment_id: r.get("payment_id"),
        // The CHECK constraint keeps this total.
        status: OrderStatus::parse(&status).unwrap_or(OrderStatus::Failed),
        failure_reason: r.get("failure_reason"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

const ORDER_COLUMNS: &str =
    "id, user_id, book_id, price, points, payment_id, status, failure_reason, created_at, updated_at";

async fn insert_order(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    book_id: Uuid,
    price: Decimal,
    points: i32,
    payment_id: Option<&str>,
    status: OrderStatus,
) -> Result<Order, OrderError> {
    let row = sqlx::query(&format!(
        r#"INSERT INTO orders (user_id, book_id, price, points, payment_id, status)
           VALUES ($1, $2, $3, $4, $5, $6)
           RETURNING {ORDER_COLUMNS}"#
    ))
    .bind(user_id)
    .bind(book_id)
    .bind(price)
    .bind(points)
    .bind(payment_id)
    .bind(status.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(map_completed_conflict)?;

    Ok(order_from_row(&row))
}

/// The partial unique index on completed orders backs the "already owns"
/// pre-check against concurrent purchases.
fn map_completed_conflict(e: sqlx::Error) -> OrderError {
    if let sqlx::Error::Database(ref db) = e {
        if db.constraint() == Some("orders_one_completed_per_book") {
            return OrderError::AlreadyOwned;
        }
    }
    OrderError::Db(e)
}

async fn grant_book(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    book_id: Uuid,
) -> Result<(), OrderError> {
    // Granting an already-owned book is a no-op; duplicate webhook deliveries
    // must not error here.
    sqlx::query(
        r#"INSERT INTO user_books (user_id, book_id)
           VALUES ($1, $2)
           ON CONFLICT (user_id, book_id) DO NOTHING"#,
    )
    .bind(user_id)
    .bind(book_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Locks the user row so concurrent purchases by the same user serialize,
/// and the points check-then-decrement cannot race.
async fn lock_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<User, OrderError> {
    let row = sqlx::query(
        r#"SELECT id, name, email, phone, points, is_verified
           FROM users
           WHERE id = $1
           FOR UPDATE"#,
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(OrderError::UserNotFound)?;

    Ok(User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        points: row.get("points"),
        is_verified: row.get("is_verified"),
    })
}

/// Creates an order for (user, book) and fulfils it according to the book's
/// pricing mode. Free and points purchases complete synchronously; money
/// purchases are left `pending` and return the hosted checkout URL.
pub async fn create_order(
    state: &AppState,
    user_id: Uuid,
    book_id: Uuid,
) -> Result<PurchaseOutcome, OrderError> {
    let book = crate::db::get_book(&state.pool, book_id)
        .await?
        .ok_or(OrderError::BookNotFound)?;

    let already_owned = sqlx::query(
        r#"SELECT 1 AS one FROM orders
           WHERE user_id = $1 AND book_id = $2 AND status = 'completed'"#,
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_optional(&state.pool)
    .await?;
    if already_owned.is_some() {
        return Err(OrderError::AlreadyOwned);
    }

    let mode = PricingMode::resolve(&book)?;

    let mut tx = state.pool.begin().await?;
    let user = lock_user(&mut tx, user_id).await?;

    let outcome = match mode {
        PricingMode::Free => {
            let order = insert_order(
                &mut tx,
                user_id,
                book_id,
                Decimal::ZERO,
                0,
                None,
                OrderStatus::Completed,
            )
            .await?;
            grant_book(&mut tx, user_id, book_id).await?;
            PurchaseOutcome {
                order,
                payment_url: None,
            }
        }
        PricingMode::Points(cost) => {
            if user.points < cost {
                // Nothing has been written yet; dropping the transaction
                // leaves the balance untouched.
                return Err(OrderError::InsufficientPoints {
                    have: user.points,
                    need: cost,
                });
            }
            sqlx::query("UPDATE users SET points = points - $1 WHERE id = $2")
                .bind(cost)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            grant_book(&mut tx, user_id, book_id).await?;
            let order = insert_order(
                &mut tx,
                user_id,
                book_id,
                Decimal::ZERO,
                cost,
                None,
                OrderStatus::Completed,
            )
            .await?;
            PurchaseOutcome {
                order,
                payment_url: None,
            }
        }
        PricingMode::Money(price) => {
            // Gateway round-trip happens before anything is persisted: a
            // failure here must not leave a pending order behind.
            let amount_cents =
                paymob_client::amount_cents(price).ok_or(OrderError::MisconfiguredPricing)?;
            let auth_token = paymob_client::authenticate(&state.paymob_api_key).await?;
            let remote_order_id =
                paymob_client::create_payment_order(&auth_token, amount_cents, "EGP").await?;
            let billing = BillingData::from_user(&user);
            let payment_token = paymob_client::generate_payment_key(
                &auth_token,
                &state.paymob_integration_id,
                &remote_order_id,
                amount_cents,
                &billing,
            )
            .await?;
            let payment_url = paymob_client::payment_url(&state.paymob_iframe_id, &payment_token);

            let order = insert_order(
                &mut tx,
                user_id,
                book_id,
                price,
                0,
                Some(&remote_order_id),
                OrderStatus::Pending,
            )
            .await?;
            PurchaseOutcome {
                order,
                payment_url: Some(payment_url),
            }
        }
    };

    tx.commit().await?;

    log::info!(
        "order {} created user_id={} book_id={} status={}",
        outcome.order.id,
        user_id,
        book_id,
        outcome.order.status.as_str()
    );

    notify_purchase(state, &user.email, &book.title, &outcome.order);

    Ok(outcome)
}

/// Applies an asynchronous payment result to its pending order. Idempotent:
/// a repeated delivery for an already-settled order changes nothing.
pub async fn apply_payment_callback(
    state: &AppState,
    payment_id: &str,
    success: bool,
    failure_reason: Option<&str>,
) -> Result<CallbackOutcome, OrderError> {
    match settle_payment(state, payment_id, success, failure_reason).await {
        // Lost a race against another order completing for the same
        // (user, book): the partial unique index rejected the update and
        // aborted the transaction. On re-entry the duplicate check sees the
        // winner and this order settles as failed.
        Err(OrderError::AlreadyOwned) => {
            settle_payment(state, payment_id, success, failure_reason).await
        }
        other => other,
    }
}

async fn settle_payment(
    state: &AppState,
    payment_id: &str,
    success: bool,
    failure_reason: Option<&str>,
) -> Result<CallbackOutcome, OrderError> {
    let mut tx = state.pool.begin().await?;

    let row = sqlx::query(&format!(
        r#"SELECT {ORDER_COLUMNS} FROM orders
           WHERE payment_id = $1
           FOR UPDATE"#
    ))
    .bind(payment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| OrderError::UnknownPayment(payment_id.to_string()))?;

    let order = order_from_row(&row);

    if order.status.is_terminal() {
        tx.commit().await?;
        log::info!(
            "duplicate webhook for payment_id={} order={} status={}",
            payment_id,
            order.id,
            order.status.as_str()
        );
        return Ok(CallbackOutcome {
            order,
            already_settled: true,
            retry_payment_url: None,
        });
    }

    let mut new_status = if success {
        OrderStatus::Completed
    } else {
        OrderStatus::Failed
    };
    let mut reason = if success { None } else { failure_reason };

    if success {
        // Two open checkouts can both get paid. Only one completed order per
        // (user, book) may exist, so a paid duplicate settles as failed; the
        // entitlement is already held by the first one.
        let duplicate = sqlx::query(
            r#"SELECT 1 AS one FROM orders
               WHERE user_id = $1 AND book_id = $2 AND status = 'completed' AND id <> $3"#,
        )
        .bind(order.user_id)
        .bind(order.book_id)
        .bind(order.id)
        .fetch_optional(&mut *tx)
        .await?;
        if duplicate.is_some() {
            new_status = OrderStatus::Failed;
            reason = Some("book already purchased");
        }
    }

    let row = sqlx::query(&format!(
        r#"UPDATE orders
           SET status = $1, failure_reason = $2, updated_at = NOW()
           WHERE id = $3
           RETURNING {ORDER_COLUMNS}"#
    ))
    .bind(new_status.as_str())
    .bind(reason)
    .bind(order.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_completed_conflict)?;
    let order = order_from_row(&row);

    if order.status == OrderStatus::Completed {
        // Entitlement and status move together, in the same transaction.
        grant_book(&mut tx, order.user_id, order.book_id).await?;
    }

    tx.commit().await?;

    log::info!(
        "order {} settled via webhook payment_id={} status={}",
        order.id,
        payment_id,
        order.status.as_str()
    );

    // Retry only makes sense when the gateway itself reported a failure; a
    // paid duplicate needs no second attempt.
    let retry_payment_url = if !success && order.status == OrderStatus::Failed {
        mint_retry_payment_url(state, &order).await
    } else {
        None
    };

    notify_payment_status(state, &order);

    Ok(CallbackOutcome {
        order,
        already_settled: false,
        retry_payment_url,
    })
}

/// After a failed payment the user can re-attempt checkout for the same
/// remote order without a duplicate order row. Best-effort: a gateway error
/// here only suppresses the retry link.
async fn mint_retry_payment_url(state: &AppState, order: &Order) -> Option<String> {
    let payment_id = order.payment_id.as_deref()?;
    let amount_cents = paymob_client::amount_cents(order.price)?;

    let user = match crate::db::get_user(&state.pool, order.user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return None,
        Err(e) => {
            log::warn!("retry url: user lookup failed: {e}");
            return None;
        }
    };

    let result = async {
        let auth_token = paymob_client::authenticate(&state.paymob_api_key).await?;
        let token = paymob_client::generate_payment_key(
            &auth_token,
            &state.paymob_integration_id,
            payment_id,
            amount_cents,
            &BillingData::from_user(&user),
        )
        .await?;
        Ok::<_, PaymobError>(paymob_client::payment_url(&state.paymob_iframe_id, &token))
    }
    .await;

    match result {
        Ok(url) => Some(url),
        Err(e) => {
            log::warn!("retry payment url for order {} failed: {e}", order.id);
            None
        }
    }
}

/// Purchase confirmation, best-effort: a mail failure never rolls back or
/// fails the purchase.
fn notify_purchase(state: &AppState, email: &str, book_title: &str, order: &Order) {
    let Some(mailer) = state.mailer.clone() else {
        return;
    };
    let email = email.to_string();
    let title = book_title.to_string();
    let order = order.clone();
    tokio::spawn(async move {
        if let Err(e) = mailer.send_order_confirmation(&email, &title, &order).await {
            log::warn!("order confirmation email failed: {e}");
        }
    });
}

fn notify_payment_status(state: &AppState, order: &Order) {
    let Some(mailer) = state.mailer.clone() else {
        return;
    };
    let pool = state.pool.clone();
    let order = order.clone();
    tokio::spawn(async move {
        let email = match crate::db::get_user_email(&pool, order.user_id).await {
            Ok(Some(email)) => email,
            Ok(None) => return,
            Err(e) => {
                log::warn!("status email: user lookup failed: {e}");
                return;
            }
        };
        if let Err(e) = mailer.send_payment_status(&email, &order).await {
            log::warn!("payment status email failed: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn book(is_free: bool, price_points: Option<i32>, price: Option<Decimal>) -> Book {
        Book {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: None,
            cover: None,
            audio: None,
            duration: 0,
            rating: 0.0,
            is_free,
            price,
            price_points,
            author_id: None,
            created_at: None,
        }
    }

    #[test]
    fn free_wins_over_points_and_price() {
        let b = book(true, Some(50), Some(Decimal::new(10000, 2)));
        assert_eq!(PricingMode::resolve(&b).unwrap(), PricingMode::Free);
    }

    #[test]
    fn points_win_over_price() {
        let b = book(false, Some(50), Some(Decimal::new(10000, 2)));
        assert_eq!(PricingMode::resolve(&b).unwrap(), PricingMode::Points(50));
    }

    #[test]
    fn money_when_only_price_set() {
        let price = Decimal::new(9950, 2);
        let b = book(false, None, Some(price));
        assert_eq!(PricingMode::resolve(&b).unwrap(), PricingMode::Money(price));
    }

    #[test]
    fn zero_points_falls_through_to_price() {
        let price = Decimal::new(500, 2);
        let b = book(false, Some(0), Some(price));
        assert_eq!(PricingMode::resolve(&b).unwrap(), PricingMode::Money(price));
    }

    #[test]
    fn no_pricing_fields_is_a_configuration_error() {
        let b = book(false, None, None);
        assert!(matches!(
            PricingMode::resolve(&b),
            Err(OrderError::MisconfiguredPricing)
        ));
    }

    #[test]
    fn zero_price_is_a_configuration_error() {
        let b = book(false, None, Some(Decimal::ZERO));
        assert!(matches!(
            PricingMode::resolve(&b),
            Err(OrderError::MisconfiguredPricing)
        ));
    }
}
