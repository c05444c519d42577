// src/models.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub audio: Option<String>,
    /// Runtime in seconds.
    pub duration: i32,
    pub rating: f64,
    pub is_free: bool,
    pub price: Option<Decimal>,
    pub price_points: Option<i32>,
    pub author_id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Catalog listing row: book plus author name and the caller's favorite flag.
#[derive(Debug, Serialize, ToSchema)]
pub struct BookSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub is_free: bool,
    pub price: Option<Decimal>,
    pub price_points: Option<i32>,
    pub author_name: Option<String>,
    pub is_favorite: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthorBrief {
    pub name: String,
    pub photo: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CategoryBrief {
    pub id: Uuid,
    pub name: String,
    pub photo: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BookDetail {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub duration: i32,
    pub is_free: bool,
    pub price: Option<Decimal>,
    pub price_points: Option<i32>,
    pub author: Option<AuthorBrief>,
    pub categories: Vec<CategoryBrief>,
    pub rating: f64,
    pub reviews_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "completed" => Some(OrderStatus::Completed),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: Uuid,
    /// Money charged; zero unless this is a gateway purchase.
    pub price: Decimal,
    /// Points spent; zero unless this is a points purchase.
    pub points: i32,
    /// Remote order id at the payment gateway; set only on the money path.
    pub payment_id: Option<String>,
    pub status: OrderStatus,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub points: i32,
    pub is_verified: bool,
}

/// A completed purchase as shown in "my orders".
#[derive(Debug, Serialize, ToSchema)]
pub struct MyOrder {
    pub order_id: Uuid,
    pub book: BookSummary,
}
