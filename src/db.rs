// src/db.rs

use std::collections::HashSet;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{AuthorBrief, Book, BookDetail, BookSummary, CategoryBrief, MyOrder, User};

fn book_from_row(r: &PgRow) -> Book {
    Book {
        id: r.get("id"),
        title: r.get("title"),
        description: r.get("description"),
        cover: r.get("cover"),
        audio: r.get("audio"),
        duration: r.get("duration"),
        rating: r.get("rating"),
        is_free: r.get("is_free"),
        price: r.get("price"),
        price_points: r.get("price_points"),
        author_id: r.get("author_id"),
        created_at: r.get("created_at"),
    }
}

fn summary_from_row(r: &PgRow) -> BookSummary {
    BookSummary {
        id: r.get("id"),
        title: r.get("title"),
        description: r.get("description"),
        cover: r.get("cover"),
        is_free: r.get("is_free"),
        price: r.get("price"),
        price_points: r.get("price_points"),
        author_name: r.get("author_name"),
        is_favorite: false,
    }
}

pub async fn get_book(pool: &PgPool, id: Uuid) -> Result<Option<Book>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, title, description, cover, audio, duration, rating,
                  is_free, price, price_points, author_id, created_at
           FROM books
           WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| book_from_row(&r)))
}

pub async fn list_books(
    pool: &PgPool,
    category_id: Option<Uuid>,
    search: Option<&str>,
) -> Result<Vec<BookSummary>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT b.id, b.title, b.description, b.cover, b.is_free,
                  b.price, b.price_points, a.name AS author_name
           FROM books b
           LEFT JOIN authors a ON a.id = b.author_id
           WHERE ($1::uuid IS NULL OR EXISTS (
                     SELECT 1 FROM book_categories bc
                     WHERE bc.book_id = b.id AND bc.category_id = $1))
             AND ($2::text IS NULL OR b.title ILIKE '%' || $2 || '%')
           ORDER BY b.created_at DESC"#,
    )
    .bind(category_id)
    .bind(search)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(summary_from_row).collect())
}

pub async fn list_point_books(pool: &PgPool) -> Result<Vec<BookSummary>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT b.id, b.title, b.description, b.cover, b.is_free,
                  b.price, b.price_points, a.name AS author_name
           FROM books b
           LEFT JOIN authors a ON a.id = b.author_id
           WHERE b.price_points IS NOT NULL
           ORDER BY b.price_points ASC"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(summary_from_row).collect())
}

/// Highly rated paid books, used for the recommendations shelf.
pub async fn list_recommended_books(pool: &PgPool) -> Result<Vec<BookSummary>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT b.id, b.title, b.description, b.cover, b.is_free,
                  b.price, b.price_points, a.name AS author_name
           FROM books b
           LEFT JOIN authors a ON a.id = b.author_id
           WHERE b.rating >= 4 AND b.price IS NOT NULL
           ORDER BY b.rating DESC"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(summary_from_row).collect())
}

pub async fn get_book_detail(pool: &PgPool, id: Uuid) -> Result<Option<BookDetail>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT b.id, b.title, b.description, b.cover, b.duration, b.is_free,
                  b.price, b.price_points, a.name AS author_name, a.photo AS author_photo
           FROM books b
           LEFT JOIN authors a ON a.id = b.author_id
           WHERE b.id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let categories = sqlx::query(
        r#"SELECT c.id, c.name, c.photo
           FROM book_categories bc
           JOIN categories c ON c.id = bc.category_id
           WHERE bc.book_id = $1
           ORDER BY c.name"#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|r| CategoryBrief {
        id: r.get("id"),
        name: r.get("name"),
        photo: r.get("photo"),
    })
    .collect();

    // Recompute the average rating on every fetch and persist it, because
    // recommendations are ranked by the stored rating.
    let stats = sqlx::query(
        r#"SELECT COUNT(*) AS reviews_count, COALESCE(AVG(stars), 0)::float8 AS rating
           FROM reviews
           WHERE book_id = $1"#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    let reviews_count: i64 = stats.get("reviews_count");
    let rating: f64 = stats.get("rating");

    sqlx::query("UPDATE books SET rating = $1 WHERE id = $2")
        .bind(rating)
        .bind(id)
        .execute(pool)
        .await?;

    let author_name: Option<String> = row.get("author_name");
    let author = author_name.map(|name| AuthorBrief {
        name,
        photo: row.get("author_photo"),
    });

    Ok(Some(BookDetail {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        cover: row.get("cover"),
        duration: row.get("duration"),
        is_free: row.get("is_free"),
        price: row.get("price"),
        price_points: row.get("price_points"),
        author,
        categories,
        rating,
        reviews_count,
    }))
}

pub async fn get_user(pool: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, name, email, phone, points, is_verified
           FROM users
           WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| User {
        id: r.get("id"),
        name: r.get("name"),
        email: r.get("email"),
        phone: r.get("phone"),
        points: r.get("points"),
        is_verified: r.get("is_verified"),
    }))
}

pub async fn get_user_email(pool: &PgPool, id: Uuid) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT email FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("email")))
}

/// Entitlement check: either granted directly or backed by a completed order.
pub async fn user_owns_book(pool: &PgPool, user_id: Uuid, book_id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT EXISTS (
               SELECT 1 FROM user_books WHERE user_id = $1 AND book_id = $2
           ) OR EXISTS (
               SELECT 1 FROM orders
               WHERE user_id = $1 AND book_id = $2 AND status = 'completed'
           ) AS owns"#,
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_one(pool)
    .await?;

    Ok(row.get("owns"))
}

pub async fn favorite_book_ids(pool: &PgPool, user_id: Uuid) -> Result<HashSet<Uuid>, sqlx::Error> {
    let rows = sqlx::query("SELECT book_id FROM favorites WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|r| r.get("book_id")).collect())
}

pub async fn list_favorites(pool: &PgPool, user_id: Uuid) -> Result<Vec<BookSummary>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT b.id, b.title, b.description, b.cover, b.is_free,
                  b.price, b.price_points, a.name AS author_name
           FROM favorites f
           JOIN books b ON b.id = f.book_id
           LEFT JOIN authors a ON a.id = b.author_id
           WHERE f.user_id = $1
           ORDER BY f.created_at DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| {
            let mut s = summary_from_row(r);
            s.is_favorite = true;
            s
        })
        .collect())
}

pub async fn list_my_orders(pool: &PgPool, user_id: Uuid) -> Result<Vec<MyOrder>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT o.id AS order_id,
                  b.id, b.title, b.description, b.cover, b.is_free,
                  b.price, b.price_points, a.name AS author_name
           FROM orders o
           JOIN books b ON b.id = o.book_id
           LEFT JOIN authors a ON a.id = b.author_id
           WHERE o.user_id = $1 AND o.status = 'completed'
           ORDER BY o.created_at DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| MyOrder {
            order_id: r.get("order_id"),
            book: summary_from_row(r),
        })
        .collect())
}

/// Book content behind a completed order, for the "listen/read" screen.
pub async fn get_unlocked_book(
    pool: &PgPool,
    order_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Book>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT b.id, b.title, b.description, b.cover, b.audio, b.duration,
                  b.rating, b.is_free, b.price, b.price_points, b.author_id, b.created_at
           FROM orders o
           JOIN books b ON b.id = o.book_id
           WHERE o.id = $1 AND o.user_id = $2 AND o.status = 'completed'"#,
    )
    .bind(order_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| book_from_row(&r)))
}
