// src/api/books.rs

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::auth::AuthUser;
use crate::models::BookSummary;
use crate::{ai, db, AppState};

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub category_id: Option<Uuid>,
    pub search: Option<String>,
}

async fn with_favorite_flags(
    state: &AppState,
    user_id: Uuid,
    mut books: Vec<BookSummary>,
) -> Result<Vec<BookSummary>, sqlx::Error> {
    let favorites = db::favorite_book_ids(&state.pool, user_id).await?;
    for book in &mut books {
        book.is_favorite = favorites.contains(&book.id);
    }
    Ok(books)
}

#[utoipa::path(
    get,
    path = "/books",
    tag = "books",
    responses((status = 200, description = "Catalog with the caller's favorite flags"))
)]
#[get("/books")]
pub async fn list_books(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<CatalogQuery>,
) -> impl Responder {
    let books =
        match db::list_books(&state.pool, query.category_id, query.search.as_deref()).await {
            Ok(b) => b,
            Err(e) => {
                log::error!("list_books db error: {e}");
                return HttpResponse::InternalServerError().finish();
            }
        };

    match with_favorite_flags(&state, user.id, books).await {
        Ok(books) => HttpResponse::Ok().json(json!({"books": books})),
        Err(e) => {
            log::error!("list_books favorites error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Public catalog for the landing page, no auth and no favorite flags.
#[get("/landing/books")]
pub async fn list_books_landing(
    state: web::Data<AppState>,
    query: web::Query<CatalogQuery>,
) -> impl Responder {
    match db::list_books(&state.pool, query.category_id, query.search.as_deref()).await {
        Ok(books) => HttpResponse::Ok().json(books),
        Err(e) => {
            log::error!("list_books_landing db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/books/points")]
pub async fn list_point_books(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> impl Responder {
    let books = match db::list_point_books(&state.pool).await {
        Ok(b) => b,
        Err(e) => {
            log::error!("list_point_books db error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    match with_favorite_flags(&state, user.id, books).await {
        Ok(books) => HttpResponse::Ok().json(json!({"books": books})),
        Err(e) => {
            log::error!("list_point_books favorites error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/books/recommendations")]
pub async fn list_recommendations(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> impl Responder {
    let books = match db::list_recommended_books(&state.pool).await {
        Ok(b) => b,
        Err(e) => {
            log::error!("list_recommendations db error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    match with_favorite_flags(&state, user.id, books).await {
        Ok(books) => HttpResponse::Ok().json(json!({"books": books})),
        Err(e) => {
            log::error!("list_recommendations favorites error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/books/{id}")]
pub async fn get_book(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    match db::get_book_detail(&state.pool, path.into_inner()).await {
        Ok(Some(detail)) => HttpResponse::Ok().json(detail),
        Ok(None) => HttpResponse::NotFound().json(json!({"error": "book not found"})),
        Err(e) => {
            log::error!("get_book db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReviewRequest {
    pub stars: i32,
}

#[post("/books/{id}/reviews")]
pub async fn add_review(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<Uuid>,
    payload: web::Json<CreateReviewRequest>,
) -> impl Responder {
    let book_id = path.into_inner();

    if !(1..=5).contains(&payload.stars) {
        return HttpResponse::BadRequest().json(json!({"error": "stars must be 1..5"}));
    }

    // Only owners may review.
    match db::user_owns_book(&state.pool, user.id, book_id).await {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::Forbidden()
                .json(json!({"error": "you can only review books you own"}));
        }
        Err(e) => {
            log::error!("add_review ownership check error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    let result = sqlx::query(
        r#"INSERT INTO reviews (user_id, book_id, stars)
           VALUES ($1, $2, $3)"#,
    )
    .bind(user.id)
    .bind(book_id)
    .bind(payload.stars)
    .execute(&state.pool)
    .await;

    match result {
        Ok(_) => HttpResponse::Ok().json(json!({"message": "review added"})),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            HttpResponse::BadRequest().json(json!({"error": "you have already reviewed this book"}))
        }
        Err(e) => {
            log::error!("add_review insert error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// AI summary of a book description. Consumes one unit of the caller's
/// daily AI quota.
#[get("/books/{id}/summary")]
pub async fn get_book_summary(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<Uuid>,
) -> impl Responder {
    let book = match db::get_book(&state.pool, path.into_inner()).await {
        Ok(Some(b)) => b,
        Ok(None) => return HttpResponse::NotFound().json(json!({"error": "book not found"})),
        Err(e) => {
            log::error!("get_book_summary db error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let Some(description) = book.description.as_deref().filter(|d| !d.is_empty()) else {
        return HttpResponse::BadRequest().json(json!({"error": "book has no description"}));
    };

    match ai::try_consume_ai_quota(&state.pool, user.id, state.ai_daily_limit).await {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::TooManyRequests()
                .json(json!({"error": "daily AI quota exhausted"}));
        }
        Err(e) => {
            log::error!("ai quota error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    match ai::summarize_book(&state.groq_api_key, description).await {
        Ok(summary) => HttpResponse::Ok().json(json!({"summary": summary})),
        Err(e) => {
            log::error!("groq summarize error: {e}");
            HttpResponse::BadGateway().json(json!({"error": "summary generation failed"}))
        }
    }
}
