// src/api/favorites.rs

use actix_web::{delete, get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::auth::AuthUser;
use crate::{db, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddFavoriteRequest {
    pub book_id: Uuid,
}

#[post("/favorites")]
pub async fn add_favorite(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<AddFavoriteRequest>,
) -> impl Responder {
    let book = match db::get_book(&state.pool, payload.book_id).await {
        Ok(b) => b,
        Err(e) => {
            log::error!("add_favorite book lookup error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };
    if book.is_none() {
        return HttpResponse::NotFound().json(json!({"error": "book not found"}));
    }

    let result = sqlx::query("INSERT INTO favorites (user_id, book_id) VALUES ($1, $2)")
        .bind(user.id)
        .bind(payload.book_id)
        .execute(&state.pool)
        .await;

    match result {
        Ok(_) => HttpResponse::Ok().json(json!({"message": "book added to favorites"})),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            HttpResponse::BadRequest().json(json!({"error": "book is already in favorites"}))
        }
        Err(e) => {
            log::error!("add_favorite insert error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[delete("/favorites/{book_id}")]
pub async fn remove_favorite(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<Uuid>,
) -> impl Responder {
    let result = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND book_id = $2")
        .bind(user.id)
        .bind(path.into_inner())
        .execute(&state.pool)
        .await;

    match result {
        Ok(r) if r.rows_affected() > 0 => {
            HttpResponse::Ok().json(json!({"message": "favorite removed"}))
        }
        Ok(_) => HttpResponse::NotFound().json(json!({"error": "favorite not found"})),
        Err(e) => {
            log::error!("remove_favorite db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/favorites")]
pub async fn list_favorites(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> impl Responder {
    match db::list_favorites(&state.pool, user.id).await {
        Ok(favorites) => HttpResponse::Ok().json(json!({"favorites": favorites})),
        Err(e) => {
            log::error!("list_favorites db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
