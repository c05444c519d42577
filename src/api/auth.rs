// src/api/auth.rs

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{post, web, Error, HttpMessage, HttpResponse, Responder};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::Row;
use std::task::{Context, Poll};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    exp: usize,
}

/// Authenticated caller, injected into request extensions by [`JwtMiddleware`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OtpRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OtpConfirmRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub email: String,
    pub old_password: String,
    pub new_password: String,
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

const OTP_TTL_MINUTES: i64 = 10;

/// Stores a hashed verification code on the user row and emails the plain
/// code. Returns false when the user does not exist.
async fn issue_otp(
    state: &AppState,
    email: &str,
    reset: bool,
) -> Result<bool, sqlx::Error> {
    let code = generate_code();
    let hashed = hash_code(&code);
    let expires_at = Utc::now() + Duration::minutes(OTP_TTL_MINUTES);

    let query = if reset {
        "UPDATE users SET reset_otp_hash = $1, reset_otp_expires_at = $2 WHERE email = $3 RETURNING id"
    } else {
        "UPDATE users SET otp_hash = $1, otp_expires_at = $2 WHERE email = $3 RETURNING id"
    };

    let updated = sqlx::query(query)
        .bind(&hashed)
        .bind(expires_at)
        .bind(email)
        .fetch_optional(&state.pool)
        .await?;

    if updated.is_none() {
        return Ok(false);
    }

    // Detached, so a slow SMTP server cannot stall the request.
    if let Some(mailer) = state.mailer.clone() {
        let email = email.to_string();
        tokio::spawn(async move {
            let result = if reset {
                mailer.send_reset_code(&email, &code, OTP_TTL_MINUTES).await
            } else {
                mailer
                    .send_verification_code(&email, &code, OTP_TTL_MINUTES)
                    .await
            };
            if let Err(e) = result {
                log::warn!("otp email to {email} failed: {e}");
            }
        });
    }

    Ok(true)
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created", body = AuthResponse),
        (status = 400, description = "User already exists or invalid data")
    )
)]
#[post("/auth/register")]
pub async fn register(
    state: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> impl Responder {
    let email = payload.email.trim().to_lowercase();
    if !email.contains('@') || !email.contains('.') {
        return HttpResponse::BadRequest().json(serde_json::json!({"error": "invalid email"}));
    }

    let password_hash = match hash(&payload.password, DEFAULT_COST) {
        Ok(h) => h,
        Err(e) => {
            log::error!("bcrypt hash error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let row = match sqlx::query(
        r#"INSERT INTO users (name, email, phone, password_hash)
           VALUES ($1, $2, $3, $4)
           RETURNING id"#,
    )
    .bind(payload.name.as_deref())
    .bind(&email)
    .bind(payload.phone.as_deref())
    .bind(password_hash)
    .fetch_one(&state.pool)
    .await
    {
        Ok(r) => r,
        Err(e) => {
            log::warn!("register db error: {e}");
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "user already exists or invalid data"
            }));
        }
    };

    let user_id: Uuid = row.get("id");

    // Verification code is best-effort at registration time.
    if let Err(e) = issue_otp(&state, &email, false).await {
        log::warn!("issue verification otp error: {e}");
    }

    let token = match generate_jwt(user_id) {
        Ok(t) => t,
        Err(e) => {
            log::error!("jwt encode error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    HttpResponse::Ok().json(AuthResponse { token, user_id })
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
#[post("/auth/login")]
pub async fn login(state: web::Data<AppState>, payload: web::Json<LoginRequest>) -> impl Responder {
    let email = payload.email.trim().to_lowercase();

    let row = match sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.pool)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            log::error!("login db error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let Some(row) = row else {
        return HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "invalid credentials"
        }));
    };

    let user_id: Uuid = row.get("id");
    let password_hash: String = row.get("password_hash");

    match verify(&payload.password, &password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "invalid credentials"
            }));
        }
        Err(e) => {
            log::error!("bcrypt verify error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let token = match generate_jwt(user_id) {
        Ok(t) => t,
        Err(e) => {
            log::error!("jwt encode error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    log::info!("user {email} logged in");
    HttpResponse::Ok().json(AuthResponse { token, user_id })
}

#[post("/auth/verify-email/request")]
pub async fn request_email_verification(
    state: web::Data<AppState>,
    payload: web::Json<OtpRequest>,
) -> impl Responder {
    match issue_otp(&state, &payload.email.trim().to_lowercase(), false).await {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": "code sent to your email"
        })),
        Ok(false) => {
            HttpResponse::NotFound().json(serde_json::json!({"error": "user not found"}))
        }
        Err(e) => {
            log::error!("request_email_verification db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[post("/auth/verify-email/confirm")]
pub async fn confirm_email_verification(
    state: web::Data<AppState>,
    payload: web::Json<OtpConfirmRequest>,
) -> impl Responder {
    let email = payload.email.trim().to_lowercase();
    let hashed = hash_code(&payload.code);

    let updated = sqlx::query(
        r#"UPDATE users
           SET is_verified = TRUE, otp_hash = NULL, otp_expires_at = NULL
           WHERE email = $1 AND otp_hash = $2 AND otp_expires_at > NOW()
           RETURNING id"#,
    )
    .bind(&email)
    .bind(&hashed)
    .fetch_optional(&state.pool)
    .await;

    match updated {
        Ok(Some(_)) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": "email verified successfully"
        })),
        Ok(None) => HttpResponse::BadRequest().json(serde_json::json!({"error": "invalid code"})),
        Err(e) => {
            log::error!("confirm_email_verification db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[post("/auth/reset-password/request")]
pub async fn request_password_reset(
    state: web::Data<AppState>,
    payload: web::Json<OtpRequest>,
) -> impl Responder {
    match issue_otp(&state, &payload.email.trim().to_lowercase(), true).await {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": "code sent to your email"
        })),
        Ok(false) => {
            HttpResponse::NotFound().json(serde_json::json!({"error": "user not found"}))
        }
        Err(e) => {
            log::error!("request_password_reset db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[post("/auth/reset-password/confirm")]
pub async fn confirm_password_reset(
    state: web::Data<AppState>,
    payload: web::Json<OtpConfirmRequest>,
) -> impl Responder {
    let email = payload.email.trim().to_lowercase();
    let hashed = hash_code(&payload.code);

    let row = sqlx::query(
        r#"SELECT id FROM users
           WHERE email = $1 AND reset_otp_hash = $2 AND reset_otp_expires_at > NOW()"#,
    )
    .bind(&email)
    .bind(&hashed)
    .fetch_optional(&state.pool)
    .await;

    match row {
        Ok(Some(_)) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": "code verified"
        })),
        Ok(None) => HttpResponse::BadRequest().json(serde_json::json!({"error": "invalid code"})),
        Err(e) => {
            log::error!("confirm_password_reset db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[post("/auth/change-password")]
pub async fn change_password(
    state: web::Data<AppState>,
    payload: web::Json<ChangePasswordRequest>,
) -> impl Responder {
    let email = payload.email.trim().to_lowercase();

    let row = match sqlx::query(
        "SELECT id, password_hash, is_verified FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await
    {
        Ok(r) => r,
        Err(e) => {
            log::error!("change_password db error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let Some(row) = row else {
        return HttpResponse::NotFound().json(serde_json::json!({"error": "user not found"}));
    };

    let user_id: Uuid = row.get("id");
    let password_hash: String = row.get("password_hash");
    let is_verified: bool = row.get("is_verified");

    if !is_verified {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({"error": "email not verified"}));
    }

    match verify(&payload.old_password, &password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::BadRequest()
                .json(serde_json::json!({"error": "current password is incorrect"}));
        }
        Err(e) => {
            log::error!("bcrypt verify error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    if payload.new_password == payload.old_password {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "new password must be different from current password"
        }));
    }

    let new_hash = match hash(&payload.new_password, DEFAULT_COST) {
        Ok(h) => h,
        Err(e) => {
            log::error!("bcrypt hash error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let result = sqlx::query(
        r#"UPDATE users
           SET password_hash = $1, reset_otp_hash = NULL, reset_otp_expires_at = NULL
           WHERE id = $2"#,
    )
    .bind(new_hash)
    .bind(user_id)
    .execute(&state.pool)
    .await;

    match result {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": "password updated successfully"
        })),
        Err(e) => {
            log::error!("change_password update error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn generate_jwt(user_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = std::env::var("JWT_SECRET").expect("JWT_SECRET required");

    let expiration = Utc::now()
        .checked_add_signed(Duration::days(30))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

/// Middleware, который:
/// - берет `Authorization: Bearer <jwt>`
/// - валидирует JWT
/// - кладет [`AuthUser`] в `req.extensions_mut()`
pub struct JwtMiddleware;

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtMiddlewareInner<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtMiddlewareInner { service }))
    }
}

pub struct JwtMiddlewareInner<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareInner<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let secret = match std::env::var("JWT_SECRET") {
            Ok(s) => s,
            Err(_) => {
                return Box::pin(async move {
                    Err(actix_web::error::ErrorInternalServerError(
                        "JWT secret not set",
                    ))
                })
            }
        };

        let auth_header = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");

        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            match decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_ref()),
                &Validation::default(),
            ) {
                Ok(token_data) => {
                    req.extensions_mut().insert(AuthUser {
                        id: token_data.claims.sub,
                    });
                    let fut = self.service.call(req);
                    return Box::pin(async move { fut.await });
                }
                Err(_) => {
                    return Box::pin(async move {
                        Err(actix_web::error::ErrorUnauthorized("Invalid token"))
                    })
                }
            }
        }

        Box::pin(async move {
            Err(actix_web::error::ErrorUnauthorized(
                "Missing or invalid Authorization header",
            ))
        })
    }
}
