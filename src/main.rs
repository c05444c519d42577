// src/main.rs

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use sqlx::PgPool;
use std::env;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use sard_bookstore::mailer::Mailer;
use sard_bookstore::{api, docs, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let paymob_api_key = env::var("PAYMOB_API_KEY").expect("PAYMOB_API_KEY required");
    let paymob_integration_id =
        env::var("PAYMOB_INTEGRATION_ID").expect("PAYMOB_INTEGRATION_ID required");
    let paymob_iframe_id = env::var("PAYMOB_IFRAME_ID").expect("PAYMOB_IFRAME_ID required");
    let paymob_webhook_key = env::var("PAYMOB_WEBHOOK_KEY").ok();
    let groq_api_key = env::var("GROQ_API_KEY").unwrap_or_default();
    let ai_daily_limit = env::var("AI_DAILY_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    let mailer = Mailer::from_env();
    if mailer.is_none() {
        log::warn!("SMTP_HOST is not set, transactional emails are disabled");
    }

    let state = web::Data::new(AppState {
        pool,
        paymob_api_key,
        paymob_integration_id,
        paymob_iframe_id,
        paymob_webhook_key,
        groq_api_key,
        ai_daily_limit,
        mailer,
    });

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    log::info!("listening on {bind_addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            // Public routes
            .service(api::auth::register)
            .service(api::auth::login)
            .service(api::auth::request_email_verification)
            .service(api::auth::confirm_email_verification)
            .service(api::auth::request_password_reset)
            .service(api::auth::confirm_password_reset)
            .service(api::auth::change_password)
            .service(api::books::list_books_landing)
            // Payment gateway callback (signed, not JWT-authenticated)
            .service(api::webhooks_paymob::paymob_webhook)
            // Authenticated routes
            .service(
                web::scope("")
                    .wrap(api::auth::JwtMiddleware)
                    .service(api::orders::create_order)
                    .service(api::orders::list_my_orders)
                    .service(api::orders::get_order)
                    .service(api::orders::get_order_book)
                    .service(api::books::list_point_books)
                    .service(api::books::list_recommendations)
                    .service(api::books::list_books)
                    .service(api::books::get_book)
                    .service(api::books::add_review)
                    .service(api::books::get_book_summary)
                    .service(api::favorites::add_favorite)
                    .service(api::favorites::remove_favorite)
                    .service(api::favorites::list_favorites),
            )
    })
    .bind(bind_addr)?
    .run()
    .await
}
