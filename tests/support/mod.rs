use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::env;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use sard_bookstore::AppState;

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

pub async fn init_test_db() -> TestDb {
    dotenvy::dotenv().ok();
    let test_url = env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let (admin_url, db_name) =
        split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url)
        .await
        .expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    let create_result = sqlx::query(&create_sql).execute(&admin_pool).await;
    if let Err(e) = create_result {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url)
        .await
        .expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    TestDb { pool, _guard: guard }
}

pub fn build_state(pool: PgPool, paymob_webhook_key: Option<&str>) -> AppState {
    AppState {
        pool,
        paymob_api_key: "test-paymob".to_string(),
        paymob_integration_id: "1".to_string(),
        paymob_iframe_id: "1".to_string(),
        paymob_webhook_key: paymob_webhook_key.map(|k| k.to_string()),
        groq_api_key: String::new(),
        ai_daily_limit: 5,
        mailer: None,
    }
}

pub async fn insert_user(pool: &PgPool, points: i32) -> Uuid {
    let suffix = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO users (name, email, phone, password_hash, points)
           VALUES ($1, $2, '01012345678', 'test-hash', $3)
           RETURNING id"#,
    )
    .bind(format!("user_{suffix}"))
    .bind(format!("user_{suffix}@example.com"))
    .bind(points)
    .fetch_one(pool)
    .await
    .expect("insert user")
    .get("id")
}

pub async fn insert_book(
    pool: &PgPool,
    is_free: bool,
    price_points: Option<i32>,
    price: Option<Decimal>,
) -> Uuid {
    sqlx::query(
        r#"INSERT INTO books (title, description, is_free, price_points, price)
           VALUES ($1, 'test description', $2, $3, $4)
           RETURNING id"#,
    )
    .bind(format!("book_{}", Uuid::new_v4()))
    .bind(is_free)
    .bind(price_points)
    .bind(price)
    .fetch_one(pool)
    .await
    .expect("insert book")
    .get("id")
}

pub async fn user_points(pool: &PgPool, user_id: Uuid) -> i32 {
    sqlx::query("SELECT points FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("select points")
        .get("points")
}

pub async fn owns_book(pool: &PgPool, user_id: Uuid, book_id: Uuid) -> bool {
    sqlx::query(
        "SELECT EXISTS (SELECT 1 FROM user_books WHERE user_id = $1 AND book_id = $2) AS owns",
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_one(pool)
    .await
    .expect("select ownership")
    .get("owns")
}

pub async fn completed_orders_count(pool: &PgPool, user_id: Uuid, book_id: Uuid) -> i64 {
    sqlx::query(
        r#"SELECT COUNT(*) AS n FROM orders
           WHERE user_id = $1 AND book_id = $2 AND status = 'completed'"#,
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_one(pool)
    .await
    .expect("count orders")
    .get("n")
}
