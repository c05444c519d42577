// src/ai.rs
//
// Groq chat-completions client (OpenAI-compatible API) for book summaries,
// plus the per-user daily quota that guards it.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
const GROQ_MODEL: &str = "llama-3.3-70b-versatile";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "You are a helpful assistant specialised in books and literature. \
Answer concisely. If the question is unrelated to books or reading, politely decline.";

#[derive(Debug)]
pub enum GroqError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    InvalidResponse(String),
}

impl fmt::Display for GroqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroqError::Http(e) => write!(f, "http error: {e}"),
            GroqError::Api { status, body } => {
                write!(f, "groq api error status={status} body={body}")
            }
            GroqError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl From<reqwest::Error> for GroqError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

async fn chat(api_key: &str, prompt: &str) -> Result<String, GroqError> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    let resp = client
        .post(format!("{GROQ_API_BASE}/chat/completions"))
        .bearer_auth(api_key)
        .json(&serde_json::json!({
            "model": GROQ_MODEL,
            "temperature": 0.7,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        }))
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(GroqError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|e| GroqError::InvalidResponse(format!("{e}; body={body}")))?;

    value["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| GroqError::InvalidResponse(format!("no completion in response; body={body}")))
}

pub async fn summarize_book(api_key: &str, description: &str) -> Result<String, GroqError> {
    let prompt = format!(
        "Summarise this book in one clear paragraph, covering its main ideas: {description}"
    );
    chat(api_key, &prompt).await
}

/// Atomically consumes one unit of the caller's AI quota for the current UTC
/// day. Returns false when the limit is already reached. Keyed storage, so
/// counters survive restarts and multi-instance deployments; day rollover is
/// just a new key.
pub async fn try_consume_ai_quota(
    pool: &PgPool,
    user_id: Uuid,
    daily_limit: i32,
) -> Result<bool, sqlx::Error> {
    if daily_limit <= 0 {
        return Ok(false);
    }

    // The WHERE guards only the conflicting update; the first insert of the
    // day is always within a positive limit.
    let row = sqlx::query(
        r#"INSERT INTO ai_usage (user_id, day, count)
           VALUES ($1, (NOW() AT TIME ZONE 'utc')::date, 1)
           ON CONFLICT (user_id, day)
           DO UPDATE SET count = ai_usage.count + 1
           WHERE ai_usage.count < $2
           RETURNING count"#,
    )
    .bind(user_id)
    .bind(daily_limit)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}
