pub mod auth;
pub mod books;
pub mod favorites;
pub mod orders;
pub mod paymob_client;
pub mod webhooks_paymob;
