use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::orders::create_order,
        crate::api::orders::list_my_orders,
        crate::api::books::list_books,
        crate::api::webhooks_paymob::paymob_webhook
    ),
    components(
        schemas(
            crate::api::auth::RegisterRequest,
            crate::api::auth::LoginRequest,
            crate::api::auth::AuthResponse,
            crate::api::orders::CreateOrderRequest,
            crate::api::orders::CreateOrderResponse,
            crate::api::webhooks_paymob::PaymobCallbackQuery,
            crate::models::Order,
            crate::models::BookSummary
        )
    ),
    tags(
        (name = "auth", description = "Authentication"),
        (name = "books", description = "Catalog"),
        (name = "orders", description = "Purchases"),
        (name = "webhooks", description = "Callbacks from Paymob")
    )
)]
pub struct ApiDoc;
