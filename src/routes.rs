use actix_web::{web, HttpResponse, Scope};
use utoipa::OpenApi;

use crate::app::ApiDoc;
use crate::handlers::{account_config, admin_config, ai_config, books_config, health_config};

/// Configure all routes for the API
pub fn api_routes() -> Scope {
    web::scope("/api")
        .configure(health_config)
        .configure(books_config)
        .configure(account_config)
        .configure(ai_config)
        .configure(admin_config)
}

/// Configure OpenAPI documentation JSON endpoint
pub fn openapi_route() -> actix_web::Resource {
    web::resource("/api-docs/openapi.json")
        .route(web::get().to(|| async { HttpResponse::Ok().json(ApiDoc::openapi()) }))
        .route(
            web::route()
                .method(actix_web::http::Method::OPTIONS)
                .to(|| async { HttpResponse::Ok().finish() }),
        )
}
