use crate::models::HealthResponse;
use actix_web::{web, HttpResponse};

pub fn health_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/health")
            .route(web::get().to(health_check))
            .route(web::method(actix_web::http::Method::OPTIONS).to(health_options)),
    );
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is running", body = HealthResponse),
    )
)]
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn health_options() -> HttpResponse {
    HttpResponse::Ok().finish()
}
