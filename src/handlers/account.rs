use crate::{
    error::ApiError,
    handlers::identity::CurrentUser,
    models::{
        AvatarRequest, AvatarResponse, Dashboard, ErrorResponse, NewUser, ProfileUpdate,
        RecommendationQuery, RecommendationResponse, UserProfile,
    },
    services::{AvatarService, LibraryService, RecommendationService},
};
use actix_web::{
    web::{self, Json, Query},
    HttpResponse,
};

pub fn account_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/users").route(web::post().to(register_user)))
        .service(web::resource("/me/dashboard").route(web::get().to(dashboard)))
        .service(web::resource("/me/profile").route(web::put().to(update_profile)))
        .service(web::resource("/me/avatar").route(web::post().to(generate_avatar)))
        .service(web::resource("/me/recommendations").route(web::get().to(recommendations)));
}

/// Register a library member
#[utoipa::path(
    post,
    path = "/api/users",
    tag = "Users",
    request_body = NewUser,
    responses(
        (status = 201, description = "Member registered", body = UserProfile),
        (status = 400, description = "Invalid name or email", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
    )
)]
pub async fn register_user(
    request: Json<NewUser>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    let user = library.register_user(request.into_inner())?;
    Ok(HttpResponse::Created().json(user))
}

/// Loans, history and counters for the calling user
#[utoipa::path(
    get,
    path = "/api/me/dashboard",
    tag = "Users",
    responses(
        (status = 200, description = "Dashboard", body = Dashboard),
        (status = 401, description = "Missing or unknown user", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn dashboard(
    user: CurrentUser,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.dashboard(user.id())?))
}

#[utoipa::path(
    put,
    path = "/api/me/profile",
    tag = "Users",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Updated profile", body = UserProfile),
        (status = 400, description = "Invalid name", body = ErrorResponse),
        (status = 401, description = "Missing or unknown user", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn update_profile(
    user: CurrentUser,
    request: Json<ProfileUpdate>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    let profile = library.update_profile(user.id(), request.into_inner())?;
    Ok(HttpResponse::Ok().json(profile))
}

/// Generate a profile avatar and store it on the profile
#[utoipa::path(
    post,
    path = "/api/me/avatar",
    tag = "Assistant",
    request_body = AvatarRequest,
    responses(
        (status = 200, description = "Avatar generated", body = AvatarResponse),
        (status = 400, description = "Style too long", body = ErrorResponse),
        (status = 401, description = "Missing or unknown user", body = ErrorResponse),
        (status = 502, description = "Language or image model unavailable", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn generate_avatar(
    user: CurrentUser,
    request: Option<Json<AvatarRequest>>,
    avatars: web::Data<AvatarService>,
) -> Result<HttpResponse, ApiError> {
    let style = request.and_then(|r| r.into_inner().style);
    Ok(HttpResponse::Ok().json(avatars.generate(user.id(), style).await?))
}

/// Books picked for the calling user from what is on the shelf
#[utoipa::path(
    get,
    path = "/api/me/recommendations",
    tag = "Assistant",
    params(RecommendationQuery),
    responses(
        (status = 200, description = "Recommendations with reasons", body = RecommendationResponse),
        (status = 401, description = "Missing or unknown user", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn recommendations(
    user: CurrentUser,
    query: Query<RecommendationQuery>,
    recommender: web::Data<RecommendationService>,
) -> Result<HttpResponse, ApiError> {
    let response = recommender.recommend(user.id(), query.limit).await?;
    Ok(HttpResponse::Ok().json(response))
}
