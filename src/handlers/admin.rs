use crate::{
    error::ApiError,
    handlers::identity::AdminUser,
    models::{
        Book, BookUpdate, ErrorResponse, LibraryStats, NewBook, OverdueLoan, RoleUpdate,
        UserProfile,
    },
    services::LibraryService,
};
use actix_web::{
    web::{self, Json, Path},
    HttpResponse,
};
use tracing::info;

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .service(web::resource("/stats").route(web::get().to(stats)))
            .service(web::resource("/books").route(web::post().to(add_book)))
            .service(
                web::resource("/books/{id}")
                    .route(web::put().to(update_book))
                    .route(web::delete().to(delete_book)),
            )
            .service(web::resource("/users").route(web::get().to(list_users)))
            .service(web::resource("/users/{id}/role").route(web::put().to(set_role)))
            .service(web::resource("/loans/overdue").route(web::get().to(overdue_loans))),
    );
}

#[utoipa::path(
    get,
    path = "/api/admin/stats",
    tag = "Admin",
    responses(
        (status = 200, description = "Library-wide counters", body = LibraryStats),
        (status = 401, description = "Missing or unknown user", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn stats(
    _admin: AdminUser,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.stats()?))
}

#[utoipa::path(
    post,
    path = "/api/admin/books",
    tag = "Admin",
    request_body = NewBook,
    responses(
        (status = 201, description = "Book added", body = Book),
        (status = 400, description = "Invalid book", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn add_book(
    admin: AdminUser,
    request: Json<NewBook>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    let book = library.add_book(request.into_inner())?;
    info!("Admin {} added book {}", admin.0.id, book.id);
    Ok(HttpResponse::Created().json(book))
}

#[utoipa::path(
    put,
    path = "/api/admin/books/{id}",
    tag = "Admin",
    params(("id" = String, Path, description = "Book id")),
    request_body = BookUpdate,
    responses(
        (status = 200, description = "Book updated", body = Book),
        (status = 400, description = "Invalid update", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "No such book", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn update_book(
    _admin: AdminUser,
    id: Path<String>,
    request: Json<BookUpdate>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.update_book(&id, request.into_inner())?))
}

#[utoipa::path(
    delete,
    path = "/api/admin/books/{id}",
    tag = "Admin",
    params(("id" = String, Path, description = "Book id")),
    responses(
        (status = 200, description = "Book removed", body = Book),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "No such book", body = ErrorResponse),
        (status = 409, description = "Copies are still on loan", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn delete_book(
    admin: AdminUser,
    id: Path<String>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    let book = library.delete_book(&id)?;
    info!("Admin {} deleted book {}", admin.0.id, book.id);
    Ok(HttpResponse::Ok().json(book))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    tag = "Admin",
    responses(
        (status = 200, description = "All users", body = Vec<UserProfile>),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn list_users(
    _admin: AdminUser,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.list_users()?))
}

#[utoipa::path(
    put,
    path = "/api/admin/users/{id}/role",
    tag = "Admin",
    params(("id" = String, Path, description = "User id")),
    request_body = RoleUpdate,
    responses(
        (status = 200, description = "Role changed", body = UserProfile),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "No such user", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn set_role(
    admin: AdminUser,
    id: Path<String>,
    request: Json<RoleUpdate>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    let user = library.set_role(&id, request.role)?;
    info!("Admin {} set role of {} to {:?}", admin.0.id, user.id, user.role);
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    get,
    path = "/api/admin/loans/overdue",
    tag = "Admin",
    responses(
        (status = 200, description = "Overdue loans, most overdue first", body = Vec<OverdueLoan>),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn overdue_loans(
    _admin: AdminUser,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.overdue_loans()?))
}
