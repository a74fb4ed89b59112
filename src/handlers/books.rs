use crate::{
    error::ApiError,
    handlers::identity::CurrentUser,
    models::{Book, BookPage, BookQuery, BookSummary, BorrowRecord, ErrorResponse, NewReview, Review},
    services::{BookSummarizer, LibraryService},
};
use actix_web::{
    web::{self, Json, Path, Query},
    HttpResponse,
};

pub fn books_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/books").route(web::get().to(list_books)))
        .service(web::resource("/books/genres").route(web::get().to(list_genres)))
        .service(web::resource("/books/{id}").route(web::get().to(get_book)))
        .service(
            web::resource("/books/{id}/reviews")
                .route(web::get().to(list_reviews))
                .route(web::post().to(add_review)),
        )
        .service(web::resource("/books/{id}/borrow").route(web::post().to(borrow_book)))
        .service(web::resource("/books/{id}/return").route(web::post().to(return_book)))
        .service(web::resource("/books/{id}/summary").route(web::get().to(book_summary)));
}

/// Browse the catalog
#[utoipa::path(
    get,
    path = "/api/books",
    tag = "Books",
    params(BookQuery),
    responses(
        (status = 200, description = "A page of matching books", body = BookPage),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
    )
)]
pub async fn list_books(
    query: Query<BookQuery>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    let page = library.list_books(&query.filters(), query.sort, query.page, query.per_page)?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/api/books/genres",
    tag = "Books",
    responses((status = 200, description = "Sorted distinct genres", body = Vec<String>))
)]
pub async fn list_genres(library: web::Data<LibraryService>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.genres()?))
}

#[utoipa::path(
    get,
    path = "/api/books/{id}",
    tag = "Books",
    params(("id" = String, Path, description = "Book id")),
    responses(
        (status = 200, description = "Book details", body = Book),
        (status = 404, description = "No such book", body = ErrorResponse),
    )
)]
pub async fn get_book(
    id: Path<String>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.get_book(&id)?))
}

/// Reviews for a book, newest first
#[utoipa::path(
    get,
    path = "/api/books/{id}/reviews",
    tag = "Books",
    params(("id" = String, Path, description = "Book id")),
    responses(
        (status = 200, description = "Reviews", body = Vec<Review>),
        (status = 404, description = "No such book", body = ErrorResponse),
    )
)]
pub async fn list_reviews(
    id: Path<String>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.reviews(&id)?))
}

#[utoipa::path(
    post,
    path = "/api/books/{id}/reviews",
    tag = "Books",
    params(("id" = String, Path, description = "Book id")),
    request_body = NewReview,
    responses(
        (status = 201, description = "Review stored, updated book returned", body = Book),
        (status = 400, description = "Rating out of range or book never borrowed", body = ErrorResponse),
        (status = 401, description = "Missing or unknown user", body = ErrorResponse),
        (status = 409, description = "Already reviewed", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn add_review(
    user: CurrentUser,
    id: Path<String>,
    request: Json<NewReview>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    let book = library.review(user.id(), &id, request.into_inner())?;
    Ok(HttpResponse::Created().json(book))
}

#[utoipa::path(
    post,
    path = "/api/books/{id}/borrow",
    tag = "Circulation",
    params(("id" = String, Path, description = "Book id")),
    responses(
        (status = 200, description = "Loan created", body = BorrowRecord),
        (status = 401, description = "Missing or unknown user", body = ErrorResponse),
        (status = 404, description = "No such book", body = ErrorResponse),
        (status = 409, description = "Unavailable, already on loan or loan limit reached", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn borrow_book(
    user: CurrentUser,
    id: Path<String>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.borrow(user.id(), &id)?))
}

#[utoipa::path(
    post,
    path = "/api/books/{id}/return",
    tag = "Circulation",
    params(("id" = String, Path, description = "Book id")),
    responses(
        (status = 200, description = "Loan closed", body = BorrowRecord),
        (status = 401, description = "Missing or unknown user", body = ErrorResponse),
        (status = 404, description = "No active loan of this book", body = ErrorResponse),
    ),
    security(("user_id" = []))
)]
pub async fn return_book(
    user: CurrentUser,
    id: Path<String>,
    library: web::Data<LibraryService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(library.return_book(user.id(), &id)?))
}

/// Generated, spoiler-free summary of a book
#[utoipa::path(
    get,
    path = "/api/books/{id}/summary",
    tag = "Assistant",
    params(("id" = String, Path, description = "Book id")),
    responses(
        (status = 200, description = "Summary and key themes", body = BookSummary),
        (status = 404, description = "No such book", body = ErrorResponse),
        (status = 502, description = "Language model unavailable", body = ErrorResponse),
    )
)]
pub async fn book_summary(
    id: Path<String>,
    summarizer: web::Data<BookSummarizer>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(summarizer.summarize(&id).await?))
}
