use crate::{
    error::{ApiError, Result},
    models::{Book, BookPage, BookUpdate, NewBook, Review, SearchFilters, SortOrder},
};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};

const DEFAULT_PER_PAGE: usize = 20;
const MAX_PER_PAGE: usize = 100;

/// In-memory book collection. Callers hold the surrounding lock.
#[derive(Debug, Default)]
pub struct BookCatalog {
    books: HashMap<String, Book>,
}

impl BookCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Book> {
        self.books.values()
    }

    /// Inserts a book as-is. Used by the seed loader, which supplies ids.
    pub fn insert(&mut self, mut book: Book) -> Result<()> {
        if book.id.trim().is_empty() {
            return Err(ApiError::InvalidInput("Book id cannot be empty".to_string()));
        }
        if self.books.contains_key(&book.id) {
            return Err(ApiError::Conflict(format!("Book {} already exists", book.id)));
        }
        book.available_copies = book.available_copies.min(book.total_copies);
        self.books.insert(book.id.clone(), book);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Book> {
        self.books
            .get(id)
            .ok_or_else(|| ApiError::NotFound(format!("Book {} not found", id)))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Book> {
        self.books
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("Book {} not found", id)))
    }

    pub fn add(&mut self, input: NewBook) -> Result<Book> {
        if input.title.trim().is_empty() {
            return Err(ApiError::InvalidInput("Title cannot be empty".to_string()));
        }
        if input.author.trim().is_empty() {
            return Err(ApiError::InvalidInput("Author cannot be empty".to_string()));
        }
        if input.total_copies == 0 {
            return Err(ApiError::InvalidInput(
                "A book needs at least one copy".to_string(),
            ));
        }

        let book = Book::from_new(input);
        self.books.insert(book.id.clone(), book.clone());
        Ok(book)
    }

    pub fn update(&mut self, id: &str, update: BookUpdate) -> Result<Book> {
        let book = self.get_mut(id)?;

        // Everything is checked before the stored book is touched.
        let title = update.title.map(|t| t.trim().to_string());
        if title.as_deref().is_some_and(str::is_empty) {
            return Err(ApiError::InvalidInput("Title cannot be empty".to_string()));
        }
        let author = update.author.map(|a| a.trim().to_string());
        if author.as_deref().is_some_and(str::is_empty) {
            return Err(ApiError::InvalidInput("Author cannot be empty".to_string()));
        }
        let on_loan = book.copies_on_loan();
        if let Some(total) = update.total_copies {
            if total < on_loan || total == 0 {
                return Err(ApiError::InvalidInput(format!(
                    "total_copies must be at least {} ({} on loan)",
                    on_loan.max(1),
                    on_loan
                )));
            }
        }

        if let Some(title) = title {
            book.title = title;
        }
        if let Some(author) = author {
            book.author = author;
        }
        if let Some(total) = update.total_copies {
            book.available_copies = total - on_loan;
            book.total_copies = total;
        }

        if let Some(description) = update.description {
            book.description = description;
        }
        if let Some(genres) = update.genres {
            book.genres = genres;
        }
        if update.cover_image.is_some() {
            book.cover_image = update.cover_image;
        }
        if update.isbn.is_some() {
            book.isbn = update.isbn;
        }
        if update.published_year.is_some() {
            book.published_year = update.published_year;
        }
        if update.page_count.is_some() {
            book.page_count = update.page_count;
        }
        if update.publisher.is_some() {
            book.publisher = update.publisher;
        }
        if update.language.is_some() {
            book.language = update.language;
        }

        book.updated_at = Utc::now();
        Ok(book.clone())
    }

    pub fn delete(&mut self, id: &str) -> Result<Book> {
        let on_loan = self.get(id)?.copies_on_loan();
        if on_loan > 0 {
            return Err(ApiError::Conflict(format!(
                "Book {} has {} copies on loan",
                id, on_loan
            )));
        }
        self.books
            .remove(id)
            .ok_or_else(|| ApiError::NotFound(format!("Book {} not found", id)))
    }

    pub fn genres(&self) -> Vec<String> {
        // Case-insensitive de-duplication, keeping the first spelling seen in id order
        let mut ids: Vec<&String> = self.books.keys().collect();
        ids.sort();

        let mut seen = BTreeSet::new();
        let mut genres = Vec::new();
        for id in ids {
            for genre in &self.books[id].genres {
                if seen.insert(genre.to_lowercase()) {
                    genres.push(genre.clone());
                }
            }
        }
        genres.sort_by_key(|g| g.to_lowercase());
        genres
    }

    pub fn add_review(&mut self, book_id: &str, review: Review) -> Result<Book> {
        if !(1..=5).contains(&review.rating) {
            return Err(ApiError::InvalidInput(
                "Rating must be between 1 and 5".to_string(),
            ));
        }
        let book = self.get_mut(book_id)?;
        book.apply_review(review);
        Ok(book.clone())
    }

    pub fn search(&self, filters: &SearchFilters) -> Vec<&Book> {
        self.books
            .values()
            .filter(|book| matches_filters(book, filters))
            .collect()
    }

    pub fn list(
        &self,
        filters: &SearchFilters,
        sort: SortOrder,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> BookPage {
        let mut matches = self.search(filters);
        sort_books(&mut matches, sort);

        let page = page.unwrap_or(1).max(1);
        let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .cloned()
            .collect();

        BookPage {
            items,
            total,
            page,
            per_page,
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn matches_filters(book: &Book, filters: &SearchFilters) -> bool {
    if let Some(keywords) = &filters.keywords {
        let all_terms_match = keywords.split_whitespace().all(|term| {
            contains_ci(&book.title, term)
                || contains_ci(&book.author, term)
                || contains_ci(&book.description, term)
        });
        if !all_terms_match {
            return false;
        }
    }
    if let Some(author) = &filters.author {
        if !contains_ci(&book.author, author) {
            return false;
        }
    }
    if let Some(genre) = &filters.genre {
        if !book.has_genre(genre) {
            return false;
        }
    }
    if let Some(min_rating) = filters.min_rating {
        if book.rating < min_rating {
            return false;
        }
    }
    if filters.available_only && !book.is_available() {
        return false;
    }
    if let Some(after) = filters.published_after {
        if !book.published_year.is_some_and(|y| y >= after) {
            return false;
        }
    }
    if let Some(before) = filters.published_before {
        if !book.published_year.is_some_and(|y| y <= before) {
            return false;
        }
    }
    true
}

fn sort_books(books: &mut [&Book], sort: SortOrder) {
    match sort {
        SortOrder::Title => books.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::Rating => books.sort_by(|a, b| {
            b.rating
                .total_cmp(&a.rating)
                .then_with(|| b.review_count.cmp(&a.review_count))
                .then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::Newest => books.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::Popular => books.sort_by(|a, b| {
            b.review_count
                .cmp(&a.review_count)
                .then_with(|| b.copies_on_loan().cmp(&a.copies_on_loan()))
                .then_with(|| a.id.cmp(&b.id))
        }),
    }
}
