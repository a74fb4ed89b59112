use crate::{
    config::Config,
    error::{ApiError, Result},
    models::{
        Book, BookPage, BookUpdate, BorrowRecord, BorrowStatus, Dashboard, DashboardCounts,
        LibraryStats, LoanView, NewBook, NewReview, NewUser, OverdueLoan, ProfileUpdate, Review,
        SearchFilters, SortOrder, UserProfile, UserRole,
    },
    services::{catalog::BookCatalog, users::UserDirectory},
};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct LoanPolicy {
    pub loan_period_days: i64,
    pub max_active_loans: usize,
}

impl LoanPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            loan_period_days: config.loan_period_days,
            max_active_loans: config.max_active_loans,
        }
    }
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            loan_period_days: 14,
            max_active_loans: 5,
        }
    }
}

#[derive(Debug, Default)]
pub struct LibraryState {
    pub catalog: BookCatalog,
    pub users: UserDirectory,
}

/// Catalog and user directory behind a single lock, so borrow and return
/// update both sides together.
#[derive(Clone)]
pub struct LibraryService {
    state: Arc<RwLock<LibraryState>>,
    policy: LoanPolicy,
}

impl LibraryService {
    pub fn new(policy: LoanPolicy) -> Self {
        Self::with_state(LibraryState::default(), policy)
    }

    pub fn with_state(state: LibraryState, policy: LoanPolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            policy,
        }
    }

    pub fn policy(&self) -> LoanPolicy {
        self.policy
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LibraryState>> {
        self.state
            .read()
            .map_err(|_| ApiError::InternalError("Library state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LibraryState>> {
        self.state
            .write()
            .map_err(|_| ApiError::InternalError("Library state lock poisoned".to_string()))
    }

    // Catalog reads

    pub fn list_books(
        &self,
        filters: &SearchFilters,
        sort: SortOrder,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> Result<BookPage> {
        Ok(self.read()?.catalog.list(filters, sort, page, per_page))
    }

    pub fn get_book(&self, id: &str) -> Result<Book> {
        self.read()?.catalog.get(id).cloned()
    }

    pub fn genres(&self) -> Result<Vec<String>> {
        Ok(self.read()?.catalog.genres())
    }

    pub fn reviews(&self, book_id: &str) -> Result<Vec<Review>> {
        let state = self.read()?;
        let mut reviews = state.catalog.get(book_id)?.reviews.clone();
        reviews.reverse();
        Ok(reviews)
    }

    /// Runs `f` against a read-locked view of the catalog and users.
    pub fn inspect<T>(&self, f: impl FnOnce(&LibraryState) -> T) -> Result<T> {
        let state = self.read()?;
        Ok(f(&state))
    }

    // Users

    pub fn register_user(&self, input: NewUser) -> Result<UserProfile> {
        let user = self.write()?.users.register(input)?;
        info!("Registered user {} ({})", user.id, user.email);
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<UserProfile> {
        self.read()?.users.get(id).cloned()
    }

    pub fn update_profile(&self, id: &str, update: ProfileUpdate) -> Result<UserProfile> {
        self.write()?.users.update_profile(id, update)
    }

    pub fn require_admin(&self, user_id: &str) -> Result<UserProfile> {
        let user = self.get_user(user_id)?;
        if user.role != UserRole::Admin {
            warn!("User {} attempted an admin operation", user_id);
            return Err(ApiError::Forbidden(
                "Administrator role required".to_string(),
            ));
        }
        Ok(user)
    }

    // Circulation

    pub fn borrow(&self, user_id: &str, book_id: &str) -> Result<BorrowRecord> {
        self.borrow_at(user_id, book_id, Utc::now())
    }

    pub fn borrow_at(
        &self,
        user_id: &str,
        book_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BorrowRecord> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let user = state.users.get(user_id)?;
        let book = state.catalog.get(book_id)?;

        if user.active_loan_for(book_id).is_some() {
            return Err(ApiError::Conflict(format!(
                "You already have '{}' on loan",
                book.title
            )));
        }
        if user.active_loans().count() >= self.policy.max_active_loans {
            return Err(ApiError::Conflict(format!(
                "Loan limit of {} books reached",
                self.policy.max_active_loans
            )));
        }
        if !book.is_available() {
            return Err(ApiError::Conflict(format!(
                "No copies of '{}' are available",
                book.title
            )));
        }

        let record = BorrowRecord {
            book_id: book.id.clone(),
            book_title: book.title.clone(),
            borrowed_at: now,
            due_date: now + Duration::days(self.policy.loan_period_days),
            returned_at: None,
            status: BorrowStatus::Borrowed,
        };

        let book = state.catalog.get_mut(book_id)?;
        book.available_copies -= 1;
        book.updated_at = now;
        state.users.get_mut(user_id)?.borrowed.push(record.clone());

        info!(
            "User {} borrowed book {}, due {}",
            user_id,
            book_id,
            record.due_date.to_rfc3339()
        );
        Ok(record)
    }

    pub fn return_book(&self, user_id: &str, book_id: &str) -> Result<BorrowRecord> {
        self.return_book_at(user_id, book_id, Utc::now())
    }

    pub fn return_book_at(
        &self,
        user_id: &str,
        book_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BorrowRecord> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let user = state.users.get_mut(user_id)?;
        let record = user
            .borrowed
            .iter_mut()
            .find(|r| r.book_id == book_id && r.is_active())
            .ok_or_else(|| {
                ApiError::NotFound(format!("No active loan of book {} for this user", book_id))
            })?;

        record.status = BorrowStatus::Returned;
        record.returned_at = Some(now);
        let record = record.clone();

        match state.catalog.get_mut(book_id) {
            Ok(book) => {
                book.available_copies = (book.available_copies + 1).min(book.total_copies);
                book.updated_at = now;
            }
            Err(_) => warn!("Returned book {} is no longer in the catalog", book_id),
        }

        info!("User {} returned book {}", user_id, book_id);
        Ok(record)
    }

    pub fn review(&self, user_id: &str, book_id: &str, input: NewReview) -> Result<Book> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let user = state.users.get(user_id)?;
        let book = state.catalog.get(book_id)?;

        if !user.has_borrowed(book_id) {
            return Err(ApiError::InvalidInput(
                "You need to borrow a book before reviewing it".to_string(),
            ));
        }
        if book.reviews.iter().any(|r| r.user_id == user_id) {
            return Err(ApiError::Conflict(
                "You have already reviewed this book".to_string(),
            ));
        }

        let review = Review {
            id: Uuid::new_v4(),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            rating: input.rating,
            comment: input.comment.trim().to_string(),
            created_at: Utc::now(),
        };

        let book = state.catalog.add_review(book_id, review)?;
        debug!(
            "Book {} now rated {:.2} over {} reviews",
            book_id, book.rating, book.review_count
        );
        Ok(book)
    }

    pub fn dashboard(&self, user_id: &str) -> Result<Dashboard> {
        self.dashboard_at(user_id, Utc::now())
    }

    pub fn dashboard_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<Dashboard> {
        let state = self.read()?;
        let profile = state.users.get(user_id)?.clone();

        let mut active_loans: Vec<LoanView> = profile
            .active_loans()
            .map(|record| LoanView {
                overdue: record.is_overdue_at(now),
                days_remaining: (record.due_date - now).num_days(),
                record: record.clone(),
            })
            .collect();
        active_loans.sort_by_key(|loan| loan.record.due_date);

        let mut history: Vec<BorrowRecord> = profile
            .borrowed
            .iter()
            .filter(|r| !r.is_active())
            .cloned()
            .collect();
        history.sort_by(|a, b| b.returned_at.cmp(&a.returned_at));

        let reviews_written = state
            .catalog
            .iter()
            .flat_map(|book| book.reviews.iter())
            .filter(|r| r.user_id == user_id)
            .count();

        let counts = DashboardCounts {
            active: active_loans.len(),
            overdue: active_loans.iter().filter(|l| l.overdue).count(),
            total_borrowed: profile.borrowed.len(),
            reviews_written,
        };

        Ok(Dashboard {
            profile,
            active_loans,
            history,
            counts,
        })
    }

    // Administration

    pub fn add_book(&self, input: NewBook) -> Result<Book> {
        let book = self.write()?.catalog.add(input)?;
        info!("Added book {} '{}'", book.id, book.title);
        Ok(book)
    }

    pub fn update_book(&self, id: &str, update: BookUpdate) -> Result<Book> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let book = state.catalog.update(id, update)?;

        // Keep denormalised titles on loan records in step with the catalog
        for user in state.users.iter_mut() {
            for record in user.borrowed.iter_mut().filter(|r| r.book_id == id) {
                record.book_title = book.title.clone();
            }
        }
        Ok(book)
    }

    pub fn delete_book(&self, id: &str) -> Result<Book> {
        let book = self.write()?.catalog.delete(id)?;
        info!("Deleted book {} '{}'", book.id, book.title);
        Ok(book)
    }

    pub fn list_users(&self) -> Result<Vec<UserProfile>> {
        Ok(self.read()?.users.list())
    }

    pub fn set_role(&self, id: &str, role: UserRole) -> Result<UserProfile> {
        let user = self.write()?.users.set_role(id, role)?;
        info!("User {} role set to {:?}", id, role);
        Ok(user)
    }

    pub fn overdue_loans(&self) -> Result<Vec<OverdueLoan>> {
        self.overdue_loans_at(Utc::now())
    }

    pub fn overdue_loans_at(&self, now: DateTime<Utc>) -> Result<Vec<OverdueLoan>> {
        let state = self.read()?;
        let mut loans: Vec<OverdueLoan> = state
            .users
            .iter()
            .flat_map(|user| {
                user.borrowed
                    .iter()
                    .filter(move |r| r.is_overdue_at(now))
                    .map(move |r| OverdueLoan {
                        user_id: user.id.clone(),
                        user_name: user.name.clone(),
                        book_id: r.book_id.clone(),
                        book_title: r.book_title.clone(),
                        due_date: r.due_date,
                        days_overdue: (now - r.due_date).num_days(),
                    })
            })
            .collect();
        loans.sort_by_key(|loan| loan.due_date);
        Ok(loans)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let now = Utc::now();
        let state = self.read()?;

        let mut stats = LibraryStats {
            total_books: state.catalog.len(),
            total_users: state.users.len(),
            ..LibraryStats::default()
        };
        for book in state.catalog.iter() {
            stats.total_copies += book.total_copies;
            stats.available_copies += book.available_copies;
            stats.total_reviews += book.review_count;
        }
        for record in state.users.iter().flat_map(|u| u.active_loans()) {
            stats.active_loans += 1;
            if record.is_overdue_at(now) {
                stats.overdue_loans += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::tests::new_book;

    struct Fixture {
        library: LibraryService,
        user: String,
        book: String,
    }

    fn fixture(copies: u32, policy: LoanPolicy) -> Fixture {
        let library = LibraryService::new(policy);
        let user = library
            .register_user(NewUser {
                name: "Ada".to_string(),
                email: "ada@example.org".to_string(),
            })
            .unwrap()
            .id;
        let book = library
            .add_book(new_book("Dune", "Frank Herbert", &["Science Fiction"], copies))
            .unwrap()
            .id;
        Fixture {
            library,
            user,
            book,
        }
    }

    fn second_user(library: &LibraryService) -> String {
        library
            .register_user(NewUser {
                name: "Grace".to_string(),
                email: "grace@example.org".to_string(),
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_borrow_decrements_and_records_due_date() {
        let f = fixture(2, LoanPolicy::default());
        let now = Utc::now();

        let record = f.library.borrow_at(&f.user, &f.book, now).unwrap();

        assert_eq!(record.status, BorrowStatus::Borrowed);
        assert_eq!(record.due_date, now + Duration::days(14));
        assert_eq!(record.book_title, "Dune");
        assert_eq!(f.library.get_book(&f.book).unwrap().available_copies, 1);
        assert_eq!(f.library.get_user(&f.user).unwrap().borrowed.len(), 1);
    }

    #[test]
    fn test_borrow_same_book_twice_conflicts() {
        let f = fixture(2, LoanPolicy::default());
        f.library.borrow(&f.user, &f.book).unwrap();

        let result = f.library.borrow(&f.user, &f.book);
        assert!(matches!(result, Err(ApiError::Conflict(_))));
        assert_eq!(f.library.get_book(&f.book).unwrap().available_copies, 1);
    }

    #[test]
    fn test_borrow_without_copies_conflicts() {
        let f = fixture(1, LoanPolicy::default());
        let other = second_user(&f.library);
        f.library.borrow(&other, &f.book).unwrap();

        let result = f.library.borrow(&f.user, &f.book);
        assert!(matches!(result, Err(ApiError::Conflict(_))));
        assert!(f.library.get_user(&f.user).unwrap().borrowed.is_empty());
    }

    #[test]
    fn test_loan_limit_enforced() {
        let f = fixture(
            1,
            LoanPolicy {
                loan_period_days: 7,
                max_active_loans: 1,
            },
        );
        let other_book = f
            .library
            .add_book(new_book("Emma", "Jane Austen", &["Classics"], 1))
            .unwrap()
            .id;
        f.library.borrow(&f.user, &f.book).unwrap();

        let result = f.library.borrow(&f.user, &other_book);
        assert!(matches!(result, Err(ApiError::Conflict(_))));
        assert_eq!(f.library.get_book(&other_book).unwrap().available_copies, 1);
    }

    #[test]
    fn test_borrow_unknown_book_or_user() {
        let f = fixture(1, LoanPolicy::default());
        assert!(matches!(
            f.library.borrow(&f.user, "missing"),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            f.library.borrow("nobody", &f.book),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_return_restores_copy_and_closes_record() {
        let f = fixture(1, LoanPolicy::default());
        f.library.borrow(&f.user, &f.book).unwrap();

        let record = f.library.return_book(&f.user, &f.book).unwrap();

        assert_eq!(record.status, BorrowStatus::Returned);
        assert!(record.returned_at.is_some());
        assert_eq!(f.library.get_book(&f.book).unwrap().available_copies, 1);

        // Borrowing again after a return is allowed
        assert!(f.library.borrow(&f.user, &f.book).is_ok());
    }

    #[test]
    fn test_return_without_loan_is_not_found() {
        let f = fixture(1, LoanPolicy::default());
        assert!(matches!(
            f.library.return_book(&f.user, &f.book),
            Err(ApiError::NotFound(_))
        ));
        assert_eq!(f.library.get_book(&f.book).unwrap().available_copies, 1);
    }

    #[test]
    fn test_review_requires_borrow_and_is_unique() {
        let f = fixture(1, LoanPolicy::default());
        let review = NewReview {
            rating: 4,
            comment: "Spice!".to_string(),
        };

        assert!(matches!(
            f.library.review(&f.user, &f.book, review.clone()),
            Err(ApiError::InvalidInput(_))
        ));

        f.library.borrow(&f.user, &f.book).unwrap();
        let book = f.library.review(&f.user, &f.book, review.clone()).unwrap();
        assert_eq!(book.review_count, 1);
        assert!((book.rating - 4.0).abs() < f32::EPSILON);

        assert!(matches!(
            f.library.review(&f.user, &f.book, review),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn test_dashboard_flags_overdue() {
        let f = fixture(1, LoanPolicy::default());
        let borrowed_at = Utc::now() - Duration::days(20);
        f.library.borrow_at(&f.user, &f.book, borrowed_at).unwrap();

        let dashboard = f.library.dashboard(&f.user).unwrap();

        assert_eq!(dashboard.counts.active, 1);
        assert_eq!(dashboard.counts.overdue, 1);
        assert!(dashboard.active_loans[0].overdue);
        assert!(dashboard.active_loans[0].days_remaining < 0);
        assert!(dashboard.history.is_empty());

        let overdue = f.library.overdue_loans().unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].user_name, "Ada");
        assert!(overdue[0].days_overdue >= 5);

        let stats = f.library.stats().unwrap();
        assert_eq!(stats.active_loans, 1);
        assert_eq!(stats.overdue_loans, 1);
        assert_eq!(stats.available_copies, 0);
    }

    #[test]
    fn test_dashboard_history_most_recent_first() {
        let f = fixture(1, LoanPolicy::default());
        let emma = f
            .library
            .add_book(new_book("Emma", "Jane Austen", &["Classics"], 1))
            .unwrap()
            .id;
        let start = Utc::now() - Duration::days(30);

        f.library.borrow_at(&f.user, &emma, start).unwrap();
        f.library.borrow_at(&f.user, &f.book, start).unwrap();
        f.library
            .return_book_at(&f.user, &emma, start + Duration::days(2))
            .unwrap();
        f.library
            .return_book_at(&f.user, &f.book, start + Duration::days(9))
            .unwrap();

        let dashboard = f.library.dashboard(&f.user).unwrap();
        let titles: Vec<&str> = dashboard
            .history
            .iter()
            .map(|r| r.book_title.as_str())
            .collect();

        assert_eq!(titles, vec!["Dune", "Emma"]);
        assert_eq!(dashboard.counts.total_borrowed, 2);
        assert!(dashboard.active_loans.is_empty());
    }

    #[test]
    fn test_reviews_listed_newest_first() {
        let f = fixture(2, LoanPolicy::default());
        let other = second_user(&f.library);
        f.library.borrow(&f.user, &f.book).unwrap();
        f.library.borrow(&other, &f.book).unwrap();

        f.library
            .review(
                &f.user,
                &f.book,
                NewReview {
                    rating: 3,
                    comment: "Long".to_string(),
                },
            )
            .unwrap();
        f.library
            .review(
                &other,
                &f.book,
                NewReview {
                    rating: 5,
                    comment: "Loved it".to_string(),
                },
            )
            .unwrap();

        let reviews = f.library.reviews(&f.book).unwrap();
        let authors: Vec<&str> = reviews.iter().map(|r| r.user_name.as_str()).collect();
        assert_eq!(authors, vec!["Grace", "Ada"]);
        assert!((f.library.get_book(&f.book).unwrap().rating - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_update_title_propagates_to_loans() {
        let f = fixture(1, LoanPolicy::default());
        f.library.borrow(&f.user, &f.book).unwrap();

        f.library
            .update_book(
                &f.book,
                BookUpdate {
                    title: Some("Dune (1965)".to_string()),
                    ..BookUpdate::default()
                },
            )
            .unwrap();

        let user = f.library.get_user(&f.user).unwrap();
        assert_eq!(user.borrowed[0].book_title, "Dune (1965)");
    }

    #[test]
    fn test_require_admin() {
        let f = fixture(1, LoanPolicy::default());
        assert!(matches!(
            f.library.require_admin(&f.user),
            Err(ApiError::Forbidden(_))
        ));

        f.library.set_role(&f.user, UserRole::Admin).unwrap();
        assert!(f.library.require_admin(&f.user).is_ok());
    }
}
