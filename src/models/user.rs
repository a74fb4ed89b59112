use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Member,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BorrowStatus {
    Borrowed,
    Returned,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BorrowRecord {
    pub book_id: String,
    pub book_title: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
    pub status: BorrowStatus,
}

impl BorrowRecord {
    pub fn is_active(&self) -> bool {
        self.status == BorrowStatus::Borrowed
    }

    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.due_date < now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub borrowed: Vec<BorrowRecord>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn active_loans(&self) -> impl Iterator<Item = &BorrowRecord> {
        self.borrowed.iter().filter(|r| r.is_active())
    }

    pub fn active_loan_for(&self, book_id: &str) -> Option<&BorrowRecord> {
        self.active_loans().find(|r| r.book_id == book_id)
    }

    pub fn has_borrowed(&self, book_id: &str) -> bool {
        self.borrowed.iter().any(|r| r.book_id == book_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.org")]
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleUpdate {
    pub role: UserRole,
}

/// A borrow record as shown on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanView {
    #[serde(flatten)]
    pub record: BorrowRecord,
    pub overdue: bool,
    /// Negative once the due date has passed.
    pub days_remaining: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DashboardCounts {
    pub active: usize,
    pub overdue: usize,
    pub total_borrowed: usize,
    pub reviews_written: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Dashboard {
    pub profile: UserProfile,
    pub active_loans: Vec<LoanView>,
    pub history: Vec<BorrowRecord>,
    pub counts: DashboardCounts,
}

/// An overdue loan as listed for admins.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OverdueLoan {
    pub user_id: String,
    pub user_name: String,
    pub book_id: String,
    pub book_title: String,
    pub due_date: DateTime<Utc>,
    pub days_overdue: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LibraryStats {
    pub total_books: usize,
    pub total_copies: u32,
    pub available_copies: u32,
    pub active_loans: usize,
    pub overdue_loans: usize,
    pub total_users: usize,
    pub total_reviews: u32,
}
