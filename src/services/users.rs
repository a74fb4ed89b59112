use crate::{
    error::{ApiError, Result},
    models::{NewUser, ProfileUpdate, UserProfile, UserRole},
};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserProfile>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserProfile> {
        self.users.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut UserProfile> {
        self.users.values_mut()
    }

    fn email_taken(&self, email: &str) -> bool {
        self.users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(email))
    }

    /// Inserts a fully-formed profile. Used by the seed loader.
    pub fn insert(&mut self, user: UserProfile) -> Result<()> {
        if self.users.contains_key(&user.id) || self.email_taken(&user.email) {
            return Err(ApiError::Conflict(format!("User {} already exists", user.id)));
        }
        self.users.insert(user.id.clone(), user);
        Ok(())
    }

    pub fn register(&mut self, input: NewUser) -> Result<UserProfile> {
        let name = input.name.trim();
        let email = input.email.trim();

        if name.is_empty() {
            return Err(ApiError::InvalidInput("Name cannot be empty".to_string()));
        }
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(ApiError::InvalidInput(format!(
                "Invalid email address: {}",
                email
            )));
        }
        if self.email_taken(email) {
            return Err(ApiError::Conflict(format!(
                "Email {} is already registered",
                email
            )));
        }

        let user = UserProfile {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_lowercase(),
            role: UserRole::Member,
            avatar_url: None,
            borrowed: Vec::new(),
            created_at: Utc::now(),
        };
        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub fn get(&self, id: &str) -> Result<&UserProfile> {
        self.users
            .get(id)
            .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut UserProfile> {
        self.users
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))
    }

    pub fn list(&self) -> Vec<UserProfile> {
        let mut users: Vec<UserProfile> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        users
    }

    pub fn set_role(&mut self, id: &str, role: UserRole) -> Result<UserProfile> {
        let user = self.get_mut(id)?;
        user.role = role;
        Ok(user.clone())
    }

    pub fn update_profile(&mut self, id: &str, update: ProfileUpdate) -> Result<UserProfile> {
        let user = self.get_mut(id)?;
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(ApiError::InvalidInput("Name cannot be empty".to_string()));
            }
            user.name = name.trim().to_string();
        }
        if let Some(avatar_url) = update.avatar_url {
            user.avatar_url = Some(avatar_url).filter(|url| !url.trim().is_empty());
        }
        Ok(user.clone())
    }

    pub fn active_loans(&self, id: &str) -> Result<usize> {
        Ok(self.get(id)?.active_loans().count())
    }

    pub fn has_borrowed(&self, id: &str, book_id: &str) -> Result<bool> {
        Ok(self.get(id)?.has_borrowed(book_id))
    }
}
