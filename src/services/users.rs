//! Current user and profile service

use validator::Validate;

use crate::{
    error::AppResult,
    models::user::{UpdateProfile, UserOverview, UserProfile},
    repository::Repository,
};

#[derive(Clone)]
pub struct UsersService {
    repository: Repository,
}

impl UsersService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// User with profile (created on first access) and borrowing counters
    pub async fn overview(&self, user_id: i32) -> AppResult<UserOverview> {
        let user = self.repository.users.get_by_id(user_id).await?;
        let profile = self.repository.users.get_or_create_profile(user_id).await?;
        let (borrow_count, active_borrows) = self.repository.users.loan_counts(user_id).await?;

        Ok(UserOverview {
            user,
            profile,
            borrow_count,
            active_borrows,
        })
    }

    pub async fn update_profile(&self, user_id: i32, data: UpdateProfile) -> AppResult<UserProfile> {
        data.validate()?;
        // Verify user exists
        self.repository.users.get_by_id(user_id).await?;
        let profile = self.repository.users.update_profile(user_id, &data).await?;
        tracing::info!(user_id, "Profile updated");
        Ok(profile)
    }
}
