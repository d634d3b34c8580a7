//! Users and profiles repository

use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::user::{UpdateProfile, User, UserProfile},
};

const PROFILE_COLUMNS: &str = "id, user_id, phone_number, address, date_of_birth, created_at";

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, email, first_name, last_name, is_staff, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    /// Fetch the profile of a user, creating an empty one on first access
    pub async fn get_or_create_profile(&self, user_id: i32) -> AppResult<UserProfile> {
        sqlx::query("INSERT INTO user_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let profile = sqlx::query_as::<_, UserProfile>(&format!(
            "SELECT {} FROM user_profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(profile)
    }

    pub async fn update_profile(&self, user_id: i32, data: &UpdateProfile) -> AppResult<UserProfile> {
        self.get_or_create_profile(user_id).await?;

        let profile = sqlx::query_as::<_, UserProfile>(&format!(
            r#"
            UPDATE user_profiles SET
                phone_number = COALESCE($1, phone_number),
                address = COALESCE($2, address),
                date_of_birth = COALESCE($3, date_of_birth)
            WHERE user_id = $4
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(&data.phone_number)
        .bind(&data.address)
        .bind(data.date_of_birth)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(profile)
    }

    /// Total and open loan counts for a user
    pub async fn loan_counts(&self, user_id: i32) -> AppResult<(i64, i64)> {
        let counts: (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status <> 'returned')
            FROM loans
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }
}
