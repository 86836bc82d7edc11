use argon2::{
    Argon2, PasswordVerifier,
    password_hash::{PasswordHash, PasswordHasher, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult, conflict_on_unique};
use crate::media::{MediaStore, Upload};
use crate::utils::now;

const USER_COLUMNS: &str = "id, name, email, role, bio, photo_url, created_at";
const PHOTO_FOLDER: &str = "profiles";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Role {
    Student,
    Instructor,
}

/// The authenticated caller, as stored in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

impl Actor {
    pub fn require(&self, role: Role) -> AppResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::permission(format!(
                "This action requires the {:?} role",
                role
            )))
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

impl NewUser {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("Name is required"));
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::validation("A valid email is required"));
        }
        check_password(&self.password)
    }
}

/// Partial profile change; absent fields are kept.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    /// Requires `currentPassword`.
    #[serde(alias = "newPassword")]
    pub password: Option<String>,
    pub current_password: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::validation("Name cannot be empty"));
        }
        if self
            .email
            .as_deref()
            .map(str::trim)
            .is_some_and(|e| e.is_empty() || !e.contains('@'))
        {
            return Err(AppError::validation("A valid email is required"));
        }
        if let Some(password) = &self.password {
            check_password(password)?;
        }
        Ok(())
    }
}

fn check_password(password: &str) -> AppResult<()> {
    if password.len() < 6 {
        return Err(AppError::validation(
            "Password must be at least 6 characters",
        ));
    }
    Ok(())
}

fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    Ok(hash)
}

fn password_matches(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

async fn verify_current_password(database: &SqlitePool, id: i64, password: &str) -> AppResult<()> {
    let hash = sqlx::query_scalar::<_, String>("SELECT password FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(database)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    if !password_matches(&hash, password)? {
        return Err(AppError::validation("Current password is incorrect"));
    }
    Ok(())
}

pub async fn get_user_list(database: &SqlitePool) -> AppResult<Vec<UserInfo>> {
    let users = sqlx::query_as::<_, UserInfo>(
        &format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS),
    )
    .fetch_all(database)
    .await?;
    Ok(users)
}

pub async fn get_user_info(database: &SqlitePool, id: i64) -> AppResult<UserInfo> {
    sqlx::query_as::<_, UserInfo>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
    .bind(id)
    .fetch_optional(database)
    .await?
    .ok_or(AppError::NotFound("User"))
}

pub async fn create_user(database: &SqlitePool, user: NewUser) -> AppResult<i64> {
    user.validate()?;
    let password_hash = hash_password(&user.password)?;
    let email = user.email.trim().to_lowercase();
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO users (name, email, password, role, created_at) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user.name.trim())
    .bind(&email)
    .bind(password_hash)
    .bind(user.role)
    .bind(now())
    .fetch_one(database)
    .await
    .map_err(|e| conflict_on_unique(e, "Email is already registered"))?;
    info!("created {:?} user {} <{}>", user.role, id, email);
    Ok(id)
}

pub async fn delete_user(database: &SqlitePool, id: i64) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(database)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User"));
    }
    Ok(())
}

pub async fn login(database: &SqlitePool, email: &str, password: &str) -> AppResult<Actor> {
    let email = email.trim().to_lowercase();
    let row = sqlx::query_as::<_, (i64, String, Role)>(
        "SELECT id, password, role FROM users WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(database)
    .await?;
    let Some((id, hash, role)) = row else {
        return Err(AppError::Unauthorized);
    };
    if !password_matches(&hash, password)? {
        return Err(AppError::Unauthorized);
    }
    Ok(Actor { id, role })
}

pub async fn update_profile(
    database: &SqlitePool,
    id: i64,
    update: ProfileUpdate,
) -> AppResult<UserInfo> {
    update.validate()?;
    let password_hash = match &update.password {
        Some(password) => {
            let current = update
                .current_password
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| AppError::validation("Current password is required to change it"))?;
            verify_current_password(database, id, current).await?;
            Some(hash_password(password)?)
        }
        None => None,
    };
    let user = sqlx::query_as::<_, UserInfo>(&format!(
        "UPDATE users SET name = COALESCE(?, name), email = COALESCE(?, email), \
         bio = COALESCE(?, bio), password = COALESCE(?, password) WHERE id = ? RETURNING {}",
        USER_COLUMNS
    ))
    .bind(update.name.as_deref().map(str::trim))
    .bind(update.email.as_deref().map(|e| e.trim().to_lowercase()))
    .bind(&update.bio)
    .bind(password_hash)
    .bind(id)
    .fetch_optional(database)
    .await
    .map_err(|e| conflict_on_unique(e, "Email is already registered"))?
    .ok_or(AppError::NotFound("User"))?;
    info!("user {} updated their profile", id);
    Ok(user)
}

pub async fn change_password(
    database: &SqlitePool,
    id: i64,
    current_password: &str,
    new_password: &str,
) -> AppResult<()> {
    if current_password.is_empty() || new_password.is_empty() {
        return Err(AppError::validation(
            "Both currentPassword and newPassword are required",
        ));
    }
    check_password(new_password)?;
    verify_current_password(database, id, current_password).await?;
    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hash_password(new_password)?)
        .bind(id)
        .execute(database)
        .await?;
    info!("user {} changed their password", id);
    Ok(())
}

/// Stores a new profile photo and drops the previous one.
pub async fn set_photo(
    database: &SqlitePool,
    media: &MediaStore,
    id: i64,
    upload: &Upload,
) -> AppResult<UserInfo> {
    upload.ensure_kind(mime::IMAGE, "profile photos")?;
    let old = get_user_info(database, id).await?.photo_url;
    let url = media.save(PHOTO_FOLDER, upload).await?;
    let result = sqlx::query_as::<_, UserInfo>(&format!(
        "UPDATE users SET photo_url = ? WHERE id = ? RETURNING {}",
        USER_COLUMNS
    ))
    .bind(&url)
    .bind(id)
    .fetch_optional(database)
    .await;
    let user = match result {
        Ok(Some(user)) => user,
        Ok(None) => {
            media.remove_detached(vec![url]);
            return Err(AppError::NotFound("User"));
        }
        Err(e) => {
            media.remove_detached(vec![url]);
            return Err(e.into());
        }
    };
    if let Some(old) = old {
        media.remove_detached(vec![old]);
    }
    Ok(user)
}
