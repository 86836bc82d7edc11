pub mod analytics;
pub mod auth;
pub mod courses;
pub mod enrollments;
pub mod health;
pub mod instructor;
pub mod progress;
pub mod user;

use std::collections::HashMap;

use axum::{
    Router,
    extract::{FromRequestParts, Multipart},
    http::request::Parts,
};
use serde::Serialize;
use tower_sessions::Session;
use utoipa::{OpenApi, ToSchema};

use crate::{
    error::{AppError, AppResult},
    media::Upload,
    server::AppState,
    user::{Actor, Role},
};

/// Session key holding the logged-in [`Actor`].
pub const ACTOR_KEY: &str = "actor";

#[derive(Debug, Serialize, ToSchema)]
pub struct Message {
    pub success: bool,
    pub message: String,
}

impl Message {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

async fn session_actor<S: Send + Sync>(parts: &mut Parts, state: &S) -> AppResult<Option<Actor>> {
    let session = Session::from_request_parts(parts, state)
        .await
        .map_err(|(_, msg)| anyhow::anyhow!("Session layer missing: {}", msg))?;
    let actor = session
        .get::<Actor>(ACTOR_KEY)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read session: {}", e))?;
    Ok(actor)
}

/// Any logged-in user; 401 otherwise.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        session_actor(parts, state)
            .await?
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

/// The logged-in user if there is one.
#[derive(Debug, Clone, Copy)]
pub struct MaybeUser(pub Option<Actor>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(session_actor(parts, state).await?))
    }
}

/// Logged-in instructor; 401 without a session, 403 for students.
#[derive(Debug, Clone, Copy)]
pub struct Instructor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for Instructor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(actor) = CurrentUser::from_request_parts(parts, state).await?;
        actor.require(Role::Instructor)?;
        Ok(Instructor(actor))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Student(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for Student {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(actor) = CurrentUser::from_request_parts(parts, state).await?;
        actor.require(Role::Student)?;
        Ok(Student(actor))
    }
}

/// A multipart form split into text fields and files.
#[derive(Debug, Default)]
pub struct Form {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, Upload>,
}

impl Form {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::validation(format!("Failed to read form: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if let Some(file_name) = field.file_name().map(str::to_string) {
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(format!("Failed to read {}: {}", name, e)))?;
                form.files.insert(
                    name,
                    Upload {
                        file_name: Some(file_name),
                        content_type,
                        data: data.to_vec(),
                    },
                );
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(format!("Failed to read {}: {}", name, e)))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    /// Text field, `None` when absent.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).cloned()
    }

    /// Non-blank text field parsed as an integer.
    pub fn int(&self, name: &str) -> AppResult<Option<i64>> {
        match self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| AppError::validation(format!("{} must be an integer", name))),
            None => Ok(None),
        }
    }

    /// Takes a file field, ignoring empty file inputs.
    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name).filter(|f| !f.data.is_empty())
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "course-server", description = "Online courses: lessons, enrollment, progress and certificates"),
    paths(
        auth::register,
        auth::login,
        auth::logout,
        auth::me,
        user::list_users,
        user::profile,
        user::update_profile,
        user::change_password,
        user::upload_photo,
        user::my_enrollments,
        health::health,
        courses::public_courses,
        courses::categories,
        courses::course_detail,
        instructor::create_course,
        instructor::profile,
        instructor::update_profile,
        instructor::my_courses,
        instructor::search,
        instructor::update_course,
        instructor::delete_course,
        instructor::add_prerequisite,
        instructor::upload_thumbnail,
        instructor::add_lesson,
        instructor::reorder_lessons,
        instructor::update_lesson,
        instructor::delete_lesson,
        enrollments::enroll,
        enrollments::my_courses,
        enrollments::students,
        enrollments::course_details,
        enrollments::complete_lesson,
        enrollments::generate_certificate,
        progress::update_progress,
        progress::my_progress,
        progress::course_progress,
        analytics::instructor_courses,
        analytics::total_students,
        analytics::completion_rate,
    )
)]
pub struct ApiDoc;

pub fn openapi_json() -> AppResult<String> {
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .map_err(|e| anyhow::anyhow!("Failed to serialize OpenAPI document: {}", e))?;
    Ok(json)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::get_health_scope())
        .merge(auth::get_auth_scope())
        .merge(user::get_user_scope())
        .merge(courses::get_courses_scope())
        .merge(instructor::get_instructor_scope())
        .merge(enrollments::get_enrollments_scope())
        .merge(progress::get_progress_scope())
        .merge(analytics::get_analytics_scope())
}
