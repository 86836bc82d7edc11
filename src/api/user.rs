use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::{get, put},
};
use serde::Deserialize;
use utoipa::ToSchema;

use super::{CurrentUser, Form, Instructor, Message};
use crate::{
    enrollment::{self, MyCourse},
    error::{AppError, AppResult},
    server::AppState,
    user::{self, ProfileUpdate, Role, UserInfo},
};

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct PhotoForm {
    #[schema(value_type = String, format = Binary)]
    photo: Vec<u8>,
}

#[utoipa::path(
    context_path = "/users",
    path = "",
    method(get),
    responses(
        (status = 200, description = "All users", body = Vec<UserInfo>),
        (status = 403, description = "Not an instructor")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    Instructor(_instructor): Instructor,
) -> AppResult<Json<Vec<UserInfo>>> {
    Ok(Json(user::get_user_list(&state.database).await?))
}

#[utoipa::path(
    context_path = "/users",
    path = "/me",
    method(get),
    responses(
        (status = 200, description = "Caller's profile", body = UserInfo),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn profile(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
) -> AppResult<Json<UserInfo>> {
    Ok(Json(user::get_user_info(&state.database, actor.id).await?))
}

#[utoipa::path(
    context_path = "/users",
    path = "/me",
    method(patch),
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Profile updated", body = UserInfo),
        (status = 400, description = "Invalid input or wrong current password"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<Json<UserInfo>> {
    Ok(Json(
        user::update_profile(&state.database, actor.id, update).await?,
    ))
}

#[utoipa::path(
    context_path = "/users",
    path = "/me/change-password",
    method(put),
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = Message),
        (status = 400, description = "Missing fields or wrong current password")
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> AppResult<Json<Message>> {
    user::change_password(
        &state.database,
        actor.id,
        &req.current_password,
        &req.new_password,
    )
    .await?;
    Ok(Json(Message::ok("Password changed successfully")))
}

#[utoipa::path(
    context_path = "/users",
    path = "/me/photo",
    method(put),
    request_body(content = PhotoForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Photo replaced", body = UserInfo),
        (status = 400, description = "Missing or non-image file")
    )
)]
pub async fn upload_photo(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    multipart: Multipart,
) -> AppResult<Json<UserInfo>> {
    let mut form = Form::read(multipart).await?;
    let upload = form
        .take_file("photo")
        .ok_or_else(|| AppError::validation("photo file is required"))?;
    Ok(Json(
        user::set_photo(&state.database, &state.media, actor.id, &upload).await?,
    ))
}

/// Instructors own courses rather than enrollments, so they get an empty list.
#[utoipa::path(
    context_path = "/users",
    path = "/me/enrollments",
    method(get),
    responses(
        (status = 200, description = "Courses the caller is enrolled in", body = Vec<MyCourse>)
    )
)]
pub async fn my_enrollments(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
) -> AppResult<Json<Vec<MyCourse>>> {
    if actor.role != Role::Student {
        return Ok(Json(Vec::new()));
    }
    Ok(Json(enrollment::my_courses(&state.database, actor.id).await?))
}

pub fn get_user_scope() -> Router<AppState> {
    Router::new().nest(
        "/users",
        Router::new()
            .route("/", get(list_users))
            .route("/me", get(profile).patch(update_profile))
            .route("/me/change-password", put(change_password))
            .route("/me/photo", put(upload_photo))
            .route("/me/enrollments", get(my_enrollments)),
    )
}
