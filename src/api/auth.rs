use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use utoipa::ToSchema;

use super::{ACTOR_KEY, CurrentUser, Message};
use crate::{
    error::AppResult,
    server::AppState,
    user::{self, NewUser, Role, UserInfo},
};

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    /// Defaults to the part of the email before `@`
    pub name: Option<String>,
    /// Defaults to STUDENT
    pub role: Option<Role>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct UserResponse {
    pub success: bool,
    pub user: UserInfo,
}

#[utoipa::path(
    context_path = "/auth",
    path = "/register",
    method(post),
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let name = req
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| req.email.split('@').next().unwrap_or_default().to_string());
    let new_user = NewUser {
        name,
        email: req.email,
        password: req.password,
        role: req.role.unwrap_or(Role::Student),
    };
    let id = user::create_user(&state.database, new_user).await?;
    let user = user::get_user_info(&state.database, id).await?;
    Ok((StatusCode::CREATED, Json(UserResponse { success: true, user })))
}

#[utoipa::path(
    context_path = "/auth",
    path = "/login",
    method(post),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = UserResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<UserResponse>> {
    let actor = user::login(&state.database, &req.email, &req.password).await?;
    session
        .cycle_id()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to rotate session: {}", e))?;
    session
        .insert(ACTOR_KEY, actor)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to write session: {}", e))?;
    let user = user::get_user_info(&state.database, actor.id).await?;
    Ok(Json(UserResponse { success: true, user }))
}

#[utoipa::path(
    context_path = "/auth",
    path = "/logout",
    method(post),
    responses(
        (status = 200, description = "Logout successful", body = Message)
    )
)]
pub async fn logout(session: Session) -> AppResult<Json<Message>> {
    session
        .flush()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to clear session: {}", e))?;
    Ok(Json(Message::ok("Logout successful")))
}

#[utoipa::path(
    context_path = "/auth",
    path = "/me",
    method(get),
    responses(
        (status = 200, description = "Current user", body = UserInfo),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn me(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
) -> AppResult<Json<UserInfo>> {
    Ok(Json(user::get_user_info(&state.database, actor.id).await?))
}

pub fn get_auth_scope() -> Router<AppState> {
    Router::new().nest(
        "/auth",
        Router::new()
            .route("/register", post(register))
            .route("/login", post(login))
            .route("/logout", post(logout))
            .route("/me", get(me)),
    )
}
