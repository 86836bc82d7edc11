use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use super::{Instructor, Student};
use crate::{
    enrollment::progress::{ProgressUpdate, ProgressView},
    error::AppResult,
    server::AppState,
};

#[utoipa::path(
    context_path = "/progress",
    path = "/course/{id}",
    method(post),
    params(("id" = i64, Path, description = "Course ID")),
    request_body = ProgressUpdate,
    responses(
        (status = 200, description = "Stored progress record", body = ProgressView),
        (status = 400, description = "Score out of range"),
        (status = 404, description = "Not enrolled")
    )
)]
pub async fn update_progress(
    State(state): State<AppState>,
    Student(actor): Student,
    Path(id): Path<i64>,
    Json(req): Json<ProgressUpdate>,
) -> AppResult<Json<ProgressView>> {
    Ok(Json(state.progress.upsert_progress(&actor, id, req).await?))
}

#[utoipa::path(
    context_path = "/progress",
    path = "/my-courses",
    method(get),
    responses(
        (status = 200, description = "Progress in every enrolled course", body = Vec<ProgressView>)
    )
)]
pub async fn my_progress(
    State(state): State<AppState>,
    Student(actor): Student,
) -> AppResult<Json<Vec<ProgressView>>> {
    Ok(Json(state.progress.student_progress(actor.id).await?))
}

#[utoipa::path(
    context_path = "/progress",
    path = "/course/{id}",
    method(get),
    params(("id" = i64, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Progress of every enrolled student", body = Vec<ProgressView>),
        (status = 403, description = "Not the owner")
    )
)]
pub async fn course_progress(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<ProgressView>>> {
    Ok(Json(state.progress.course_progress(&actor, id).await?))
}

pub fn get_progress_scope() -> Router<AppState> {
    Router::new().nest(
        "/progress",
        Router::new()
            .route("/course/{id}", post(update_progress).get(course_progress))
            .route("/my-courses", get(my_progress)),
    )
}
