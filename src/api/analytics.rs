use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use super::Instructor;
use crate::{
    analytics::{self, CompletionRate, CourseAnalytics, StudentCount},
    error::AppResult,
    server::AppState,
};

#[utoipa::path(
    context_path = "/analytics",
    path = "/instructor/courses",
    method(get),
    responses(
        (status = 200, description = "Per-course enrollment and completion figures", body = Vec<CourseAnalytics>)
    )
)]
pub async fn instructor_courses(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
) -> AppResult<Json<Vec<CourseAnalytics>>> {
    Ok(Json(
        analytics::instructor_analytics(&state.database, actor.id).await?,
    ))
}

#[utoipa::path(
    context_path = "/analytics",
    path = "/course/{id}/students",
    method(get),
    params(("id" = i64, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Number of enrolled students", body = StudentCount),
        (status = 403, description = "Not the owner")
    )
)]
pub async fn total_students(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
) -> AppResult<Json<StudentCount>> {
    Ok(Json(
        analytics::total_students(&state.database, &actor, id).await?,
    ))
}

#[utoipa::path(
    context_path = "/analytics",
    path = "/course/{id}/completion",
    method(get),
    params(("id" = i64, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Completion rate in percent", body = CompletionRate),
        (status = 403, description = "Not the owner")
    )
)]
pub async fn completion_rate(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
) -> AppResult<Json<CompletionRate>> {
    Ok(Json(
        analytics::completion_rate(&state.database, &actor, id).await?,
    ))
}

pub fn get_analytics_scope() -> Router<AppState> {
    Router::new().nest(
        "/analytics",
        Router::new()
            .route("/instructor/courses", get(instructor_courses))
            .route("/course/{id}/students", get(total_students))
            .route("/course/{id}/completion", get(completion_rate)),
    )
}
