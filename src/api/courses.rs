use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use super::MaybeUser;
use crate::{
    course::{self, CourseDetail, CourseSummary, category::Category},
    error::AppResult,
    server::AppState,
};

#[utoipa::path(
    context_path = "/courses",
    path = "/public",
    method(get),
    responses(
        (status = 200, description = "Catalog, newest first", body = Vec<CourseSummary>)
    )
)]
pub async fn public_courses(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
) -> AppResult<Json<Vec<CourseSummary>>> {
    Ok(Json(course::list_courses(&state.database, viewer.as_ref()).await?))
}

#[utoipa::path(
    context_path = "/courses",
    path = "/categories",
    method(get),
    responses(
        (status = 200, description = "All categories", body = Vec<Category>)
    )
)]
pub async fn categories(State(state): State<AppState>) -> AppResult<Json<Vec<Category>>> {
    Ok(Json(course::category::list_categories(&state.database).await?))
}

#[utoipa::path(
    context_path = "/courses",
    path = "/{id}",
    method(get),
    params(("id" = i64, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Course with ordered lessons", body = CourseDetail),
        (status = 404, description = "Course not found")
    )
)]
pub async fn course_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<CourseDetail>> {
    Ok(Json(course::get_course(&state.database, id).await?))
}

pub fn get_courses_scope() -> Router<AppState> {
    Router::new().nest(
        "/courses",
        Router::new()
            .route("/public", get(public_courses))
            .route("/categories", get(categories))
            .route("/{id}", get(course_detail)),
    )
}
