use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::{Instructor, Student};
use crate::{
    enrollment::{self, EnrolledCourseDetail, EnrolledStudent, Enrollment, MyCourse},
    error::AppResult,
    server::AppState,
};

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteLessonRequest {
    pub lesson_id: i64,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteLessonResponse {
    pub success: bool,
    pub message: String,
    pub progress: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateResponse {
    pub success: bool,
    pub certificate_url: String,
}

#[utoipa::path(
    context_path = "/enrollments",
    path = "/course/{id}",
    method(post),
    params(("id" = i64, Path, description = "Course ID")),
    responses(
        (status = 201, description = "Enrolled", body = Enrollment),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Already enrolled")
    )
)]
pub async fn enroll(
    State(state): State<AppState>,
    Student(actor): Student,
    Path(id): Path<i64>,
) -> AppResult<(StatusCode, Json<Enrollment>)> {
    let enrollment = enrollment::enroll(&state.database, &actor, id).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

#[utoipa::path(
    context_path = "/enrollments",
    path = "/my-courses",
    method(get),
    responses(
        (status = 200, description = "Courses the caller is enrolled in", body = Vec<MyCourse>)
    )
)]
pub async fn my_courses(
    State(state): State<AppState>,
    Student(actor): Student,
) -> AppResult<Json<Vec<MyCourse>>> {
    Ok(Json(enrollment::my_courses(&state.database, actor.id).await?))
}

#[utoipa::path(
    context_path = "/enrollments",
    path = "/course/{id}/students",
    method(get),
    params(("id" = i64, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Enrolled students", body = Vec<EnrolledStudent>),
        (status = 403, description = "Not the owner")
    )
)]
pub async fn students(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<EnrolledStudent>>> {
    Ok(Json(
        enrollment::enrolled_students(&state.database, &actor, id).await?,
    ))
}

#[utoipa::path(
    context_path = "/enrollments",
    path = "/course-details/{id}",
    method(get),
    params(("id" = i64, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Course content with the caller's progress", body = EnrolledCourseDetail),
        (status = 404, description = "Course or enrollment not found")
    )
)]
pub async fn course_details(
    State(state): State<AppState>,
    Student(actor): Student,
    Path(id): Path<i64>,
) -> AppResult<Json<EnrolledCourseDetail>> {
    Ok(Json(
        enrollment::course_details(&state.database, &actor, id).await?,
    ))
}

#[utoipa::path(
    context_path = "/enrollments",
    path = "/course/{id}/complete-lesson",
    method(patch),
    params(("id" = i64, Path, description = "Course ID")),
    request_body = CompleteLessonRequest,
    responses(
        (status = 200, description = "Lesson marked as completed", body = CompleteLessonResponse),
        (status = 400, description = "Lesson not in course"),
        (status = 404, description = "Not enrolled")
    )
)]
pub async fn complete_lesson(
    State(state): State<AppState>,
    Student(actor): Student,
    Path(id): Path<i64>,
    Json(req): Json<CompleteLessonRequest>,
) -> AppResult<Json<CompleteLessonResponse>> {
    let progress = state
        .progress
        .complete_lesson(&actor, id, req.lesson_id)
        .await?;
    Ok(Json(CompleteLessonResponse {
        success: true,
        message: "Lesson marked as completed".to_string(),
        progress: progress.progress,
        completed_at: progress.completed_at,
    }))
}

#[utoipa::path(
    context_path = "/enrollments",
    path = "/course/{id}/generate-certificate",
    method(patch),
    params(("id" = i64, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Certificate URL", body = CertificateResponse),
        (status = 400, description = "Course not completed"),
        (status = 404, description = "Not enrolled")
    )
)]
pub async fn generate_certificate(
    State(state): State<AppState>,
    Student(actor): Student,
    Path(id): Path<i64>,
) -> AppResult<Json<CertificateResponse>> {
    let certificate_url = state.certificates.generate_certificate(&actor, id).await?;
    Ok(Json(CertificateResponse {
        success: true,
        certificate_url,
    }))
}

pub fn get_enrollments_scope() -> Router<AppState> {
    Router::new().nest(
        "/enrollments",
        Router::new()
            .route("/course/{id}", post(enroll))
            .route("/my-courses", get(my_courses))
            .route("/course/{id}/students", get(students))
            .route("/course-details/{id}", get(course_details))
            .route("/course/{id}/complete-lesson", patch(complete_lesson))
            .route(
                "/course/{id}/generate-certificate",
                patch(generate_certificate),
            ),
    )
}
