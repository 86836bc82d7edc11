use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use super::{Form, Instructor, Message};
use crate::{
    course::{
        self, Course, CourseDetail, CourseSummary, CourseUpdate, NewCourse,
        lesson::{Lesson, LessonMedia, LessonUpdate, NewLesson},
    },
    error::{AppError, AppResult},
    server::AppState,
    user::{self, ProfileUpdate, UserInfo},
};

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteRequest {
    pub prerequisite_name: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub lesson_ids: Vec<i64>,
}

/// Multipart lesson form: `title`, `content`, `duration`, `order` and the
/// optional `videoFile` / `attachmentFile`.
#[derive(ToSchema)]
#[schema(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct LessonForm {
    title: Option<String>,
    content: Option<String>,
    duration: Option<String>,
    order: Option<i64>,
    #[schema(value_type = Option<String>, format = Binary)]
    video_file: Option<Vec<u8>>,
    #[schema(value_type = Option<String>, format = Binary)]
    attachment_file: Option<Vec<u8>>,
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ThumbnailForm {
    #[schema(value_type = String, format = Binary)]
    thumbnail: Vec<u8>,
}

fn lesson_media(form: &mut Form) -> LessonMedia {
    LessonMedia {
        video: form.take_file("videoFile"),
        attachment: form.take_file("attachmentFile"),
    }
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses",
    method(post),
    request_body = NewCourse,
    responses(
        (status = 201, description = "Course created", body = CourseDetail),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Not an instructor")
    )
)]
pub async fn create_course(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Json(req): Json<NewCourse>,
) -> AppResult<(StatusCode, Json<CourseDetail>)> {
    let detail = course::create_course(&state.database, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/me",
    method(get),
    responses(
        (status = 200, description = "Caller's account", body = UserInfo)
    )
)]
pub async fn profile(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
) -> AppResult<Json<UserInfo>> {
    Ok(Json(user::get_user_info(&state.database, actor.id).await?))
}

/// Name, email and password; a new password needs `currentPassword`.
#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/me",
    method(patch),
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Account updated", body = UserInfo),
        (status = 400, description = "Invalid input or wrong current password"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn update_profile(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<Json<UserInfo>> {
    Ok(Json(
        user::update_profile(&state.database, actor.id, update).await?,
    ))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/me/courses",
    method(get),
    responses(
        (status = 200, description = "Courses owned by the caller", body = Vec<CourseSummary>)
    )
)]
pub async fn my_courses(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
) -> AppResult<Json<Vec<CourseSummary>>> {
    Ok(Json(course::instructor_courses(&state.database, actor.id).await?))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/search",
    method(get),
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching courses owned by the caller", body = Vec<CourseSummary>)
    )
)]
pub async fn search(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Vec<CourseSummary>>> {
    Ok(Json(
        course::search_courses(&state.database, actor.id, &q.query).await?,
    ))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/{id}",
    method(patch),
    params(("id" = i64, Path, description = "Course ID")),
    request_body = CourseUpdate,
    responses(
        (status = 200, description = "Course updated", body = CourseDetail),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn update_course(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
    Json(req): Json<CourseUpdate>,
) -> AppResult<Json<CourseDetail>> {
    Ok(Json(
        course::update_course(&state.database, &actor, id, req).await?,
    ))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/{id}",
    method(delete),
    params(("id" = i64, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Course deleted", body = Message),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn delete_course(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
) -> AppResult<Json<Message>> {
    course::delete_course(&state.database, &state.media, &actor, id).await?;
    Ok(Json(Message::ok("Course deleted successfully")))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/{id}/prerequisites",
    method(post),
    params(("id" = i64, Path, description = "Course ID")),
    request_body = PrerequisiteRequest,
    responses(
        (status = 200, description = "Prerequisite added", body = Course)
    )
)]
pub async fn add_prerequisite(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
    Json(req): Json<PrerequisiteRequest>,
) -> AppResult<Json<Course>> {
    Ok(Json(
        course::add_prerequisite(&state.database, &actor, id, &req.prerequisite_name).await?,
    ))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/{id}/thumbnail",
    method(post),
    params(("id" = i64, Path, description = "Course ID")),
    request_body(content = ThumbnailForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Thumbnail replaced", body = Course),
        (status = 400, description = "Missing or non-image file")
    )
)]
pub async fn upload_thumbnail(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> AppResult<Json<Course>> {
    let mut form = Form::read(multipart).await?;
    let upload = form
        .take_file("thumbnail")
        .ok_or_else(|| AppError::validation("thumbnail file is required"))?;
    Ok(Json(
        course::set_thumbnail(&state.database, &state.media, &actor, id, &upload).await?,
    ))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/{id}/lessons",
    method(post),
    params(("id" = i64, Path, description = "Course ID")),
    request_body(content = LessonForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Lesson added", body = Lesson),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn add_lesson(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Lesson>)> {
    let mut form = Form::read(multipart).await?;
    let lesson = NewLesson {
        title: form.text("title").unwrap_or_default(),
        content: form.text("content"),
        video_url: None,
        attachment_url: None,
        duration: form.text("duration"),
        order: form.int("order")?,
    };
    let media = lesson_media(&mut form);
    let lesson = state.lessons.add_lesson(&actor, id, lesson, media).await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/{id}/lessons/reorder",
    method(patch),
    params(("id" = i64, Path, description = "Course ID")),
    request_body = ReorderRequest,
    responses(
        (status = 200, description = "Lessons in their new order", body = Vec<Lesson>),
        (status = 400, description = "Unknown or repeated lesson IDs"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn reorder_lessons(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
    Json(req): Json<ReorderRequest>,
) -> AppResult<Json<Vec<Lesson>>> {
    Ok(Json(
        state
            .lessons
            .reorder_lessons(&actor, id, &req.lesson_ids)
            .await?,
    ))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/lessons/{id}",
    method(patch),
    params(("id" = i64, Path, description = "Lesson ID")),
    request_body(content = LessonForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Lesson updated", body = Lesson),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Lesson not found")
    )
)]
pub async fn update_lesson(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> AppResult<Json<Lesson>> {
    let mut form = Form::read(multipart).await?;
    let update = LessonUpdate {
        title: form.text("title"),
        content: form.text("content"),
        duration: form.text("duration"),
        order: form.int("order")?,
    };
    let media = lesson_media(&mut form);
    Ok(Json(
        state.lessons.update_lesson(&actor, id, update, media).await?,
    ))
}

#[utoipa::path(
    context_path = "/instructor",
    path = "/courses/lessons/{id}",
    method(delete),
    params(("id" = i64, Path, description = "Lesson ID")),
    responses(
        (status = 200, description = "Lesson deleted", body = Message),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Lesson not found")
    )
)]
pub async fn delete_lesson(
    State(state): State<AppState>,
    Instructor(actor): Instructor,
    Path(id): Path<i64>,
) -> AppResult<Json<Message>> {
    state.lessons.delete_lesson(&actor, id).await?;
    Ok(Json(Message::ok("Lesson deleted successfully")))
}

pub fn get_instructor_scope() -> Router<AppState> {
    Router::new().nest(
        "/instructor",
        Router::new()
            .route("/courses", post(create_course))
            .route("/courses/me", get(profile).patch(update_profile))
            .route("/courses/me/courses", get(my_courses))
            .route("/courses/search", get(search))
            .route(
                "/courses/{id}",
                patch(update_course).delete(delete_course),
            )
            .route("/courses/{id}/prerequisites", post(add_prerequisite))
            .route("/courses/{id}/thumbnail", post(upload_thumbnail))
            .route("/courses/{id}/lessons", post(add_lesson))
            .route("/courses/{id}/lessons/reorder", patch(reorder_lessons))
            .route(
                "/courses/lessons/{id}",
                patch(update_lesson).delete(delete_lesson),
            ),
    )
}
