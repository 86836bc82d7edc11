pub mod category;
pub mod duration;
pub mod lesson;

use std::collections::HashSet;

use category::{Category, ensure_category, get_category};
use lesson::{Lesson, NewLesson, course_lessons, insert_lesson};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool, types::Json};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    error::{AppError, AppResult},
    media::{MediaStore, Upload},
    user::{Actor, Role},
    utils::now,
};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub instructor_id: i64,
    pub category_id: Option<i64>,
    pub difficulty: Difficulty,
    /// Lesson durations joined with `" + "`
    pub duration: String,
    #[sqlx(json)]
    pub prerequisites: Vec<String>,
    pub thumbnail_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A course with its lessons in display order.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub category: Option<Category>,
    pub lessons: Vec<Lesson>,
}

/// Catalog row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub course: Course,
    pub instructor_name: String,
    pub category_name: Option<String>,
    pub lesson_count: i64,
    pub enrollment_count: i64,
    /// Only set when the viewer is a student
    #[serde(skip_serializing_if = "Option::is_none")]
    #[sqlx(skip)]
    pub enrolled: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewCourse {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub difficulty: Option<Difficulty>,
    /// Initial display duration, replaced as soon as lessons change
    pub duration: Option<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub lessons: Vec<NewLesson>,
}

impl NewCourse {
    pub fn validate(&self) -> AppResult<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::validation("Course title is required"));
        }
        if self.lessons.iter().any(|l| l.title.trim().is_empty()) {
            return Err(AppError::validation("Each lesson must have a title"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub difficulty: Option<Difficulty>,
    pub prerequisites: Option<Vec<String>>,
}

impl CourseUpdate {
    pub fn validate(&self) -> AppResult<()> {
        if matches!(&self.title, Some(t) if t.trim().is_empty()) {
            return Err(AppError::validation("Course title cannot be empty"));
        }
        Ok(())
    }
}

/// Trims, drops blanks and duplicates, keeps first-seen order.
pub fn normalize_prerequisites(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

const COURSE_COLUMNS: &str = "id, title, description, instructor_id, category_id, difficulty, duration, prerequisites, thumbnail_url, created_at";

const SUMMARY_SELECT: &str = r#"
    SELECT c.id, c.title, c.description, c.instructor_id, c.category_id, c.difficulty,
           c.duration, c.prerequisites, c.thumbnail_url, c.created_at,
           u.name AS instructor_name,
           cat.name AS category_name,
           (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id) AS lesson_count,
           (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS enrollment_count
    FROM courses c
    JOIN users u ON u.id = c.instructor_id
    LEFT JOIN categories cat ON cat.id = c.category_id
"#;

pub async fn fetch_course(conn: &mut SqliteConnection, course_id: i64) -> AppResult<Course> {
    sqlx::query_as::<_, Course>(&format!(
        "SELECT {} FROM courses WHERE id = ?",
        COURSE_COLUMNS
    ))
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("Course"))
}

/// NotFound when the course is absent, Permission when `actor` does not own it.
pub async fn ensure_owner(
    conn: &mut SqliteConnection,
    actor: &Actor,
    course_id: i64,
) -> AppResult<Course> {
    let course = fetch_course(conn, course_id).await?;
    if actor.role != Role::Instructor || course.instructor_id != actor.id {
        return Err(AppError::permission(
            "You do not have permission to modify this course",
        ));
    }
    Ok(course)
}

pub async fn get_course(database: &SqlitePool, course_id: i64) -> AppResult<CourseDetail> {
    let mut conn = database.acquire().await?;
    let course = fetch_course(&mut conn, course_id).await?;
    let category = match course.category_id {
        Some(id) => get_category(&mut conn, id).await?,
        None => None,
    };
    let lessons = course_lessons(&mut conn, course_id).await?;
    Ok(CourseDetail {
        course,
        category,
        lessons,
    })
}

pub async fn create_course(
    database: &SqlitePool,
    actor: &Actor,
    new: NewCourse,
) -> AppResult<CourseDetail> {
    actor.require(Role::Instructor)?;
    new.validate()?;
    let prerequisites = normalize_prerequisites(&new.prerequisites);
    {
        let mut conn = database.acquire().await?;
        ensure_category(&mut conn, new.category_id).await?;
    }
    let mut tx = database.begin().await?;
    let course_id = sqlx::query_scalar::<_, i64>(
        r#"INSERT INTO courses
            (title, description, instructor_id, category_id, difficulty, duration, prerequisites, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id"#,
    )
    .bind(new.title.trim())
    .bind(&new.description)
    .bind(actor.id)
    .bind(new.category_id)
    .bind(new.difficulty.unwrap_or_default())
    .bind(new.duration.as_deref().map(str::trim).unwrap_or(""))
    .bind(Json(&prerequisites))
    .bind(now())
    .fetch_one(&mut *tx)
    .await?;
    for (index, lesson) in new.lessons.iter().enumerate() {
        insert_lesson(&mut tx, course_id, lesson, Some(index as i64 + 1)).await?;
    }
    if !new.lessons.is_empty() {
        duration::recompute_duration(&mut tx, course_id).await?;
    }
    tx.commit().await?;
    info!(
        "instructor {} created course {} with {} lessons",
        actor.id,
        course_id,
        new.lessons.len()
    );
    get_course(database, course_id).await
}

pub async fn update_course(
    database: &SqlitePool,
    actor: &Actor,
    course_id: i64,
    update: CourseUpdate,
) -> AppResult<CourseDetail> {
    update.validate()?;
    let mut conn = database.acquire().await?;
    ensure_owner(&mut conn, actor, course_id).await?;
    ensure_category(&mut conn, update.category_id).await?;
    let prerequisites = update
        .prerequisites
        .as_deref()
        .map(normalize_prerequisites)
        .map(Json);
    sqlx::query(
        r#"UPDATE courses SET
            title = COALESCE(?, title),
            description = COALESCE(?, description),
            category_id = COALESCE(?, category_id),
            difficulty = COALESCE(?, difficulty),
            prerequisites = COALESCE(?, prerequisites)
        WHERE id = ?"#,
    )
    .bind(update.title.as_deref().map(str::trim))
    .bind(&update.description)
    .bind(update.category_id)
    .bind(update.difficulty)
    .bind(prerequisites)
    .bind(course_id)
    .execute(&mut *conn)
    .await?;
    drop(conn);
    get_course(database, course_id).await
}

async fn fill_enrolled(
    database: &SqlitePool,
    viewer: Option<&Actor>,
    mut courses: Vec<CourseSummary>,
) -> AppResult<Vec<CourseSummary>> {
    if let Some(viewer) = viewer.filter(|v| v.role == Role::Student) {
        let enrolled: HashSet<i64> =
            sqlx::query_scalar::<_, i64>("SELECT course_id FROM enrollments WHERE student_id = ?")
                .bind(viewer.id)
                .fetch_all(database)
                .await?
                .into_iter()
                .collect();
        for c in &mut courses {
            c.enrolled = Some(enrolled.contains(&c.course.id));
        }
    }
    Ok(courses)
}

/// Public catalog, newest first.
pub async fn list_courses(
    database: &SqlitePool,
    viewer: Option<&Actor>,
) -> AppResult<Vec<CourseSummary>> {
    let courses = sqlx::query_as::<_, CourseSummary>(&format!(
        "{} ORDER BY c.created_at DESC, c.id DESC",
        SUMMARY_SELECT
    ))
    .fetch_all(database)
    .await?;
    fill_enrolled(database, viewer, courses).await
}

pub async fn instructor_courses(
    database: &SqlitePool,
    instructor_id: i64,
) -> AppResult<Vec<CourseSummary>> {
    let courses = sqlx::query_as::<_, CourseSummary>(&format!(
        "{} WHERE c.instructor_id = ? ORDER BY c.created_at DESC, c.id DESC",
        SUMMARY_SELECT
    ))
    .bind(instructor_id)
    .fetch_all(database)
    .await?;
    Ok(courses)
}

fn like_pattern(query: &str) -> String {
    let mut pattern = String::from("%");
    for ch in query.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Case-insensitive match on title or description among the instructor's courses.
pub async fn search_courses(
    database: &SqlitePool,
    instructor_id: i64,
    query: &str,
) -> AppResult<Vec<CourseSummary>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(vec![]);
    }
    let pattern = like_pattern(query);
    let courses = sqlx::query_as::<_, CourseSummary>(&format!(
        r#"{} WHERE c.instructor_id = ?
            AND (LOWER(c.title) LIKE ? ESCAPE '\' OR LOWER(COALESCE(c.description, '')) LIKE ? ESCAPE '\')
            ORDER BY c.created_at DESC, c.id DESC"#,
        SUMMARY_SELECT
    ))
    .bind(instructor_id)
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(database)
    .await?;
    Ok(courses)
}

/// Deletes the course with its lessons, enrollments and progress; media cleanup runs detached.
pub async fn delete_course(
    database: &SqlitePool,
    media: &MediaStore,
    actor: &Actor,
    course_id: i64,
) -> AppResult<()> {
    let mut conn = database.acquire().await?;
    let course = ensure_owner(&mut conn, actor, course_id).await?;
    let lessons = course_lessons(&mut conn, course_id).await?;
    drop(conn);

    let mut tx = database.begin().await?;
    sqlx::query("DELETE FROM lessons WHERE course_id = ?")
        .bind(course_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM enrollments WHERE course_id = ?")
        .bind(course_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM progress WHERE course_id = ?")
        .bind(course_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(course_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    info!("instructor {} deleted course {}", actor.id, course_id);

    let mut urls: Vec<String> = lessons.iter().flat_map(Lesson::media_urls).collect();
    urls.extend(course.thumbnail_url);
    media.remove_detached(urls);
    Ok(())
}

/// Appends a prerequisite unless it is already listed.
pub async fn add_prerequisite(
    database: &SqlitePool,
    actor: &Actor,
    course_id: i64,
    name: &str,
) -> AppResult<Course> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("Prerequisite name is required"));
    }
    let mut conn = database.acquire().await?;
    ensure_owner(&mut conn, actor, course_id).await?;
    sqlx::query(
        r#"UPDATE courses SET prerequisites = json_insert(prerequisites, '$[#]', ?)
        WHERE id = ? AND NOT EXISTS (SELECT 1 FROM json_each(courses.prerequisites) WHERE value = ?)"#,
    )
    .bind(name)
    .bind(course_id)
    .bind(name)
    .execute(&mut *conn)
    .await?;
    fetch_course(&mut conn, course_id).await
}

/// Replaces the course thumbnail; the previous file is removed in the background.
pub async fn set_thumbnail(
    database: &SqlitePool,
    media: &MediaStore,
    actor: &Actor,
    course_id: i64,
    upload: &Upload,
) -> AppResult<Course> {
    upload.ensure_kind(mime::IMAGE, "thumbnails")?;
    let mut conn = database.acquire().await?;
    let mut course = ensure_owner(&mut conn, actor, course_id).await?;
    let url = media.save("thumbnails", upload).await?;
    let result = sqlx::query("UPDATE courses SET thumbnail_url = ? WHERE id = ?")
        .bind(&url)
        .bind(course_id)
        .execute(&mut *conn)
        .await;
    if let Err(e) = result {
        media.remove_detached(vec![url]);
        return Err(e.into());
    }
    if let Some(old) = course.thumbnail_url.replace(url) {
        media.remove_detached(vec![old]);
    }
    Ok(course)
}
