pub mod certificate;
pub mod progress;

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    course::{Course, CourseDetail, ensure_owner, fetch_course, get_course},
    error::{AppError, AppResult, conflict_on_unique},
    user::{Actor, Role},
    utils::now,
};

const ENROLLMENT_COLUMNS: &str =
    "id, student_id, course_id, progress, enrolled_at, completed_at, certificate_url";

/// Lifecycle of an enrollment, derived from the lesson percentage. Adding
/// lessons to a course can move a completed enrollment back to `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
pub enum EnrollmentState {
    Enrolled,
    InProgress,
    Completed,
    CertificateIssued,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub progress: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub certificate_url: Option<String>,
}

impl Enrollment {
    /// Every current lesson is done. `completed_at` keeps the first time this
    /// held, even after new lessons lower the percentage again.
    pub fn is_complete(&self) -> bool {
        self.progress >= 100
    }

    pub fn state(&self) -> EnrollmentState {
        if self.certificate_url.is_some() {
            EnrollmentState::CertificateIssued
        } else if self.is_complete() {
            EnrollmentState::Completed
        } else if self.progress > 0 {
            EnrollmentState::InProgress
        } else {
            EnrollmentState::Enrolled
        }
    }
}

/// A course seen from the enrolled student's side.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MyCourse {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub course: Course,
    pub instructor_name: String,
    pub lesson_count: i64,
    pub progress: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub certificate_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledStudent {
    pub student_id: i64,
    pub name: String,
    pub email: String,
    pub progress: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub certificate_url: Option<String>,
}

/// Course content plus the student's own state in it.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledCourseDetail {
    #[serde(flatten)]
    pub course: CourseDetail,
    pub enrollment: Enrollment,
    pub state: EnrollmentState,
    pub completed_lessons: Vec<i64>,
}

pub async fn find_enrollment(
    conn: &mut SqliteConnection,
    student_id: i64,
    course_id: i64,
) -> AppResult<Enrollment> {
    sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {} FROM enrollments WHERE student_id = ? AND course_id = ?",
        ENROLLMENT_COLUMNS
    ))
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("Enrollment"))
}

pub async fn enroll(database: &SqlitePool, actor: &Actor, course_id: i64) -> AppResult<Enrollment> {
    actor.require(Role::Student)?;
    let mut conn = database.acquire().await?;
    fetch_course(&mut conn, course_id).await?;
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        "INSERT INTO enrollments (student_id, course_id, progress, enrolled_at) VALUES (?, ?, 0, ?) RETURNING {}",
        ENROLLMENT_COLUMNS
    ))
    .bind(actor.id)
    .bind(course_id)
    .bind(now())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, "Already enrolled in this course"))?;
    info!("student {} enrolled in course {}", actor.id, course_id);
    Ok(enrollment)
}

pub async fn my_courses(database: &SqlitePool, student_id: i64) -> AppResult<Vec<MyCourse>> {
    let courses = sqlx::query_as::<_, MyCourse>(
        r#"SELECT c.id, c.title, c.description, c.instructor_id, c.category_id, c.difficulty,
                  c.duration, c.prerequisites, c.thumbnail_url, c.created_at,
                  u.name AS instructor_name,
                  (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id) AS lesson_count,
                  e.progress, e.enrolled_at, e.completed_at, e.certificate_url
        FROM enrollments e
        JOIN courses c ON c.id = e.course_id
        JOIN users u ON u.id = c.instructor_id
        WHERE e.student_id = ?
        ORDER BY e.enrolled_at DESC, e.id DESC"#,
    )
    .bind(student_id)
    .fetch_all(database)
    .await?;
    Ok(courses)
}

/// Students of a course, owner only.
pub async fn enrolled_students(
    database: &SqlitePool,
    actor: &Actor,
    course_id: i64,
) -> AppResult<Vec<EnrolledStudent>> {
    let mut conn = database.acquire().await?;
    ensure_owner(&mut conn, actor, course_id).await?;
    let students = sqlx::query_as::<_, EnrolledStudent>(
        r#"SELECT u.id AS student_id, u.name, u.email,
                  e.progress, e.enrolled_at, e.completed_at, e.certificate_url
        FROM enrollments e
        JOIN users u ON u.id = e.student_id
        WHERE e.course_id = ?
        ORDER BY e.enrolled_at, e.id"#,
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(students)
}

pub async fn course_details(
    database: &SqlitePool,
    actor: &Actor,
    course_id: i64,
) -> AppResult<EnrolledCourseDetail> {
    actor.require(Role::Student)?;
    let mut conn = database.acquire().await?;
    fetch_course(&mut conn, course_id).await?;
    let enrollment = find_enrollment(&mut conn, actor.id, course_id).await?;
    let completed_lessons = sqlx::query_scalar::<_, i64>(
        r#"SELECT lc.lesson_id FROM lesson_completions lc
        JOIN lessons l ON l.id = lc.lesson_id
        WHERE lc.enrollment_id = ?
        ORDER BY l.position, l.id"#,
    )
    .bind(enrollment.id)
    .fetch_all(&mut *conn)
    .await?;
    drop(conn);
    let course = get_course(database, course_id).await?;
    Ok(EnrolledCourseDetail {
        course,
        state: enrollment.state(),
        enrollment,
        completed_lessons,
    })
}
