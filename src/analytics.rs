use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;

use crate::{course::ensure_owner, error::AppResult, user::Actor};

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CourseAnalytics {
    pub id: i64,
    pub title: String,
    pub total_enrollments: i64,
    pub completed_enrollments: i64,
    pub lessons_count: i64,
    /// Percent, two decimals
    #[sqlx(skip)]
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRate {
    pub course_id: i64,
    pub total_enrollments: i64,
    pub completed_enrollments: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentCount {
    pub course_id: i64,
    pub total_students: i64,
}

/// `completed / total * 100` rounded to two decimals, 0 for an empty course.
pub fn rate(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (completed as f64 * 10_000.0 / total as f64).round() / 100.0
}

pub async fn instructor_analytics(
    database: &SqlitePool,
    instructor_id: i64,
) -> AppResult<Vec<CourseAnalytics>> {
    let mut courses = sqlx::query_as::<_, CourseAnalytics>(
        r#"SELECT c.id, c.title,
                  (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS total_enrollments,
                  (SELECT COUNT(*) FROM enrollments e
                      WHERE e.course_id = c.id AND e.progress >= 100) AS completed_enrollments,
                  (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id) AS lessons_count
        FROM courses c
        WHERE c.instructor_id = ?
        ORDER BY c.created_at DESC, c.id DESC"#,
    )
    .bind(instructor_id)
    .fetch_all(database)
    .await?;
    for course in &mut courses {
        course.completion_rate = rate(course.completed_enrollments, course.total_enrollments);
    }
    Ok(courses)
}

pub async fn completion_rate(
    database: &SqlitePool,
    actor: &Actor,
    course_id: i64,
) -> AppResult<CompletionRate> {
    let mut conn = database.acquire().await?;
    ensure_owner(&mut conn, actor, course_id).await?;
    let (total, completed) = sqlx::query_as::<_, (i64, i64)>(
        r#"SELECT COUNT(*), COALESCE(SUM(progress >= 100), 0)
        FROM enrollments WHERE course_id = ?"#,
    )
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(CompletionRate {
        course_id,
        total_enrollments: total,
        completed_enrollments: completed,
        completion_rate: rate(completed, total),
    })
}

pub async fn total_students(
    database: &SqlitePool,
    actor: &Actor,
    course_id: i64,
) -> AppResult<StudentCount> {
    let mut conn = database.acquire().await?;
    ensure_owner(&mut conn, actor, course_id).await?;
    let total_students =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM enrollments WHERE course_id = ?")
            .bind(course_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(StudentCount {
        course_id,
        total_students,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        enrollment::enroll,
        error::AppError,
        test_utils::{empty_course, instructor, student, test_pool},
        utils::now,
    };

    #[test]
    fn two_decimals() {
        assert_eq!(rate(1, 3), 33.33);
        assert_eq!(rate(2, 3), 66.67);
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(4, 4), 100.0);
    }

    #[tokio::test]
    async fn counts_completed_enrollments() {
        let (_dir, database) = test_pool().await;
        let owner = instructor(&database).await;
        let course_id = empty_course(&database, &owner).await;
        let untouched = empty_course(&database, &owner).await;
        for name in ["A", "B", "C"] {
            let learner = student(&database, name).await;
            let enrollment = enroll(&database, &learner, course_id).await.unwrap();
            if name == "A" {
                sqlx::query("UPDATE enrollments SET progress = 100, completed_at = ? WHERE id = ?")
                    .bind(now())
                    .bind(enrollment.id)
                    .execute(&database)
                    .await
                    .unwrap();
            }
        }

        let rate = completion_rate(&database, &owner, course_id).await.unwrap();
        assert_eq!(rate.total_enrollments, 3);
        assert_eq!(rate.completion_rate, 33.33);
        assert_eq!(
            total_students(&database, &owner, course_id).await.unwrap().total_students,
            3
        );

        let all = instructor_analytics(&database, owner.id).await.unwrap();
        assert_eq!(all.len(), 2);
        let empty = all.iter().find(|c| c.id == untouched).unwrap();
        assert_eq!(empty.completion_rate, 0.0);
        let busy = all.iter().find(|c| c.id == course_id).unwrap();
        assert_eq!(busy.completed_enrollments, 1);

        let stranger = student(&database, "D").await;
        assert!(matches!(
            completion_rate(&database, &stranger, course_id).await,
            Err(AppError::Permission(_))
        ));
    }
}
