use std::{sync::Arc, time::Duration};

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};
use utoipa::ToSchema;

use super::find_enrollment;
use crate::{
    course::ensure_owner,
    error::{AppError, AppResult},
    user::{Actor, Role},
    utils::{now, percentage},
};

/// Result of completing a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub progress: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub completed: Option<bool>,
    /// 0 to 100
    pub score: Option<f64>,
}

impl ProgressUpdate {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(score) = self.score {
            if !score.is_finite() || !(0.0..=100.0).contains(&score) {
                return Err(AppError::validation("Score must be between 0 and 100"));
            }
        }
        Ok(())
    }
}

/// Progress of one student in one course. `progress` and `completed` always
/// come from lesson completions; `score` and `reportedCompleted` are what the
/// client last reported.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub student_id: i64,
    pub student_name: String,
    pub course_id: i64,
    pub course_title: String,
    pub progress: i64,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub certificate_url: Option<String>,
    pub score: Option<f64>,
    pub reported_completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

const PROGRESS_SELECT: &str = r#"
    SELECT e.student_id, u.name AS student_name, e.course_id, c.title AS course_title,
           e.progress, e.progress >= 100 AS completed, e.completed_at,
           e.certificate_url, p.score,
           COALESCE(p.reported_completed, 0) AS reported_completed, p.updated_at
    FROM enrollments e
    JOIN users u ON u.id = e.student_id
    JOIN courses c ON c.id = e.course_id
    LEFT JOIN progress p ON p.student_id = e.student_id AND p.course_id = e.course_id
"#;

/// Recomputes and stores the percentage of one enrollment. `completed_at` is
/// set the first time it reaches 100 and kept afterwards.
pub async fn recompute_progress(
    conn: &mut SqliteConnection,
    enrollment_id: i64,
    course_id: i64,
) -> AppResult<LessonProgress> {
    let (done, total) = sqlx::query_as::<_, (i64, i64)>(
        r#"SELECT
            (SELECT COUNT(*) FROM lesson_completions lc
                JOIN lessons l ON l.id = lc.lesson_id
                WHERE lc.enrollment_id = ? AND l.course_id = ?),
            (SELECT COUNT(*) FROM lessons WHERE course_id = ?)"#,
    )
    .bind(enrollment_id)
    .bind(course_id)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;
    let progress = percentage(done, total);
    let (progress, completed_at) = sqlx::query_as::<_, (i64, Option<OffsetDateTime>)>(
        r#"UPDATE enrollments SET
            progress = ?,
            completed_at = CASE WHEN completed_at IS NULL AND ? >= 100 THEN ? ELSE completed_at END
        WHERE id = ?
        RETURNING progress, completed_at"#,
    )
    .bind(progress)
    .bind(progress)
    .bind(now())
    .bind(enrollment_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("Enrollment"))?;
    debug!(
        "enrollment {}: {}/{} lessons, {}%",
        enrollment_id, done, total, progress
    );
    Ok(LessonProgress {
        progress,
        completed_at,
    })
}

/// Brings every enrollment of a course in line with its current lesson set.
pub async fn refresh_course_progress(conn: &mut SqliteConnection, course_id: i64) -> AppResult<()> {
    let enrollments = sqlx::query_scalar::<_, i64>("SELECT id FROM enrollments WHERE course_id = ?")
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?;
    for id in enrollments {
        recompute_progress(conn, id, course_id).await?;
    }
    Ok(())
}

/// Lesson completion per (student, course). Updates for the same pair are
/// serialized in process; each one runs in a single transaction.
#[derive(Debug)]
pub struct ProgressTracker {
    database: SqlitePool,
    /// Idle pairs are dropped after `LOCK_IDLE`
    locks: Cache<(i64, i64), Arc<Mutex<()>>>,
}

const LOCK_IDLE: Duration = Duration::from_secs(10 * 60);

impl ProgressTracker {
    pub fn new(database: SqlitePool) -> Self {
        Self::with_lock_idle(database, LOCK_IDLE)
    }

    pub fn with_lock_idle(database: SqlitePool, idle: Duration) -> Self {
        Self {
            database,
            locks: Cache::builder().time_to_idle(idle).build(),
        }
    }

    async fn lock_for(&self, student_id: i64, course_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .get_with((student_id, course_id), async { Arc::new(Mutex::new(())) })
            .await
    }

    pub async fn complete_lesson(
        &self,
        actor: &Actor,
        course_id: i64,
        lesson_id: i64,
    ) -> AppResult<LessonProgress> {
        actor.require(Role::Student)?;
        let lock = self.lock_for(actor.id, course_id).await;
        let _guard = lock.lock().await;

        let mut conn = self.database.acquire().await?;
        let enrollment = find_enrollment(&mut conn, actor.id, course_id).await?;
        let in_course = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM lessons WHERE id = ? AND course_id = ?",
        )
        .bind(lesson_id)
        .bind(course_id)
        .fetch_one(&mut *conn)
        .await?;
        if in_course == 0 {
            return Err(AppError::validation("Lesson does not belong to this course"));
        }
        drop(conn);

        let mut tx = self.database.begin().await?;
        sqlx::query(
            "INSERT OR IGNORE INTO lesson_completions (enrollment_id, lesson_id, completed_at) VALUES (?, ?, ?)",
        )
        .bind(enrollment.id)
        .bind(lesson_id)
        .bind(now())
        .execute(&mut *tx)
        .await?;
        let progress = recompute_progress(&mut tx, enrollment.id, course_id).await?;
        tx.commit().await?;
        info!(
            "student {} completed lesson {} of course {}: {}%",
            actor.id, lesson_id, course_id, progress.progress
        );
        Ok(progress)
    }

    /// Stores client-reported score and completion. The canonical percentage
    /// is not touched.
    pub async fn upsert_progress(
        &self,
        actor: &Actor,
        course_id: i64,
        update: ProgressUpdate,
    ) -> AppResult<ProgressView> {
        actor.require(Role::Student)?;
        update.validate()?;
        let lock = self.lock_for(actor.id, course_id).await;
        let _guard = lock.lock().await;

        let mut conn = self.database.acquire().await?;
        find_enrollment(&mut conn, actor.id, course_id).await?;
        sqlx::query(
            r#"INSERT INTO progress (student_id, course_id, score, reported_completed, updated_at)
            VALUES (?, ?, ?, COALESCE(?, 0), ?)
            ON CONFLICT (student_id, course_id) DO UPDATE SET
                score = COALESCE(excluded.score, progress.score),
                reported_completed = COALESCE(?, progress.reported_completed),
                updated_at = excluded.updated_at"#,
        )
        .bind(actor.id)
        .bind(course_id)
        .bind(update.score)
        .bind(update.completed)
        .bind(now())
        .bind(update.completed)
        .execute(&mut *conn)
        .await?;
        sqlx::query_as::<_, ProgressView>(&format!(
            "{} WHERE e.student_id = ? AND e.course_id = ?",
            PROGRESS_SELECT
        ))
        .bind(actor.id)
        .bind(course_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("Enrollment"))
    }

    pub async fn student_progress(&self, student_id: i64) -> AppResult<Vec<ProgressView>> {
        let views = sqlx::query_as::<_, ProgressView>(&format!(
            "{} WHERE e.student_id = ? ORDER BY e.enrolled_at DESC, e.id DESC",
            PROGRESS_SELECT
        ))
        .bind(student_id)
        .fetch_all(&self.database)
        .await?;
        Ok(views)
    }

    /// Owner only.
    pub async fn course_progress(&self, actor: &Actor, course_id: i64) -> AppResult<Vec<ProgressView>> {
        let mut conn = self.database.acquire().await?;
        ensure_owner(&mut conn, actor, course_id).await?;
        let views = sqlx::query_as::<_, ProgressView>(&format!(
            "{} WHERE e.course_id = ? ORDER BY e.enrolled_at, e.id",
            PROGRESS_SELECT
        ))
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        course::lesson::{Lesson, LessonMedia, LessonStore, NewLesson},
        enrollment::{EnrollmentState, enroll},
        media::MediaStore,
        test_utils::{empty_course, instructor, student, test_pool},
    };

    struct Fixture {
        _dir: tempfile::TempDir,
        database: SqlitePool,
        lessons: LessonStore,
        tracker: ProgressTracker,
        owner: Actor,
        course_id: i64,
    }

    async fn fixture() -> Fixture {
        let (dir, database) = test_pool().await;
        let lessons = LessonStore::new(database.clone(), MediaStore::new(dir.path().join("uploads")));
        let tracker = ProgressTracker::new(database.clone());
        let owner = instructor(&database).await;
        let course_id = empty_course(&database, &owner).await;
        Fixture {
            _dir: dir,
            database,
            lessons,
            tracker,
            owner,
            course_id,
        }
    }

    impl Fixture {
        async fn lesson(&self, title: &str) -> Lesson {
            let lesson = NewLesson {
                title: title.to_string(),
                ..Default::default()
            };
            self.lessons
                .add_lesson(&self.owner, self.course_id, lesson, LessonMedia::default())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn two_lessons() {
        let f = fixture().await;
        let first = f.lesson("Intro").await;
        let second = f.lesson("Outro").await;
        let learner = student(&f.database, "Test Student").await;
        enroll(&f.database, &learner, f.course_id).await.unwrap();

        let half = f
            .tracker
            .complete_lesson(&learner, f.course_id, first.id)
            .await
            .unwrap();
        assert_eq!(half.progress, 50);
        assert!(half.completed_at.is_none());

        // completing twice changes nothing
        let again = f
            .tracker
            .complete_lesson(&learner, f.course_id, first.id)
            .await
            .unwrap();
        assert_eq!(again, half);

        let full = f
            .tracker
            .complete_lesson(&learner, f.course_id, second.id)
            .await
            .unwrap();
        assert_eq!(full.progress, 100);
        let completed_at = full.completed_at.unwrap();

        let repeat = f
            .tracker
            .complete_lesson(&learner, f.course_id, second.id)
            .await
            .unwrap();
        assert_eq!(repeat.completed_at, Some(completed_at));

        let mut conn = f.database.acquire().await.unwrap();
        let enrollment = find_enrollment(&mut conn, learner.id, f.course_id).await.unwrap();
        assert_eq!(enrollment.state(), EnrollmentState::Completed);
    }

    #[tokio::test]
    async fn progress_never_drops_while_completing() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for i in 0..7 {
            ids.push(f.lesson(&format!("Lesson {}", i)).await.id);
        }
        let learner = student(&f.database, "Test Student").await;
        enroll(&f.database, &learner, f.course_id).await.unwrap();
        let mut last = 0;
        for (done, id) in ids.iter().enumerate() {
            let p = f
                .tracker
                .complete_lesson(&learner, f.course_id, *id)
                .await
                .unwrap();
            assert!(p.progress >= last);
            assert_eq!(p.progress, percentage(done as i64 + 1, 7));
            last = p.progress;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn complete_lesson_errors() {
        let f = fixture().await;
        let lesson = f.lesson("Intro").await;
        let learner = student(&f.database, "Test Student").await;
        assert!(matches!(
            f.tracker.complete_lesson(&learner, f.course_id, lesson.id).await,
            Err(AppError::NotFound(_))
        ));
        enroll(&f.database, &learner, f.course_id).await.unwrap();

        let other_course = empty_course(&f.database, &f.owner).await;
        let foreign = f
            .lessons
            .add_lesson(
                &f.owner,
                other_course,
                NewLesson {
                    title: "Elsewhere".into(),
                    ..Default::default()
                },
                LessonMedia::default(),
            )
            .await
            .unwrap();
        assert!(matches!(
            f.tracker.complete_lesson(&learner, f.course_id, foreign.id).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            f.tracker.complete_lesson(&f.owner, f.course_id, lesson.id).await,
            Err(AppError::Permission(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_completions_are_all_counted() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(f.lesson(&format!("Lesson {}", i)).await.id);
        }
        let learner = student(&f.database, "Test Student").await;
        enroll(&f.database, &learner, f.course_id).await.unwrap();

        let tracker = Arc::new(f.tracker);
        let mut handles = Vec::new();
        for id in ids {
            let tracker = tracker.clone();
            let course_id = f.course_id;
            handles.push(tokio::spawn(async move {
                tracker.complete_lesson(&learner, course_id, id).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let views = tracker.student_progress(learner.id).await.unwrap();
        assert_eq!(views[0].progress, 100);
        assert!(views[0].completed);
    }

    #[tokio::test]
    async fn idle_locks_are_dropped() {
        let f = fixture().await;
        let lesson = f.lesson("Intro").await;
        let tracker = ProgressTracker::with_lock_idle(f.database.clone(), Duration::from_millis(50));
        let learner = student(&f.database, "Test Student").await;
        // a failed call still takes a lock slot
        assert!(tracker.complete_lesson(&learner, f.course_id, lesson.id).await.is_err());
        enroll(&f.database, &learner, f.course_id).await.unwrap();
        tracker
            .complete_lesson(&learner, f.course_id, lesson.id)
            .await
            .unwrap();
        tracker.locks.run_pending_tasks().await;
        assert_eq!(tracker.locks.entry_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        tracker.locks.run_pending_tasks().await;
        assert_eq!(tracker.locks.entry_count(), 0);
    }

    #[tokio::test]
    async fn lesson_changes_refresh_progress() {
        let f = fixture().await;
        let first = f.lesson("One").await;
        let learner = student(&f.database, "Test Student").await;
        enroll(&f.database, &learner, f.course_id).await.unwrap();
        f.tracker
            .complete_lesson(&learner, f.course_id, first.id)
            .await
            .unwrap();

        let second = f.lesson("Two").await;
        let views = f.tracker.student_progress(learner.id).await.unwrap();
        assert_eq!(views[0].progress, 50);
        assert!(!views[0].completed);
        // the first completion time is kept
        let first_completed_at = views[0].completed_at;
        assert!(first_completed_at.is_some());

        f.lessons.delete_lesson(&f.owner, second.id).await.unwrap();
        let views = f.tracker.student_progress(learner.id).await.unwrap();
        assert_eq!(views[0].progress, 100);
        assert!(views[0].completed);
        assert_eq!(views[0].completed_at, first_completed_at);
    }

    #[tokio::test]
    async fn upsert_keeps_canonical_percentage() {
        let f = fixture().await;
        let first = f.lesson("One").await;
        f.lesson("Two").await;
        let learner = student(&f.database, "Test Student").await;
        let update = ProgressUpdate {
            completed: Some(true),
            score: Some(88.5),
        };
        assert!(matches!(
            f.tracker.upsert_progress(&learner, f.course_id, update.clone()).await,
            Err(AppError::NotFound(_))
        ));
        enroll(&f.database, &learner, f.course_id).await.unwrap();
        f.tracker
            .complete_lesson(&learner, f.course_id, first.id)
            .await
            .unwrap();

        let view = f
            .tracker
            .upsert_progress(&learner, f.course_id, update)
            .await
            .unwrap();
        assert_eq!(view.progress, 50);
        assert!(!view.completed);
        assert!(view.reported_completed);
        assert_eq!(view.score, Some(88.5));
        assert_eq!(view.student_name, "Test Student");

        // fields left out keep their previous value
        let view = f
            .tracker
            .upsert_progress(&learner, f.course_id, ProgressUpdate::default())
            .await
            .unwrap();
        assert_eq!(view.score, Some(88.5));
        assert!(view.reported_completed);

        for score in [f64::NAN, -1.0, 100.5] {
            let bad = ProgressUpdate {
                completed: None,
                score: Some(score),
            };
            assert!(matches!(
                f.tracker.upsert_progress(&learner, f.course_id, bad).await,
                Err(AppError::Validation(_))
            ));
        }

        let per_course = f.tracker.course_progress(&f.owner, f.course_id).await.unwrap();
        assert_eq!(per_course.len(), 1);
        assert_eq!(per_course[0].student_id, learner.id);
        assert!(matches!(
            f.tracker.course_progress(&learner, f.course_id).await,
            Err(AppError::Permission(_))
        ));
    }
}
