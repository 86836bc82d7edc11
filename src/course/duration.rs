//! Course duration is a display string built from the lesson durations.
//!
//! Durations are free text ("15 minutes", "1h") and are never parsed, so the
//! result is a readable concatenation like `"10m + 15m + 1h"`, not a sum.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::AppResult;

pub const SEPARATOR: &str = " + ";

/// Joins the stored strings as they are, skipping missing and empty ones.
pub fn join_durations<I, S>(durations: I) -> String
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for duration in durations.into_iter().flatten() {
        let duration = duration.as_ref();
        if duration.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push_str(SEPARATOR);
        }
        joined.push_str(duration);
    }
    joined
}

/// Rebuilds and stores `courses.duration` from the course's lessons in display order.
pub async fn recompute_duration(conn: &mut SqliteConnection, course_id: i64) -> AppResult<String> {
    let durations = sqlx::query_scalar::<_, Option<String>>(
        "SELECT duration FROM lessons WHERE course_id = ? ORDER BY position, id",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;
    let duration = join_durations(durations);
    sqlx::query("UPDATE courses SET duration = ? WHERE id = ?")
        .bind(&duration)
        .bind(course_id)
        .execute(&mut *conn)
        .await?;
    debug!("course {} duration = {:?}", course_id, duration);
    Ok(duration)
}

/// Recomputes every course; returns how many were touched.
pub async fn recompute_all(database: &SqlitePool) -> AppResult<usize> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM courses ORDER BY id")
        .fetch_all(database)
        .await?;
    let mut tx = database.begin().await?;
    for id in &ids {
        recompute_duration(&mut tx, *id).await?;
    }
    tx.commit().await?;
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        course::lesson::{LessonStore, NewLesson},
        media::MediaStore,
        test_utils::{empty_course, instructor, test_pool},
    };

    #[test]
    fn joins_non_empty() {
        let d = join_durations([Some("10m"), None, Some(""), Some("1h")]);
        assert_eq!(d, "10m + 1h");
        // stored text is kept verbatim
        let d = join_durations([Some(" 15 minutes"), Some("  "), Some("1h ")]);
        assert_eq!(d, " 15 minutes +    + 1h ");
        assert_eq!(join_durations(Vec::<Option<&str>>::new()), "");
    }

    #[tokio::test]
    async fn recompute_is_idempotent() {
        let (dir, database) = test_pool().await;
        let owner = instructor(&database).await;
        let course_id = empty_course(&database, &owner).await;
        let store = LessonStore::new(database.clone(), MediaStore::new(dir.path()));
        for (title, duration) in [("A", "15 minutes"), ("B", ""), ("C", "1h")] {
            let lesson = NewLesson {
                title: title.to_string(),
                duration: Some(duration.to_string()),
                ..Default::default()
            };
            store
                .add_lesson(&owner, course_id, lesson, Default::default())
                .await
                .unwrap();
        }
        let mut conn = database.acquire().await.unwrap();
        let first = recompute_duration(&mut conn, course_id).await.unwrap();
        let second = recompute_duration(&mut conn, course_id).await.unwrap();
        assert_eq!(first, "15 minutes + 1h");
        assert_eq!(first, second);
    }
}
