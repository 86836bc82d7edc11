use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use utoipa::ToSchema;

use super::{duration::recompute_duration, ensure_owner, fetch_course};
use crate::{
    enrollment::progress::refresh_course_progress,
    error::{AppError, AppResult},
    media::{MediaStore, Upload},
    user::Actor,
};

const LESSON_FOLDER: &str = "lessons";
const LESSON_COLUMNS: &str =
    "id, course_id, title, content, video_url, attachment_url, duration, position";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub attachment_url: Option<String>,
    pub duration: Option<String>,
    /// Position within the course, starting at 1
    #[serde(rename = "order")]
    pub position: i64,
}

impl Lesson {
    pub fn media_urls(&self) -> Vec<String> {
        self.video_url
            .iter()
            .chain(self.attachment_url.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewLesson {
    #[serde(default)]
    pub title: String,
    pub content: Option<String>,
    /// Only ever set from a stored upload
    #[serde(skip)]
    pub video_url: Option<String>,
    #[serde(skip)]
    pub attachment_url: Option<String>,
    pub duration: Option<String>,
    /// Appended after the last lesson when omitted
    pub order: Option<i64>,
}

impl NewLesson {
    pub fn validate(&self) -> AppResult<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::validation("Lesson must have a title"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LessonUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub duration: Option<String>,
    pub order: Option<i64>,
}

impl LessonUpdate {
    pub fn validate(&self) -> AppResult<()> {
        if matches!(&self.title, Some(t) if t.trim().is_empty()) {
            return Err(AppError::validation("Lesson title cannot be empty"));
        }
        if matches!(self.order, Some(o) if o < 1) {
            return Err(AppError::validation("Lesson order must be at least 1"));
        }
        Ok(())
    }
}

/// Files attached to a lesson form.
#[derive(Debug, Default, Clone)]
pub struct LessonMedia {
    pub video: Option<Upload>,
    pub attachment: Option<Upload>,
}

impl LessonMedia {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(video) = &self.video {
            video.ensure_kind(mime::VIDEO, "lesson videos")?;
        }
        Ok(())
    }
}

pub async fn fetch_lesson(conn: &mut SqliteConnection, lesson_id: i64) -> AppResult<Lesson> {
    sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {} FROM lessons WHERE id = ?",
        LESSON_COLUMNS
    ))
    .bind(lesson_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("Lesson"))
}

/// Lessons of a course in display order.
pub async fn course_lessons(conn: &mut SqliteConnection, course_id: i64) -> AppResult<Vec<Lesson>> {
    let lessons = sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {} FROM lessons WHERE course_id = ? ORDER BY position, id",
        LESSON_COLUMNS
    ))
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(lessons)
}

/// Inserts one lesson. Without an explicit positive order the lesson takes
/// `fallback`, or `max(position) + 1` when that is also absent.
pub async fn insert_lesson(
    conn: &mut SqliteConnection,
    course_id: i64,
    lesson: &NewLesson,
    fallback: Option<i64>,
) -> AppResult<Lesson> {
    let position = lesson.order.filter(|o| *o > 0).or(fallback);
    let lesson = sqlx::query_as::<_, Lesson>(&format!(
        r#"INSERT INTO lessons (course_id, title, content, video_url, attachment_url, duration, position)
        VALUES (?, ?, ?, ?, ?, ?,
            COALESCE(?, (SELECT COALESCE(MAX(position), 0) + 1 FROM lessons WHERE course_id = ?)))
        RETURNING {}"#,
        LESSON_COLUMNS
    ))
    .bind(course_id)
    .bind(lesson.title.trim())
    .bind(&lesson.content)
    .bind(&lesson.video_url)
    .bind(&lesson.attachment_url)
    .bind(&lesson.duration)
    .bind(position)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(lesson)
}

/// Ordered lessons per course. Every mutation recomputes the course duration
/// in the same transaction.
#[derive(Debug, Clone)]
pub struct LessonStore {
    database: SqlitePool,
    media: MediaStore,
}

impl LessonStore {
    pub fn new(database: SqlitePool, media: MediaStore) -> Self {
        Self { database, media }
    }

    pub async fn list_lessons(&self, course_id: i64) -> AppResult<Vec<Lesson>> {
        let mut conn = self.database.acquire().await?;
        fetch_course(&mut conn, course_id).await?;
        course_lessons(&mut conn, course_id).await
    }

    pub async fn add_lesson(
        &self,
        actor: &Actor,
        course_id: i64,
        mut lesson: NewLesson,
        media: LessonMedia,
    ) -> AppResult<Lesson> {
        lesson.validate()?;
        media.validate()?;
        {
            let mut conn = self.database.acquire().await?;
            ensure_owner(&mut conn, actor, course_id).await?;
        }
        let (video, attachment) = self.save_media(&media).await?;
        let saved: Vec<String> = video.iter().chain(attachment.iter()).cloned().collect();
        if video.is_some() {
            lesson.video_url = video;
        }
        if attachment.is_some() {
            lesson.attachment_url = attachment;
        }
        match self.insert_and_recompute(course_id, &lesson).await {
            Ok(lesson) => {
                info!(
                    "added lesson {} to course {} at position {}",
                    lesson.id, course_id, lesson.position
                );
                Ok(lesson)
            }
            Err(e) => {
                self.media.remove_detached(saved);
                Err(e)
            }
        }
    }

    async fn insert_and_recompute(&self, course_id: i64, lesson: &NewLesson) -> AppResult<Lesson> {
        let mut tx = self.database.begin().await?;
        let lesson = insert_lesson(&mut tx, course_id, lesson, None).await?;
        recompute_duration(&mut tx, course_id).await?;
        refresh_course_progress(&mut tx, course_id).await?;
        tx.commit().await?;
        Ok(lesson)
    }

    /// Assigns `position = index + 1` to each id, all or nothing.
    pub async fn reorder_lessons(
        &self,
        actor: &Actor,
        course_id: i64,
        lesson_ids: &[i64],
    ) -> AppResult<Vec<Lesson>> {
        if lesson_ids.is_empty() {
            return Err(AppError::validation("lessonIds must not be empty"));
        }
        let mut seen = HashSet::new();
        if !lesson_ids.iter().all(|id| seen.insert(*id)) {
            return Err(AppError::validation("Duplicate lesson IDs"));
        }
        let mut conn = self.database.acquire().await?;
        ensure_owner(&mut conn, actor, course_id).await?;
        let existing: HashSet<i64> =
            sqlx::query_scalar::<_, i64>("SELECT id FROM lessons WHERE course_id = ?")
                .bind(course_id)
                .fetch_all(&mut *conn)
                .await?
                .into_iter()
                .collect();
        drop(conn);
        if !lesson_ids.iter().all(|id| existing.contains(id)) {
            return Err(AppError::validation("Invalid lesson IDs"));
        }

        let mut tx = self.database.begin().await?;
        for (index, id) in lesson_ids.iter().enumerate() {
            let result =
                sqlx::query("UPDATE lessons SET position = ? WHERE id = ? AND course_id = ?")
                    .bind(index as i64 + 1)
                    .bind(id)
                    .bind(course_id)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() != 1 {
                // lesson vanished since validation; dropping tx rolls back
                return Err(AppError::validation("Invalid lesson IDs"));
            }
        }
        recompute_duration(&mut tx, course_id).await?;
        tx.commit().await?;
        info!("reordered {} lessons of course {}", lesson_ids.len(), course_id);

        let mut conn = self.database.acquire().await?;
        course_lessons(&mut conn, course_id).await
    }

    /// Updates fields and replaces media; replaced files are removed after commit.
    pub async fn update_lesson(
        &self,
        actor: &Actor,
        lesson_id: i64,
        update: LessonUpdate,
        media: LessonMedia,
    ) -> AppResult<Lesson> {
        update.validate()?;
        media.validate()?;
        let existing = {
            let mut conn = self.database.acquire().await?;
            let lesson = fetch_lesson(&mut conn, lesson_id).await?;
            ensure_owner(&mut conn, actor, lesson.course_id).await?;
            lesson
        };
        let (video, attachment) = self.save_media(&media).await?;
        let saved: Vec<String> = video.iter().chain(attachment.iter()).cloned().collect();
        match self
            .apply_update(&existing, &update, video.as_deref(), attachment.as_deref())
            .await
        {
            Ok(lesson) => {
                let mut stale = Vec::new();
                if video.is_some() {
                    stale.extend(existing.video_url);
                }
                if attachment.is_some() {
                    stale.extend(existing.attachment_url);
                }
                self.media.remove_detached(stale);
                Ok(lesson)
            }
            Err(e) => {
                self.media.remove_detached(saved);
                Err(e)
            }
        }
    }

    async fn apply_update(
        &self,
        existing: &Lesson,
        update: &LessonUpdate,
        video: Option<&str>,
        attachment: Option<&str>,
    ) -> AppResult<Lesson> {
        let mut tx = self.database.begin().await?;
        let lesson = sqlx::query_as::<_, Lesson>(&format!(
            r#"UPDATE lessons SET
                title = COALESCE(?, title),
                content = COALESCE(?, content),
                duration = COALESCE(?, duration),
                position = COALESCE(?, position),
                video_url = COALESCE(?, video_url),
                attachment_url = COALESCE(?, attachment_url)
            WHERE id = ?
            RETURNING {}"#,
            LESSON_COLUMNS
        ))
        .bind(update.title.as_deref().map(str::trim))
        .bind(&update.content)
        .bind(&update.duration)
        .bind(update.order)
        .bind(video)
        .bind(attachment)
        .bind(existing.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Lesson"))?;
        recompute_duration(&mut tx, lesson.course_id).await?;
        tx.commit().await?;
        Ok(lesson)
    }

    /// Removes the lesson; its media files are deleted in the background.
    pub async fn delete_lesson(&self, actor: &Actor, lesson_id: i64) -> AppResult<Lesson> {
        let lesson = {
            let mut conn = self.database.acquire().await?;
            let lesson = fetch_lesson(&mut conn, lesson_id).await?;
            ensure_owner(&mut conn, actor, lesson.course_id).await?;
            lesson
        };
        let mut tx = self.database.begin().await?;
        sqlx::query("DELETE FROM lessons WHERE id = ?")
            .bind(lesson_id)
            .execute(&mut *tx)
            .await?;
        recompute_duration(&mut tx, lesson.course_id).await?;
        refresh_course_progress(&mut tx, lesson.course_id).await?;
        tx.commit().await?;
        info!("deleted lesson {} of course {}", lesson_id, lesson.course_id);
        self.media.remove_detached(lesson.media_urls());
        Ok(lesson)
    }

    async fn save_media(&self, media: &LessonMedia) -> AppResult<(Option<String>, Option<String>)> {
        let video = match &media.video {
            Some(upload) => Some(self.media.save(LESSON_FOLDER, upload).await?),
            None => None,
        };
        let attachment = match &media.attachment {
            Some(upload) => match self.media.save(LESSON_FOLDER, upload).await {
                Ok(url) => Some(url),
                Err(e) => {
                    self.media.remove_detached(video.into_iter().collect());
                    return Err(e);
                }
            },
            None => None,
        };
        Ok((video, attachment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        course::get_course,
        test_utils::{empty_course, instructor, insert_user, test_pool},
        user::Role,
    };

    fn lesson(title: &str) -> NewLesson {
        NewLesson {
            title: title.to_string(),
            ..Default::default()
        }
    }

    async fn setup() -> (tempfile::TempDir, SqlitePool, LessonStore, Actor, i64) {
        let (dir, database) = test_pool().await;
        let store = LessonStore::new(database.clone(), MediaStore::new(dir.path().join("uploads")));
        let owner = instructor(&database).await;
        let course_id = empty_course(&database, &owner).await;
        (dir, database, store, owner, course_id)
    }

    async fn add(store: &LessonStore, owner: &Actor, course_id: i64, title: &str) -> Lesson {
        store
            .add_lesson(owner, course_id, lesson(title), LessonMedia::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn auto_order_appends() {
        let (_dir, _database, store, owner, course_id) = setup().await;
        let a = add(&store, &owner, course_id, "A").await;
        let b = add(&store, &owner, course_id, "B").await;
        assert_eq!((a.position, b.position), (1, 2));

        let explicit = NewLesson {
            order: Some(10),
            ..lesson("C")
        };
        let c = store
            .add_lesson(&owner, course_id, explicit, LessonMedia::default())
            .await
            .unwrap();
        assert_eq!(c.position, 10);
        let d = add(&store, &owner, course_id, "D").await;
        assert_eq!(d.position, 11);

        let zero = NewLesson {
            order: Some(0),
            ..lesson("E")
        };
        let e = store
            .add_lesson(&owner, course_id, zero, LessonMedia::default())
            .await
            .unwrap();
        assert_eq!(e.position, 12);
    }

    #[tokio::test]
    async fn add_lesson_errors() {
        let (_dir, database, store, owner, course_id) = setup().await;
        assert!(matches!(
            store
                .add_lesson(&owner, course_id, lesson("  "), LessonMedia::default())
                .await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            store
                .add_lesson(&owner, 999, lesson("A"), LessonMedia::default())
                .await,
            Err(AppError::NotFound(_))
        ));
        let other = insert_user(&database, "Other", Role::Instructor).await;
        assert!(matches!(
            store
                .add_lesson(&other, course_id, lesson("A"), LessonMedia::default())
                .await,
            Err(AppError::Permission(_))
        ));
    }

    #[tokio::test]
    async fn reorder_scenario() {
        let (_dir, database, store, owner, course_id) = setup().await;
        let a = add(&store, &owner, course_id, "A").await;
        let b = add(&store, &owner, course_id, "B").await;
        let c = add(&store, &owner, course_id, "C").await;

        let lessons = store
            .reorder_lessons(&owner, course_id, &[c.id, a.id, b.id])
            .await
            .unwrap();
        let order: Vec<(i64, i64)> = lessons.iter().map(|l| (l.id, l.position)).collect();
        assert_eq!(order, vec![(c.id, 1), (a.id, 2), (b.id, 3)]);

        let detail = get_course(&database, course_id).await.unwrap();
        let titles: Vec<&str> = detail.lessons.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, vec!["C", "A", "B"]);
    }

    #[tokio::test]
    async fn reorder_assigns_positions_for_any_permutation() {
        let (_dir, _database, store, owner, course_id) = setup().await;
        let mut ids = Vec::new();
        for title in ["A", "B", "C", "D", "E"] {
            ids.push(add(&store, &owner, course_id, title).await.id);
        }
        let original: HashSet<i64> = ids.iter().copied().collect();
        let mut permutations = vec![ids.iter().rev().copied().collect::<Vec<_>>()];
        for shift in 1..ids.len() {
            let mut p = ids.clone();
            p.rotate_left(shift);
            permutations.push(p);
        }
        let mut swapped = ids.clone();
        swapped.swap(0, 3);
        permutations.push(swapped);

        for permutation in permutations {
            let lessons = store
                .reorder_lessons(&owner, course_id, &permutation)
                .await
                .unwrap();
            let now: HashSet<i64> = lessons.iter().map(|l| l.id).collect();
            assert_eq!(now, original);
            for (index, id) in permutation.iter().enumerate() {
                let lesson = lessons.iter().find(|l| l.id == *id).unwrap();
                assert_eq!(lesson.position, index as i64 + 1);
            }
        }
    }

    #[tokio::test]
    async fn reorder_rejects_foreign_and_duplicate_ids() {
        let (_dir, database, store, owner, course_id) = setup().await;
        let a = add(&store, &owner, course_id, "A").await;
        let b = add(&store, &owner, course_id, "B").await;
        let other_course = empty_course(&database, &owner).await;
        let foreign = add(&store, &owner, other_course, "X").await;

        assert!(matches!(
            store
                .reorder_lessons(&owner, course_id, &[b.id, foreign.id])
                .await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            store.reorder_lessons(&owner, course_id, &[a.id, a.id]).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            store.reorder_lessons(&owner, course_id, &[]).await,
            Err(AppError::Validation(_))
        ));
        let stranger = insert_user(&database, "Stranger", Role::Instructor).await;
        assert!(matches!(
            store.reorder_lessons(&stranger, course_id, &[b.id, a.id]).await,
            Err(AppError::Permission(_))
        ));
        // failed calls left the order alone
        let lessons = store.list_lessons(course_id).await.unwrap();
        assert_eq!(
            lessons.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![a.id, b.id]
        );
    }

    #[tokio::test]
    async fn reorder_changes_duration_order() {
        let (_dir, database, store, owner, course_id) = setup().await;
        let a = store
            .add_lesson(
                &owner,
                course_id,
                NewLesson {
                    duration: Some("10m".into()),
                    ..lesson("A")
                },
                LessonMedia::default(),
            )
            .await
            .unwrap();
        let b = store
            .add_lesson(
                &owner,
                course_id,
                NewLesson {
                    duration: Some("1h".into()),
                    ..lesson("B")
                },
                LessonMedia::default(),
            )
            .await
            .unwrap();
        assert_eq!(get_course(&database, course_id).await.unwrap().course.duration, "10m + 1h");
        store
            .reorder_lessons(&owner, course_id, &[b.id, a.id])
            .await
            .unwrap();
        assert_eq!(get_course(&database, course_id).await.unwrap().course.duration, "1h + 10m");
    }

    #[tokio::test]
    async fn delete_removes_media_and_recomputes() {
        let (_dir, database, store, owner, course_id) = setup().await;
        let media = LessonMedia {
            video: Some(Upload {
                file_name: Some("intro.mp4".into()),
                content_type: Some("video/mp4".into()),
                data: b"fake video".to_vec(),
            }),
            attachment: Some(Upload {
                file_name: Some("notes.pdf".into()),
                content_type: Some("application/pdf".into()),
                data: b"%PDF-1.4".to_vec(),
            }),
        };
        let with_media = store
            .add_lesson(
                &owner,
                course_id,
                NewLesson {
                    duration: Some("15 minutes".into()),
                    ..lesson("Intro")
                },
                media,
            )
            .await
            .unwrap();
        let video_path = store.media.local_path(with_media.video_url.as_ref().unwrap()).unwrap();
        let attachment_path = store
            .media
            .local_path(with_media.attachment_url.as_ref().unwrap())
            .unwrap();
        assert!(video_path.exists() && attachment_path.exists());

        let stranger = insert_user(&database, "Stranger", Role::Instructor).await;
        assert!(matches!(
            store.delete_lesson(&stranger, with_media.id).await,
            Err(AppError::Permission(_))
        ));

        store.delete_lesson(&owner, with_media.id).await.unwrap();
        assert!(matches!(
            store.delete_lesson(&owner, with_media.id).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(get_course(&database, course_id).await.unwrap().course.duration, "");
        // cleanup is detached; give it a moment
        for _ in 0..50 {
            if !video_path.exists() && !attachment_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!video_path.exists());
        assert!(!attachment_path.exists());
    }

    #[tokio::test]
    async fn update_replaces_video() {
        let (_dir, _database, store, owner, course_id) = setup().await;
        let video = |name: &str| Upload {
            file_name: Some(name.to_string()),
            content_type: Some("video/mp4".into()),
            data: b"frames".to_vec(),
        };
        let first = store
            .add_lesson(
                &owner,
                course_id,
                lesson("A"),
                LessonMedia {
                    video: Some(video("v1.mp4")),
                    attachment: None,
                },
            )
            .await
            .unwrap();
        let old_path = store.media.local_path(first.video_url.as_ref().unwrap()).unwrap();

        let update = LessonUpdate {
            title: Some("A, revised".into()),
            ..Default::default()
        };
        let updated = store
            .update_lesson(
                &owner,
                first.id,
                update,
                LessonMedia {
                    video: Some(video("v2.mp4")),
                    attachment: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "A, revised");
        assert_ne!(updated.video_url, first.video_url);
        assert_eq!(updated.position, first.position);
        for _ in 0..50 {
            if !old_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!old_path.exists());

        let not_video = LessonMedia {
            video: Some(Upload {
                file_name: Some("x.png".into()),
                content_type: Some("image/png".into()),
                data: vec![1],
            }),
            attachment: None,
        };
        assert!(matches!(
            store
                .update_lesson(&owner, first.id, LessonUpdate::default(), not_video)
                .await,
            Err(AppError::Validation(_))
        ));
    }
}
