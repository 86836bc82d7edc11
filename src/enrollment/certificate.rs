use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use time::{OffsetDateTime, macros::format_description};
use tracing::info;

use super::find_enrollment;
use crate::{
    error::{AppError, AppResult},
    user::{Actor, Role},
};

/// Public URL prefix under which certificates are served.
pub const CERTIFICATES_PREFIX: &str = "/certificates";

#[derive(Debug, Clone)]
pub struct CertificateIssuer {
    database: SqlitePool,
    dir: PathBuf,
}

impl CertificateIssuer {
    pub fn new(database: SqlitePool, dir: impl AsRef<Path>) -> Self {
        Self {
            database,
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Issues the certificate for a completed enrollment. Once stored, the
    /// same locator is returned on every call.
    pub async fn generate_certificate(&self, actor: &Actor, course_id: i64) -> AppResult<String> {
        actor.require(Role::Student)?;
        let mut conn = self.database.acquire().await?;
        let enrollment = find_enrollment(&mut conn, actor.id, course_id).await?;
        if let Some(url) = enrollment.certificate_url {
            return Ok(url);
        }
        let Some(completed_at) = enrollment
            .completed_at
            .filter(|_| enrollment.is_complete())
        else {
            return Err(AppError::Precondition(
                "Course must be completed before a certificate can be issued".to_string(),
            ));
        };
        let (student_name, course_title) = sqlx::query_as::<_, (String, String)>(
            "SELECT u.name, c.title FROM users u, courses c WHERE u.id = ? AND c.id = ?",
        )
        .bind(actor.id)
        .bind(course_id)
        .fetch_one(&mut *conn)
        .await?;

        let file_name = format!("{}-{}.html", actor.id, course_id);
        let document = render_certificate(&student_name, &course_title, completed_at)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&file_name), document).await?;
        let url = format!("{}/{}", CERTIFICATES_PREFIX, file_name);

        // a concurrent call may have stored it first; keep whichever is there
        sqlx::query("UPDATE enrollments SET certificate_url = ? WHERE id = ? AND certificate_url IS NULL")
            .bind(&url)
            .bind(enrollment.id)
            .execute(&mut *conn)
            .await?;
        let stored = sqlx::query_scalar::<_, Option<String>>(
            "SELECT certificate_url FROM enrollments WHERE id = ?",
        )
        .bind(enrollment.id)
        .fetch_optional(&mut *conn)
        .await?
        .flatten()
        .ok_or(AppError::NotFound("Enrollment"))?;
        info!(
            "issued certificate {} to student {} for course {}",
            stored, actor.id, course_id
        );
        Ok(stored)
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn render_certificate(
    student_name: &str,
    course_title: &str,
    completed_at: OffsetDateTime,
) -> anyhow::Result<String> {
    let date = completed_at.format(format_description!("[month repr:long] [day padding:none], [year]"))?;
    let student_name = escape_html(student_name);
    let course_title = escape_html(course_title);
    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Certificate of Completion: {course_title}</title>
</head>
<body style="font-family: serif; text-align: center; padding: 4em;">
<h1>Certificate of Completion</h1>
<p>This certifies that</p>
<h2>{student_name}</h2>
<p>has completed the course</p>
<h2>{course_title}</h2>
<p>on {date}</p>
</body>
</html>
"#
    ))
}
