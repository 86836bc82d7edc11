use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult, conflict_on_unique};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

pub async fn list_categories(database: &SqlitePool) -> AppResult<Vec<Category>> {
    let categories =
        sqlx::query_as::<_, Category>("SELECT id, name, description FROM categories ORDER BY name")
            .fetch_all(database)
            .await?;
    Ok(categories)
}

pub async fn get_category(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<Category>> {
    let category =
        sqlx::query_as::<_, Category>("SELECT id, name, description FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(category)
}

/// Unknown category ids are a client mistake, not a missing resource.
pub async fn ensure_category(conn: &mut SqliteConnection, id: Option<i64>) -> AppResult<()> {
    if let Some(id) = id {
        if get_category(conn, id).await?.is_none() {
            return Err(AppError::validation(format!("Unknown category {}", id)));
        }
    }
    Ok(())
}

pub async fn create_category(
    database: &SqlitePool,
    name: &str,
    description: Option<&str>,
) -> AppResult<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("Category name is required"));
    }
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO categories (name, description) VALUES (?, ?) RETURNING id",
    )
    .bind(name)
    .bind(description)
    .fetch_one(database)
    .await
    .map_err(|e| conflict_on_unique(e, "Category already exists"))?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_pool;

    #[tokio::test]
    async fn seeded_and_unique() {
        let (_dir, database) = test_pool().await;
        let names: Vec<String> = list_categories(&database)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(
            names,
            ["Data Science", "Design", "Marketing", "Web Development"]
        );
        assert!(matches!(
            create_category(&database, "Design", None).await,
            Err(AppError::Conflict(_))
        ));
        let id = create_category(&database, "Music", Some("Courses about music"))
            .await
            .unwrap();
        let mut conn = database.acquire().await.unwrap();
        assert_eq!(get_category(&mut conn, id).await.unwrap().unwrap().name, "Music");
        assert!(ensure_category(&mut conn, Some(9999)).await.is_err());
        assert!(ensure_category(&mut conn, None).await.is_ok());
    }
}
