use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::{
    course::{NewCourse, create_course},
    db,
    user::{Actor, Role},
    utils::now,
};

/// Fresh migrated database in a temp dir; keep the dir alive for the test.
pub async fn test_pool() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let database = db::connect(dir.path().join("test.db")).await.unwrap();
    (dir, database)
}

/// Inserts a user directly, skipping password hashing.
pub async fn insert_user(database: &SqlitePool, name: &str, role: Role) -> Actor {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO users (name, email, password, role, created_at) VALUES (?, ?, 'x', ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(format!("{}@example.com", name.to_lowercase().replace(' ', ".")))
    .bind(role)
    .bind(now())
    .fetch_one(database)
    .await
    .unwrap();
    Actor { id, role }
}

pub async fn instructor(database: &SqlitePool) -> Actor {
    insert_user(database, "Test Instructor", Role::Instructor).await
}

pub async fn student(database: &SqlitePool, name: &str) -> Actor {
    insert_user(database, name, Role::Student).await
}

pub async fn empty_course(database: &SqlitePool, owner: &Actor) -> i64 {
    let course = NewCourse {
        title: "Web Development Intermediate".to_string(),
        ..Default::default()
    };
    create_course(database, owner, course).await.unwrap().course.id
}
