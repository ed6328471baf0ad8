//! Reference data: counties, districts and per-group case categories.

use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::services::member::{self, MemberError};
use crate::services::validation::{self, FieldError};

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("invalid input: {0}")]
    Invalid(#[from] FieldError),
    #[error(transparent)]
    Access(#[from] MemberError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct County {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct District {
    pub id: i32,
    pub county_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
}

pub const MAX_CATEGORY_LEN: usize = 50;

pub async fn list_counties(pool: &PgPool) -> Result<Vec<County>, ReferenceError> {
    Ok(sqlx::query_as::<_, County>("SELECT id, name FROM counties ORDER BY id")
        .fetch_all(pool)
        .await?)
}

pub async fn list_districts(pool: &PgPool, county_id: Option<i32>) -> Result<Vec<District>, ReferenceError> {
    let rows = sqlx::query_as::<_, District>(
        "SELECT id, county_id, name FROM districts
         WHERE $1::INTEGER IS NULL OR county_id = $1
         ORDER BY county_id, id",
    )
    .bind(county_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_categories(pool: &PgPool, group_id: Uuid, viewer_id: Uuid) -> Result<Vec<Category>, ReferenceError> {
    member::require_active_member(pool, group_id, viewer_id).await?;
    let rows = sqlx::query_as::<_, Category>("SELECT id, name FROM categories WHERE group_id = $1 ORDER BY name")
        .bind(group_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Create a category, or return the existing one with the same name.
///
/// # Errors
///
/// Returns a validation error for a blank or over-long name.
pub async fn create_category(
    pool: &PgPool,
    group_id: Uuid,
    actor_id: Uuid,
    name: &str,
) -> Result<Category, ReferenceError> {
    let name = validation::required("category", name, MAX_CATEGORY_LEN)?;
    member::require_active_member(pool, group_id, actor_id).await?;
    Ok(upsert_category(pool, group_id, &name).await?)
}

/// `INSERT ... ON CONFLICT` keyed by `(group_id, name)`.
///
/// The no-op `DO UPDATE` makes `RETURNING` yield the existing row on conflict.
pub(crate) async fn upsert_category<'e, E>(executor: E, group_id: Uuid, name: &str) -> Result<Category, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Category>(
        "INSERT INTO categories (group_id, name) VALUES ($1, $2)
         ON CONFLICT (group_id, name) DO UPDATE SET name = EXCLUDED.name
         RETURNING id, name",
    )
    .bind(group_id)
    .bind(name)
    .fetch_one(executor)
    .await
}

/// Whether a district id exists.
pub(crate) async fn district_exists<'e, E>(executor: E, district_id: i32) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM districts WHERE id = $1)")
        .bind(district_id)
        .fetch_one(executor)
        .await
}
