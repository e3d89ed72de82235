//! Device group model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use validator::Validate;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeviceGroup {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub device_id: Uuid,
}

impl DeviceGroup {
    pub async fn create(
        pool: &PgPool,
        data: &CreateGroupRequest,
        created_by: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, DeviceGroup>(
            r#"
            INSERT INTO device_groups (name, description, created_by)
            VALUES ($1, $2, $3)
            RETURNING *
            "#
        )
        .bind(&data.name)
        .bind(&data.description)
        .bind(created_by)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeviceGroup>("SELECT * FROM device_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeviceGroup>("SELECT * FROM device_groups ORDER BY name")
            .fetch_all(pool)
            .await
    }

    pub async fn add_member(pool: &PgPool, group_id: Uuid, device_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO device_group_members (group_id, device_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        )
        .bind(group_id)
        .bind(device_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn remove_member(pool: &PgPool, group_id: Uuid, device_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM device_group_members WHERE group_id = $1 AND device_id = $2"
        )
        .bind(group_id)
        .bind(device_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
