use crate::database::error::DatabaseError;
use crate::database::models::NotificationTarget;
use crate::database::repository::UserDirectory;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct UserContactRow {
    id: Uuid,
    name: String,
    email: Option<String>,
    phone: Option<String>,
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn notification_target(
        &self,
        user_id: Uuid,
    ) -> Result<Option<NotificationTarget>, DatabaseError> {
        let row = sqlx::query_as::<_, UserContactRow>(
            "SELECT id, name, email, phone FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|row| NotificationTarget {
            user_id: row.id,
            name: row.name,
            email: row.email.filter(|e| !e.trim().is_empty()),
            phone: row.phone.filter(|p| !p.trim().is_empty()),
        }))
    }
}
