use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{descriptor::FaceDescriptor, error::FaceError, matcher::FaceRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The descriptor owner has no account (deleted after the token was issued).
    #[error("unknown user {0}")]
    UnknownUser(Uuid),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence seam for enrolled face descriptors.
#[async_trait]
pub trait FaceStore: Send + Sync {
    /// Store or replace the descriptor owned by `user_id`.
    async fn upsert(&self, user_id: Uuid, descriptor: &FaceDescriptor) -> Result<(), StoreError>;
    /// Remove the user's descriptor. Returns whether one existed.
    async fn remove(&self, user_id: Uuid) -> anyhow::Result<bool>;
    async fn is_enrolled(&self, user_id: Uuid) -> anyhow::Result<bool>;
    /// All enrolled descriptors, oldest enrollment first.
    async fn gallery(&self) -> anyhow::Result<Vec<FaceRecord>>;
}

#[derive(Debug, FromRow)]
struct FaceRow {
    user_id: Uuid,
    email: String,
    descriptor: Vec<Option<f32>>,
    enrolled_at: OffsetDateTime,
}

impl FaceRow {
    fn into_record(self) -> Result<FaceRecord, FaceError> {
        let values = self
            .descriptor
            .into_iter()
            .enumerate()
            .map(|(index, v)| v.ok_or(FaceError::NonFinite { index }))
            .collect::<Result<Vec<f32>, _>>()?;
        Ok(FaceRecord {
            user_id: self.user_id,
            email: self.email,
            descriptor: FaceDescriptor::new(values)?,
            enrolled_at: self.enrolled_at,
        })
    }
}

#[derive(Clone)]
pub struct PgFaceStore {
    db: PgPool,
}

impl PgFaceStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FaceStore for PgFaceStore {
    async fn upsert(&self, user_id: Uuid, descriptor: &FaceDescriptor) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            INSERT INTO face_descriptors (user_id, descriptor)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET descriptor = EXCLUDED.descriptor, enrolled_at = now()
            "#,
        )
        .bind(user_id)
        .bind(descriptor.as_slice().to_vec())
        .execute(&self.db)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StoreError::UnknownUser(user_id))
            }
            Err(e) => Err(anyhow::Error::new(e).context("upsert face descriptor").into()),
        }
    }

    async fn remove(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(r#"DELETE FROM face_descriptors WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&self.db)
            .await
            .context("delete face descriptor")?;
        Ok(res.rows_affected() > 0)
    }

    async fn is_enrolled(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let found = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM face_descriptors WHERE user_id = $1)"#,
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .context("check face enrollment")?;
        Ok(found)
    }

    async fn gallery(&self) -> anyhow::Result<Vec<FaceRecord>> {
        let rows = sqlx::query_as::<_, FaceRow>(
            r#"
            SELECT f.user_id, u.email, f.descriptor, f.enrolled_at
              FROM face_descriptors f
              JOIN users u ON u.id = f.user_id
             ORDER BY f.enrolled_at ASC, f.user_id ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("load face gallery")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let user_id = row.user_id;
            match row.into_record() {
                Ok(record) => out.push(record),
                Err(e) => warn!(%user_id, error = %e, "skipping invalid stored descriptor"),
            }
        }
        debug!(count = out.len(), "face gallery loaded");
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryFaceStore;
