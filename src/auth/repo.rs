use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User, UserPatch};
use crate::error::AuthError;

/// Persistence contract for user records. Email normalization is the
/// service layer's responsibility; the store only ever sees normalized
/// keys. Uniqueness of the email is the store's own guarantee.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;
    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>, AuthError>;
    async fn create(&self, candidate: NewUser) -> Result<User, AuthError>;
    async fn update(&self, id: Uuid, patch: UserPatch) -> Result<User, AuthError>;
}

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_db_err(e: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(ref db) = e {
        // unique_violation on the email (or google_id) index
        if db.code().as_deref() == Some("23505") {
            return AuthError::DuplicateIdentity;
        }
    }
    AuthError::Store(e.into())
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, display_name, photo_url, google_id, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, display_name, photo_url, google_id, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(user)
    }

    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, display_name, photo_url, google_id, created_at
            FROM users
            WHERE google_id = $1
            "#,
        )
        .bind(google_id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(user)
    }

    async fn create(&self, candidate: NewUser) -> Result<User, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, display_name, photo_url, google_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, password_hash, display_name, photo_url, google_id, created_at
            "#,
        )
        .bind(&candidate.email)
        .bind(&candidate.password_hash)
        .bind(&candidate.display_name)
        .bind(&candidate.photo_url)
        .bind(&candidate.google_id)
        .fetch_one(&self.db)
        .await
        .map_err(map_db_err)?;
        Ok(user)
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> Result<User, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET display_name  = COALESCE($2, display_name),
                photo_url     = COALESCE($3, photo_url),
                password_hash = COALESCE($4, password_hash),
                google_id     = COALESCE($5, google_id)
            WHERE id = $1
            RETURNING id, email, password_hash, display_name, photo_url, google_id, created_at
            "#,
        )
        .bind(id)
        .bind(&patch.display_name)
        .bind(&patch.photo_url)
        .bind(&patch.password_hash)
        .bind(&patch.google_id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_err)?;
        user.ok_or_else(|| AuthError::Internal(anyhow::anyhow!("update of unknown user {id}")))
    }
}

/// In-memory store backing `AppState::fake()` and unit tests. Mirrors the
/// Postgres semantics that matter to callers: unique email, patch fields
/// applied only when present.
#[derive(Default)]
pub struct MemoryUserStore {
    rows: Mutex<Vec<User>>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let rows = self.rows.lock().expect("user store mutex poisoned");
        Ok(rows.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let rows = self.rows.lock().expect("user store mutex poisoned");
        Ok(rows.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>, AuthError> {
        let rows = self.rows.lock().expect("user store mutex poisoned");
        Ok(rows
            .iter()
            .find(|u| u.google_id.as_deref() == Some(google_id))
            .cloned())
    }

    async fn create(&self, candidate: NewUser) -> Result<User, AuthError> {
        let mut rows = self.rows.lock().expect("user store mutex poisoned");
        if rows.iter().any(|u| u.email == candidate.email) {
            return Err(AuthError::DuplicateIdentity);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: candidate.email,
            password_hash: candidate.password_hash,
            display_name: candidate.display_name,
            photo_url: candidate.photo_url,
            google_id: candidate.google_id,
            created_at: OffsetDateTime::now_utc(),
        };
        rows.push(user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> Result<User, AuthError> {
        let mut rows = self.rows.lock().expect("user store mutex poisoned");
        let user = rows
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("update of unknown user {id}")))?;
        if let Some(name) = patch.display_name {
            user.display_name = name;
        }
        if let Some(url) = patch.photo_url {
            user.photo_url = Some(url);
        }
        if let Some(hash) = patch.password_hash {
            user.password_hash = Some(hash);
        }
        if let Some(gid) = patch.google_id {
            user.google_id = Some(gid);
        }
        Ok(user.clone())
    }
}
