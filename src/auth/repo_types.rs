use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                         // unique user ID
    pub email: String,                    // normalized (lowercased, trimmed), unique
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,    // Argon2 digest; absent for federated-only accounts
    pub display_name: String,             // defaults to the email local part
    pub photo_url: Option<String>,
    pub google_id: Option<String>,        // Google subject identifier
    pub created_at: OffsetDateTime,       // set once by the database
}

/// Candidate row for insertion. Email must already be normalized and at
/// least one of `password_hash`/`google_id` must be present.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub google_id: Option<String>,
}

/// Partial update. `None` fields are left untouched; `created_at` and
/// `email` are immutable.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
}

#[cfg(test)]
pub(crate) fn test_user(email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        password_hash: Some("$argon2id$fake".into()),
        display_name: email.split('@').next().unwrap_or(email).to_string(),
        photo_url: None,
        google_id: None,
        created_at: OffsetDateTime::now_utc(),
    }
}
