use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::dto::UpdateProfileRequest;
use crate::auth::jwt::JwtKeys;
use crate::auth::password;
use crate::auth::repo_types::{NewUser, User, UserPatch};
use crate::error::AuthError;
use crate::state::AppState;

pub const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// The store only ever sees this form; lookup and insert must agree on it.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

fn check_password_policy(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub async fn register(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<(String, User), AuthError> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::Validation(
            "email and password are required".into(),
        ));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "register rejected: malformed email");
        return Err(AuthError::Validation("invalid email".into()));
    }
    check_password_policy(password)?;

    // The store's unique index backstops this pre-check under races.
    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "register rejected: email already taken");
        return Err(AuthError::DuplicateIdentity);
    }

    let password_hash = password::hash_password(password)?;
    let user = state
        .users
        .create(NewUser {
            display_name: display_name_from_email(&email),
            email,
            password_hash: Some(password_hash),
            photo_url: None,
            google_id: None,
        })
        .await?;

    let token = JwtKeys::from_ref(state).sign(&user)?;
    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((token, user))
}

pub async fn login_local(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<(String, User), AuthError> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::Validation(
            "email and password are required".into(),
        ));
    }

    // Unknown email, federated-only account and wrong password all collapse
    // into the same InvalidCredentials.
    let user = match state.users.find_by_email(&email).await? {
        Some(u) => u,
        None => {
            warn!(email = %email, "login for unknown email");
            return Err(AuthError::InvalidCredentials);
        }
    };
    let Some(digest) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, "local login against password-less account");
        return Err(AuthError::InvalidCredentials);
    };
    if !password::verify_password(password, digest)? {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    let token = JwtKeys::from_ref(state).sign(&user)?;
    info!(user_id = %user.id, "user logged in");
    Ok((token, user))
}

pub async fn login_google(state: &AppState, id_token: &str) -> Result<(String, User), AuthError> {
    if id_token.trim().is_empty() {
        return Err(AuthError::Validation("id_token is required".into()));
    }

    let profile = state.google.verify(id_token).await?;
    let email = normalize_email(&profile.email);

    let user = match state.users.find_by_google_id(&profile.subject).await? {
        Some(u) => u,
        None => match state.users.find_by_email(&email).await? {
            // Known local account: link the Google subject to it.
            Some(existing) => {
                info!(user_id = %existing.id, "linking google identity to existing account");
                state
                    .users
                    .update(
                        existing.id,
                        UserPatch {
                            google_id: Some(profile.subject.clone()),
                            photo_url: profile.photo_url.clone(),
                            ..UserPatch::default()
                        },
                    )
                    .await?
            }
            None => {
                let user = state
                    .users
                    .create(NewUser {
                        display_name: profile
                            .name
                            .clone()
                            .unwrap_or_else(|| display_name_from_email(&email)),
                        email,
                        password_hash: None,
                        photo_url: profile.photo_url.clone(),
                        google_id: Some(profile.subject.clone()),
                    })
                    .await?;
                info!(user_id = %user.id, "user created from google identity");
                user
            }
        },
    };

    let token = JwtKeys::from_ref(state).sign(&user)?;
    info!(user_id = %user.id, "user logged in via google");
    Ok((token, user))
}

pub async fn update_profile(
    state: &AppState,
    user_id: Uuid,
    req: UpdateProfileRequest,
) -> Result<User, AuthError> {
    // Hash only when the update actually carries a new plaintext; profile
    // edits must not touch the stored digest.
    let password_hash = match req.password.as_deref() {
        Some(plain) => {
            check_password_policy(plain)?;
            Some(password::hash_password(plain)?)
        }
        None => None,
    };

    let user = state
        .users
        .update(
            user_id,
            UserPatch {
                display_name: req.display_name,
                photo_url: req.photo_url,
                password_hash,
                google_id: None,
            },
        )
        .await?;
    info!(user_id = %user.id, "profile updated");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::google::{FederatedProfile, IdentityVerifier};
    use crate::state::AppState;
    use axum::async_trait;
    use std::sync::Arc;

    const GOOD_ASSERTION: &str = "good-assertion";

    struct StubVerifier(FederatedProfile);

    #[async_trait]
    impl IdentityVerifier for StubVerifier {
        async fn verify(&self, id_token: &str) -> Result<FederatedProfile, AuthError> {
            if id_token == GOOD_ASSERTION {
                Ok(self.0.clone())
            } else {
                Err(AuthError::InvalidAssertion)
            }
        }
    }

    fn google_profile() -> FederatedProfile {
        FederatedProfile {
            subject: "google-subject-1".into(),
            email: "Fed@Example.com".into(),
            name: Some("Fed Erated".into()),
            photo_url: Some("https://lh3.example/photo.jpg".into()),
        }
    }

    fn state_with_google() -> AppState {
        let mut state = AppState::fake();
        state.google = Arc::new(StubVerifier(google_profile()));
        state
    }

    #[tokio::test]
    async fn register_then_login_roundtrip() {
        let state = AppState::fake();
        let (token, user) = register(&state, " A@B.com ", "secret")
            .await
            .expect("register");
        assert_eq!(user.email, "a@b.com");

        let claims = JwtKeys::from_ref(&state).verify(&token).expect("claims");
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(claims.sub, user.id);

        let (_, logged_in) = login_local(&state, "a@b.com", "secret")
            .await
            .expect("login");
        assert_eq!(logged_in.id, user.id);
    }

    #[tokio::test]
    async fn register_derives_display_name_from_local_part() {
        let state = AppState::fake();
        let (_, user) = register(&state, "a@b.com", "secret").await.expect("register");
        assert_eq!(user.display_name, "a");
    }

    #[tokio::test]
    async fn register_rejects_duplicate_differing_only_in_case_and_whitespace() {
        let state = AppState::fake();
        register(&state, "a@b.com", "secret").await.expect("first");
        let err = register(&state, "  A@B.COM ", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicateIdentity));
    }

    #[tokio::test]
    async fn register_rejects_missing_and_malformed_input() {
        let state = AppState::fake();
        assert!(matches!(
            register(&state, "", "secret").await.unwrap_err(),
            AuthError::Validation(_)
        ));
        assert!(matches!(
            register(&state, "a@b.com", "").await.unwrap_err(),
            AuthError::Validation(_)
        ));
        assert!(matches!(
            register(&state, "not-an-email", "secret").await.unwrap_err(),
            AuthError::Validation(_)
        ));
        assert!(matches!(
            register(&state, "a@b.com", "short").await.unwrap_err(),
            AuthError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_are_indistinguishable() {
        let state = AppState::fake();
        register(&state, "a@b.com", "secret").await.expect("register");

        let wrong = login_local(&state, "a@b.com", "wrong!").await.unwrap_err();
        let unknown = login_local(&state, "nobody@b.com", "secret")
            .await
            .unwrap_err();

        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.status(), unknown.status());
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn google_login_creates_account_then_finds_it_by_subject() {
        let state = state_with_google();

        let (_, created) = login_google(&state, GOOD_ASSERTION).await.expect("first");
        assert_eq!(created.email, "fed@example.com");
        assert_eq!(created.display_name, "Fed Erated");
        assert_eq!(created.google_id.as_deref(), Some("google-subject-1"));
        assert_eq!(
            created.photo_url.as_deref(),
            Some("https://lh3.example/photo.jpg")
        );
        assert!(created.password_hash.is_none());

        let (_, found) = login_google(&state, GOOD_ASSERTION).await.expect("second");
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn google_login_links_existing_local_account_by_email() {
        let state = state_with_google();
        let (_, local) = register(&state, "fed@example.com", "secret")
            .await
            .expect("register");

        let (_, linked) = login_google(&state, GOOD_ASSERTION).await.expect("link");
        assert_eq!(linked.id, local.id);
        assert_eq!(linked.google_id.as_deref(), Some("google-subject-1"));
        // linking must not destroy the local credential
        assert!(linked.password_hash.is_some());

        login_local(&state, "fed@example.com", "secret")
            .await
            .expect("local login still works");
    }

    #[tokio::test]
    async fn federated_only_account_rejects_local_login() {
        let state = state_with_google();
        login_google(&state, GOOD_ASSERTION).await.expect("create");

        let err = login_local(&state, "fed@example.com", "secret")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn google_login_rejects_bad_assertion() {
        let state = state_with_google();
        let err = login_google(&state, "forged").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidAssertion));

        let err = login_google(&state, "  ").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn profile_update_without_password_keeps_digest() {
        let state = AppState::fake();
        let (_, user) = register(&state, "a@b.com", "secret").await.expect("register");
        let before = user.password_hash.clone().expect("digest");

        let updated = update_profile(
            &state,
            user.id,
            UpdateProfileRequest {
                display_name: Some("Renamed".into()),
                ..UpdateProfileRequest::default()
            },
        )
        .await
        .expect("update");

        assert_eq!(updated.display_name, "Renamed");
        assert_eq!(updated.password_hash.as_deref(), Some(before.as_str()));
    }

    #[tokio::test]
    async fn profile_update_with_password_rehashes() {
        let state = AppState::fake();
        let (_, user) = register(&state, "a@b.com", "secret").await.expect("register");
        let before = user.password_hash.clone().expect("digest");

        let updated = update_profile(
            &state,
            user.id,
            UpdateProfileRequest {
                password: Some("brand-new".into()),
                ..UpdateProfileRequest::default()
            },
        )
        .await
        .expect("update");

        let after = updated.password_hash.expect("digest");
        assert_ne!(after, before);
        assert!(password::verify_password("brand-new", &after).expect("verify"));

        login_local(&state, "a@b.com", "brand-new")
            .await
            .expect("login with new password");
        assert!(matches!(
            login_local(&state, "a@b.com", "secret").await.unwrap_err(),
            AuthError::InvalidCredentials
        ));
    }

    #[tokio::test]
    async fn profile_update_rejects_short_password() {
        let state = AppState::fake();
        let (_, user) = register(&state, "a@b.com", "secret").await.expect("register");

        let err = update_profile(
            &state,
            user.id,
            UpdateProfileRequest {
                password: Some("tiny".into()),
                ..UpdateProfileRequest::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }
}
