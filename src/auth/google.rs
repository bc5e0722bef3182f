use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::AuthError;

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const JWKS_CACHE_TTL: Duration = Duration::hours(1);
const FETCH_TIMEOUT_SECS: u64 = 10;

/// Profile asserted by a federated identity provider.
#[derive(Debug, Clone)]
pub struct FederatedProfile {
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
    pub photo_url: Option<String>,
}

/// Validates a third-party identity assertion and maps it to a profile.
/// Every failure mode (bad signature, wrong audience, expired assertion,
/// key fetch timeout) surfaces as `InvalidAssertion`.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<FederatedProfile, AuthError>;
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    email: String,
    name: Option<String>,
    picture: Option<String>,
}

/// Verifies Google-issued ID tokens against Google's published signing
/// keys. The JWKS document is cached with a TTL so steady-state logins do
/// not hit the network.
pub struct GoogleVerifier {
    client_id: String,
    http: reqwest::Client,
    keys: RwLock<Option<(JwkSet, OffsetDateTime)>>,
}

impl GoogleVerifier {
    pub fn new(client_id: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client_id: client_id.to_string(),
            http,
            keys: RwLock::new(None),
        })
    }

    async fn jwks(&self) -> Result<JwkSet, AuthError> {
        {
            let cached = self.keys.read().await;
            if let Some((keys, fetched_at)) = cached.as_ref() {
                if OffsetDateTime::now_utc() - *fetched_at < JWKS_CACHE_TTL {
                    return Ok(keys.clone());
                }
            }
        }

        let fresh: JwkSet = self
            .http
            .get(GOOGLE_JWKS_URL)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!(error = %e, "google jwks fetch failed");
                AuthError::InvalidAssertion
            })?
            .json()
            .await
            .map_err(|e| {
                warn!(error = %e, "google jwks response malformed");
                AuthError::InvalidAssertion
            })?;

        let mut cached = self.keys.write().await;
        *cached = Some((fresh.clone(), OffsetDateTime::now_utc()));
        Ok(fresh)
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, id_token: &str) -> Result<FederatedProfile, AuthError> {
        let header = decode_header(id_token).map_err(|e| {
            warn!(error = %e, "id token header unreadable");
            AuthError::InvalidAssertion
        })?;
        let kid = header.kid.ok_or(AuthError::InvalidAssertion)?;

        let jwks = self.jwks().await?;
        let jwk = jwks.find(&kid).ok_or_else(|| {
            warn!(%kid, "no matching key in google jwks");
            AuthError::InvalidAssertion
        })?;
        let key = DecodingKey::from_jwk(jwk).map_err(|_| AuthError::InvalidAssertion)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(std::slice::from_ref(&self.client_id));
        validation.set_issuer(&GOOGLE_ISSUERS);
        let data = decode::<GoogleClaims>(id_token, &key, &validation).map_err(|e| {
            warn!(error = %e, "google id token rejected");
            AuthError::InvalidAssertion
        })?;

        debug!(subject = %data.claims.sub, "google id token verified");
        Ok(FederatedProfile {
            subject: data.claims.sub,
            email: data.claims.email,
            name: data.claims.name,
            photo_url: data.claims.picture,
        })
    }
}
