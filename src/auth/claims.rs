use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload asserted for an authenticated session. Stateless: validity
/// is decided by signature and expiry alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,     // user ID
    pub email: String, // normalized email at issuance time
    pub name: String,  // display name at issuance time
    pub iat: usize,    // issued at (unix timestamp)
    pub exp: usize,    // expires at (unix timestamp)
    pub iss: String,   // issuer
    pub aud: String,   // audience
}
