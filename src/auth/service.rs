use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{Authorizer, Identity, Role};
use crate::error::AuthError;

/// Access token claims as issued by the platform's login endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "UserType")]
    pub user_type: String,
    pub exp: i64,
}

/// Validates HS256 access tokens signed with the shared secret.
pub struct JwtAuthorizer {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthorizer {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    fn decode_token(&self, token: &str) -> Result<Option<Claims>, AuthError> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(Some(data.claims)),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature
                | ErrorKind::ImmatureSignature
                | ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm => {
                    debug!("Rejected access token: {}", e);
                    Ok(None)
                }
                _ => Err(AuthError::InvalidToken(e.to_string())),
            },
        }
    }
}

impl Authorizer for JwtAuthorizer {
    fn authorize(&self, token: &str, allowed: &[Role]) -> Result<Option<Identity>, AuthError> {
        let claims = match self.decode_token(token)? {
            Some(claims) => claims,
            None => return Ok(None),
        };

        let role = match claims.user_type.parse::<Role>() {
            Ok(role) if allowed.contains(&role) => role,
            _ => return Ok(None),
        };

        Ok(Some(Identity::new(claims.id, role)))
    }
}
