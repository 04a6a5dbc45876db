//! JWT access token creation and verification.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{config::Config, errors::Error, types::UserId};

pub const CREDENTIALS_INVALID: &str = "Could not validate credentials";

/// JWT access token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: UserId, // Subject (user ID)
    pub exp: i64,    // Expiration time
    pub iat: i64,    // Issued at
}

impl AccessTokenClaims {
    pub fn new(user_id: UserId, config: &Config) -> Self {
        let now = Utc::now();
        let exp = now + Duration::minutes(config.access_token_expire_minutes as i64);

        Self {
            sub: user_id,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }
}

fn secret_key(config: &Config) -> Result<&str, Error> {
    config.secret_key.as_deref().ok_or_else(|| Error::Internal {
        operation: "JWT: secret_key is required".to_string(),
    })
}

/// Create an HS256 access token for a user
pub fn create_access_token(user_id: UserId, config: &Config) -> Result<String, Error> {
    let claims = AccessTokenClaims::new(user_id, config);
    let key = EncodingKey::from_secret(secret_key(config)?.as_bytes());

    encode(&Header::default(), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify and decode an access token
pub fn verify_access_token(token: &str, config: &Config) -> Result<AccessTokenClaims, Error> {
    let key = DecodingKey::from_secret(secret_key(config)?.as_bytes());
    let validation = Validation::default();

    let token_data = decode::<AccessTokenClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        // Client errors - malformed tokens, invalid claims, expired tokens
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::ExpiredSignature
        | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
        | jsonwebtoken::errors::ErrorKind::InvalidIssuer
        | jsonwebtoken::errors::ErrorKind::InvalidAudience
        | jsonwebtoken::errors::ErrorKind::InvalidSubject
        | jsonwebtoken::errors::ErrorKind::ImmatureSignature
        | jsonwebtoken::errors::ErrorKind::Base64(_)
        | jsonwebtoken::errors::ErrorKind::Json(_)
        | jsonwebtoken::errors::ErrorKind::Utf8(_)
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => Error::forbidden(CREDENTIALS_INVALID),

        // Server errors - key issues, internal failures
        jsonwebtoken::errors::ErrorKind::InvalidEcdsaKey
        | jsonwebtoken::errors::ErrorKind::InvalidRsaKey(_)
        | jsonwebtoken::errors::ErrorKind::RsaFailedSigning
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithmName
        | jsonwebtoken::errors::ErrorKind::InvalidKeyFormat
        | jsonwebtoken::errors::ErrorKind::MissingAlgorithm
        | jsonwebtoken::errors::ErrorKind::Crypto(_) => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },

        // Catch-all for any future error variants (default to server error for safety)
        _ => Error::Internal {
            operation: format!("JWT verification (unknown error): {e}"),
        },
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn create_test_config() -> Config {
        Config {
            secret_key: Some("test-secret-key-for-jwt".to_string()),
            access_token_expire_minutes: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_verify_access_token() {
        let config = create_test_config();
        let user_id = Uuid::new_v4();

        let token = create_access_token(user_id, &config).unwrap();
        let claims = verify_access_token(&token, &config).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let config = create_test_config();
        let token = create_access_token(Uuid::new_v4(), &config).unwrap();

        let other = Config {
            secret_key: Some("a-different-secret".to_string()),
            ..create_test_config()
        };

        match verify_access_token(&token, &other) {
            Err(Error::Forbidden { message }) => assert_eq!(message, CREDENTIALS_INVALID),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let config = create_test_config();
        let now = Utc::now().timestamp();
        // Well past the default 60s leeway
        let claims = AccessTokenClaims {
            sub: Uuid::new_v4(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-for-jwt"),
        )
        .unwrap();

        assert!(matches!(verify_access_token(&token, &config), Err(Error::Forbidden { .. })));
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        let config = create_test_config();
        assert!(matches!(
            verify_access_token("definitely.not.a-jwt", &config),
            Err(Error::Forbidden { .. })
        ));
    }

    #[test]
    fn test_missing_secret_is_internal_error() {
        let config = Config::default();
        assert!(matches!(
            create_access_token(Uuid::new_v4(), &config),
            Err(Error::Internal { .. })
        ));
    }
}
