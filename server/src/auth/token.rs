use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::error::EngineError;

use super::config::AuthConfig;

/// JWT claims for session tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,    // expiry (unix timestamp)
    pub iat: i64,    // issued at
}

/// Create a JWT session token for a user.
pub fn create_session_token(
    user_id: &str,
    secret: &str,
    expiry_hours: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::hours(expiry_hours)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate a JWT session token and return the claims.
pub fn validate_session_token(
    token: &str,
    secret: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Resolves a bearer credential to a principal (user id).
pub trait Authenticator: Send + Sync {
    fn resolve(&self, token: &str) -> Result<String, EngineError>;

    /// Mint a credential for `user_id`, e.g. a new bot's token.
    fn issue_token(&self, user_id: &str) -> Result<String, EngineError>;
}

/// HS256 JWT authenticator.
pub struct JwtAuthenticator {
    config: AuthConfig,
}

impl JwtAuthenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issue a token for `user_id` with the configured lifetime.
    pub fn issue(&self, user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
        create_session_token(
            user_id,
            &self.config.jwt_secret,
            self.config.session_expiry_hours,
        )
    }
}

impl Authenticator for JwtAuthenticator {
    fn resolve(&self, token: &str) -> Result<String, EngineError> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        validate_session_token(token, &self.config.jwt_secret)
            .map(|claims| claims.sub)
            .map_err(|e| {
                debug!(error = %e, "rejected session token");
                EngineError::Unauthenticated
            })
    }

    fn issue_token(&self, user_id: &str) -> Result<String, EngineError> {
        Ok(self.issue(user_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator(secret: &str) -> JwtAuthenticator {
        JwtAuthenticator::new(AuthConfig {
            jwt_secret: secret.into(),
            session_expiry_hours: 1,
        })
    }

    #[test]
    fn test_jwt_roundtrip() {
        let secret = "test-secret";
        let token = create_session_token("user123", secret, 1).unwrap();
        let claims = validate_session_token(&token, secret).unwrap();
        assert_eq!(claims.sub, "user123");
    }

    #[test]
    fn test_jwt_invalid_secret() {
        let token = create_session_token("user123", "secret1", 1).unwrap();
        assert!(validate_session_token(&token, "secret2").is_err());
    }

    #[test]
    fn test_jwt_expiry_is_in_future() {
        let secret = "test";
        let token = create_session_token("u1", secret, 1).unwrap();
        let claims = validate_session_token(&token, secret).unwrap();
        let now = Utc::now().timestamp();
        assert!(claims.exp > now);
        assert!(claims.exp <= now + 3610);
    }

    #[test]
    fn test_jwt_expired_token_rejected() {
        // Well past the default 60s leeway.
        let token = create_session_token("u1", "s", -2).unwrap();
        assert!(validate_session_token(&token, "s").is_err());
    }

    #[test]
    fn test_jwt_validate_with_garbage_fails() {
        assert!(validate_session_token("", "secret").is_err());
        assert!(validate_session_token("not-a-jwt-token", "secret").is_err());
    }

    #[test]
    fn test_jwt_validate_with_tampered_token_fails() {
        let token = create_session_token("u1", "secret", 1).unwrap();
        let mut chars: Vec<char> = token.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'a' { 'b' } else { 'a' };
        let tampered: String = chars.into_iter().collect();
        assert!(validate_session_token(&tampered, "secret").is_err());
    }

    #[test]
    fn test_authenticator_resolves_issued_token() {
        let auth = authenticator("k");
        let token = auth.issue("user-7").unwrap();
        assert_eq!(auth.resolve(&token).unwrap(), "user-7");
        assert_eq!(auth.resolve(&format!("Bearer {token}")).unwrap(), "user-7");
    }

    #[test]
    fn test_authenticator_maps_failures_to_unauthenticated() {
        let token = authenticator("k1").issue("u1").unwrap();
        let err = authenticator("k2").resolve(&token).unwrap_err();
        assert!(matches!(err, EngineError::Unauthenticated));
        assert!(matches!(
            authenticator("k1").resolve("junk"),
            Err(EngineError::Unauthenticated)
        ));
    }

    #[test]
    fn test_issue_token_through_the_trait() {
        let auth: Box<dyn Authenticator> = Box::new(authenticator("k"));
        let token = auth.issue_token("bot-1").unwrap();
        assert_eq!(auth.resolve(&token).unwrap(), "bot-1");
    }
}
