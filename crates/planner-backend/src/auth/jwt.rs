//! Session tokens: HS256 JWTs keyed by the planner user id.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use super::types::{AuthConfig, Claims};

/// Sessions older than this are re-issued on the next request.
const REISSUE_AFTER_HOURS: i64 = 24;

pub fn create_token(
    config: &AuthConfig,
    user_id: Uuid,
    email: &str,
    name: Option<String>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let issued = Utc::now();
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        name,
        iat: issued.timestamp(),
        exp: (issued + Duration::days(config.token_duration_days)).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

/// Checks signature and expiry.
pub fn validate_token(
    config: &AuthConfig,
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
}

pub fn should_refresh(claims: &Claims) -> bool {
    Utc::now().timestamp() - claims.iat > Duration::hours(REISSUE_AFTER_HOURS).num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> AuthConfig {
        AuthConfig {
            jwt_secret: secret.to_string(),
            allowed_emails: Vec::new(),
            token_duration_days: 7,
            cookie_name: "auth_token".to_string(),
        }
    }

    #[test]
    fn test_session_carries_user_id() {
        let config = config("planner-session-secret");
        let user_id = Uuid::new_v4();
        let token = create_token(&config, user_id, "ada@example.com", Some("Ada".to_string()))
            .expect("should create token");

        let claims = validate_token(&config, &token).expect("should validate token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.name.as_deref(), Some("Ada"));
        assert_eq!(claims.exp - claims.iat, 7 * 86400);
        assert!(!should_refresh(&claims));
    }

    #[test]
    fn test_garbage_and_foreign_tokens_rejected() {
        let ours = config("planner-session-secret");
        assert!(validate_token(&ours, "not-a-jwt").is_err());

        let theirs = config("someone-elses-secret");
        let token = create_token(&theirs, Uuid::new_v4(), "eve@example.com", None)
            .expect("should create token");
        assert!(validate_token(&ours, &token).is_err());
    }

    #[test]
    fn test_expired_session_rejected() {
        let config = config("planner-session-secret");
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            name: None,
            iat: now - 8 * 86400,
            exp: now - 86400,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(validate_token(&config, &token).is_err());
    }

    #[test]
    fn test_day_old_session_is_reissued() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            name: None,
            iat: now - 2 * 86400,
            exp: now + 5 * 86400,
        };
        assert!(should_refresh(&claims));
    }
}
