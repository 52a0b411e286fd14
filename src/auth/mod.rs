use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bearer token claims. `sub` is the account id; the email is carried so
/// requests and banners can name the caller without a directory lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(account_id: Uuid, email: impl Into<String>, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: account_id,
            email: email.into(),
            exp,
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT secret not configured")]
    MissingSecret,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("could not sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid(err.to_string()),
        }
    }
}

fn require_secret(secret: &str) -> Result<&[u8], JwtError> {
    if secret.is_empty() {
        return Err(JwtError::MissingSecret);
    }
    Ok(secret.as_bytes())
}

/// Sign claims with HS256. Only the CLI and tests mint tokens; the server just verifies.
pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    let key = EncodingKey::from_secret(require_secret(secret)?);
    encode(&Header::default(), claims, &key).map_err(|e| JwtError::Signing(e.to_string()))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(require_secret(secret)?);
    Ok(decode::<Claims>(token, &key, &Validation::default())?.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_with_same_secret() {
        let id = Uuid::new_v4();
        let token = generate_jwt(&Claims::new(id, "ops@example.com", 1), "s3cret").unwrap();
        let claims = validate_jwt(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.email, "ops@example.com");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_jwt(&Claims::new(Uuid::new_v4(), "a@example.com", 1), "one").unwrap();
        assert!(matches!(validate_jwt(&token, "two"), Err(JwtError::Invalid(_))));
    }

    #[test]
    fn empty_secret_is_refused() {
        let claims = Claims::new(Uuid::new_v4(), "a@example.com", 1);
        assert!(matches!(generate_jwt(&claims, ""), Err(JwtError::MissingSecret)));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let mut claims = Claims::new(Uuid::new_v4(), "a@example.com", 1);
        claims.exp = (Utc::now() - Duration::hours(2)).timestamp();
        let token = generate_jwt(&claims, "s3cret").unwrap();
        assert!(matches!(validate_jwt(&token, "s3cret"), Err(JwtError::Expired)));
    }
}
