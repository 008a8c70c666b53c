use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::{Claims, TokenType};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

fn now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or_default()
}

/// Identity carried by both token kinds.
#[derive(Debug, Clone)]
pub struct Subject {
    pub user_id: u64,
    pub username: String,
    pub role: u8,
    pub employee_id: Option<u64>,
}

impl From<&Claims> for Subject {
    fn from(c: &Claims) -> Self {
        Subject {
            user_id: c.user_id,
            username: c.sub.clone(),
            role: c.role,
            employee_id: c.employee_id,
        }
    }
}

fn issue(subject: &Subject, token_type: TokenType, secret: &str, ttl: usize) -> Result<(String, Claims), Error> {
    let claims = Claims {
        user_id: subject.user_id,
        sub: subject.username.clone(),
        role: subject.role,
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
        employee_id: subject.employee_id,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn generate_access_token(subject: &Subject, secret: &str, ttl: usize) -> Result<String, Error> {
    issue(subject, TokenType::Access, secret, ttl).map(|(token, _)| token)
}

pub fn generate_refresh_token(
    subject: &Subject,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    issue(subject, TokenType::Refresh, secret, ttl)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> Subject {
        Subject {
            user_id: 4,
            username: "ravi.k".into(),
            role: 3,
            employee_id: Some(42),
        }
    }

    #[test]
    fn access_token_verifies() {
        let token = generate_access_token(&subject(), "s3cret", 60).unwrap();
        let claims = verify_token(&token, "s3cret").unwrap();

        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.sub, "ravi.k");
        assert_eq!(claims.employee_id, Some(42));
    }

    #[test]
    fn refresh_tokens_get_unique_jti() {
        let (_, a) = generate_refresh_token(&subject(), "s3cret", 60).unwrap();
        let (_, b) = generate_refresh_token(&subject(), "s3cret", 60).unwrap();
        assert_eq!(a.token_type, TokenType::Refresh);
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token(&subject(), "s3cret", 60).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }
}
