//! Token di sessione JWT (HS256)

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::models::{Role, User};

/// Claims del token di sessione
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// ID utente
    pub sub: String,
    pub role: Role,
    /// Versione del token: cambia con password ed eliminazione account
    pub ver: i64,
    pub iat: i64,
    pub exp: i64,
}

/// Errori di verifica del token
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token non valido: {0}")]
    Invalid(String),
    #[error("Token scaduto")]
    Expired,
    #[error("Firma del token fallita: {0}")]
    Signing(String),
}

/// Firma e verifica dei token con un segreto condiviso
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry: Duration,
}

impl TokenService {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry: Duration::hours(expiry_hours.max(1)),
        }
    }

    /// Emette un token per l'utente; restituisce token e scadenza
    pub fn issue(&self, user: &User) -> Result<(String, DateTime<Utc>), TokenError> {
        let now = Utc::now();
        let expires_at = now + self.expiry;
        let claims = Claims {
            sub: user.id.clone(),
            role: user.role,
            ver: user.token_version,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, expires_at))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            email: "u@w.it".to_string(),
            password_hash: String::new(),
            name: "Utente".to_string(),
            phone: None,
            role: Role::Worker,
            bio: None,
            location: None,
            skills: vec![],
            avatar_url: None,
            is_verified: false,
            is_active: true,
            two_factor_enabled: false,
            token_version: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let service = TokenService::new("segreto", 24);
        let (token, expires_at) = service.issue(&user()).unwrap();
        assert!(expires_at > Utc::now());

        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, Role::Worker);
        assert_eq!(claims.ver, 3);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let (token, _) = TokenService::new("uno", 24).issue(&user()).unwrap();
        assert!(matches!(
            TokenService::new("due", 24).verify(&token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_expired_token() {
        let service = TokenService::new("segreto", 24);
        let now = Utc::now();
        let claims = Claims {
            sub: "u1".to_string(),
            role: Role::Customer,
            ver: 0,
            iat: (now - Duration::hours(3)).timestamp(),
            exp: (now - Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"segreto"),
        )
        .unwrap();
        assert!(matches!(service.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_garbage_token() {
        let service = TokenService::new("segreto", 24);
        assert!(service.verify("non.un.token").is_err());
    }
}
