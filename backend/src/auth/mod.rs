use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

pub mod middleware;

#[derive(Debug)]
pub enum AuthError {
    JWT(jsonwebtoken::errors::Error),
    MissingToken,
    InvalidToken,
    TokenExpired,
    InvalidSignature,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JWT(e) => write!(f, "JWT error: {}", e),
            Self::MissingToken => write!(f, "Missing bearer token"),
            Self::InvalidToken => write!(f, "Invalid token"),
            Self::TokenExpired => write!(f, "Token expired"),
            Self::InvalidSignature => write!(f, "Invalid signature"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::JWT(e) => Some(e),
            _ => None,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::JWT(err)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let message = match self {
            Self::JWT(_) | Self::InvalidToken => "Invalid token",
            Self::MissingToken => "Authentication required",
            Self::TokenExpired => "Token has expired",
            Self::InvalidSignature => "Invalid signature",
        };

        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized", "message": message }))).into_response()
    }
}

/// Access token issued by the site's auth provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Uuid, AuthError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation
    ).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        _ => AuthError::JWT(e)
    })?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| AuthError::InvalidToken)
}

/// Strips the `Bearer ` scheme from an Authorization header value.
pub fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
pub fn create_token(user_id: Uuid, secret: &str, ttl_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let exp = chrono::Utc::now().timestamp() + ttl_secs;
    encode(
        &Header::default(),
        &Claims {
            sub: user_id.to_string(),
            exp: exp.max(0) as usize,
        },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_token_round_trip() {
        let user = Uuid::new_v4();
        let token = create_token(user, SECRET, 3600);
        assert_eq!(validate_jwt(&token, SECRET).unwrap(), user);
    }

    #[test]
    fn test_wrong_secret_and_expired() {
        let user = Uuid::new_v4();
        let token = create_token(user, SECRET, 3600);
        assert!(matches!(validate_jwt(&token, "other"), Err(AuthError::InvalidSignature)));

        let expired = create_token(user, SECRET, -3600);
        assert!(matches!(validate_jwt(&expired, SECRET), Err(AuthError::TokenExpired)));

        assert!(validate_jwt("not-a-jwt", SECRET).is_err());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc "), Some("abc"));
        assert_eq!(bearer_token("Bearer   "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
