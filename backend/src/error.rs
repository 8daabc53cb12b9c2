use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::shared_wheel_game::ErrorResponse;
use shared::WheelError;
use tracing::error;

use crate::auth::AuthError;
use crate::store::StoreError;

#[derive(Debug)]
pub enum Error {
    Wheel(WheelError),
    Persistence(StoreError),
    Auth(AuthError),
    RateLimited(&'static str),
    Validation(validator::ValidationErrors),
}

impl From<WheelError> for Error {
    fn from(err: WheelError) -> Self {
        Error::Wheel(err)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Persistence(err)
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Error::Validation(err)
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Wheel(e) => match e {
                WheelError::AlreadyRegistered(_) | WheelError::InvalidState { .. } => {
                    StatusCode::CONFLICT
                }
                WheelError::EmptyPool => StatusCode::UNPROCESSABLE_ENTITY,
                WheelError::NotFound(_) => StatusCode::NOT_FOUND,
                WheelError::Forbidden(_) => StatusCode::FORBIDDEN,
                WheelError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            },
            Error::Persistence(_) => StatusCode::BAD_GATEWAY,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> ErrorResponse {
        let (error, message) = match self {
            Error::Wheel(e) => (e.kind().to_string(), e.to_string()),
            Error::Persistence(_) => ("persistence".to_string(), "Storage is unavailable".to_string()),
            Error::Auth(e) => ("unauthorized".to_string(), e.to_string()),
            Error::RateLimited(msg) => ("rate_limited".to_string(), msg.to_string()),
            Error::Validation(errors) => ("invalid_input".to_string(), validation_message(errors)),
        };
        ErrorResponse { error, message }
    }
}

fn validation_message(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Invalid request".to_string())
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::Persistence(e) = &self {
            error!("Request failed on storage: {}", e);
        }
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::from(WheelError::AlreadyRegistered("u".into())), StatusCode::CONFLICT),
            (Error::from(WheelError::invalid_state("spin", "busy")), StatusCode::CONFLICT),
            (Error::from(WheelError::EmptyPool), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::from(WheelError::NotFound("u".into())), StatusCode::NOT_FOUND),
            (Error::from(WheelError::Forbidden("admins only")), StatusCode::FORBIDDEN),
            (Error::from(WheelError::InvalidInput("bad".into())), StatusCode::BAD_REQUEST),
            (Error::from(StoreError::Database(sqlx::Error::PoolTimedOut)), StatusCode::BAD_GATEWAY),
            (Error::from(AuthError::MissingToken), StatusCode::UNAUTHORIZED),
            (Error::RateLimited("slow down"), StatusCode::TOO_MANY_REQUESTS),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{:?}", err);
        }
    }

    #[test]
    fn test_body_uses_error_kind() {
        let body = Error::from(WheelError::EmptyPool).body();
        assert_eq!(body.error, "empty_pool");
        let body = Error::from(StoreError::NotFound("secret dsn".into())).body();
        assert!(!body.message.contains("secret"));
    }
}
