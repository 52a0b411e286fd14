use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::{validate_jwt, Claims, JwtError};
use crate::broker::Caller;
use crate::error::ApiError;

/// Caller identity taken from a verified bearer token.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub account_id: Uuid,
    pub email: String,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            account_id: claims.sub,
            email: claims.email,
        }
    }
}

impl AuthUser {
    pub fn caller(&self) -> Caller {
        Caller::new(self.account_id, self.email.clone())
    }
}

/// Rejects the request with 401 unless it carries a valid bearer token,
/// otherwise injects [`AuthUser`] for the handlers.
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_jwt_from_headers(&headers).map_err(ApiError::unauthorized)?;

    let claims = validate_jwt(token, &state.jwt_secret).map_err(|e| match e {
        JwtError::Expired => ApiError::unauthorized("Token expired"),
        JwtError::MissingSecret | JwtError::Signing(_) => {
            tracing::error!("Token verification unavailable: {}", e);
            ApiError::internal_server_error("Authentication is not configured")
        }
        JwtError::Invalid(_) => {
            tracing::debug!("Rejected bearer token: {}", e);
            ApiError::unauthorized("Invalid token")
        }
    })?;

    request.extensions_mut().insert(AuthUser::from(claims));
    Ok(next.run(request).await)
}

fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<&str, &'static str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or("Missing Authorization header")?
        .to_str()
        .map_err(|_| "Invalid Authorization header format")?;

    match value.strip_prefix("Bearer ").map(str::trim) {
        Some("") => Err("Empty bearer token"),
        Some(token) => Ok(token),
        None => Err("Authorization header must use Bearer token format"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        assert!(extract_jwt_from_headers(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_jwt_from_headers(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_jwt_from_headers(&headers).unwrap(), "abc.def");
    }
}
