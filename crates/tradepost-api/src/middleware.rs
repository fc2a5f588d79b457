use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use tradepost_core::AppState;

pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid authorization format"))?;

        // With a secret configured the bearer value is a signed token from
        // the identity collaborator; without one (dev mode) it is the bare
        // user id.
        let user_id = match &state.config.jwt_secret {
            Some(secret) => {
                tradepost_core::auth::validate_token(token, secret)
                    .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid or expired token"))?
                    .sub
            }
            None => token.trim().to_string(),
        };

        if user_id.is_empty() {
            return Err((StatusCode::UNAUTHORIZED, "Missing user identity"));
        }

        Ok(AuthUser { user_id })
    }
}
