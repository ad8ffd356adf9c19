use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::use_cases::Caller;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Caller identity set by the upstream auth layer.
#[derive(Debug, Clone)]
pub struct CallerIdentity(pub Caller);

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized(format!("missing {} header", USER_ID_HEADER)))?;

        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty());

        Ok(CallerIdentity(Caller {
            user_id: user_id.to_string(),
            role,
        }))
    }
}

/// Guards `/admin` routes with the configured bearer key.
pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    let authorized = auth_header
        .map(|auth| auth.strip_prefix("Bearer ").unwrap_or(auth))
        .map(|key| keys_match(key, &state.admin_api_key))
        .unwrap_or(false);

    if !authorized {
        tracing::warn!(uri = %req.uri(), "Rejected admin request");
        return Err(AppError::Unauthorized("invalid admin credentials".to_string()));
    }

    Ok(next.run(req).await)
}

fn keys_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[tokio::test]
    async fn extracts_caller_from_headers() {
        let (mut parts, _) = HttpRequest::builder()
            .header(USER_ID_HEADER, "user-1")
            .header(USER_ROLE_HEADER, "Admin")
            .body(())
            .unwrap()
            .into_parts();

        let CallerIdentity(caller) = CallerIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(caller.user_id, "user-1");
        assert!(caller.is_admin());
    }

    #[tokio::test]
    async fn missing_user_header_is_unauthorized() {
        let (mut parts, _) = HttpRequest::builder().body(()).unwrap().into_parts();
        let err = CallerIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn key_comparison() {
        assert!(keys_match("secret-key", "secret-key"));
        assert!(!keys_match("secret-kez", "secret-key"));
        assert!(!keys_match("secret", "secret-key"));
    }
}
