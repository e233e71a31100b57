//! Authenticated-user extraction
//!
//! Token verification happens at the gateway, which forwards the caller's id
//! in `X-User-Id`. Handlers take a [`User`] argument to require it.

use crate::error::AppError;
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-Id";

/// Represents an authenticated user forwarded by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
}

impl User {
    fn from_headers(req: &HttpRequest) -> Result<Self, AppError> {
        let value = req
            .headers()
            .get(USER_ID_HEADER)
            .ok_or(AppError::NotAuthenticated)?;
        let id = value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or(AppError::NotAuthenticated)?;
        Ok(User { id })
    }
}

impl FromRequest for User {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(User::from_headers(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[actix_rt::test]
    async fn test_extracts_user_id() {
        let id = Uuid::new_v4();
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, id.to_string()))
            .to_http_request();
        let user = User::extract(&req).await.unwrap();
        assert_eq!(user.id, id);
    }

    #[actix_rt::test]
    async fn test_missing_or_malformed_header_is_unauthenticated() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(
            User::extract(&req).await,
            Err(AppError::NotAuthenticated)
        ));

        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "not-a-uuid"))
            .to_http_request();
        assert!(matches!(
            User::extract(&req).await,
            Err(AppError::NotAuthenticated)
        ));
    }
}
