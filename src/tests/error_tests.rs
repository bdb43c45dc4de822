#[cfg(test)]
mod tests {
    use crate::auth::{AuthError, PolicyViolation};
    use crate::error::AppError;
    use crate::store::StoreError;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;

    async fn body_json(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_app_error_display() {
        let error = AppError::BadRequest("Invalid input".to_string());
        assert_eq!(format!("{}", error), "Bad request: Invalid input");

        let error = AppError::NotFound("Resource not found".to_string());
        assert_eq!(format!("{}", error), "Not found: Resource not found");

        let error = AppError::RateLimited { retry_after_seconds: 60 };
        assert_eq!(format!("{}", error), "Rate limited. Retry after 60 seconds");

        assert_eq!(AppError::InvalidCredentials.to_string(), "Invalid Username/Password");
        assert_eq!(AppError::AccountLocked.to_string(), "Account Locked");
    }

    #[test]
    fn test_app_error_into_response() {
        let cases = [
            (AppError::BadRequest("Test error".to_string()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("Not found".to_string()), StatusCode::NOT_FOUND),
            (AppError::ServiceUnavailable("down".to_string()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Unauthorized("No access".to_string()), StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("No permission".to_string()), StatusCode::FORBIDDEN),
            (AppError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AppError::AccountLocked, StatusCode::FORBIDDEN),
            (AppError::CsrfMismatch, StatusCode::FORBIDDEN),
            (AppError::PasswordPolicy("too short".to_string()), StatusCode::BAD_REQUEST),
            (AppError::Database("boom".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = AppError::RateLimited { retry_after_seconds: 30 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");

        let (_, body) = body_json(AppError::RateLimited { retry_after_seconds: 30 }).await;
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert_eq!(body["error"]["details"]["retry_after_seconds"], 30);
        assert_eq!(body["status"], 429);
    }

    #[tokio::test]
    async fn test_csrf_error_body() {
        let (status, body) = body_json(AppError::CsrfMismatch).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "CSRF_TOKEN_INVALID");
        assert_eq!(body["error"]["message"], "Forbidden - CSRF token invalid");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let (status, body) = body_json(AppError::Internal(anyhow::anyhow!("secret detail"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "An internal server error occurred");
        assert!(body["error"]["details"]["error_id"].is_string());
        assert!(!body.to_string().contains("secret detail"));
    }

    #[test]
    fn test_from_auth_error() {
        assert!(matches!(AppError::from(AuthError::InvalidCredentials), AppError::InvalidCredentials));
        assert!(matches!(AppError::from(AuthError::AccountLocked), AppError::AccountLocked));
        match AppError::from(AuthError::UserNotFound("ghost".into())) {
            AppError::NotFound(msg) => assert_eq!(msg, "User not found: ghost"),
            other => panic!("Expected NotFound, got {}", other),
        }
        match AppError::from(AuthError::PasswordPolicy(PolicyViolation::Mismatch)) {
            AppError::PasswordPolicy(msg) => assert_eq!(msg, "Passwords must match"),
            other => panic!("Expected PasswordPolicy, got {}", other),
        }
        match AppError::from(AuthError::IncorrectPassword) {
            AppError::BadRequest(msg) => assert_eq!(msg, "Invalid Password"),
            other => panic!("Expected BadRequest, got {}", other),
        }
    }

    #[test]
    fn test_from_store_error() {
        let err: AppError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));

        let err: AppError = StoreError::Corrupt("bad role".into()).into();
        assert!(matches!(err, AppError::Internal(_)));

        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
