#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::io;

    use crate::error::{validation, AppError, AppResult, OptionExt};
    use crate::igdb::IgdbError;
    use crate::packaging::PackagingError;

    #[test]
    fn test_error_display() {
        assert_eq!(AppError::BadRequest("Invalid input".into()).to_string(), "Bad request: Invalid input");
        assert_eq!(AppError::NotFound("Game".into()).to_string(), "Not found: Game");
        assert_eq!(
            AppError::RateLimited { retry_after_seconds: 60 }.to_string(),
            "Rate limited. Retry after 60 seconds"
        );
        assert_eq!(
            AppError::ValidationError { field: "name".into(), message: "Value cannot be empty".into() }.to_string(),
            "Validation error on field 'name': Value cannot be empty"
        );
    }

    #[test]
    fn test_error_status_codes() {
        let cases = vec![
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (AppError::ServiceUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (AppError::Packaging("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (AppError::RateLimited { retry_after_seconds: 30 }, StatusCode::TOO_MANY_REQUESTS),
            (AppError::IoError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Internal(anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            let label = error.to_string();
            assert_eq!(error.into_response().status(), expected, "{}", label);
        }
    }

    #[test]
    fn test_from_io_error() {
        let app_error: AppError = io::Error::new(io::ErrorKind::NotFound, "File not found").into();
        match app_error {
            AppError::IoError(msg) => assert!(msg.contains("File not found")),
            other => panic!("Expected IoError, got {:?}", other),
        }
    }

    #[test]
    fn test_from_igdb_error() {
        let err: AppError = IgdbError::NotConfigured.into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let err: AppError = IgdbError::NotFound(1942).into();
        match err {
            AppError::NotFound(msg) => assert!(msg.contains("1942")),
            other => panic!("Expected NotFound, got {:?}", other),
        }

        let err: AppError = IgdbError::Api { status: 500, message: "oops".into() }.into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_from_packaging_error() {
        let err: AppError = PackagingError::SourceMissing("/games/Gone".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_option_ext() {
        let result: AppResult<i32> = Some(42).ok_or_not_found("Library");
        assert_eq!(result.unwrap(), 42);

        let result: AppResult<i32> = None::<i32>.ok_or_not_found("Library");
        match result.unwrap_err() {
            AppError::NotFound(msg) => assert_eq!(msg, "Library not found"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_path() {
        assert!(validation::validate_path("/games/pc").is_ok());
        assert!(validation::validate_path("D:\\Games").is_ok());

        match validation::validate_path("   ").unwrap_err() {
            AppError::ValidationError { field, message } => {
                assert_eq!(field, "path");
                assert_eq!(message, "Path cannot be empty");
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
        match validation::validate_path("bad\0path").unwrap_err() {
            AppError::ValidationError { message, .. } => assert_eq!(message, "Path contains null characters"),
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_name() {
        assert!(validation::validate_name("Doom", "name", 10).is_ok());
        assert!(validation::validate_name("  ", "name", 10).is_err());
        // Length counts characters, not bytes
        assert!(validation::validate_name("ÄÖÜäöü", "name", 6).is_ok());
        match validation::validate_name("abcdefghijk", "title", 10).unwrap_err() {
            AppError::ValidationError { field, message } => {
                assert_eq!(field, "title");
                assert!(message.contains("10"));
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }
}
