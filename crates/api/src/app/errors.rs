use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use gavel_infra::ServiceError;

pub fn service_error_to_response(operation: &'static str, err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        e @ ServiceError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", e.to_string()),
        ServiceError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ServiceError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        e @ ServiceError::Store { .. } => {
            tracing::error!(operation, error = %e, "request failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path or body id, answering 400 `invalid_id` on failure.
pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_core::AuctionId;
    use gavel_infra::StoreError;

    #[test]
    fn business_outcomes_map_to_client_statuses() {
        let cases = [
            (ServiceError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound("auction x".into()), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("dup".into()), StatusCode::CONFLICT),
            (
                ServiceError::InvariantViolation("neg".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ServiceError::Store {
                    operation: "commit_sales",
                    source: StoreError::Backend("down".into()),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(service_error_to_response("test", err).status(), status);
        }
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let err = parse_id::<AuctionId>("not-a-uuid", "auction").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(parse_id::<AuctionId>(&AuctionId::new().to_string(), "auction").is_ok());
    }
}
