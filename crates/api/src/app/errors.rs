use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use core::str::FromStr;
use serde_json::json;

use almoner_core::DomainError;

pub fn domain_error_to_response(err: DomainError) -> Response {
    match err {
        DomainError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "bad_request", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::Internal(msg) => {
            tracing::error!(error = %msg, "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path segment into a typed id.
pub fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse().map_err(domain_error_to_response)
}

/// Unwrap a JSON body, rendering malformed input as a 400.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    body.map(|Json(value)| value)
        .map_err(|rejection| json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text()))
}

pub fn query_params<T>(
    query: Result<axum::extract::Query<T>, QueryRejection>,
) -> Result<T, Response> {
    query
        .map(|axum::extract::Query(value)| value)
        .map_err(|rejection| json_error(StatusCode::BAD_REQUEST, "invalid_query", rejection.body_text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use almoner_core::DeliveryId;

    #[test]
    fn domain_errors_map_to_one_status_each() {
        let cases = [
            (DomainError::bad_request("x"), StatusCode::BAD_REQUEST),
            (DomainError::invalid_id("x"), StatusCode::BAD_REQUEST),
            (DomainError::not_found("x"), StatusCode::NOT_FOUND),
            (DomainError::conflict("x"), StatusCode::CONFLICT),
            (DomainError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let res = parse_id::<DeliveryId>("not-a-uuid").unwrap_err();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(parse_id::<DeliveryId>(&DeliveryId::new().to_string()).is_ok());
    }
}
