//! HTTP response building helpers
//!
//! Provides a consistent API for building HTTP responses across all handlers.
//! Every error body has the shape `{"error": message}`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;

use crate::error::MapperError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": message }))
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "Method not allowed" }),
    )
}

/// Status code a failed operation maps to
pub fn error_status(error: &MapperError) -> StatusCode {
    match error {
        MapperError::InvalidInput(_) | MapperError::Invariant(_) => StatusCode::BAD_REQUEST,
        MapperError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a MapperError to an appropriate HTTP response
pub fn error_response(error: MapperError) -> Response<Full<Bytes>> {
    let status = error_status(&error);
    let message = match &error {
        MapperError::InvalidInput(msg) | MapperError::NotFound(msg) | MapperError::Invariant(msg) => {
            msg.clone()
        }
        _ => error.to_string(),
    };

    json_response(status, &serde_json::json!({ "error": message }))
}

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, MapperError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}

/// Wrap a create result into an HTTP response with 201 Created
pub fn from_create_result<T: Serialize>(result: Result<T, MapperError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => created(&value),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response() {
        let resp = ok(&serde_json::json!({"test": true}));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_error_response_classes() {
        assert_eq!(
            error_response(MapperError::NotFound("map".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response(MapperError::InvalidInput("bad field".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(MapperError::Invariant("Cannot delete the last floor".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(MapperError::Internal("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
