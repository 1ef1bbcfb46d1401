use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Success envelope: `{retcode, message, data?}`. The HTTP status equals `retcode`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub retcode: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::with_status(StatusCode::OK, message, Some(data))
    }

    pub fn created(message: impl Into<String>, data: T) -> Self {
        Self::with_status(StatusCode::CREATED, message, Some(data))
    }

    fn with_status(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            retcode: status.as_u16(),
            message: message.into(),
            data,
        }
    }
}

impl ApiResponse<()> {
    /// Acknowledgement without a payload.
    pub fn message(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, message, None)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.retcode).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_uses_201() {
        let response = ApiResponse::created("Apartment created", 7).into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[test]
    fn message_only_omits_data() {
        let json = serde_json::to_value(ApiResponse::message("Removed")).unwrap();
        assert_eq!(json["retcode"], 200);
        assert!(json.get("data").is_none());
    }
}
