use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use derive_more::Display;
use serde_json::json;

use crate::model::task_assignment::LifecycleError;
use crate::utils::geofence::GeofenceError;

/// Every handler error ends up here and is rendered as `{"message": ...}`.
#[derive(Debug, Display)]
pub enum ApiError {
    #[display(fmt = "{}", _0)]
    BadRequest(String),

    #[display(fmt = "{}", _0)]
    Unauthorized(String),

    #[display(fmt = "{}", _0)]
    Forbidden(String),

    #[display(fmt = "{}", _0)]
    NotFound(String),

    #[display(fmt = "{}", _0)]
    Conflict(String),

    #[display(fmt = "Location is {:.1} m from the project site (allowed {:.1} m)", distance, allowed)]
    OutsideGeofence { distance: f64, allowed: f64 },

    #[display(fmt = "Internal Server Error")]
    Internal,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError::Conflict(msg.into())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::OutsideGeofence { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::OutsideGeofence { distance, allowed } => json!({
                "message": self.to_string(),
                "distance": distance,
                "allowed_radius": allowed,
            }),
            _ => json!({ "message": self.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "Database error");
        ApiError::Internal
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        ApiError::Conflict(e.to_string())
    }
}

impl From<GeofenceError> for ApiError {
    fn from(e: GeofenceError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn outside_geofence_renders_distance() {
        let err = ApiError::OutsideGeofence {
            distance: 250.04,
            allowed: 150.0,
        };
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["allowed_radius"], 150.0);
        assert_eq!(
            value["message"],
            "Location is 250.0 m from the project site (allowed 150.0 m)"
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn database_errors_hide_details() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.to_string(), "Internal Server Error");
    }
}
