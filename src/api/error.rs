use crate::errors::{Error, SessionRejection};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Error returned by every handler; maps [`Error`] onto a status code and JSON body.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<SessionRejection>,
    message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::Validation { .. } => (StatusCode::BAD_REQUEST, "validation"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            Error::InvalidSignature { .. } => (StatusCode::BAD_REQUEST, "invalid_signature"),
            Error::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            Error::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
            Error::GoalNotFound { .. }
            | Error::ExperienceNotFound { .. }
            | Error::ChallengeNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Error::InvalidClaimCode => (StatusCode::NOT_FOUND, "invalid_claim_code"),
            Error::Session { reason } => (StatusCode::CONFLICT, reason.code()),
            Error::CodeAlreadyRedeemed => (StatusCode::CONFLICT, "code_already_redeemed"),
            Error::DuplicatePartnerRedemption => {
                (StatusCode::CONFLICT, "duplicate_partner_redemption")
            }
            Error::CodeGenerationExhausted { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "code_generation_exhausted")
            }
            Error::Config { .. }
            | Error::Database(_)
            | Error::Io(_)
            | Error::EnvVar(_)
            | Error::Http(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };
        let reason = match &self.0 {
            Error::Session { reason } => Some(*reason),
            _ => None,
        };
        (
            status,
            Json(ErrorBody {
                code,
                reason,
                message,
            }),
        )
            .into_response()
    }
}

/// Handler result.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::validation("bad"), StatusCode::BAD_REQUEST),
            (Error::forbidden("no"), StatusCode::FORBIDDEN),
            (Error::Unauthenticated, StatusCode::UNAUTHORIZED),
            (Error::GoalNotFound { id: 1 }, StatusCode::NOT_FOUND),
            (SessionRejection::NotRunning.into(), StatusCode::CONFLICT),
            (Error::CodeAlreadyRedeemed, StatusCode::CONFLICT),
            (
                Error::InvalidSignature {
                    message: "mismatch".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::Config {
                    message: "x".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
