use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request shape or literal the builders refuse; always a client error.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ServiceError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ServiceError::InvalidRequest(message.into())
    }

    /// Status the HTTP layer should answer with for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        if !matches!(self, ServiceError::InvalidRequest(_)) {
            error!(error = %self, "drill-down request failed");
        }

        ErrorBody {
            error: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_requests_map_to_bad_request() {
        let err = ServiceError::invalid("Unknown dimension: planet");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_body().error, "Unknown dimension: planet");
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ServiceError::Internal(anyhow::anyhow!("connection reset by peer"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_body().error, "internal error");
    }
}
