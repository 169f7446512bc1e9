use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dealgate_core::GateError;
use dealgate_storage::StoreError;
use dealgate_sync::PipelineError;

/// Request-level conflict that is not a pipeline error.
#[derive(Debug)]
pub struct ConflictError(pub String);

impl std::fmt::Display for ConflictError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConflictError {}

/// JSON error response: `{"error": message}` with a status derived from the cause.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self(ConflictError(msg.into()).into())
    }

    pub fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<ConflictError>().is_some() {
            return StatusCode::CONFLICT;
        }
        match self.0.downcast_ref::<PipelineError>() {
            Some(err) => pipeline_status(err),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn pipeline_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Gate(GateError::StaleMove { .. }) => StatusCode::CONFLICT,
        PipelineError::Gate(GateError::ChecklistIncomplete { .. } | GateError::UnknownStage(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::NotFound(_) | PipelineError::Store(StoreError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        PipelineError::Assistant(_) => StatusCode::BAD_GATEWAY,
        PipelineError::AssistantUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Store(_) | PipelineError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %format!("{:#}", self.0), "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealgate_core::ValidationError;
    use uuid::Uuid;

    #[test]
    fn pipeline_errors_map_to_statuses() {
        let cases = [
            (PipelineError::Validation(ValidationError::MissingName), StatusCode::UNPROCESSABLE_ENTITY),
            (PipelineError::NotFound(Uuid::new_v4()), StatusCode::NOT_FOUND),
            (PipelineError::Store(StoreError::NotFound(Uuid::new_v4())), StatusCode::NOT_FOUND),
            (PipelineError::Gate(GateError::StaleMove { expected: 1, actual: 3 }), StatusCode::CONFLICT),
            (PipelineError::AssistantUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (PipelineError::Store(StoreError::Decode("bad".into())), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status(), expected);
        }
    }

    #[test]
    fn conflict_sentinel_maps_to_409() {
        assert_eq!(AppError::conflict("confirm first").status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
