use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// The seven error kinds the control plane can surface, per the external
/// error-handling contract: each maps to one HTTP status and one retry
/// policy, and every internal error collapses into one of these at the
/// orchestrator boundary.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    // -- ambient wrapper variants --
    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // -- component-specific variants kept from the prior error set --
    #[error("sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("network not allowed: {0}")]
    NetworkNotAllowed(String),

    #[error("approval error: {0}")]
    Approval(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution error: {0}")]
    ToolExecution(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("workflow error: {0}")]
    Workflow(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// The HTTP status this error maps to, per the error-handling design.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AgentError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AgentError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AgentError::Forbidden(_) | AgentError::PolicyViolation(_) => StatusCode::FORBIDDEN,
            AgentError::DependencyFailed(_)
            | AgentError::Http(_)
            | AgentError::NetworkNotAllowed(_) => StatusCode::BAD_GATEWAY,
            AgentError::LlmUnavailable(_) | AgentError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AgentError::ToolNotFound(_) => StatusCode::NOT_FOUND,
            AgentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error type, used in the `error.type` field of the
    /// user-visible failure envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            AgentError::BadRequest(_) => "bad_request",
            AgentError::Unauthenticated(_) => "unauthenticated",
            AgentError::RateLimited(_) => "rate_limited",
            AgentError::Forbidden(_) => "forbidden",
            AgentError::PolicyViolation(_) => "policy_violation",
            AgentError::DependencyFailed(_) | AgentError::Http(_) => "dependency_failed",
            AgentError::LlmUnavailable(_) => "llm_unavailable",
            AgentError::ToolNotFound(_) => "tool_not_found",
            AgentError::ToolExecution(_) => "tool_execution_failed",
            AgentError::Approval(_) => "approval_error",
            AgentError::Workflow(_) => "workflow_error",
            AgentError::SandboxViolation(_) | AgentError::NetworkNotAllowed(_) => {
                "sandbox_violation"
            }
            AgentError::Timeout(_) => "timeout",
            AgentError::ServiceUnavailable(_) => "service_unavailable",
            _ => "internal",
        }
    }

    /// Whether a client may retry this request unchanged after a delay.
    /// Never on `BadRequest`, `Forbidden`, `RateLimited`, or `Unauthorised` —
    /// a 429 means back off, not hammer the dependency again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::DependencyFailed(_)
                | AgentError::LlmUnavailable(_)
                | AgentError::Http(_)
                | AgentError::Timeout(_)
                | AgentError::ServiceUnavailable(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: &'static str,
    hint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    action_id: Option<String>,
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.error_type(),
                hint: self.to_string(),
                action_id: None,
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let cases: Vec<(AgentError, &str)> = vec![
            (AgentError::BadRequest("missing field".into()), "bad request: missing field"),
            (AgentError::RateLimited("too fast".into()), "rate limited: too fast"),
            (AgentError::Approval("not found".into()), "approval error: not found"),
            (AgentError::ToolNotFound("foo".into()), "tool not found: foo"),
            (AgentError::ToolExecution("failed".into()), "tool execution error: failed"),
            (AgentError::PolicyViolation("forbidden cmd".into()), "policy violation: forbidden cmd"),
            (AgentError::Workflow("stuck".into()), "workflow error: stuck"),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn status_codes_map_per_contract() {
        assert_eq!(AgentError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AgentError::RateLimited("x".into()).status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AgentError::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AgentError::LlmUnavailable("x".into()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AgentError::ToolNotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AgentError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn retry_policy() {
        assert!(!AgentError::RateLimited("x".into()).is_retryable());
        assert!(AgentError::LlmUnavailable("x".into()).is_retryable());
        assert!(!AgentError::BadRequest("x".into()).is_retryable());
        assert!(!AgentError::Forbidden("x".into()).is_retryable());
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AgentError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
        let err: AgentError = json_err.into();
        assert!(err.to_string().starts_with("JSON error:"));
    }

    #[test]
    fn result_type_alias_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.unwrap(), 42);
        let err: Result<i32> = Err(AgentError::Internal("fail".into()));
        assert!(err.is_err());
    }
}
