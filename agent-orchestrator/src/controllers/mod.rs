pub mod health;
pub mod research;
pub mod tasks;

use crate::error::OrchestratorError;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;

/// `{status: "error", message}` with a status code matching the failure
pub fn error_response(err: &OrchestratorError) -> HttpResponse {
    let code = match err {
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::InvalidState(_) => StatusCode::CONFLICT,
        OrchestratorError::UnsupportedModel(_) | OrchestratorError::Skill(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::AuthFailure(_)
        | OrchestratorError::TransportFailure(_)
        | OrchestratorError::ProviderRejection(_)
        | OrchestratorError::CapabilityFailure { .. } => StatusCode::BAD_GATEWAY,
        OrchestratorError::Cancelled | OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    HttpResponse::build(code).json(serde_json::json!({
        "status": "error",
        "kind": err.kind(),
        "message": err.to_string()
    }))
}

pub fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "status": "error",
        "message": message
    }))
}
