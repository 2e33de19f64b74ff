use actix_web::{http::StatusCode, HttpResponse, ResponseError};

use crate::domain::purchase::PurchaseError;
use crate::utils::IsTransient;

impl ResponseError for PurchaseError {
    fn status_code(&self) -> StatusCode {
        match self {
            PurchaseError::Validation(_) => StatusCode::BAD_REQUEST,
            PurchaseError::TicketNotFound(_) | PurchaseError::PayerNotFound(_) => StatusCode::NOT_FOUND,
            PurchaseError::InsufficientStock { .. } => StatusCode::CONFLICT,
            PurchaseError::GatewayInitiation { .. } => StatusCode::BAD_GATEWAY,
            PurchaseError::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            PurchaseError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}
