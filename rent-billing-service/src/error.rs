//! Error taxonomy for the billing core.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Missing or malformed request fields.
    #[error("{0}")]
    Validation(String),

    /// Referenced entity absent or outside the caller's org.
    #[error("{0}")]
    NotFound(String),

    /// Role check failure.
    #[error("{0}")]
    Forbidden(String),

    /// Invalid state transition.
    #[error("{0}")]
    Conflict(String),

    #[error("Cannot void invoice with allocated payments. Unallocate payments first.")]
    InvoiceHasAllocations { allocated_amount: Decimal },

    /// External store read/write failure not otherwise classified.
    #[error("Dependency failure: {0}")]
    Dependency(#[from] anyhow::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl From<validator::ValidationErrors> for BillingError {
    /// Uses the first explicit message attached to a failed rule, falling back to the
    /// sorted list of offending fields.
    fn from(errors: validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let mut fields: Vec<&str> = field_errors.keys().copied().collect();
        fields.sort_unstable();

        let message = fields
            .iter()
            .filter_map(|field| field_errors.get(field))
            .flat_map(|errs| errs.iter())
            .find_map(|e| e.message.as_ref().map(|m| m.to_string()));

        BillingError::Validation(
            message.unwrap_or_else(|| format!("{} required", fields.join(", "))),
        )
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            BillingError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            BillingError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            // State-transition conflicts surface as 400, not 409.
            BillingError::Conflict(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            e @ BillingError::InvoiceHasAllocations { .. } => {
                AppError::BadRequest(anyhow::anyhow!(e.to_string()))
            }
            BillingError::Dependency(e) => AppError::DatabaseError(e),
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        match self {
            BillingError::InvoiceHasAllocations { allocated_amount } => {
                let message = BillingError::InvoiceHasAllocations { allocated_amount }.to_string();
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": message,
                        "allocated_amount": allocated_amount,
                    })),
                )
                    .into_response()
            }
            other => {
                if let BillingError::Dependency(ref e) = other {
                    tracing::error!(error = %e, "Billing operation failed");
                }
                AppError::from(other).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Req {
        #[validate(required)]
        org_id: Option<String>,
        #[validate(required)]
        period_start: Option<String>,
    }

    #[test]
    fn validation_errors_list_fields_in_order() {
        let req = Req {
            org_id: None,
            period_start: None,
        };
        let err = BillingError::from(req.validate().unwrap_err());
        assert_eq!(err.to_string(), "org_id, period_start required");
    }

    #[derive(Validate)]
    struct WithMessage {
        #[validate(required(message = "payment_id and org_id are required"))]
        payment_id: Option<String>,
    }

    #[test]
    fn validation_errors_prefer_rule_message() {
        let req = WithMessage { payment_id: None };
        let err = BillingError::from(req.validate().unwrap_err());
        assert_eq!(err.to_string(), "payment_id and org_id are required");
    }

    #[test]
    fn conflicts_map_to_bad_request() {
        let response = BillingError::Conflict("Invoice is already voided".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = BillingError::InvoiceHasAllocations {
            allocated_amount: Decimal::from(40),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn dependency_errors_are_internal() {
        let response = BillingError::Dependency(anyhow::anyhow!("connection reset")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
