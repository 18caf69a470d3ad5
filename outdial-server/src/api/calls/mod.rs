//! Operator call API handlers.
//!
//! Every response carries a `success` flag and a human-readable
//! `message`; an attempted origination always leaves at least a
//! `dialing` or `rejected` record behind, so no call goes unaccounted
//! for.
//!
//! # Endpoints
//!
//! - `GET  /{campaign_id}/status/{phone}`  – point-in-time status copy
//!   (`?reset=1` resets the recipient to `waiting`)
//! - `POST /{campaign_id}/status`          – batch status for a list of
//!   phones
//! - `POST /originate`                     – originate one call
//! - `POST /{campaign_id}/abort`           – abort a campaign
//! - `POST /{campaign_id}/reset/{phone}`   – reset one recipient

use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use outdial_core::calls::CallRecord;
use serde::Serialize;

use crate::state::AppState;

mod abort;
mod originate;
mod reset;
mod status;

/// Build the operator call API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/{campaign_id}/status/{phone}",
            get(status::get_call_status),
        )
        .route("/{campaign_id}/status", post(status::batch_call_status))
        .route("/originate", post(originate::originate_call))
        .route("/{campaign_id}/abort", post(abort::abort_campaign))
        .route(
            "/{campaign_id}/reset/{phone}",
            post(reset::reset_recipient),
        )
}

/// One recipient's status as the API reports it.
#[derive(Debug, Serialize)]
struct CallStatusView {
    phone_number: String,
    status: &'static str,
    details: Option<String>,
    timestamp: Option<String>,
}

/// Convert a store record (or its absence) into the API view.
fn to_status_view(phone_number: &str, record: Option<&CallRecord>) -> CallStatusView {
    match record {
        Some(record) => CallStatusView {
            phone_number: phone_number.to_string(),
            status: record.status.as_str(),
            details: Some(record.details.clone()),
            timestamp: record
                .updated_at
                .format(&time::format_description::well_known::Rfc3339)
                .ok(),
        },
        None => CallStatusView {
            phone_number: phone_number.to_string(),
            status: "unknown",
            details: None,
            timestamp: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Errors that can occur in operator call API handlers.
#[derive(Debug)]
enum CallsApiError {
    /// A database query failed.
    Database(sqlx::Error),
    /// Required request parameters were missing or empty.
    MissingParameters(&'static str),
    /// The in-flight call ceiling was reached.
    CallLimitReached(usize),
    /// The control channel could not be established.
    ControlChannelUnavailable,
    /// The origination could not be sent.
    OriginateSendFailed,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl IntoResponse for CallsApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            CallsApiError::Database(e) => {
                tracing::error!(error = %e, "operator API database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            CallsApiError::MissingParameters(which) => (
                StatusCode::BAD_REQUEST,
                format!("missing required parameters: {which}"),
            ),
            CallsApiError::CallLimitReached(limit) => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("max concurrent call limit ({limit}) reached, please wait"),
            ),
            CallsApiError::ControlChannelUnavailable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "control channel not available".to_string(),
            ),
            CallsApiError::OriginateSendFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to send origination".to_string(),
            ),
        };
        (
            status,
            axum::Json(ErrorBody {
                success: false,
                message,
            }),
        )
            .into_response()
    }
}
