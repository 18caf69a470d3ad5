use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use outdial_core::calls::CallStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{CallStatusView, CallsApiError, to_status_view};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct StatusQuery {
    /// `?reset=1` resets the recipient to `waiting` before reading.
    #[serde(default)]
    reset: Option<u8>,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    #[serde(flatten)]
    status: CallStatusView,
}

/// `GET /{campaign_id}/status/{phone}` — point-in-time copy of one
/// recipient's status.
pub(super) async fn get_call_status(
    state: State<AppState>,
    Path((campaign_id, phone_number)): Path<(i64, String)>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    let phone_number = phone_number.trim().to_string();

    if query.reset == Some(1) {
        tracing::info!(campaign_id, phone_number = %phone_number, "operator reset to waiting");
        state.store.update(
            campaign_id,
            &phone_number,
            CallStatus::Waiting,
            "Status manually reset by operator",
            None,
            None,
        );
    }

    let record = state.store.snapshot(campaign_id, &phone_number);
    Json(StatusResponse {
        success: true,
        status: to_status_view(&phone_number, record.as_ref()),
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct BatchStatusRequest {
    phone_numbers: Vec<String>,
}

#[derive(Serialize)]
struct BatchStatusResponse {
    success: bool,
    results: HashMap<String, CallStatusView>,
}

/// `POST /{campaign_id}/status` — batch status for a list of phones.
pub(super) async fn batch_call_status(
    state: State<AppState>,
    Path(campaign_id): Path<i64>,
    Json(request): Json<BatchStatusRequest>,
) -> Result<impl IntoResponse, CallsApiError> {
    if request.phone_numbers.is_empty() {
        return Err(CallsApiError::MissingParameters("phone_numbers"));
    }

    let phones: Vec<String> = request
        .phone_numbers
        .iter()
        .map(|p| p.trim().to_string())
        .collect();
    let records = state.store.batch_snapshot(campaign_id, &phones);

    let results = records
        .into_iter()
        .map(|(phone, record)| {
            let view = to_status_view(&phone, record.as_ref());
            (phone, view)
        })
        .collect();

    Ok(Json(BatchStatusResponse {
        success: true,
        results,
    }))
}
