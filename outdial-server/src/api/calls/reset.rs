use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use outdial_core::calls::CallStatus;
use serde::Serialize;

use super::{CallStatusView, to_status_view};
use crate::state::AppState;

#[derive(Serialize)]
struct ResetResponse {
    success: bool,
    message: &'static str,
    #[serde(flatten)]
    status: CallStatusView,
}

/// `POST /{campaign_id}/reset/{phone}` — reset one recipient to
/// `waiting`, clearing the finalized flag.
pub(super) async fn reset_recipient(
    state: State<AppState>,
    Path((campaign_id, phone_number)): Path<(i64, String)>,
) -> impl IntoResponse {
    let phone_number = phone_number.trim().to_string();
    tracing::info!(campaign_id, phone_number = %phone_number, "operator reset to waiting");

    state.store.update(
        campaign_id,
        &phone_number,
        CallStatus::Waiting,
        "Status manually reset by operator",
        None,
        None,
    );

    let record = state.store.snapshot(campaign_id, &phone_number);
    Json(ResetResponse {
        success: true,
        message: "recipient reset to waiting",
        status: to_status_view(&phone_number, record.as_ref()),
    })
}
