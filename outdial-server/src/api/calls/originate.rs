use axum::{Json, extract::State, response::IntoResponse};
use kanau::processor::Processor;
use outdial_ami::proto::{AmiAction, OriginateRequest};
use outdial_core::calls::CallStatus;
use outdial_core::entities::announcement::playback_path;
use outdial_core::entities::{CampaignStatus, GetCampaignById, TryTransitionCampaign};
use outdial_core::framework::DatabaseProcessor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CallsApiError;
use crate::state::AppState;

/// Caller-id text used when the campaign carries none.
const DEFAULT_CALLER_ID: &str = "Outdial";

#[derive(Debug, Deserialize)]
pub(super) struct OriginateCallRequest {
    campaign_id: i64,
    phone_number: String,
    member_id: i64,
    announcement_file: String,
}

#[derive(Serialize)]
struct OriginateCallResponse {
    success: bool,
    message: &'static str,
    status: &'static str,
}

/// `POST /originate` — originate one call.
///
/// Registers the pending correlation and writes the initial `dialing`
/// record before the request goes on the wire; every failure path
/// downgrades that record to `rejected` so the attempt stays accounted
/// for.
pub(super) async fn originate_call(
    state: State<AppState>,
    Json(request): Json<OriginateCallRequest>,
) -> Result<impl IntoResponse, CallsApiError> {
    let phone_number = request.phone_number.trim().to_string();
    if phone_number.is_empty() || request.announcement_file.is_empty() {
        return Err(CallsApiError::MissingParameters(
            "phone_number, announcement_file",
        ));
    }
    let campaign_id = request.campaign_id;

    let (max_concurrent, context, media_dir, timeout_ms) = {
        let config = state.config().await;
        (
            config.dialer.max_concurrent_calls,
            config.dialer.channel_context.clone(),
            config.dialer.media_dir.clone(),
            config.dialer.originate_timeout_ms,
        )
    };

    let in_flight = state.store.in_flight_count();
    if in_flight >= max_concurrent {
        tracing::warn!(in_flight, max_concurrent, "operator origination rejected at call ceiling");
        return Err(CallsApiError::CallLimitReached(max_concurrent));
    }

    let db = DatabaseProcessor::new(state.db.clone());
    let campaign = db
        .process(GetCampaignById { id: campaign_id })
        .await
        .map_err(CallsApiError::Database)?;
    let caller_id_name = campaign
        .as_ref()
        .map(|c| c.caller_id_name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_CALLER_ID.to_string());

    tracing::info!(
        campaign_id,
        phone_number = %phone_number,
        member_id = request.member_id,
        "operator origination requested"
    );

    if let Err(e) = state.supervisor.ensure_connected().await {
        tracing::error!(error = %e, "control channel unavailable for operator origination");
        state.store.update(
            campaign_id,
            &phone_number,
            CallStatus::Rejected,
            "Control channel unavailable",
            None,
            None,
        );
        return Err(CallsApiError::ControlChannelUnavailable);
    }

    let action_token = Uuid::new_v4().to_string();
    state
        .pending
        .register(&phone_number, campaign_id, &action_token);
    state.store.update(
        campaign_id,
        &phone_number,
        CallStatus::Dialing,
        "Call initiated via operator API",
        None,
        Some(&action_token),
    );

    let originate = OriginateRequest {
        number: phone_number.clone(),
        context,
        playback_path: playback_path(&media_dir, &request.announcement_file),
        caller_id_name,
        campaign_id,
        member_id: request.member_id,
        timeout_ms,
        action_id: action_token.clone(),
    };

    if let Err(e) = state
        .supervisor
        .send_action(&AmiAction::originate(&originate))
        .await
    {
        tracing::error!(campaign_id, phone_number = %phone_number, error = %e, "origination send failed");
        state.store.update(
            campaign_id,
            &phone_number,
            CallStatus::Rejected,
            &format!("Failed to send origination: {e}"),
            None,
            Some(&action_token),
        );
        return Err(CallsApiError::OriginateSendFailed);
    }

    // A manually triggered first call moves a ready campaign into
    // progress; losing the flip to the scheduler is fine.
    if campaign.is_some_and(|c| c.status == CampaignStatus::Ready) {
        let _ = db
            .process(TryTransitionCampaign {
                id: campaign_id,
                from: CampaignStatus::Ready,
                to: CampaignStatus::InProgress,
                details: Some("Started by operator origination".to_string()),
            })
            .await;
    }

    Ok(Json(OriginateCallResponse {
        success: true,
        message: "call originated",
        status: "dialing",
    }))
}
