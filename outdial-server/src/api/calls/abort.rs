use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use kanau::processor::Processor;
use outdial_core::entities::{CampaignStatus, UpdateCampaignStatus};
use outdial_core::framework::DatabaseProcessor;
use serde::Serialize;

use super::CallsApiError;
use crate::state::AppState;

#[derive(Serialize)]
struct AbortResponse {
    success: bool,
    message: String,
    aborted_count: usize,
    hangups_requested: usize,
}

/// `POST /{campaign_id}/abort` — abort a campaign.
///
/// Persists `cancelled`, flags every in-flight recipient `aborted` in
/// the store, then best-effort requests a hangup for every live channel
/// matching a flagged recipient. Hangup failures are logged and never
/// block the abort.
pub(super) async fn abort_campaign(
    state: State<AppState>,
    Path(campaign_id): Path<i64>,
) -> Result<impl IntoResponse, CallsApiError> {
    tracing::info!(campaign_id, "operator abort requested");

    let db = DatabaseProcessor::new(state.db.clone());
    let updated = db
        .process(UpdateCampaignStatus {
            id: campaign_id,
            status: CampaignStatus::Cancelled,
            details: Some("Aborted by operator".to_string()),
        })
        .await
        .map_err(CallsApiError::Database)?;
    if !updated {
        tracing::warn!(campaign_id, "abort requested for unknown campaign");
    }

    let flagged = state.store.mark_aborted(campaign_id, "Aborted by operator");
    let mut hangups_requested = 0usize;

    if !flagged.is_empty() {
        match state.pbx.show_channels_concise().await {
            Ok(channels) => {
                for channel in channels {
                    let Some(number) = channel.dialed_number() else {
                        continue;
                    };
                    if !flagged.contains(&number) {
                        continue;
                    }
                    match state.pbx.request_hangup(&channel.channel).await {
                        Ok(output) => {
                            if output.to_ascii_lowercase().contains("requested on") {
                                hangups_requested += 1;
                                tracing::info!(
                                    campaign_id,
                                    channel = %channel.channel,
                                    "hangup requested"
                                );
                            } else {
                                tracing::warn!(
                                    campaign_id,
                                    channel = %channel.channel,
                                    output = %output,
                                    "hangup request not confirmed"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                campaign_id,
                                channel = %channel.channel,
                                error = %e,
                                "hangup request failed"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(campaign_id, error = %e, "channel listing failed during abort");
            }
        }
    }

    let message = format!(
        "Abort requested for campaign {campaign_id}. {} call(s) flagged aborted, {} hangup(s) requested.",
        flagged.len(),
        hangups_requested
    );
    tracing::info!(campaign_id, aborted = flagged.len(), hangups_requested, "abort finished");

    Ok(Json(AbortResponse {
        success: true,
        message,
        aborted_count: flagged.len(),
        hangups_requested,
    }))
}
