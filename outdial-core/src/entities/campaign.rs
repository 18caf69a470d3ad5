//! Campaign persistence.
//!
//! A campaign is the only persisted entity the dialer core mutates.
//! Everything else about the schema (who creates campaigns, how members
//! are managed) belongs to the surrounding application.

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use std::collections::HashSet;

/// A scheduled announcement batch.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Campaign {
    pub id: i64,
    pub announcement_id: i64,
    pub scheduled_at: time::PrimitiveDateTime,
    /// Restrict to one recipient group; `None` targets everyone.
    pub group_filter: Option<i64>,
    pub caller_id_name: String,
    pub status: CampaignStatus,
    pub details: Option<String>,
}

/// Persisted campaign lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, serde::Serialize)]
#[sqlx(type_name = "campaign_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Ready,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    /// A terminal campaign never dials again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetch one campaign by id.
#[derive(Debug, Clone, Copy)]
pub struct GetCampaignById {
    pub id: i64,
}

impl Processor<GetCampaignById> for DatabaseProcessor {
    type Output = Option<Campaign>;
    type Error = sqlx::Error;

    async fn process(&self, query: GetCampaignById) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, announcement_id, scheduled_at, group_filter, caller_id_name, status, details
            FROM campaigns
            WHERE id = $1
            "#,
        )
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await
    }
}

/// Campaigns due for promotion: still `pending` with a scheduled time at
/// or before `now`.
#[derive(Debug, Clone, Copy)]
pub struct ListDueCampaigns {
    pub now: time::PrimitiveDateTime,
}

impl Processor<ListDueCampaigns> for DatabaseProcessor {
    type Output = Vec<Campaign>;
    type Error = sqlx::Error;

    async fn process(&self, query: ListDueCampaigns) -> Result<Vec<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, announcement_id, scheduled_at, group_filter, caller_id_name, status, details
            FROM campaigns
            WHERE scheduled_at <= $1 AND status = 'pending'
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(query.now)
        .fetch_all(&self.pool)
        .await
    }
}

/// Atomic conditional status flip.
///
/// Returns `true` only when the row was still in `from`; racing workers
/// observe `false` and treat the promotion as a no-op.
#[derive(Debug, Clone)]
pub struct TryTransitionCampaign {
    pub id: i64,
    pub from: CampaignStatus,
    pub to: CampaignStatus,
    pub details: Option<String>,
}

impl Processor<TryTransitionCampaign> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;

    async fn process(&self, query: TryTransitionCampaign) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $1, details = COALESCE($2, details)
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(query.to)
        .bind(query.details)
        .bind(query.id)
        .bind(query.from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Unconditional status update.
#[derive(Debug, Clone)]
pub struct UpdateCampaignStatus {
    pub id: i64,
    pub status: CampaignStatus,
    pub details: Option<String>,
}

impl Processor<UpdateCampaignStatus> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;

    async fn process(&self, query: UpdateCampaignStatus) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $1, details = COALESCE($2, details)
            WHERE id = $3
            "#,
        )
        .bind(query.status)
        .bind(query.details)
        .bind(query.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Of the given ids, which are persisted as actively dialing
/// (`in_progress` or `ready`).
#[derive(Debug, Clone)]
pub struct GetActiveCampaignIds {
    pub ids: Vec<i64>,
}

impl Processor<GetActiveCampaignIds> for DatabaseProcessor {
    type Output = HashSet<i64>;
    type Error = sqlx::Error;

    async fn process(&self, query: GetActiveCampaignIds) -> Result<HashSet<i64>, sqlx::Error> {
        if query.ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM campaigns
            WHERE id = ANY($1) AND status IN ('in_progress', 'ready')
            "#,
        )
        .bind(&query.ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Correlation fallback of last resort: the most recent active campaign
/// whose recipient filter covers the given phone number.
///
/// `in_progress` campaigns win over `ready`, newest schedule first.
#[derive(Debug, Clone)]
pub struct FindActiveCampaignForRecipient {
    pub phone_number: String,
}

impl Processor<FindActiveCampaignForRecipient> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;

    async fn process(
        &self,
        query: FindActiveCampaignForRecipient,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT c.id
            FROM campaigns c
            JOIN members m ON m.phone_number = $1
            LEFT JOIN member_groups mg ON mg.member_id = m.id
            WHERE c.status IN ('in_progress', 'ready')
              AND (c.group_filter IS NULL OR c.group_filter = mg.group_id)
            ORDER BY CASE WHEN c.status = 'in_progress' THEN 1 ELSE 2 END,
                     c.scheduled_at DESC
            LIMIT 1
            "#,
        )
        .bind(&query.phone_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }
}
