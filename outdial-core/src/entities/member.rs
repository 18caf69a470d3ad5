//! Recipient directory access.
//!
//! Members are owned by the surrounding application; the dialer core
//! only lists eligible recipients and flips the do-not-call flag on
//! keypad opt-out.

use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

/// A call recipient.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Member {
    pub id: i64,
    pub phone_number: String,
    pub do_not_call: bool,
}

/// Eligible recipients for a campaign: not opted out, and inside the
/// group filter when one is set.
#[derive(Debug, Clone, Copy)]
pub struct ListCampaignRecipients {
    pub group_filter: Option<i64>,
}

impl Processor<ListCampaignRecipients> for DatabaseProcessor {
    type Output = Vec<Member>;
    type Error = sqlx::Error;

    async fn process(&self, query: ListCampaignRecipients) -> Result<Vec<Member>, sqlx::Error> {
        sqlx::query_as::<_, Member>(
            r#"
            SELECT DISTINCT m.id, m.phone_number, m.do_not_call
            FROM members m
            LEFT JOIN member_groups mg ON mg.member_id = m.id
            WHERE m.do_not_call = FALSE
              AND ($1::BIGINT IS NULL OR mg.group_id = $1)
            ORDER BY m.id
            "#,
        )
        .bind(query.group_filter)
        .fetch_all(&self.pool)
        .await
    }
}

/// Flip the persisted do-not-call flag for a phone number.
///
/// Returns `false` when no member carries the number.
#[derive(Debug, Clone)]
pub struct SetDoNotCallByPhone {
    pub phone_number: String,
}

impl Processor<SetDoNotCallByPhone> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;

    async fn process(&self, query: SetDoNotCallByPhone) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE members SET do_not_call = TRUE WHERE phone_number = $1
            "#,
        )
        .bind(&query.phone_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
