// src/repositories/postgres/result.rs
//
// Every tracking mutation below is a single conditional UPDATE implementing
// the monotonic-max rule in SQL, so concurrent requests for the same token
// (double clicks, proxy pre-fetches, retries) can never regress a row or
// duplicate a first-occurrence timestamp.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use phishsim_common::models::campaign::CampaignCounters;
use phishsim_common::models::result::{ClientInfo, PhishingResult, ResultStatus};
use phishsim_common::traits::repository_traits::ResultRepository;
use crate::Error;

#[derive(Clone)]
pub struct PostgresResultRepository {
    pool: Pool<Postgres>,
}

impl PostgresResultRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

const RESULT_COLUMNS: &str = r#"
    result_id, campaign_id, user_id, tracking_id, status,
    reported, reported_at, report_count,
    sent_at, bounced_at, send_attempts,
    email_opened_at, last_opened_at, open_count,
    link_clicked_at, last_clicked_at, click_count,
    data_submitted_at, last_submitted_at, submit_count,
    ip_addresses, user_agents,
    training_required, training_completed, created_at
"#;

// Open/click/submit are only valid while the campaign is running. Checking
// it inside the UPDATE closes the race against the completion sweep; the
// service-level gate is just the fast path.
const CAMPAIGN_RUNNING_GUARD: &str = r#"
    AND EXISTS (
        SELECT 1 FROM phishing_campaigns c
        WHERE c.campaign_id = phishing_results.campaign_id
          AND c.status = 'running'
    )
"#;

// Capped, deduplicating TEXT[] append used for both client lists; the cap
// mirrors CLIENT_LIST_CAP. $N is the candidate value, `col` the array column.
macro_rules! capped_append {
    ($col:literal, $param:literal) => {
        concat!(
            $col, " = CASE WHEN ", $param, "::text IS NULL OR ", $param, " = ANY(", $col,
            ") OR cardinality(", $col, ") >= ", "10",
            " THEN ", $col, " ELSE array_append(", $col, ", ", $param, ") END"
        )
    };
}

fn map_result_row(r: &PgRow) -> Result<PhishingResult, Error> {
    let status: String = r.try_get("status")?;
    Ok(PhishingResult {
        result_id: r.try_get("result_id")?,
        campaign_id: r.try_get("campaign_id")?,
        user_id: r.try_get("user_id")?,
        tracking_id: r.try_get("tracking_id")?,
        status: ResultStatus::from_str(&status)
            .ok_or_else(|| Error::Parse(format!("unknown result status '{status}'")))?,
        reported: r.try_get("reported")?,
        reported_at: r.try_get("reported_at")?,
        report_count: r.try_get("report_count")?,
        sent_at: r.try_get("sent_at")?,
        bounced_at: r.try_get("bounced_at")?,
        send_attempts: r.try_get("send_attempts")?,
        email_opened_at: r.try_get("email_opened_at")?,
        last_opened_at: r.try_get("last_opened_at")?,
        open_count: r.try_get("open_count")?,
        link_clicked_at: r.try_get("link_clicked_at")?,
        last_clicked_at: r.try_get("last_clicked_at")?,
        click_count: r.try_get("click_count")?,
        data_submitted_at: r.try_get("data_submitted_at")?,
        last_submitted_at: r.try_get("last_submitted_at")?,
        submit_count: r.try_get("submit_count")?,
        ip_addresses: r.try_get("ip_addresses")?,
        user_agents: r.try_get("user_agents")?,
        training_required: r.try_get("training_required")?,
        training_completed: r.try_get("training_completed")?,
        created_at: r.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl ResultRepository for PostgresResultRepository {
    async fn create_result(&self, result: &PhishingResult) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO phishing_results (
                result_id, campaign_id, user_id, tracking_id, status,
                reported, report_count, send_attempts,
                open_count, click_count, submit_count,
                ip_addresses, user_agents,
                training_required, training_completed, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
            .bind(result.result_id)
            .bind(result.campaign_id)
            .bind(result.user_id)
            .bind(&result.tracking_id)
            .bind(result.status.as_str())
            .bind(result.reported)
            .bind(result.report_count)
            .bind(result.send_attempts)
            .bind(result.open_count)
            .bind(result.click_count)
            .bind(result.submit_count)
            .bind(&result.ip_addresses)
            .bind(&result.user_agents)
            .bind(result.training_required)
            .bind(result.training_completed)
            .bind(result.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_by_tracking_id(&self, tracking_id: &str) -> Result<Option<PhishingResult>, Error> {
        let row = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM phishing_results WHERE tracking_id = $1"
        ))
            .bind(tracking_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_result_row).transpose()
    }

    async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<PhishingResult>, Error> {
        let rows = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM phishing_results \
             WHERE campaign_id = $1 ORDER BY created_at"
        ))
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_result_row).collect()
    }

    async fn mark_sent(&self, result_id: Uuid, attempts: i32) -> Result<bool, Error> {
        let res = sqlx::query(
            r#"
            UPDATE phishing_results
            SET status = 'sent', sent_at = $2, send_attempts = $3
            WHERE result_id = $1 AND status = 'pending'
            "#,
        )
            .bind(result_id)
            .bind(Utc::now())
            .bind(attempts)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn mark_bounced(&self, result_id: Uuid, attempts: i32) -> Result<bool, Error> {
        let res = sqlx::query(
            r#"
            UPDATE phishing_results
            SET status = 'bounced', bounced_at = $2, send_attempts = $3
            WHERE result_id = $1 AND status = 'pending'
            "#,
        )
            .bind(result_id)
            .bind(Utc::now())
            .bind(attempts)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn record_open(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE phishing_results
            SET status = CASE WHEN status IN ('pending', 'sent') THEN 'opened' ELSE status END,
                email_opened_at = COALESCE(email_opened_at, $2),
                last_opened_at = $2,
                open_count = open_count + 1,
                {ips},
                {uas}
            WHERE tracking_id = $1 AND status <> 'bounced' {CAMPAIGN_RUNNING_GUARD}
            RETURNING {RESULT_COLUMNS}
            "#,
            ips = capped_append!("ip_addresses", "$3"),
            uas = capped_append!("user_agents", "$4"),
        ))
            .bind(tracking_id)
            .bind(Utc::now())
            .bind(client.ip.as_deref())
            .bind(client.user_agent.as_deref())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_result_row).transpose()
    }

    async fn record_click(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error> {
        // A click implies the mail was opened: the first-open timestamp is
        // coalesced, but open_count only counts actual open events.
        let row = sqlx::query(&format!(
            r#"
            UPDATE phishing_results
            SET status = CASE
                    WHEN status IN ('pending', 'sent', 'opened') THEN 'clicked'
                    ELSE status
                END,
                email_opened_at = COALESCE(email_opened_at, $2),
                link_clicked_at = COALESCE(link_clicked_at, $2),
                last_clicked_at = $2,
                click_count = click_count + 1,
                {ips},
                {uas}
            WHERE tracking_id = $1 AND status <> 'bounced' {CAMPAIGN_RUNNING_GUARD}
            RETURNING {RESULT_COLUMNS}
            "#,
            ips = capped_append!("ip_addresses", "$3"),
            uas = capped_append!("user_agents", "$4"),
        ))
            .bind(tracking_id)
            .bind(Utc::now())
            .bind(client.ip.as_deref())
            .bind(client.user_agent.as_deref())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_result_row).transpose()
    }

    async fn record_submit(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE phishing_results
            SET status = CASE
                    WHEN status IN ('pending', 'sent', 'opened', 'clicked') THEN 'data_submitted'
                    ELSE status
                END,
                email_opened_at = COALESCE(email_opened_at, $2),
                link_clicked_at = COALESCE(link_clicked_at, $2),
                data_submitted_at = COALESCE(data_submitted_at, $2),
                last_submitted_at = $2,
                submit_count = submit_count + 1,
                {ips},
                {uas}
            WHERE tracking_id = $1 AND status <> 'bounced' {CAMPAIGN_RUNNING_GUARD}
            RETURNING {RESULT_COLUMNS}
            "#,
            ips = capped_append!("ip_addresses", "$3"),
            uas = capped_append!("user_agents", "$4"),
        ))
            .bind(tracking_id)
            .bind(Utc::now())
            .bind(client.ip.as_deref())
            .bind(client.user_agent.as_deref())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_result_row).transpose()
    }

    async fn record_report(&self, tracking_id: &str) -> Result<Option<PhishingResult>, Error> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE phishing_results
            SET reported = TRUE,
                reported_at = COALESCE(reported_at, $2),
                report_count = report_count + 1
            WHERE tracking_id = $1 AND status <> 'bounced'
            RETURNING {RESULT_COLUMNS}
            "#,
        ))
            .bind(tracking_id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_result_row).transpose()
    }

    async fn set_training_required(&self, result_id: Uuid) -> Result<bool, Error> {
        let res = sqlx::query(
            r#"
            UPDATE phishing_results
            SET training_required = TRUE
            WHERE result_id = $1 AND training_required = FALSE
            "#,
        )
            .bind(result_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_training_completed(&self, result_id: Uuid) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE phishing_results
            SET training_completed = TRUE
            WHERE result_id = $1
            "#,
        )
            .bind(result_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn campaign_counters(&self, campaign_id: Uuid) -> Result<CampaignCounters, Error> {
        let r = sqlx::query(
            r#"
            SELECT
                COUNT(*)                                                         AS total,
                COUNT(*) FILTER (WHERE status NOT IN ('pending', 'bounced'))     AS sent,
                COUNT(*) FILTER (WHERE status = 'bounced')                       AS bounced,
                COUNT(*) FILTER (WHERE status IN ('opened', 'clicked', 'data_submitted')) AS opened,
                COUNT(*) FILTER (WHERE status IN ('clicked', 'data_submitted'))  AS clicked,
                COUNT(*) FILTER (WHERE status = 'data_submitted')                AS submitted,
                COUNT(*) FILTER (WHERE reported)                                 AS reported
            FROM phishing_results
            WHERE campaign_id = $1
            "#,
        )
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(CampaignCounters {
            total: r.try_get("total")?,
            sent: r.try_get("sent")?,
            bounced: r.try_get("bounced")?,
            opened: r.try_get("opened")?,
            clicked: r.try_get("clicked")?,
            submitted: r.try_get("submitted")?,
            reported: r.try_get("reported")?,
        })
    }

    async fn user_history(
        &self,
        user_id: Uuid,
        completed_since: DateTime<Utc>,
    ) -> Result<Vec<PhishingResult>, Error> {
        // Columns qualified with r. because the join shares campaign_id,
        // status and created_at with phishing_campaigns.
        let qualified = RESULT_COLUMNS
            .split(',')
            .map(|c| format!("r.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = sqlx::query(&format!(
            r#"
            SELECT {qualified}
            FROM phishing_results r
            JOIN phishing_campaigns c ON c.campaign_id = r.campaign_id
            WHERE r.user_id = $1
              AND c.status = 'completed'
              AND c.completed_at >= $2
            ORDER BY c.completed_at DESC
            "#,
        ))
            .bind(user_id)
            .bind(completed_since)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_result_row).collect()
    }
}
