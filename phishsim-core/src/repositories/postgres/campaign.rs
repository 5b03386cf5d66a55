// src/repositories/postgres/campaign.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use phishsim_common::models::campaign::{
    CampaignStatus, PhishingCampaign, TargetSelector, TemplateSnapshot,
};
use phishsim_common::traits::repository_traits::CampaignRepository;
use crate::Error;

#[derive(Clone)]
pub struct PostgresCampaignRepository {
    pool: Pool<Postgres>,
}

impl PostgresCampaignRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

const CAMPAIGN_COLUMNS: &str = r#"
    campaign_id, company_id, template_id, name, status,
    selector, excluded_user_ids,
    scheduled_at, started_at, completed_at,
    tracking_window_days, template_snapshot, send_failures, created_at
"#;

fn map_campaign_row(r: &PgRow) -> Result<PhishingCampaign, Error> {
    let status: String = r.try_get("status")?;
    let selector: TargetSelector =
        serde_json::from_value(r.try_get::<serde_json::Value, _>("selector")?)?;
    let excluded: Vec<Uuid> =
        serde_json::from_value(r.try_get::<serde_json::Value, _>("excluded_user_ids")?)?;
    let snapshot: Option<TemplateSnapshot> = r
        .try_get::<Option<serde_json::Value>, _>("template_snapshot")?
        .map(serde_json::from_value)
        .transpose()?;

    Ok(PhishingCampaign {
        campaign_id: r.try_get("campaign_id")?,
        company_id: r.try_get("company_id")?,
        template_id: r.try_get("template_id")?,
        name: r.try_get("name")?,
        status: CampaignStatus::from_str(&status)
            .ok_or_else(|| Error::Parse(format!("unknown campaign status '{status}'")))?,
        selector,
        excluded_user_ids: excluded,
        scheduled_at: r.try_get("scheduled_at")?,
        started_at: r.try_get("started_at")?,
        completed_at: r.try_get("completed_at")?,
        tracking_window_days: r.try_get("tracking_window_days")?,
        template_snapshot: snapshot,
        send_failures: r.try_get("send_failures")?,
        created_at: r.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl CampaignRepository for PostgresCampaignRepository {
    async fn create_campaign(&self, campaign: &PhishingCampaign) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO phishing_campaigns (
                campaign_id, company_id, template_id, name, status,
                selector, excluded_user_ids,
                scheduled_at, started_at, completed_at,
                tracking_window_days, template_snapshot, send_failures, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
            .bind(campaign.campaign_id)
            .bind(campaign.company_id)
            .bind(campaign.template_id)
            .bind(&campaign.name)
            .bind(campaign.status.as_str())
            .bind(serde_json::to_value(&campaign.selector)?)
            .bind(serde_json::to_value(&campaign.excluded_user_ids)?)
            .bind(campaign.scheduled_at)
            .bind(campaign.started_at)
            .bind(campaign.completed_at)
            .bind(campaign.tracking_window_days)
            .bind(
                campaign
                    .template_snapshot
                    .as_ref()
                    .map(serde_json::to_value)
                    .transpose()?,
            )
            .bind(campaign.send_failures)
            .bind(campaign.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<PhishingCampaign>, Error> {
        let row = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM phishing_campaigns WHERE campaign_id = $1"
        ))
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_campaign_row).transpose()
    }

    async fn list_campaigns(&self, company_id: Uuid) -> Result<Vec<PhishingCampaign>, Error> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM phishing_campaigns \
             WHERE company_id = $1 ORDER BY created_at DESC"
        ))
            .bind(company_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_campaign_row).collect()
    }

    async fn transition_status(
        &self,
        campaign_id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool, Error> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let res = sqlx::query(
            r#"
            UPDATE phishing_campaigns
            SET status = $3,
                started_at = CASE
                    WHEN $3 = 'running' THEN COALESCE(started_at, $4)
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $3 IN ('completed', 'cancelled') THEN COALESCE(completed_at, $4)
                    ELSE completed_at
                END
            WHERE campaign_id = $1 AND status = ANY($2)
            "#,
        )
            .bind(campaign_id)
            .bind(&from)
            .bind(to.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_schedule(&self, campaign_id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE phishing_campaigns
            SET scheduled_at = $2
            WHERE campaign_id = $1
            "#,
        )
            .bind(campaign_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn snapshot_template(
        &self,
        campaign_id: Uuid,
        snapshot: &TemplateSnapshot,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE phishing_campaigns
            SET template_snapshot = $2
            WHERE campaign_id = $1 AND template_snapshot IS NULL
            "#,
        )
            .bind(campaign_id)
            .bind(serde_json::to_value(snapshot)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_send_failures(&self, campaign_id: Uuid) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE phishing_campaigns
            SET send_failures = send_failures + 1
            WHERE campaign_id = $1
            "#,
        )
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn due_for_launch(&self, now: DateTime<Utc>) -> Result<Vec<PhishingCampaign>, Error> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM phishing_campaigns \
             WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= $1"
        ))
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_campaign_row).collect()
    }

    async fn due_for_completion(&self, now: DateTime<Utc>) -> Result<Vec<PhishingCampaign>, Error> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM phishing_campaigns \
             WHERE status = 'running' AND started_at IS NOT NULL \
               AND started_at + make_interval(days => tracking_window_days) <= $1"
        ))
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_campaign_row).collect()
    }
}
