use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Error;
use crate::models::campaign::{CampaignCounters, CampaignStatus, PhishingCampaign, TemplateSnapshot};
use crate::models::result::{ClientInfo, PhishingResult};
use crate::models::risk::RiskScore;
use crate::models::template::PhishingTemplate;

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn create_template(&self, template: &PhishingTemplate) -> Result<(), Error>;
    async fn get_template(&self, template_id: Uuid) -> Result<Option<PhishingTemplate>, Error>;
    async fn list_templates(&self, company_id: Uuid) -> Result<Vec<PhishingTemplate>, Error>;
}

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create_campaign(&self, campaign: &PhishingCampaign) -> Result<(), Error>;
    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<PhishingCampaign>, Error>;
    async fn list_campaigns(&self, company_id: Uuid) -> Result<Vec<PhishingCampaign>, Error>;

    /// Conditional one-way lifecycle step: succeeds (true) only if the
    /// campaign is currently in one of `from`. Sets started_at /
    /// completed_at as a side effect of entering Running / Completed /
    /// Cancelled.
    async fn transition_status(
        &self,
        campaign_id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool, Error>;

    async fn set_schedule(&self, campaign_id: Uuid, at: DateTime<Utc>) -> Result<(), Error>;

    /// Copy-on-launch: persist the immutable template snapshot.
    async fn snapshot_template(
        &self,
        campaign_id: Uuid,
        snapshot: &TemplateSnapshot,
    ) -> Result<(), Error>;

    async fn increment_send_failures(&self, campaign_id: Uuid) -> Result<(), Error>;

    /// Scheduled campaigns whose scheduled_at has arrived.
    async fn due_for_launch(&self, now: DateTime<Utc>) -> Result<Vec<PhishingCampaign>, Error>;

    /// Running campaigns whose tracking window has elapsed.
    async fn due_for_completion(&self, now: DateTime<Utc>) -> Result<Vec<PhishingCampaign>, Error>;
}

/// Per-(campaign, recipient) tracking rows.
///
/// Every `record_*` mutation is a single conditional update applying the
/// monotonic-max rule at the storage layer; callers never read-modify-write.
/// Each returns the row as it stands after the update, or None when the
/// token does not exist or the update is refused: bounced rows refuse
/// everything, and open/click/submit additionally require the campaign to
/// still be running.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn create_result(&self, result: &PhishingResult) -> Result<(), Error>;
    async fn get_by_tracking_id(&self, tracking_id: &str) -> Result<Option<PhishingResult>, Error>;
    async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<PhishingResult>, Error>;

    /// pending -> sent; false if the row already left pending.
    async fn mark_sent(&self, result_id: Uuid, attempts: i32) -> Result<bool, Error>;
    /// pending -> bounced; false if the row already left pending.
    async fn mark_bounced(&self, result_id: Uuid, attempts: i32) -> Result<bool, Error>;

    async fn record_open(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error>;
    async fn record_click(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error>;
    async fn record_submit(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error>;
    /// Sticky report flag; accepted from any non-bounced status, including
    /// after the campaign completed.
    async fn record_report(&self, tracking_id: &str) -> Result<Option<PhishingResult>, Error>;

    /// Returns true only the first time the flag flips, so duplicate
    /// tracking events assign remedial training at most once.
    async fn set_training_required(&self, result_id: Uuid) -> Result<bool, Error>;
    async fn set_training_completed(&self, result_id: Uuid) -> Result<(), Error>;

    /// Aggregate counters recomputed from the rows (cache coherence by
    /// construction).
    async fn campaign_counters(&self, campaign_id: Uuid) -> Result<CampaignCounters, Error>;

    /// Rows for this user belonging to campaigns completed at or after
    /// `completed_since`, for risk scoring.
    async fn user_history(
        &self,
        user_id: Uuid,
        completed_since: DateTime<Utc>,
    ) -> Result<Vec<PhishingResult>, Error>;
}

#[async_trait]
pub trait RiskScoreRepository: Send + Sync {
    /// Last-writer-wins upsert; bumps the stored version on every write.
    async fn upsert_score(&self, score: &RiskScore) -> Result<(), Error>;
    async fn get_score(&self, user_id: Uuid) -> Result<Option<RiskScore>, Error>;
    /// Users with a score on record, for the nightly recency sweep.
    async fn scored_user_ids(&self) -> Result<Vec<Uuid>, Error>;
}
