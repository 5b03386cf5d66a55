//! In-memory repository doubles for service-level tests.
//!
//! These mirror the Postgres repositories' conditional-update semantics,
//! including the monotonic-max tracking rule: each mutation happens under
//! the row's map entry, so concurrent calls interleave the same way the
//! single-statement SQL updates do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use phishsim_common::models::campaign::{
    CampaignCounters, CampaignStatus, PhishingCampaign, TemplateSnapshot,
};
use phishsim_common::models::result::{ClientInfo, PhishingResult, ResultStatus, CLIENT_LIST_CAP};
use phishsim_common::models::risk::RiskScore;
use phishsim_common::models::template::PhishingTemplate;
use phishsim_common::traits::repository_traits::{
    CampaignRepository, ResultRepository, RiskScoreRepository, TemplateRepository,
};

use crate::Error;

#[derive(Default)]
pub struct MemoryTemplateRepository {
    items: DashMap<Uuid, PhishingTemplate>,
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateRepository {
    async fn create_template(&self, template: &PhishingTemplate) -> Result<(), Error> {
        self.items.insert(template.template_id, template.clone());
        Ok(())
    }

    async fn get_template(&self, template_id: Uuid) -> Result<Option<PhishingTemplate>, Error> {
        Ok(self.items.get(&template_id).map(|t| t.clone()))
    }

    async fn list_templates(&self, company_id: Uuid) -> Result<Vec<PhishingTemplate>, Error> {
        Ok(self
            .items
            .iter()
            .filter(|t| t.company_id == company_id)
            .map(|t| t.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryCampaignRepository {
    items: DashMap<Uuid, PhishingCampaign>,
}

impl MemoryCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignRepository for MemoryCampaignRepository {
    async fn create_campaign(&self, campaign: &PhishingCampaign) -> Result<(), Error> {
        self.items.insert(campaign.campaign_id, campaign.clone());
        Ok(())
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<PhishingCampaign>, Error> {
        Ok(self.items.get(&campaign_id).map(|c| c.clone()))
    }

    async fn list_campaigns(&self, company_id: Uuid) -> Result<Vec<PhishingCampaign>, Error> {
        Ok(self
            .items
            .iter()
            .filter(|c| c.company_id == company_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn transition_status(
        &self,
        campaign_id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool, Error> {
        let Some(mut c) = self.items.get_mut(&campaign_id) else {
            return Ok(false);
        };
        if !from.contains(&c.status) {
            return Ok(false);
        }
        c.status = to;
        let now = Utc::now();
        match to {
            CampaignStatus::Running => {
                c.started_at.get_or_insert(now);
            }
            CampaignStatus::Completed | CampaignStatus::Cancelled => {
                c.completed_at.get_or_insert(now);
            }
            _ => {}
        }
        Ok(true)
    }

    async fn set_schedule(&self, campaign_id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
        if let Some(mut c) = self.items.get_mut(&campaign_id) {
            c.scheduled_at = Some(at);
        }
        Ok(())
    }

    async fn snapshot_template(
        &self,
        campaign_id: Uuid,
        snapshot: &TemplateSnapshot,
    ) -> Result<(), Error> {
        if let Some(mut c) = self.items.get_mut(&campaign_id) {
            if c.template_snapshot.is_none() {
                c.template_snapshot = Some(snapshot.clone());
            }
        }
        Ok(())
    }

    async fn increment_send_failures(&self, campaign_id: Uuid) -> Result<(), Error> {
        if let Some(mut c) = self.items.get_mut(&campaign_id) {
            c.send_failures += 1;
        }
        Ok(())
    }

    async fn due_for_launch(&self, now: DateTime<Utc>) -> Result<Vec<PhishingCampaign>, Error> {
        Ok(self
            .items
            .iter()
            .filter(|c| {
                c.status == CampaignStatus::Scheduled
                    && c.scheduled_at.map(|t| t <= now).unwrap_or(false)
            })
            .map(|c| c.clone())
            .collect())
    }

    async fn due_for_completion(&self, now: DateTime<Utc>) -> Result<Vec<PhishingCampaign>, Error> {
        Ok(self
            .items
            .iter()
            .filter(|c| {
                c.status == CampaignStatus::Running
                    && c.tracking_window_ends_at().map(|t| t <= now).unwrap_or(false)
            })
            .map(|c| c.clone())
            .collect())
    }
}

pub struct MemoryResultRepository {
    rows: DashMap<Uuid, PhishingResult>,
    by_token: DashMap<String, Uuid>,
    campaigns: Arc<MemoryCampaignRepository>,
}

impl MemoryResultRepository {
    pub fn new(campaigns: Arc<MemoryCampaignRepository>) -> Self {
        Self {
            rows: DashMap::new(),
            by_token: DashMap::new(),
            campaigns,
        }
    }

    fn capped_push(list: &mut Vec<String>, value: &Option<String>) {
        if let Some(v) = value {
            if list.len() < CLIENT_LIST_CAP && !list.iter().any(|x| x == v) {
                list.push(v.clone());
            }
        }
    }

    /// Run `apply` under the row's entry lock, skipping bounced rows the
    /// way the SQL `status <> 'bounced'` guard does. With `require_running`
    /// the campaign-status guard applies too, mirroring the EXISTS clause
    /// on the open/click/submit updates.
    fn mutate(
        &self,
        tracking_id: &str,
        require_running: bool,
        apply: impl FnOnce(&mut PhishingResult),
    ) -> Option<PhishingResult> {
        let result_id = *self.by_token.get(tracking_id)?;
        let mut row = self.rows.get_mut(&result_id)?;
        if row.status == ResultStatus::Bounced {
            return None;
        }
        if require_running {
            let running = self
                .campaigns
                .items
                .get(&row.campaign_id)
                .map(|c| c.status == CampaignStatus::Running)
                .unwrap_or(false);
            if !running {
                return None;
            }
        }
        apply(&mut row);
        Some(row.clone())
    }
}

#[async_trait]
impl ResultRepository for MemoryResultRepository {
    async fn create_result(&self, result: &PhishingResult) -> Result<(), Error> {
        self.by_token
            .insert(result.tracking_id.clone(), result.result_id);
        self.rows.insert(result.result_id, result.clone());
        Ok(())
    }

    async fn get_by_tracking_id(&self, tracking_id: &str) -> Result<Option<PhishingResult>, Error> {
        let Some(id) = self.by_token.get(tracking_id) else {
            return Ok(None);
        };
        Ok(self.rows.get(&id).map(|r| r.clone()))
    }

    async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<PhishingResult>, Error> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .map(|r| r.clone())
            .collect())
    }

    async fn mark_sent(&self, result_id: Uuid, attempts: i32) -> Result<bool, Error> {
        let Some(mut row) = self.rows.get_mut(&result_id) else {
            return Ok(false);
        };
        if row.status != ResultStatus::Pending {
            return Ok(false);
        }
        row.status = ResultStatus::Sent;
        row.sent_at = Some(Utc::now());
        row.send_attempts = attempts;
        Ok(true)
    }

    async fn mark_bounced(&self, result_id: Uuid, attempts: i32) -> Result<bool, Error> {
        let Some(mut row) = self.rows.get_mut(&result_id) else {
            return Ok(false);
        };
        if row.status != ResultStatus::Pending {
            return Ok(false);
        }
        row.status = ResultStatus::Bounced;
        row.bounced_at = Some(Utc::now());
        row.send_attempts = attempts;
        Ok(true)
    }

    async fn record_open(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error> {
        Ok(self.mutate(tracking_id, true, |row| {
            let now = Utc::now();
            if matches!(row.status, ResultStatus::Pending | ResultStatus::Sent) {
                row.status = ResultStatus::Opened;
            }
            row.email_opened_at.get_or_insert(now);
            row.last_opened_at = Some(now);
            row.open_count += 1;
            Self::capped_push(&mut row.ip_addresses, &client.ip);
            Self::capped_push(&mut row.user_agents, &client.user_agent);
        }))
    }

    async fn record_click(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error> {
        Ok(self.mutate(tracking_id, true, |row| {
            let now = Utc::now();
            if row.status.stage() < ResultStatus::Clicked.stage() {
                row.status = ResultStatus::Clicked;
            }
            row.email_opened_at.get_or_insert(now);
            row.link_clicked_at.get_or_insert(now);
            row.last_clicked_at = Some(now);
            row.click_count += 1;
            Self::capped_push(&mut row.ip_addresses, &client.ip);
            Self::capped_push(&mut row.user_agents, &client.user_agent);
        }))
    }

    async fn record_submit(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<Option<PhishingResult>, Error> {
        Ok(self.mutate(tracking_id, true, |row| {
            let now = Utc::now();
            if row.status.stage() < ResultStatus::DataSubmitted.stage() {
                row.status = ResultStatus::DataSubmitted;
            }
            row.email_opened_at.get_or_insert(now);
            row.link_clicked_at.get_or_insert(now);
            row.data_submitted_at.get_or_insert(now);
            row.last_submitted_at = Some(now);
            row.submit_count += 1;
            Self::capped_push(&mut row.ip_addresses, &client.ip);
            Self::capped_push(&mut row.user_agents, &client.user_agent);
        }))
    }

    async fn record_report(&self, tracking_id: &str) -> Result<Option<PhishingResult>, Error> {
        Ok(self.mutate(tracking_id, false, |row| {
            let now = Utc::now();
            row.reported = true;
            row.reported_at.get_or_insert(now);
            row.report_count += 1;
        }))
    }

    async fn set_training_required(&self, result_id: Uuid) -> Result<bool, Error> {
        let Some(mut row) = self.rows.get_mut(&result_id) else {
            return Ok(false);
        };
        if row.training_required {
            return Ok(false);
        }
        row.training_required = true;
        Ok(true)
    }

    async fn set_training_completed(&self, result_id: Uuid) -> Result<(), Error> {
        if let Some(mut row) = self.rows.get_mut(&result_id) {
            row.training_completed = true;
        }
        Ok(())
    }

    async fn campaign_counters(&self, campaign_id: Uuid) -> Result<CampaignCounters, Error> {
        let mut counters = CampaignCounters::default();
        for r in self.rows.iter().filter(|r| r.campaign_id == campaign_id) {
            counters.total += 1;
            if r.was_sent() {
                counters.sent += 1;
            }
            if r.status == ResultStatus::Bounced {
                counters.bounced += 1;
            }
            if r.status.stage() >= ResultStatus::Opened.stage() {
                counters.opened += 1;
            }
            if r.clicked_or_submitted() {
                counters.clicked += 1;
            }
            if r.status == ResultStatus::DataSubmitted {
                counters.submitted += 1;
            }
            if r.reported {
                counters.reported += 1;
            }
        }
        Ok(counters)
    }

    async fn user_history(
        &self,
        user_id: Uuid,
        completed_since: DateTime<Utc>,
    ) -> Result<Vec<PhishingResult>, Error> {
        let mut out = Vec::new();
        for r in self.rows.iter().filter(|r| r.user_id == user_id) {
            let Some(c) = self.campaigns.items.get(&r.campaign_id) else {
                continue;
            };
            if c.status == CampaignStatus::Completed
                && c.completed_at.map(|t| t >= completed_since).unwrap_or(false)
            {
                out.push(r.clone());
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryRiskScoreRepository {
    items: DashMap<Uuid, RiskScore>,
}

impl MemoryRiskScoreRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskScoreRepository for MemoryRiskScoreRepository {
    async fn upsert_score(&self, score: &RiskScore) -> Result<(), Error> {
        match self.items.entry(score.user_id) {
            Entry::Occupied(mut e) => {
                let version = e.get().version + 1;
                let mut next = score.clone();
                next.version = version;
                e.insert(next);
            }
            Entry::Vacant(e) => {
                e.insert(score.clone());
            }
        }
        Ok(())
    }

    async fn get_score(&self, user_id: Uuid) -> Result<Option<RiskScore>, Error> {
        Ok(self.items.get(&user_id).map(|s| s.clone()))
    }

    async fn scored_user_ids(&self) -> Result<Vec<Uuid>, Error> {
        Ok(self.items.iter().map(|s| s.user_id).collect())
    }
}
