//! Admin-facing campaign operations. Transport (authn, routing) lives with
//! the wider management API; this service is the behavioral surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use phishsim_common::models::campaign::{
    CampaignCounters, CampaignStatus, PhishingCampaign, TargetSelector,
};
use phishsim_common::models::template::PhishingTemplate;
use phishsim_common::traits::repository_traits::{
    CampaignRepository, ResultRepository, TemplateRepository,
};

use crate::services::dispatcher::CampaignDispatcher;
use crate::Error;

/// Campaign plus its recomputed aggregate counters.
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub campaign: PhishingCampaign,
    pub counters: CampaignCounters,
}

pub struct CampaignService {
    templates: Arc<dyn TemplateRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    results: Arc<dyn ResultRepository>,
    dispatcher: Arc<CampaignDispatcher>,
}

impl CampaignService {
    pub fn new(
        templates: Arc<dyn TemplateRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        results: Arc<dyn ResultRepository>,
        dispatcher: Arc<CampaignDispatcher>,
    ) -> Self {
        Self {
            templates,
            campaigns,
            results,
            dispatcher,
        }
    }

    pub async fn create_template(&self, template: &PhishingTemplate) -> Result<(), Error> {
        self.templates.create_template(template).await
    }

    pub async fn list_templates(&self, company_id: Uuid) -> Result<Vec<PhishingTemplate>, Error> {
        self.templates.list_templates(company_id).await
    }

    pub async fn create_campaign(
        &self,
        company_id: Uuid,
        template_id: Uuid,
        name: &str,
        selector: TargetSelector,
    ) -> Result<PhishingCampaign, Error> {
        if selector.is_empty() {
            return Err(Error::CampaignState(
                "campaign needs a non-empty target selector".into(),
            ));
        }
        self.templates
            .get_template(template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template {template_id}")))?;

        let campaign = PhishingCampaign::new(company_id, template_id, name, selector);
        self.campaigns.create_campaign(&campaign).await?;
        info!(campaign_id = %campaign.campaign_id, name, "campaign created");
        Ok(campaign)
    }

    pub async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<PhishingCampaign>, Error> {
        self.campaigns.get_campaign(campaign_id).await
    }

    pub async fn list_campaigns(&self, company_id: Uuid) -> Result<Vec<PhishingCampaign>, Error> {
        self.campaigns.list_campaigns(company_id).await
    }

    /// draft -> scheduled; the sweep launches it once `at` arrives.
    ///
    /// The transition runs first so a refused schedule leaves the row
    /// untouched; the sweep ignores scheduled campaigns until
    /// `scheduled_at` lands right after.
    pub async fn schedule(&self, campaign_id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
        let moved = self
            .campaigns
            .transition_status(campaign_id, &[CampaignStatus::Draft], CampaignStatus::Scheduled)
            .await?;
        if !moved {
            return Err(Error::CampaignState(format!(
                "campaign {campaign_id} is not a draft"
            )));
        }
        self.campaigns.set_schedule(campaign_id, at).await?;
        info!(campaign_id = %campaign_id, at = %at, "campaign scheduled");
        Ok(())
    }

    pub async fn launch(&self, campaign_id: Uuid) -> Result<(), Error> {
        Arc::clone(&self.dispatcher).launch(campaign_id).await
    }

    pub async fn cancel(&self, campaign_id: Uuid) -> Result<(), Error> {
        self.dispatcher.cancel(campaign_id).await
    }

    pub async fn summary(&self, campaign_id: Uuid) -> Result<CampaignSummary, Error> {
        let campaign = self
            .campaigns
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("campaign {campaign_id}")))?;
        let counters = self.results.campaign_counters(campaign_id).await?;
        Ok(CampaignSummary { campaign, counters })
    }
}
