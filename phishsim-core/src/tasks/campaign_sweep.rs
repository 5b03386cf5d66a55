//! Scheduled campaign maintenance: launches scheduled campaigns whose time
//! has come and completes running campaigns whose tracking window elapsed.
//! The pass is idempotent — both transitions are conditional updates, so a
//! second sweep over the same state is a no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use phishsim_common::models::campaign::CampaignStatus;
use phishsim_common::traits::repository_traits::CampaignRepository;

use crate::services::dispatcher::CampaignDispatcher;
use crate::services::risk_engine::RiskScoringEngine;
use crate::Error;

pub async fn run_campaign_sweep(
    campaigns: &Arc<dyn CampaignRepository>,
    dispatcher: &Arc<CampaignDispatcher>,
    risk: &Arc<RiskScoringEngine>,
) -> Result<(), Error> {
    let now = Utc::now();

    for campaign in campaigns.due_for_launch(now).await? {
        info!(campaign_id = %campaign.campaign_id, "scheduled launch time reached");
        if let Err(e) = Arc::clone(dispatcher).launch(campaign.campaign_id).await {
            error!(campaign_id = %campaign.campaign_id, error = %e, "scheduled launch failed");
        }
    }

    for campaign in campaigns.due_for_completion(now).await? {
        let moved = campaigns
            .transition_status(
                campaign.campaign_id,
                &[CampaignStatus::Running],
                CampaignStatus::Completed,
            )
            .await?;
        if moved {
            info!(campaign_id = %campaign.campaign_id, "tracking window elapsed, campaign completed");
            if let Err(e) = risk.recompute_for_campaign(campaign.campaign_id).await {
                error!(campaign_id = %campaign.campaign_id, error = %e, "post-completion risk recompute failed");
            }
        }
    }

    Ok(())
}

pub fn spawn_campaign_sweep(
    campaigns: Arc<dyn CampaignRepository>,
    dispatcher: Arc<CampaignDispatcher>,
    risk: Arc<RiskScoringEngine>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = run_campaign_sweep(&campaigns, &dispatcher, &risk).await {
                error!(error = %e, "campaign sweep failed");
            }
        }
    })
}
