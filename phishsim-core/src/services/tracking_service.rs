//! Applies validated state transitions for open/click/submit/report events.
//!
//! Every handler is idempotent under retries, proxy pre-fetches and double
//! clicks: the result store applies a monotonic-max transition, so repeat
//! events only bump counters and last-seen timestamps. Invalid tokens get
//! the same response shape as valid ones so the public endpoints cannot be
//! used to enumerate recipients.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use phishsim_common::models::campaign::CampaignStatus;
use phishsim_common::models::result::{ClientInfo, PhishingResult};
use phishsim_common::traits::repository_traits::{CampaignRepository, ResultRepository};
use uuid::Uuid;

use crate::services::training_assigner::TrainingAssignment;
use crate::token;
use crate::Error;

/// Where tracking hits get redirected.
#[derive(Debug, Clone)]
pub struct TrackingPages {
    /// "You were phished" training landing page.
    pub landing_url: String,
    /// Neutral page for tokens we do not recognize.
    pub neutral_url: String,
}

pub struct TrackingService {
    results: Arc<dyn ResultRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    training_tx: mpsc::Sender<TrainingAssignment>,
    risk_tx: mpsc::Sender<Uuid>,
    pages: TrackingPages,
}

impl TrackingService {
    pub fn new(
        results: Arc<dyn ResultRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        training_tx: mpsc::Sender<TrainingAssignment>,
        risk_tx: mpsc::Sender<Uuid>,
        pages: TrackingPages,
    ) -> Self {
        Self {
            results,
            campaigns,
            training_tx,
            risk_tx,
            pages,
        }
    }

    pub fn neutral_url(&self) -> &str {
        &self.pages.neutral_url
    }

    /// Token -> live row, or None when the event must be absorbed: token
    /// malformed/unknown, or the campaign no longer accepts transitions.
    /// Fast path only; the result store re-checks the campaign status
    /// inside the conditional update, so a sweep racing past this check
    /// cannot slip a late event in.
    async fn gate(&self, tracking_id: &str) -> Result<Option<PhishingResult>, Error> {
        if !token::is_well_formed(tracking_id) {
            warn!(token = tracking_id, "malformed tracking token");
            return Ok(None);
        }
        let Some(row) = self.results.get_by_tracking_id(tracking_id).await? else {
            // logged for anomaly monitoring; a burst of these is a scan
            warn!(token = tracking_id, "unknown tracking token");
            return Ok(None);
        };
        let Some(campaign) = self.campaigns.get_campaign(row.campaign_id).await? else {
            warn!(campaign_id = %row.campaign_id, "result row without campaign");
            return Ok(None);
        };
        if campaign.status != CampaignStatus::Running {
            debug!(
                campaign_id = %row.campaign_id,
                status = campaign.status.as_str(),
                "event after tracking window, absorbing"
            );
            return Ok(None);
        }
        Ok(Some(row))
    }

    /// Open-pixel hit. Callers return the pixel regardless of outcome.
    pub async fn handle_open(&self, tracking_id: &str, client: &ClientInfo) -> Result<(), Error> {
        if self.gate(tracking_id).await?.is_some() {
            self.results.record_open(tracking_id, client).await?;
        }
        Ok(())
    }

    /// Link click. Returns the redirect target: the training landing page
    /// for recognized tokens, the neutral page otherwise — always a 302.
    pub async fn handle_click(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<String, Error> {
        match self.gate(tracking_id).await? {
            Some(_) => {
                if let Some(row) = self.results.record_click(tracking_id, client).await? {
                    self.after_failure_event(&row).await?;
                }
                Ok(self.pages.landing_url.clone())
            }
            None => {
                // resolved-but-closed tokens still land somewhere sensible
                if token::is_well_formed(tracking_id)
                    && self.results.get_by_tracking_id(tracking_id).await?.is_some()
                {
                    Ok(self.pages.landing_url.clone())
                } else {
                    Ok(self.pages.neutral_url.clone())
                }
            }
        }
    }

    /// Form submission on the decoy page. The submitted values are counted
    /// and discarded; we never store what the user typed.
    pub async fn handle_submit(
        &self,
        tracking_id: &str,
        client: &ClientInfo,
    ) -> Result<String, Error> {
        match self.gate(tracking_id).await? {
            Some(_) => {
                if let Some(row) = self.results.record_submit(tracking_id, client).await? {
                    self.after_failure_event(&row).await?;
                }
                Ok(self.pages.landing_url.clone())
            }
            None => Ok(self.pages.neutral_url.clone()),
        }
    }

    /// Self-report. Sticky, independent of status, and valid indefinitely —
    /// even after the campaign completed. Callers return 200 regardless.
    pub async fn handle_report(&self, tracking_id: &str) -> Result<(), Error> {
        if !token::is_well_formed(tracking_id) {
            warn!(token = tracking_id, "malformed tracking token on report");
            return Ok(());
        }
        if let Some(row) = self.results.record_report(tracking_id).await? {
            debug!(campaign_id = %row.campaign_id, user_id = %row.user_id, "self-report recorded");
            self.queue_recompute(row.user_id);
        } else {
            warn!(token = tracking_id, "report for unknown tracking token");
        }
        Ok(())
    }

    /// After a click or submit: flag remedial training exactly once and
    /// queue a risk recompute, both off the request path.
    async fn after_failure_event(&self, row: &PhishingResult) -> Result<(), Error> {
        if !row.clicked_or_submitted() {
            return Ok(());
        }
        let newly_flagged = self.results.set_training_required(row.result_id).await?;
        if newly_flagged {
            let assignment = TrainingAssignment {
                user_id: row.user_id,
                campaign_id: row.campaign_id,
            };
            if self.training_tx.try_send(assignment).is_err() {
                warn!(user_id = %row.user_id, "training queue rejected assignment");
            }
        }
        self.queue_recompute(row.user_id);
        Ok(())
    }

    fn queue_recompute(&self, user_id: Uuid) {
        if self.risk_tx.try_send(user_id).is_err() {
            warn!(user_id = %user_id, "risk recompute queue full, dropping trigger");
        }
    }
}
