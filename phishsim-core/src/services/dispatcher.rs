//! Campaign dispatcher: resolves recipients, creates result rows, and
//! drives outbound send through the mail collaborator on a bounded worker
//! pool with per-attempt timeout and exponential backoff.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use phishsim_common::models::campaign::{CampaignStatus, TemplateSnapshot};
use phishsim_common::models::recipient::Recipient;
use phishsim_common::models::result::PhishingResult;
use phishsim_common::traits::repository_traits::{
    CampaignRepository, ResultRepository, TemplateRepository,
};

use crate::collaborators::MailTransport;
use crate::token;
use crate::Error;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Parallel send workers per campaign. Tens, not thousands; the mail
    /// provider's rate limit is the real ceiling.
    pub workers: usize,
    /// Hard timeout per send attempt.
    pub send_timeout: Duration,
    /// Total attempts per recipient before the row is written off as bounced.
    pub max_attempts: u32,
    /// First backoff delay; doubles per retry.
    pub retry_base_delay: Duration,
    /// Public base URL tracking links are built against.
    pub base_url: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            send_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            base_url: "http://localhost:8080".to_string(),
        }
    }
}

struct SendJob {
    result_id: Uuid,
    tracking_id: String,
    recipient: Recipient,
}

pub struct CampaignDispatcher {
    campaigns: Arc<dyn CampaignRepository>,
    templates: Arc<dyn TemplateRepository>,
    results: Arc<dyn ResultRepository>,
    mail: Arc<dyn MailTransport>,
    directory: Arc<dyn crate::collaborators::UserDirectory>,
    config: DispatcherConfig,
    /// Per-campaign cancellation flags observed by workers between sends.
    cancel_flags: DashMap<Uuid, watch::Sender<bool>>,
}

impl CampaignDispatcher {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        templates: Arc<dyn TemplateRepository>,
        results: Arc<dyn ResultRepository>,
        mail: Arc<dyn MailTransport>,
        directory: Arc<dyn crate::collaborators::UserDirectory>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            campaigns,
            templates,
            results,
            mail,
            directory,
            config,
            cancel_flags: DashMap::new(),
        }
    }

    /// Launch a campaign: snapshot the template, resolve recipients once,
    /// create pending result rows, then start the send loop and return.
    ///
    /// Launch-time failures (wrong state, empty recipient list) surface
    /// synchronously; individual send failures only show up later in the
    /// campaign summary.
    pub async fn launch(self: Arc<Self>, campaign_id: Uuid) -> Result<(), Error> {
        let campaign = self
            .campaigns
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("campaign {campaign_id}")))?;

        if !matches!(
            campaign.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled
        ) {
            return Err(Error::CampaignState(format!(
                "campaign {campaign_id} is {}, expected draft or scheduled",
                campaign.status.as_str()
            )));
        }

        let template = self
            .templates
            .get_template(campaign.template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("template {}", campaign.template_id)))?;

        // One-time recipient snapshot; directory changes after this point
        // do not touch the campaign.
        let mut recipients = self
            .directory
            .resolve_targets(campaign.company_id, &campaign.selector)
            .await?;
        recipients.retain(|r| !campaign.excluded_user_ids.contains(&r.user_id));
        if recipients.is_empty() {
            return Err(Error::CampaignState(format!(
                "campaign {campaign_id} resolved zero non-excluded recipients"
            )));
        }

        let snapshot = TemplateSnapshot {
            subject: template.subject.clone(),
            body_html: template.body_html.clone(),
            category: template.category,
            difficulty: template.difficulty,
            red_flags: template.red_flags.clone(),
        };
        self.campaigns.snapshot_template(campaign_id, &snapshot).await?;

        // Result rows are created before the status flips: a failure here
        // leaves the campaign in draft/scheduled instead of running with
        // no send loop behind it.
        let mut jobs = VecDeque::with_capacity(recipients.len());
        for recipient in recipients {
            let tracking_id = token::mint_tracking_id()?;
            let row = PhishingResult::new(campaign_id, recipient.user_id, tracking_id.clone());
            self.results.create_result(&row).await?;
            jobs.push_back(SendJob {
                result_id: row.result_id,
                tracking_id,
                recipient,
            });
        }

        let moved = self
            .campaigns
            .transition_status(
                campaign_id,
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                CampaignStatus::Running,
            )
            .await?;
        if !moved {
            // lost a race with another launcher or a cancel; the pending
            // rows never see a send loop, which is what cancel means
            return Err(Error::CampaignState(format!(
                "campaign {campaign_id} changed state during launch"
            )));
        }

        info!(
            campaign_id = %campaign_id,
            recipients = jobs.len(),
            "campaign launched, dispatching sends"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancel_flags.insert(campaign_id, cancel_tx);
        Self::spawn_send_loop(self, campaign_id, snapshot, jobs, cancel_rx);
        Ok(())
    }

    /// Only legal while scheduled or running. Halts outstanding sends at
    /// the next between-sends check; already-dispatched mail stays sent.
    pub async fn cancel(&self, campaign_id: Uuid) -> Result<(), Error> {
        let moved = self
            .campaigns
            .transition_status(
                campaign_id,
                &[CampaignStatus::Scheduled, CampaignStatus::Running],
                CampaignStatus::Cancelled,
            )
            .await?;
        if !moved {
            return Err(Error::CampaignState(format!(
                "campaign {campaign_id} is not scheduled or running"
            )));
        }
        if let Some(flag) = self.cancel_flags.get(&campaign_id) {
            let _ = flag.send(true);
        }
        info!(campaign_id = %campaign_id, "campaign cancelled");
        Ok(())
    }

    fn spawn_send_loop(
        this: Arc<Self>,
        campaign_id: Uuid,
        snapshot: TemplateSnapshot,
        jobs: VecDeque<SendJob>,
        cancel_rx: watch::Receiver<bool>,
    ) {
        let queue = Arc::new(Mutex::new(jobs));
        let snapshot = Arc::new(snapshot);
        let mut handles = Vec::with_capacity(this.config.workers);

        for worker in 0..this.config.workers {
            let this = Arc::clone(&this);
            let queue = Arc::clone(&queue);
            let snapshot = Arc::clone(&snapshot);
            let cancel_rx = cancel_rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if *cancel_rx.borrow() {
                        debug!(campaign_id = %campaign_id, worker, "send worker observed cancel");
                        break;
                    }
                    let job = { queue.lock().await.pop_front() };
                    let Some(job) = job else { break };
                    // failures are isolated per recipient
                    if let Err(e) = this.send_one(campaign_id, &snapshot, &job, &cancel_rx).await {
                        error!(
                            campaign_id = %campaign_id,
                            user_id = %job.recipient.user_id,
                            error = %e,
                            "unrecoverable dispatch error for recipient"
                        );
                    }
                }
            }));
        }

        tokio::spawn(async move {
            for h in handles {
                let _ = h.await;
            }
            this.cancel_flags.remove(&campaign_id);
            info!(campaign_id = %campaign_id, "send loop finished");
        });
    }

    async fn send_one(
        &self,
        campaign_id: Uuid,
        snapshot: &TemplateSnapshot,
        job: &SendJob,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Result<(), Error> {
        // Self-reported recipients short-circuit any not-yet-sent delivery.
        if let Some(row) = self.results.get_by_tracking_id(&job.tracking_id).await? {
            if row.reported {
                warn!(
                    campaign_id = %campaign_id,
                    user_id = %job.recipient.user_id,
                    "recipient already reported, skipping send"
                );
                return Ok(());
            }
        }

        let subject = render(&snapshot.subject, &job.recipient, &self.config.base_url, &job.tracking_id);
        let body = render_body(&snapshot.body_html, &job.recipient, &self.config.base_url, &job.tracking_id);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(
                self.config.send_timeout,
                self.mail.send(&job.recipient.email, &subject, &body),
            )
            .await;

            let err = match outcome {
                Ok(Ok(())) => {
                    self.results.mark_sent(job.result_id, attempt as i32).await?;
                    debug!(campaign_id = %campaign_id, to = %job.recipient.email, attempt, "mail handed off");
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(elapsed) => Error::Timeout(elapsed),
            };

            if let Error::PermanentSend(reason) = &err {
                warn!(
                    campaign_id = %campaign_id,
                    to = %job.recipient.email,
                    reason = %reason,
                    "permanent send failure, marking bounced"
                );
                self.results.mark_bounced(job.result_id, attempt as i32).await?;
                return Ok(());
            }

            if attempt >= self.config.max_attempts {
                error!(
                    campaign_id = %campaign_id,
                    to = %job.recipient.email,
                    attempts = attempt,
                    error = %err,
                    "retry budget exhausted, marking bounced"
                );
                self.results.mark_bounced(job.result_id, attempt as i32).await?;
                self.campaigns.increment_send_failures(campaign_id).await?;
                return Ok(());
            }

            let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempt - 1);
            debug!(
                campaign_id = %campaign_id,
                to = %job.recipient.email,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient send failure, backing off"
            );
            tokio::time::sleep(delay).await;

            // a cancel during the backoff ends the retry budget too; the
            // row stays pending like the rest of the unsent queue
            if *cancel_rx.borrow() {
                debug!(
                    campaign_id = %campaign_id,
                    to = %job.recipient.email,
                    "cancel observed during retry backoff, abandoning send"
                );
                return Ok(());
            }
        }
    }
}

pub fn tracking_url(base_url: &str, tracking_id: &str) -> String {
    format!("{}/phishing/track/{}", base_url.trim_end_matches('/'), tracking_id)
}

pub fn open_pixel_url(base_url: &str, tracking_id: &str) -> String {
    format!("{}/phishing/open/{}", base_url.trim_end_matches('/'), tracking_id)
}

pub fn report_url(base_url: &str, tracking_id: &str) -> String {
    format!("{}/phishing/report/{}", base_url.trim_end_matches('/'), tracking_id)
}

fn render(text: &str, recipient: &Recipient, base_url: &str, tracking_id: &str) -> String {
    let name = recipient
        .display_name
        .as_deref()
        .unwrap_or(recipient.email.as_str());
    text.replace("{{recipient_name}}", name)
        .replace("{{recipient_email}}", &recipient.email)
        .replace("{{tracking_url}}", &tracking_url(base_url, tracking_id))
        .replace("{{open_pixel_url}}", &open_pixel_url(base_url, tracking_id))
        .replace("{{report_url}}", &report_url(base_url, tracking_id))
}

/// Like `render`, but guarantees the open pixel is present even when the
/// template author forgot the placeholder.
fn render_body(body: &str, recipient: &Recipient, base_url: &str, tracking_id: &str) -> String {
    let had_pixel = body.contains("{{open_pixel_url}}");
    let mut out = render(body, recipient, base_url, tracking_id);
    if !had_pixel {
        out.push_str(&format!(
            r#"<img src="{}" width="1" height="1" alt="">"#,
            open_pixel_url(base_url, tracking_id)
        ));
    }
    out
}
