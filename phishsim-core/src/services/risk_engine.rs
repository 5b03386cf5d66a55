//! Risk scoring engine.
//!
//! `recompute` always rebuilds the score from the full current history, so
//! concurrent recomputes can only waste work, never corrupt state: the last
//! writer wins with a value any of the writers would have produced.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use phishsim_common::models::risk::RiskScore;
use phishsim_common::traits::repository_traits::{ResultRepository, RiskScoreRepository};

use crate::collaborators::{CourseProgress, UserDirectory};
use crate::Error;

/// Campaigns completed within this window count toward the phishing
/// component (trailing six months).
pub const TRAILING_WINDOW_DAYS: i64 = 183;

pub struct RiskScoringEngine {
    results: Arc<dyn ResultRepository>,
    scores: Arc<dyn RiskScoreRepository>,
    directory: Arc<dyn UserDirectory>,
    course: Arc<dyn CourseProgress>,
}

impl RiskScoringEngine {
    pub fn new(
        results: Arc<dyn ResultRepository>,
        scores: Arc<dyn RiskScoreRepository>,
        directory: Arc<dyn UserDirectory>,
        course: Arc<dyn CourseProgress>,
    ) -> Self {
        Self {
            results,
            scores,
            directory,
            course,
        }
    }

    /// Recompute and persist one user's score from scratch. Idempotent:
    /// with no intervening events, a second call produces the identical
    /// score and component breakdown.
    pub async fn recompute(&self, user_id: Uuid) -> Result<RiskScore, Error> {
        let now = Utc::now();
        let since = now - Duration::days(TRAILING_WINDOW_DAYS);

        let history = self.results.user_history(user_id, since).await?;
        let sent = history.iter().filter(|r| r.was_sent()).count();
        let failed = history.iter().filter(|r| r.clicked_or_submitted()).count();
        // No exposure yet -> neutral midpoint, so new users are neither
        // rewarded nor penalized.
        let phishing = if sent == 0 {
            RiskScore::NEUTRAL_PHISHING
        } else {
            100.0 * failed as f64 / sent as f64
        };

        let completion = self.course.completion_ratio(user_id).await?;
        let training = 100.0 - 100.0 * completion.clamp(0.0, 1.0);

        let last_trained = self.course.last_completed_at(user_id).await?;
        let recency = recency_component(last_trained, now);

        let role = self.directory.get_role(user_id).await?.risk_weight();

        let score = RiskScore::compose(user_id, phishing, training, recency, role);
        self.scores.upsert_score(&score).await?;
        Ok(score)
    }

    /// Recompute every user touched by a campaign, typically right after
    /// the campaign completes. Per-user failures are logged and skipped.
    pub async fn recompute_for_campaign(&self, campaign_id: Uuid) -> Result<(), Error> {
        let rows = self.results.list_for_campaign(campaign_id).await?;
        let mut user_ids: Vec<Uuid> = rows.iter().map(|r| r.user_id).collect();
        user_ids.sort_unstable();
        user_ids.dedup();

        info!(campaign_id = %campaign_id, users = user_ids.len(), "recomputing risk scores");
        for user_id in user_ids {
            if let Err(e) = self.recompute(user_id).await {
                error!(user_id = %user_id, error = %e, "risk recompute failed");
            }
        }
        Ok(())
    }
}

/// Step function over time since last completed training. Scores must rise
/// as training goes stale even with no new events.
pub fn recency_component(last_trained: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(last) = last_trained else {
        return 100.0;
    };
    let age = now - last;
    if age <= Duration::days(90) {
        0.0
    } else if age <= Duration::days(183) {
        25.0
    } else if age <= Duration::days(365) {
        50.0
    } else {
        100.0
    }
}

/// Drains recompute triggers queued by the tracking service so the public
/// endpoints never wait on scoring.
pub fn spawn_risk_worker(
    engine: Arc<RiskScoringEngine>,
    mut rx: mpsc::Receiver<Uuid>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(user_id) = rx.recv().await {
            if let Err(e) = engine.recompute(user_id).await {
                error!(user_id = %user_id, error = %e, "queued risk recompute failed");
            }
        }
        info!("risk worker shutting down");
    })
}
