//! Nightly risk recompute. The recency component is time-dependent, so a
//! user's score has to drift upward as training goes stale even when no new
//! tracking events arrive.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use phishsim_common::traits::repository_traits::RiskScoreRepository;

use crate::services::risk_engine::RiskScoringEngine;
use crate::Error;

pub async fn run_risk_sweep(
    scores: &Arc<dyn RiskScoreRepository>,
    engine: &Arc<RiskScoringEngine>,
) -> Result<(), Error> {
    let user_ids = scores.scored_user_ids().await?;
    info!(users = user_ids.len(), "running risk recency sweep");
    for user_id in user_ids {
        if let Err(e) = engine.recompute(user_id).await {
            error!(user_id = %user_id, error = %e, "sweep recompute failed");
        }
    }
    Ok(())
}

pub fn spawn_risk_sweep(
    scores: Arc<dyn RiskScoreRepository>,
    engine: Arc<RiskScoringEngine>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = run_risk_sweep(&scores, &engine).await {
                error!(error = %e, "risk sweep failed");
            }
        }
    })
}
