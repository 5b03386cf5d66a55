//! Fire-and-forget remedial-training assignment.
//!
//! The tracking endpoints must stay fast, so assignment is queued here and
//! delivered to the course-progress collaborator off the request path with
//! at-least-once semantics; the collaborator treats duplicates as no-ops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::collaborators::CourseProgress;

#[derive(Debug, Clone)]
pub struct TrainingAssignment {
    pub user_id: Uuid,
    pub campaign_id: Uuid,
}

const DELIVERY_ATTEMPTS: u32 = 3;
const DELIVERY_RETRY_DELAY: Duration = Duration::from_secs(5);

pub fn spawn_training_assigner(
    course: Arc<dyn CourseProgress>,
    mut rx: mpsc::Receiver<TrainingAssignment>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(assignment) = rx.recv().await {
            let mut delivered = false;
            for attempt in 1..=DELIVERY_ATTEMPTS {
                match course
                    .assign_training(assignment.user_id, assignment.campaign_id)
                    .await
                {
                    Ok(()) => {
                        info!(
                            user_id = %assignment.user_id,
                            campaign_id = %assignment.campaign_id,
                            "remedial training assigned"
                        );
                        delivered = true;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            user_id = %assignment.user_id,
                            attempt,
                            error = %e,
                            "training assignment failed"
                        );
                        if attempt < DELIVERY_ATTEMPTS {
                            tokio::time::sleep(DELIVERY_RETRY_DELAY).await;
                        }
                    }
                }
            }
            if !delivered {
                error!(
                    user_id = %assignment.user_id,
                    campaign_id = %assignment.campaign_id,
                    "giving up on training assignment after {DELIVERY_ATTEMPTS} attempts"
                );
            }
        }
        info!("training assigner shutting down");
    })
}
