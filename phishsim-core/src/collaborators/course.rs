use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::Error;

/// Course-progress service: remedial training assignment plus the
/// completion data the risk engine consumes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CourseProgress: Send + Sync {
    /// Assign the remedial course for a failed simulation. Idempotent on
    /// the collaborator side; calling twice for the same (user, campaign)
    /// is a no-op there.
    async fn assign_training(&self, user_id: Uuid, campaign_id: Uuid) -> Result<(), Error>;

    /// Mandatory-course completion ratio in [0, 1].
    async fn completion_ratio(&self, user_id: Uuid) -> Result<f64, Error>;

    /// When the user last completed any training, if ever.
    async fn last_completed_at(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>, Error>;
}

#[derive(Clone)]
pub struct HttpCourseProgress {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCourseProgress {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CourseProgress for HttpCourseProgress {
    async fn assign_training(&self, user_id: Uuid, campaign_id: Uuid) -> Result<(), Error> {
        let url = format!("{}/users/{}/assignments", self.base_url, user_id);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "reason": "phishing_simulation",
                "campaign_id": campaign_id,
            }))
            .send()
            .await?;
        // 409 = already assigned; that is the idempotent no-op case
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(Error::Parse(format!(
                "course service returned {} for {}",
                resp.status(),
                url
            )))
        }
    }

    async fn completion_ratio(&self, user_id: Uuid) -> Result<f64, Error> {
        let url = format!("{}/users/{}/completion", self.base_url, user_id);
        let resp = self.client.get(&url).send().await?;
        Ok(resp.json::<f64>().await?.clamp(0.0, 1.0))
    }

    async fn last_completed_at(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>, Error> {
        let url = format!("{}/users/{}/last-completed", self.base_url, user_id);
        let resp = self.client.get(&url).send().await?;
        Ok(resp.json::<Option<DateTime<Utc>>>().await?)
    }
}
