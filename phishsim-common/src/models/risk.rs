use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived 0-100 risk metric for one user, recomputed from full history —
/// never edited by hand and never updated with deltas.
///
/// The four components are persisted alongside the final score so a
/// compliance reviewer can see *why* a user scores the way they do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub user_id: Uuid,
    pub score: f64,
    /// Click-or-submit rate (percent) over campaigns completed in the
    /// trailing six months; 50.0 for users with no exposure yet.
    pub phishing_component: f64,
    /// 100 minus the mandatory-course completion percentage.
    pub training_component: f64,
    /// Step function over time since last completed training.
    pub recency_component: f64,
    /// Fixed weight by role.
    pub role_component: f64,
    pub version: i64,
    pub computed_at: DateTime<Utc>,
}

impl RiskScore {
    pub const WEIGHT_PHISHING: f64 = 0.4;
    pub const WEIGHT_TRAINING: f64 = 0.3;
    pub const WEIGHT_RECENCY: f64 = 0.2;
    pub const WEIGHT_ROLE: f64 = 0.1;

    /// Neutral midpoint for users with no campaign exposure.
    pub const NEUTRAL_PHISHING: f64 = 50.0;

    pub fn compose(
        user_id: Uuid,
        phishing: f64,
        training: f64,
        recency: f64,
        role: f64,
    ) -> Self {
        let score = Self::WEIGHT_PHISHING * phishing
            + Self::WEIGHT_TRAINING * training
            + Self::WEIGHT_RECENCY * recency
            + Self::WEIGHT_ROLE * role;
        Self {
            user_id,
            score: score.clamp(0.0, 100.0),
            phishing_component: phishing,
            training_component: training,
            recency_component: recency,
            role_component: role,
            version: 1,
            computed_at: Utc::now(),
        }
    }
}
