use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::template::{Difficulty, RedFlag, TemplateCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "scheduled" => Some(CampaignStatus::Scheduled),
            "running" => Some(CampaignStatus::Running),
            "completed" => Some(CampaignStatus::Completed),
            "cancelled" => Some(CampaignStatus::Cancelled),
            _ => None,
        }
    }
}

/// Which employees a campaign targets. Resolved once at launch through the
/// user directory; later directory changes do not affect a running campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSelector {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
}

impl TargetSelector {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.departments.is_empty() && self.user_ids.is_empty()
    }
}

/// Immutable copy of the template content taken at launch time, so that
/// later template edits never change what a launched campaign actually sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub subject: String,
    pub body_html: String,
    pub category: TemplateCategory,
    pub difficulty: Difficulty,
    pub red_flags: Vec<RedFlag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhishingCampaign {
    pub campaign_id: Uuid,
    pub company_id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub selector: TargetSelector,
    pub excluded_user_ids: Vec<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tracking_window_days: i32,
    /// Filled at launch (copy-on-launch); None while draft/scheduled.
    pub template_snapshot: Option<TemplateSnapshot>,
    pub send_failures: i32,
    pub created_at: DateTime<Utc>,
}

impl PhishingCampaign {
    pub fn new(company_id: Uuid, template_id: Uuid, name: &str, selector: TargetSelector) -> Self {
        Self {
            campaign_id: Uuid::new_v4(),
            company_id,
            template_id,
            name: name.to_string(),
            status: CampaignStatus::Draft,
            selector,
            excluded_user_ids: Vec::new(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            tracking_window_days: 7,
            template_snapshot: None,
            send_failures: 0,
            created_at: Utc::now(),
        }
    }

    /// When the tracking window closes, relative to launch.
    pub fn tracking_window_ends_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|t| t + chrono::Duration::days(self.tracking_window_days as i64))
    }
}

/// Aggregate counters for one campaign, always recomputed from the result
/// rows rather than maintained incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub total: i64,
    pub sent: i64,
    pub bounced: i64,
    pub opened: i64,
    pub clicked: i64,
    pub submitted: i64,
    pub reported: i64,
}
