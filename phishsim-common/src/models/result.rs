use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How many distinct client addresses / user agents we keep per row.
pub const CLIENT_LIST_CAP: usize = 10;

/// Highest stage a recipient has reached for one campaign.
///
/// `Bounced` is a terminal branch off the send path, not part of the
/// open/click/submit progression; `stage()` gives the rank used by the
/// monotonic-max update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Pending,
    Sent,
    Bounced,
    Opened,
    Clicked,
    DataSubmitted,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "pending",
            ResultStatus::Sent => "sent",
            ResultStatus::Bounced => "bounced",
            ResultStatus::Opened => "opened",
            ResultStatus::Clicked => "clicked",
            ResultStatus::DataSubmitted => "data_submitted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ResultStatus::Pending),
            "sent" => Some(ResultStatus::Sent),
            "bounced" => Some(ResultStatus::Bounced),
            "opened" => Some(ResultStatus::Opened),
            "clicked" => Some(ResultStatus::Clicked),
            "data_submitted" => Some(ResultStatus::DataSubmitted),
            _ => None,
        }
    }

    /// Rank for monotonic-max comparisons. Bounced shares the `sent` rank
    /// but additionally refuses every tracking transition.
    pub fn stage(&self) -> u8 {
        match self {
            ResultStatus::Pending => 0,
            ResultStatus::Sent | ResultStatus::Bounced => 1,
            ResultStatus::Opened => 2,
            ResultStatus::Clicked => 3,
            ResultStatus::DataSubmitted => 4,
        }
    }
}

/// Request metadata captured at the tracking endpoints.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhishingResult {
    pub result_id: Uuid,
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    /// Opaque random token embedded in outbound links; globally unique,
    /// immutable, carries no semantics.
    pub tracking_id: String,
    pub status: ResultStatus,
    /// Sticky; can become true from any non-bounced status and never reverts.
    pub reported: bool,
    pub reported_at: Option<DateTime<Utc>>,
    pub report_count: i32,

    pub sent_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub send_attempts: i32,

    pub email_opened_at: Option<DateTime<Utc>>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub open_count: i32,

    pub link_clicked_at: Option<DateTime<Utc>>,
    pub last_clicked_at: Option<DateTime<Utc>>,
    pub click_count: i32,

    pub data_submitted_at: Option<DateTime<Utc>>,
    pub last_submitted_at: Option<DateTime<Utc>>,
    pub submit_count: i32,

    pub ip_addresses: Vec<String>,
    pub user_agents: Vec<String>,

    pub training_required: bool,
    pub training_completed: bool,

    pub created_at: DateTime<Utc>,
}

impl PhishingResult {
    pub fn new(campaign_id: Uuid, user_id: Uuid, tracking_id: String) -> Self {
        Self {
            result_id: Uuid::new_v4(),
            campaign_id,
            user_id,
            tracking_id,
            status: ResultStatus::Pending,
            reported: false,
            reported_at: None,
            report_count: 0,
            sent_at: None,
            bounced_at: None,
            send_attempts: 0,
            email_opened_at: None,
            last_opened_at: None,
            open_count: 0,
            link_clicked_at: None,
            last_clicked_at: None,
            click_count: 0,
            data_submitted_at: None,
            last_submitted_at: None,
            submit_count: 0,
            ip_addresses: Vec::new(),
            user_agents: Vec::new(),
            training_required: false,
            training_completed: false,
            created_at: Utc::now(),
        }
    }

    /// Whether the row counts as delivered for aggregate/scoring purposes.
    pub fn was_sent(&self) -> bool {
        self.status != ResultStatus::Pending && self.status != ResultStatus::Bounced
    }

    pub fn clicked_or_submitted(&self) -> bool {
        matches!(self.status, ResultStatus::Clicked | ResultStatus::DataSubmitted)
    }
}
