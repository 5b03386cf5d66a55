use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    Credential,
    Attachment,
    Link,
    Mixed,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::Credential => "credential",
            TemplateCategory::Attachment => "attachment",
            TemplateCategory::Link => "link",
            TemplateCategory::Mixed => "mixed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "credential" => Some(TemplateCategory::Credential),
            "attachment" => Some(TemplateCategory::Attachment),
            "link" => Some(TemplateCategory::Link),
            "mixed" => Some(TemplateCategory::Mixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            "expert" => Some(Difficulty::Expert),
            _ => None,
        }
    }
}

/// A suspicious element of a template, surfaced to the employee during
/// post-simulation training feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedFlag {
    /// What to look at, e.g. "sender address" or "urgency wording".
    pub element: String,
    /// Why it should have raised suspicion.
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhishingTemplate {
    pub template_id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub category: TemplateCategory,
    pub difficulty: Difficulty,
    pub subject: String,
    pub body_html: String,
    pub red_flags: Vec<RedFlag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhishingTemplate {
    pub fn new(
        company_id: Uuid,
        name: &str,
        category: TemplateCategory,
        difficulty: Difficulty,
        subject: &str,
        body_html: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            template_id: Uuid::new_v4(),
            company_id,
            name: name.to_string(),
            category,
            difficulty,
            subject: subject.to_string(),
            body_html: body_html.to_string(),
            red_flags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
