// File: phishsim-common/src/models/mod.rs
pub mod template;
pub mod campaign;
pub mod result;
pub mod risk;
pub mod recipient;

pub use template::{Difficulty, PhishingTemplate, RedFlag, TemplateCategory};
pub use campaign::{CampaignCounters, CampaignStatus, PhishingCampaign, TargetSelector, TemplateSnapshot};
pub use result::{ClientInfo, PhishingResult, ResultStatus};
pub use risk::RiskScore;
pub use recipient::{Recipient, Role};
